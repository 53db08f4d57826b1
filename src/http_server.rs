use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, services::ServeDir};

use crate::{
    error::{PanelError, Result},
    models::{BulkResponse, ConnectionStatus, DisconnectResponse, SendRequest, StatusResponse},
    upload::handle_upload_media,
    Panel,
};

const MAX_BODY_BYTES: usize = 1024 * 1024 * 1024;

impl Panel {
    pub async fn start_http_server(&self) -> Result<()> {
        let app = self.create_router();
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));

        let listener = TcpListener::bind(&addr).await?;
        info!("Server running on port {}", self.config.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/status", get(handle_status))
            .route("/disconnect", post(handle_disconnect))
            .route("/send-bulk-messages", post(handle_send_bulk))
            .route("/upload-media", post(handle_upload_media))
            .nest_service("/uploads", ServeDir::new(&self.config.upload_dir))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(CorsLayer::permissive())
            .with_state(self.clone())
    }
}

async fn handle_status(State(service): State<Panel>) -> Json<StatusResponse> {
    let (status, qr_code) = service.sessions.status().await;
    Json(StatusResponse {
        status,
        qr_code: qr_code.filter(|_| status == ConnectionStatus::WaitingForQr),
    })
}

async fn handle_disconnect(State(service): State<Panel>) -> Json<DisconnectResponse> {
    let report = service.sessions.disconnect().await;
    let message = if report.clean {
        "تم قطع الاتصال، جاري تهيئة جلسة جديدة"
    } else {
        "تمت استعادة الجلسة بعد خطأ أثناء قطع الاتصال"
    };
    Json(DisconnectResponse {
        success: true,
        message: message.to_string(),
        status: report.status,
    })
}

async fn handle_send_bulk(
    State(service): State<Panel>,
    payload: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<BulkResponse>> {
    let Json(request) = payload.map_err(|e| {
        warn!("rejected bulk send body: {e}");
        PanelError::InvalidInput
    })?;
    info!(
        "Received request: {} numbers, message: {}, media: {:?}",
        request.numbers.as_ref().map_or(0, Vec::len),
        request.text().is_some(),
        request.media()
    );

    let session = service.sessions.session().await;
    let dispatcher = service.dispatcher.clone();

    // detached so a client hanging up does not cut the batch short
    let results =
        tokio::spawn(async move { dispatcher.send_bulk(session, &request).await }).await??;

    Ok(Json(BulkResponse { results }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down http server");
}
