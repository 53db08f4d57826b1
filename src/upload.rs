use std::path::{Path, PathBuf};

use axum::{
    extract::{Multipart, State},
    Json,
};
use chrono::Utc;

use crate::{
    error::{PanelError, Result},
    models::UploadResponse,
    Panel,
};

/// Multipart field the UI puts the file in.
pub const MEDIA_FIELD: &str = "media";

pub async fn handle_upload_media(
    State(service): State<Panel>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(MEDIA_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        let path =
            stage_upload(&service.config.upload_dir, file_name.as_deref(), &bytes).await?;

        log::info!(
            "stored upload {} as {path:?}",
            file_name.as_deref().unwrap_or("<unnamed>")
        );
        return Ok(Json(UploadResponse {
            success: true,
            file_path: service.dispatcher.media_token(&path),
        }));
    }

    Err(PanelError::NoFileUploaded)
}

/// Writes `bytes` to `<upload_dir>/<unix micros><.ext>`, keeping the
/// extension of the original name.
pub async fn stage_upload(
    upload_dir: &Path,
    original_name: Option<&str>,
    bytes: &[u8],
) -> Result<PathBuf> {
    if let Err(e) = tokio::fs::create_dir_all(upload_dir).await {
        log::error!("could not create upload directory '{upload_dir:?}', got {e}");
        return Err(e.into());
    }

    let extension = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let path = upload_dir.join(format!("{}{extension}", Utc::now().timestamp_micros()));

    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
