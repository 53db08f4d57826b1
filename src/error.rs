use axum::{extract::multipart::MultipartError, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Bridge returned {status}: {body}")]
    BridgeStatus { status: u16, body: String },

    #[error("Session was closed")]
    SessionClosed,

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("No file uploaded")]
    NoFileUploaded,

    #[error("Could not parse config")]
    ConfigParseError(#[from] Box<figment::Error>),

    #[error("يجب توفير قائمة صالحة من الأرقام")]
    InvalidInput,

    #[error("عميل واتساب غير مهيأ")]
    ClientNotReady,

    #[error("خطأ في معالجة الطلب: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PanelError>;

impl PanelError {
    pub fn code(&self) -> &'static str {
        match self {
            PanelError::InvalidInput | PanelError::Multipart(_) | PanelError::NoFileUploaded => {
                "INVALID_INPUT"
            }
            PanelError::ClientNotReady => "CLIENT_NOT_READY",
            _ => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PanelError::InvalidInput
            | PanelError::ClientNotReady
            | PanelError::Multipart(_)
            | PanelError::NoFileUploaded => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PanelError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("request failed: {self}");
        }
        (
            status,
            Json(json!({ "error": self.to_string(), "code": self.code() })),
        )
            .into_response()
    }
}

/// Why a single number in a bulk batch was not delivered. The display text is
/// what the caller sees in the `reason` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    #[error("رقم غير مسجل في واتساب")]
    NotRegistered,

    #[error("يجب توفير رسالة أو ملف وسائط")]
    NoContent,

    #[error("ملف الوسائط غير موجود")]
    MediaNotFound,

    #[error("نوع الملف غير مدعوم")]
    UnsupportedMediaType,

    #[error("فشل في إرسال الوسائط: {0}")]
    MediaSendFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl SendFailure {
    pub fn code(&self) -> &'static str {
        match self {
            SendFailure::NotRegistered => "NOT_REGISTERED",
            SendFailure::NoContent => "NO_CONTENT",
            SendFailure::MediaNotFound => "MEDIA_NOT_FOUND",
            SendFailure::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            SendFailure::MediaSendFailed(_) => "MEDIA_SEND_FAILED",
            SendFailure::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_map_to_client_status() {
        assert_eq!(PanelError::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(PanelError::ClientNotReady.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            PanelError::BridgeStatus {
                status: 502,
                body: "bad gateway".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(PanelError::SessionClosed.code(), "INTERNAL");
    }

    #[test]
    fn media_send_failure_keeps_detail() {
        let failure = SendFailure::MediaSendFailed("timeout".into());
        assert_eq!(failure.code(), "MEDIA_SEND_FAILED");
        assert!(failure.to_string().ends_with("timeout"));
    }
}
