use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, AppError>;

/// Every failure the checker can report. None of them is fatal to the
/// running service; each one is rendered back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("model load failed: {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("label manifest invalid: {0}")]
    Manifest(String),

    #[error("configuration invalid: {0}")]
    Config(String),

    #[error("image decode failed: {0}")]
    ImageDecode(String),

    #[error("upload exceeds {limit} bytes")]
    UploadTooLarge { limit: usize },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("invalid certificate identifier: {0}")]
    InvalidIdentifier(String),

    #[error("confidence {confidence:.1}% is below the minting threshold of {threshold:.1}%")]
    MintNotAllowed { confidence: f32, threshold: f32 },

    #[error("unknown prediction: {0}")]
    UnknownPrediction(String),

    #[error("a certificate is already being minted")]
    MintInProgress,

    #[error("certificate not found: {0}")]
    NotFound(String),

    #[error("certificate service returned HTTP {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("certificate service sent an unreadable response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Short machine-readable tag used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelLoad { .. } => "model_load",
            Self::Manifest(_) => "manifest",
            Self::Config(_) => "config",
            Self::ImageDecode(_) => "image_decode",
            Self::UploadTooLarge { .. } => "upload_too_large",
            Self::Inference(_) => "inference",
            Self::MalformedOutput(_) => "malformed_output",
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::MintNotAllowed { .. } => "mint_not_allowed",
            Self::UnknownPrediction(_) => "unknown_prediction",
            Self::MintInProgress => "mint_in_progress",
            Self::NotFound(_) => "not_found",
            Self::RemoteStatus { .. } => "remote_status",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Network(_) => "network",
            Self::Io(_) => "io",
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AppError::MalformedResponse(e.to_string())
        } else {
            AppError::Network(e.to_string())
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ImageDecode(_)
            | Self::InvalidIdentifier(_)
            | Self::UnknownPrediction(_) => StatusCode::BAD_REQUEST,
            Self::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MintNotAllowed { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MintInProgress => StatusCode::CONFLICT,
            Self::RemoteStatus { .. } | Self::MalformedResponse(_) | Self::Network(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::ModelLoad { .. } | Self::Manifest(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Inference(_) | Self::MalformedOutput(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        })
    }
}
