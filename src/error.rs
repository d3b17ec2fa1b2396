// Crate-wide error type
// Precondition violations map to 4xx responses, everything else to 500

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("invalid selection: {0:?} is not one of alexnet, vgg, resnet")]
    InvalidArchitecture(String),

    #[error("no architecture selected")]
    NoArchitectureSelected,

    #[error("training already in progress")]
    JobAlreadyRunning,

    #[error("no training in progress")]
    NoActiveJob,

    #[error("training is running, dataset cannot be cleared")]
    JobRunning,

    #[error("failed to spawn training worker {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A state machine entry point was called outside its precondition
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Worker output that is not a `{"progress": number}` object
    #[error("malformed progress chunk: {0}")]
    MalformedProgressChunk(String),

    #[error("dataset already uploaded")]
    DatasetAlreadyUploaded,

    #[error("unsupported file type: {0} (only .zip and .csv are accepted)")]
    UnsupportedFileType(String),

    #[error("file upload failed: {0}")]
    MissingUpload(String),

    #[error("failed to extract archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArchitecture(_)
            | Self::NoArchitectureSelected
            | Self::NoActiveJob
            | Self::UnsupportedFileType(_)
            | Self::MissingUpload(_)
            | Self::Archive(_) => StatusCode::BAD_REQUEST,
            Self::JobAlreadyRunning | Self::JobRunning | Self::DatasetAlreadyUploaded => {
                StatusCode::CONFLICT
            }
            Self::Spawn { .. }
            | Self::InvalidTransition(_)
            | Self::MalformedProgressChunk(_)
            | Self::Config(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TrainerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::debug!("Rejected request: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}
