// Dataset command handlers
use super::AppState;
use crate::error::TrainerError;
use axum::extract::{Multipart, State};
use log::debug;

const UPLOAD_FIELD: &str = "dataset";

/// POST /dataset/upload - multipart form with a single `dataset` file
pub async fn upload_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<String, TrainerError> {
    state.datasets.check_available()?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TrainerError::MissingUpload(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| TrainerError::MissingUpload("dataset field has no file name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| TrainerError::MissingUpload(e.to_string()))?;

        // Writing and unzipping can take a while for large datasets
        let datasets = state.datasets.clone();
        let name = file_name.clone();
        run_blocking(move || datasets.store_upload(&name, &bytes)).await?;

        return Ok(format!("successfully uploaded {}", file_name));
    }

    Err(TrainerError::MissingUpload(format!("no {:?} file in request", UPLOAD_FIELD)))
}

/// DELETE /dataset/delete - also resets the job record
///
/// The reset is the running check, so it comes first even when there is
/// nothing on disk. If removing files fails afterwards the record stays reset
/// and the files remain; repeating the delete finishes the cleanup.
pub async fn delete_dataset(State(state): State<AppState>) -> Result<String, TrainerError> {
    state.jobs.reset()?;

    let datasets = state.datasets.clone();
    let removed = run_blocking(move || datasets.clear()).await?;
    if removed.is_empty() {
        return Ok("nothing to delete".to_string());
    }
    Ok(format!("deleted {}", removed.join(", ")))
}

/// Filesystem work runs on the blocking pool so the worker pump and
/// progress streams keep ticking
async fn run_blocking<T, F>(work: F) -> Result<T, TrainerError>
where
    F: FnOnce() -> Result<T, TrainerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| TrainerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
