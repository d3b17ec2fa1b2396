// Training command handlers: architecture selection, job start, progress
use super::AppState;
use crate::error::TrainerError;
use crate::models::{Architecture, JobSnapshot, JobStatus};
use crate::training::StreamMessage;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::{Form, Json};
use futures::{Stream, StreamExt};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SelectArchParams {
    pub arch: Option<String>,
}

/// POST /select-arch
pub async fn select_arch(
    State(state): State<AppState>,
    Form(params): Form<SelectArchParams>,
) -> Result<String, TrainerError> {
    let architecture: Architecture = params.arch.unwrap_or_default().trim().parse()?;
    state.jobs.select_architecture(architecture);
    Ok(format!("selected {} architecture", architecture))
}

/// POST /train/start
pub async fn start_training(
    State(state): State<AppState>,
) -> Result<(StatusCode, &'static str), TrainerError> {
    state.jobs.start_job()?;
    Ok((StatusCode::ACCEPTED, "training started"))
}

/// GET /train/progress - server-sent events until the run ends
pub async fn training_progress(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, TrainerError> {
    let observer = state.broadcaster.attach()?;
    Ok(Sse::new(observer.into_stream().map(to_sse_event)))
}

/// GET /train/status
pub async fn training_status(State(state): State<AppState>) -> Json<JobSnapshot> {
    Json(state.jobs.snapshot())
}

fn to_sse_event(message: StreamMessage) -> Result<Event, axum::Error> {
    match message {
        StreamMessage::Snapshot(progress) => Event::default().json_data(progress),
        StreamMessage::Terminal(terminal) => {
            let name = match terminal.status {
                JobStatus::Completed => "complete",
                _ => "failed",
            };
            Event::default().event(name).json_data(terminal)
        }
    }
}
