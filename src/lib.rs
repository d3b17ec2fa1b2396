mod commands;
mod dataset;
mod error;
mod file_manager;
mod logging;
mod models;
mod process_manager;
mod training;
mod utils;

pub use commands::{router, AppState};
pub use dataset::DatasetStore;
pub use error::TrainerError;
pub use models::{Architecture, JobSnapshot, JobStatus, ProgressEvent, Settings, TerminalEvent};
pub use process_manager::WorkerCommand;
pub use training::{JobManager, Observer, ProgressBroadcaster, StreamMessage};

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use utils::{get_logs_dir, initialize_data_directories};

/// Load settings, set up logging and serve until Ctrl-C.
///
/// The orchestrator runs on a single-threaded runtime; the training worker is
/// the only thing running in parallel.
pub fn run() -> Result<(), TrainerError> {
    let settings = Settings::load()?;
    logging::init_logging(&settings, &get_logs_dir())?;
    initialize_data_directories()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(settings))
}

pub async fn serve(settings: Settings) -> Result<(), TrainerError> {
    let datasets = DatasetStore::new(settings.upload_dir_path());
    datasets.ensure_dir()?;

    let worker_script = settings.worker_script_path();
    if !worker_script.exists() {
        warn!("Worker script not found: {:?}", worker_script);
    }
    let worker_command = WorkerCommand::python(settings.python_program(), &worker_script);
    info!(
        "Training worker: {:?} {}",
        worker_command.program,
        worker_command.args.join(" ")
    );

    let jobs = Arc::new(JobManager::new(worker_command, datasets.dir().to_path_buf()));
    let broadcaster = ProgressBroadcaster::new(
        jobs.clone(),
        Duration::from_millis(settings.progress_interval_ms),
    );
    let app = router(
        AppState {
            jobs,
            broadcaster,
            datasets,
        },
        settings.max_upload_bytes(),
    );

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
