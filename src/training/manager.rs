// Training job manager
// Owns the single job record and is the only code that mutates it

use crate::error::TrainerError;
use crate::models::{Architecture, JobSnapshot, JobStatus, ProgressEvent, TerminalEvent};
use crate::process_manager::{spawn_training_worker, WorkerCommand, WorkerEvent, WorkerHandle};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub type TerminalReceiver = watch::Receiver<Option<TerminalEvent>>;

/// The job record. `worker` and `terminal` are `Some` exactly while
/// `status == Running`.
#[derive(Debug)]
struct JobState {
    architecture: Option<Architecture>,
    status: JobStatus,
    progress: f64,
    worker: Option<WorkerHandle>,
    terminal: Option<watch::Sender<Option<TerminalEvent>>>,
    run_id: u64,
    exit_code: Option<i32>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            architecture: None,
            status: JobStatus::Idle,
            progress: 0.0,
            worker: None,
            terminal: None,
            run_id: 0,
            exit_code: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl JobState {
    fn is_running_run(&self, run_id: u64) -> bool {
        self.status == JobStatus::Running && self.run_id == run_id
    }

    fn require_running_run(&self, run_id: u64, what: &str) -> Result<(), TrainerError> {
        if self.is_running_run(run_id) {
            return Ok(());
        }
        Err(TrainerError::InvalidTransition(format!(
            "{} for run {} while run {} is {:?}",
            what, run_id, self.run_id, self.status
        )))
    }

    /// Terminal -> Idle, keeping the selected architecture
    fn return_to_idle(&mut self) {
        self.status = JobStatus::Idle;
        self.progress = 0.0;
        self.exit_code = None;
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
    }

    fn finish(&mut self, status: JobStatus, exit_code: Option<i32>, error: Option<String>) {
        self.status = status;
        self.exit_code = exit_code;
        self.error = error;
        self.finished_at = Some(Utc::now());
        self.worker = None;

        let event = TerminalEvent {
            run_id: self.run_id,
            status,
            progress: self.progress,
            exit_code,
            error: self.error.clone(),
        };
        if let Some(terminal) = self.terminal.take() {
            terminal.send_replace(Some(event));
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            architecture: self.architecture,
            status: self.status,
            progress: self.progress,
            run_id: self.run_id,
            worker_pid: self.worker.as_ref().and_then(WorkerHandle::pid),
            exit_code: self.exit_code,
            error: self.error.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    #[cfg(test)]
    fn invariant_holds(&self) -> bool {
        let running = self.status == JobStatus::Running;
        self.worker.is_some() == running
            && self.terminal.is_some() == running
            && (!running || self.architecture.is_some())
    }
}

/// Admits at most one training run at a time and applies worker events to
/// the job record. Shared as `Arc<JobManager>`.
pub struct JobManager {
    state: Mutex<JobState>,
    worker_command: WorkerCommand,
    dataset_dir: PathBuf,
}

impl JobManager {
    pub fn new(worker_command: WorkerCommand, dataset_dir: PathBuf) -> Self {
        Self {
            state: Mutex::new(JobState::default()),
            worker_command,
            dataset_dir,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.state.lock().snapshot()
    }

    /// Valid in any state; a running job keeps the architecture it started with
    pub fn select_architecture(&self, architecture: Architecture) {
        let mut state = self.state.lock();
        state.architecture = Some(architecture);
        info!("Selected {} architecture", architecture);
    }

    /// Start a run. Returns the new run id once the worker has been spawned.
    pub fn start_job(self: &Arc<Self>) -> Result<u64, TrainerError> {
        let mut state = self.state.lock();

        let architecture = state.architecture.ok_or(TrainerError::NoArchitectureSelected)?;
        if state.status == JobStatus::Running {
            return Err(TrainerError::JobAlreadyRunning);
        }
        if state.status.is_terminal() {
            debug!("Archiving run {} ({:?}) before starting a new one", state.run_id, state.status);
            state.return_to_idle();
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let command = self.worker_command.for_job(architecture, &self.dataset_dir);
        let handle = spawn_training_worker(&command, ProgressEvent { progress: 0.0 }, events_tx)?;

        state.run_id += 1;
        state.status = JobStatus::Running;
        state.progress = 0.0;
        state.started_at = Some(handle.started_at());
        state.worker = Some(handle);
        state.terminal = Some(watch::channel(None).0);
        let run_id = state.run_id;
        drop(state);

        info!("Started training run {} with {} architecture", run_id, architecture);

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.apply_worker_events(run_id, events_rx).await });

        Ok(run_id)
    }

    /// Dataset was removed: forget the architecture and the last outcome
    pub fn reset(&self) -> Result<(), TrainerError> {
        let mut state = self.state.lock();
        if state.status == JobStatus::Running {
            return Err(TrainerError::JobRunning);
        }

        let run_id = state.run_id;
        *state = JobState {
            run_id,
            ..JobState::default()
        };
        info!("Job state reset");
        Ok(())
    }

    /// Terminal notifications for the current run; fails unless a run is live
    pub fn subscribe(&self) -> Result<TerminalReceiver, TrainerError> {
        let state = self.state.lock();
        match (&state.status, &state.terminal) {
            (JobStatus::Running, Some(terminal)) => Ok(terminal.subscribe()),
            _ => Err(TrainerError::NoActiveJob),
        }
    }

    async fn apply_worker_events(&self, run_id: u64, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            let result = match event {
                WorkerEvent::Progress(progress) => self.on_progress(run_id, progress),
                WorkerEvent::Exited { code, stderr_tail } => self.on_worker_exit(run_id, code, stderr_tail),
                WorkerEvent::Failed(reason) => self.on_worker_failed(run_id, reason),
            };
            if let Err(e) = result {
                warn!("Ignoring worker event: {}", e);
            }
        }

        // The supervisor always ends with Exited or Failed; if it died first
        // the run would otherwise stay Running forever
        let mut state = self.state.lock();
        if state.is_running_run(run_id) {
            let supervisor_finished = state.worker.as_ref().map_or(true, WorkerHandle::is_finished);
            let reason = if supervisor_finished {
                "worker supervisor stopped without reporting an exit status"
            } else {
                "worker event channel closed"
            };
            warn!("Training run {} failed: {}", run_id, reason);
            state.finish(JobStatus::Failed, None, Some(reason.to_string()));
        }
    }

    /// Overwrites the stored progress; regressive values are kept as-is as
    /// long as they stay within `[0, 1]`
    fn on_progress(&self, run_id: u64, event: ProgressEvent) -> Result<(), TrainerError> {
        let mut state = self.state.lock();
        state.require_running_run(run_id, "progress")?;
        if !(0.0..=1.0).contains(&event.progress) {
            return Err(TrainerError::MalformedProgressChunk(format!(
                "progress {} is outside [0, 1]",
                event.progress
            )));
        }
        state.progress = event.progress;
        debug!("progress: {}", event.progress);
        Ok(())
    }

    fn on_worker_exit(&self, run_id: u64, code: i32, stderr_tail: Option<String>) -> Result<(), TrainerError> {
        let mut state = self.state.lock();
        state.require_running_run(run_id, "worker exit")?;

        if code == 0 {
            state.finish(JobStatus::Completed, Some(code), None);
            info!("Training run {} completed", run_id);
        } else {
            let error = match stderr_tail {
                Some(tail) => format!("worker exited with code {}:\n{}", code, tail),
                None => format!("worker exited with code {}", code),
            };
            state.finish(JobStatus::Failed, Some(code), Some(error));
            warn!("Training run {} failed with exit code {}", run_id, code);
        }
        Ok(())
    }

    fn on_worker_failed(&self, run_id: u64, reason: String) -> Result<(), TrainerError> {
        let mut state = self.state.lock();
        state.require_running_run(run_id, "worker failure")?;
        warn!("Training run {} failed: {}", run_id, reason);
        state.finish(JobStatus::Failed, None, Some(reason));
        Ok(())
    }
}
