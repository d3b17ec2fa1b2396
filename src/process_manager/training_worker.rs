// Training worker process management
// Spawns the external training program and turns its stdout/stderr and exit
// status into `WorkerEvent`s for the job manager

use super::progress_decoder::ProgressDecoder;
use crate::error::TrainerError;
use crate::models::{Architecture, ProgressEvent};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// stderr lines kept for the failure message
const STDERR_TAIL_LINES: usize = 20;

const STDOUT_CHUNK_BYTES: usize = 4096;

/// Everything the job manager can learn about a running worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress(ProgressEvent),
    Exited {
        code: i32,
        stderr_tail: Option<String>,
    },
    /// The process could not be supervised to completion
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn python(python: impl Into<PathBuf>, script: &Path) -> Self {
        Self::new(python, vec![script.to_string_lossy().to_string()])
    }

    /// Per-run arguments telling the worker what to train on
    pub fn for_job(&self, architecture: Architecture, dataset_dir: &Path) -> Self {
        let mut command = self.clone();
        command.args.extend([
            "--arch".to_string(),
            architecture.as_str().to_string(),
            "--dataset".to_string(),
            dataset_dir.to_string_lossy().to_string(),
        ]);
        command
    }
}

/// Exclusive ownership of one spawned worker. The supervisor task owns the
/// child's pipes and reports its exit status.
#[derive(Debug)]
pub struct WorkerHandle {
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    supervisor: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The supervisor has stopped reading the worker's pipes
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }
}

#[cfg(target_os = "windows")]
const PYTHON_CANDIDATES: [&str; 3] = ["python", "python3", "py"];

#[cfg(not(target_os = "windows"))]
const PYTHON_CANDIDATES: [&str; 2] = ["python3", "python"];

/// First interpreter on PATH that answers `--version`
pub fn detect_python() -> String {
    let found = PYTHON_CANDIDATES.iter().find(|candidate| {
        let mut cmd = std::process::Command::new(candidate);
        cmd.arg("--version").stdout(Stdio::null()).stderr(Stdio::null());

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd.status().map_or(false, |status| status.success())
    });

    match found {
        Some(python) => python.to_string(),
        None => {
            warn!("No python interpreter found on PATH, falling back to python3");
            "python3".to_string()
        }
    }
}

/// Locate `python_workers`: next to the executable, up to three levels above
/// it (cargo target dirs), then the current directory
pub fn get_workers_dir() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    if let Some(exe_dir) = exe_dir {
        if let Some(found) = exe_dir
            .ancestors()
            .take(4)
            .map(|dir| dir.join("python_workers"))
            .find(|dir| dir.is_dir())
        {
            debug!("Using workers directory {:?}", found);
            return found;
        }
    }

    let fallback = std::env::current_dir().unwrap_or_default().join("python_workers");
    debug!("Workers directory not found near executable, using {:?}", fallback);
    fallback
}

/// Spawn the training worker. Must be called from within a tokio runtime.
///
/// Launch failures are returned here; anything that happens afterwards is
/// delivered through `events`, ending with exactly one `Exited` or `Failed`.
pub fn spawn_training_worker(
    command: &WorkerCommand,
    initial: ProgressEvent,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> Result<WorkerHandle, TrainerError> {
    let program = command.program.to_string_lossy().to_string();
    let spawn_error = |source: std::io::Error| TrainerError::Spawn {
        program: program.clone(),
        source,
    };

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let mut child = cmd.spawn().map_err(spawn_error)?;

    let pipe_missing = |name: &str| {
        spawn_error(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("{} was not captured", name),
        ))
    };
    let stdin = child.stdin.take().ok_or_else(|| pipe_missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| pipe_missing("stderr"))?;

    let pid = child.id();
    info!("Spawned training worker {} (pid {:?})", program, pid);

    let supervisor = tokio::spawn(supervise(child, stdin, stdout, stderr, initial, events));

    Ok(WorkerHandle {
        pid,
        started_at: Utc::now(),
        supervisor,
    })
}

async fn supervise(
    mut child: Child,
    stdin: ChildStdin,
    mut stdout: ChildStdout,
    stderr: ChildStderr,
    initial: ProgressEvent,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    // A worker that exits without reading stdin closes the pipe early;
    // its exit status is what counts
    if let Err(e) = write_initial_progress(stdin, initial).await {
        warn!("Failed to write initial progress to worker: {}", e);
    }

    let mut decoder = ProgressDecoder::new();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut chunk = vec![0u8; STDOUT_CHUNK_BYTES];
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read(&mut chunk), if stdout_open => match read {
                Ok(0) => {
                    stdout_open = false;
                    if let Some(e) = decoder.finish() {
                        warn!("Dropping worker output: {}", e);
                    }
                }
                Ok(n) => {
                    for decoded in decoder.feed(&chunk[..n]) {
                        match decoded {
                            Ok(event) => {
                                let _ = events.send(WorkerEvent::Progress(event));
                            }
                            Err(e) => warn!("Dropping worker output: {}", e),
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to read worker stdout: {}", e);
                    stdout_open = false;
                }
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    warn!("[worker] {}", line);
                    if stderr_tail.len() == STDERR_TAIL_LINES {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(line);
                }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    warn!("Failed to read worker stderr: {}", e);
                    stderr_open = false;
                }
            },
        }
    }

    let event = match child.wait().await {
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            info!("Training worker exited with code: {}", code);
            let stderr_tail = if stderr_tail.is_empty() {
                None
            } else {
                Some(Vec::from(stderr_tail).join("\n"))
            };
            WorkerEvent::Exited { code, stderr_tail }
        }
        Err(e) => {
            warn!("Failed to wait for training worker: {}", e);
            WorkerEvent::Failed(format!("Failed to wait for worker process: {}", e))
        }
    };

    let _ = events.send(event);
}

async fn write_initial_progress(mut stdin: ChildStdin, initial: ProgressEvent) -> std::io::Result<()> {
    let payload = serde_json::to_vec(&initial)?;
    stdin.write_all(&payload).await?;
    stdin.shutdown().await
}
