// Training job data models
use crate::error::TrainerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model architectures the worker knows how to train
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    AlexNet,
    ResNet,
    Vgg,
}

impl Architecture {
    pub const ALL: [Architecture; 3] = [Architecture::AlexNet, Architecture::Vgg, Architecture::ResNet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::AlexNet => "alexnet",
            Architecture::ResNet => "resnet",
            Architecture::Vgg => "vgg",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Architecture::ALL
            .into_iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| TrainerError::InvalidArchitecture(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One progress report, as written by the worker on stdout
/// and as pushed to stream observers on every tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub progress: f64,
}

/// Sent once to every observer when a run leaves `Running`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TerminalEvent {
    pub run_id: u64,
    pub status: JobStatus,
    pub progress: f64,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// Consistent copy of the job record handed out to readers
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub architecture: Option<Architecture>,
    pub status: JobStatus,
    pub progress: f64,
    pub run_id: u64,
    pub worker_pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
