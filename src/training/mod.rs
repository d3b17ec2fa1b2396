// Training orchestration: the job state machine and its progress stream
pub mod broadcast;
pub mod manager;

pub use broadcast::{Observer, ProgressBroadcaster, StreamMessage};
pub use manager::JobManager;
