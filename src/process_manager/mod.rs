// Worker process management
pub mod progress_decoder;
pub mod training_worker;

pub use training_worker::{
    detect_python, get_workers_dir, spawn_training_worker, WorkerCommand, WorkerEvent, WorkerHandle,
};
