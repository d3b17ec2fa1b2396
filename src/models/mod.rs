// Data models (structs)
pub mod settings;
pub mod training_job;

pub use settings::*;
pub use training_job::*;
