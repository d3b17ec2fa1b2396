//! Logging setup for gpu-trainer
//! env_logger backend, optional log file with 7-day retention

use crate::error::TrainerError;
use crate::models::Settings;
use log::info;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

const LOG_RETENTION_DAYS: u64 = 7;

/// Mirrors every record to stderr and the session log file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialise the global logger. `RUST_LOG` wins over `settings.log_level`.
pub fn init_logging(settings: &Settings, logs_dir: &Path) -> Result<(), TrainerError> {
    let env = env_logger::Env::default().default_filter_or(settings.log_level.as_str());
    let mut builder = env_logger::Builder::from_env(env);

    let log_file = if settings.log_to_file {
        fs::create_dir_all(logs_dir)?;
        cleanup_old_logs(logs_dir);
        let file_name = format!("gpu-trainer-{}.log", chrono::Local::now().format("%Y%m%d-%H%M%S"));
        let path = logs_dir.join(file_name);
        let file = File::create(&path)?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
        Some(path)
    } else {
        None
    };

    builder
        .try_init()
        .map_err(|e| TrainerError::Config(format!("Failed to initialise logger: {}", e)))?;

    if let Some(path) = log_file {
        info!("Writing logs to {:?}", path);
    }
    Ok(())
}

/// Remove `*.log` files older than the retention window
pub fn cleanup_old_logs(logs_dir: &Path) {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };

    let retention = Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    let now = SystemTime::now();

    for path in entries.flatten().map(|entry| entry.path()) {
        if path.extension().map_or(true, |ext| ext != "log") {
            continue;
        }
        let expired = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .map_or(false, |age| age > retention);
        if expired && fs::remove_file(&path).is_ok() {
            info!("Removed expired log {:?}", path.file_name());
        }
    }
}
