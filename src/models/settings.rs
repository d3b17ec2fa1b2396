// Settings data models
use crate::error::TrainerError;
use crate::file_manager::{initialize_json_file, read_json_file};
use crate::process_manager::{detect_python, get_workers_dir};
use crate::utils::{get_settings_json_path, get_uploads_dir};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_WORKER_SCRIPT: &str = "train.py";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    /// Empty means auto-detect
    #[serde(default)]
    pub python_path: String,
    /// Empty means `python_workers/train.py`
    #[serde(default)]
    pub worker_script: String,
    /// Empty means the app data uploads directory
    #[serde(default)]
    pub upload_dir: String,
    pub progress_interval_ms: u64,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    pub log_level: String,
    #[serde(default)]
    pub log_to_file: bool,
}

fn default_max_upload_mb() -> usize {
    1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: String::from("127.0.0.1:3000"),
            python_path: String::new(),
            worker_script: String::new(),
            upload_dir: String::new(),
            progress_interval_ms: 1000,
            max_upload_mb: default_max_upload_mb(),
            log_level: String::from("info"),
            log_to_file: false,
        }
    }
}

impl Settings {
    /// Load settings from `TRAINER_SETTINGS` or the app data settings file,
    /// creating the latter with defaults on first start, then apply env overrides
    pub fn load() -> Result<Self, TrainerError> {
        let path = match std::env::var_os("TRAINER_SETTINGS") {
            Some(custom) => PathBuf::from(custom),
            None => {
                let path = get_settings_json_path();
                initialize_json_file(&path, &Settings::default())?;
                path
            }
        };

        let mut settings: Settings = read_json_file(&path)?;
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        debug!("Loaded settings from {:?}: {:?}", path, settings);
        Ok(settings)
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind_addr) = lookup("TRAINER_BIND_ADDR") {
            self.bind_addr = bind_addr;
        }
        if let Some(python_path) = lookup("TRAINER_PYTHON") {
            self.python_path = python_path;
        }
        if let Some(worker_script) = lookup("TRAINER_WORKER_SCRIPT") {
            self.worker_script = worker_script;
        }
        if let Some(upload_dir) = lookup("TRAINER_UPLOAD_DIR") {
            self.upload_dir = upload_dir;
        }
    }

    fn validate(&self) -> Result<(), TrainerError> {
        if self.progress_interval_ms == 0 {
            return Err(TrainerError::Config(
                "progress_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_upload_mb == 0 {
            return Err(TrainerError::Config(
                "max_upload_mb must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn python_program(&self) -> String {
        let configured = self.python_path.trim();
        if configured.is_empty() {
            detect_python()
        } else {
            configured.to_string()
        }
    }

    pub fn worker_script_path(&self) -> PathBuf {
        let configured = self.worker_script.trim();
        if configured.is_empty() {
            get_workers_dir().join(DEFAULT_WORKER_SCRIPT)
        } else {
            PathBuf::from(configured)
        }
    }

    pub fn upload_dir_path(&self) -> PathBuf {
        let configured = self.upload_dir.trim();
        if configured.is_empty() {
            get_uploads_dir()
        } else {
            PathBuf::from(configured)
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
