// App data directory layout
use crate::error::TrainerError;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

static APP_DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

pub fn get_app_data_dir() -> PathBuf {
    APP_DATA_DIR
        .get_or_init(|| {
            let base_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
            base_dir.join("gpu-trainer")
        })
        .clone()
}

pub fn get_data_dir() -> PathBuf {
    get_app_data_dir().join("data")
}

pub fn get_uploads_dir() -> PathBuf {
    get_app_data_dir().join("uploads")
}

pub fn get_logs_dir() -> PathBuf {
    get_app_data_dir().join("logs")
}

pub fn get_settings_json_path() -> PathBuf {
    get_data_dir().join("settings.json")
}

pub fn initialize_data_directories() -> Result<(), TrainerError> {
    for dir in [get_data_dir(), get_uploads_dir(), get_logs_dir()] {
        fs::create_dir_all(&dir)?;
    }
    Ok(())
}
