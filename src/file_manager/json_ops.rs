// Atomic JSON file operations

use crate::error::TrainerError;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, TrainerError> {
    if !path.exists() {
        return Err(TrainerError::Config(format!("File not found: {:?}", path)));
    }

    let contents = fs::read_to_string(path)?;

    serde_json::from_str(&contents)
        .map_err(|e| TrainerError::Config(format!("Failed to parse JSON from {:?}: {}", path, e)))
}

/// Writes JSON atomically using write-to-temp-then-rename
pub fn write_json_file<T: Serialize>(path: &Path, data: &T) -> Result<(), TrainerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json_string = serde_json::to_string_pretty(data)
        .map_err(|e| TrainerError::Config(format!("Failed to serialize data: {}", e)))?;

    let temp_path = path.with_extension("tmp");

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(json_string.as_bytes())?;
    temp_file.sync_all()?;

    fs::rename(&temp_path, path)?;

    Ok(())
}

pub fn initialize_json_file<T: Serialize>(path: &Path, default: &T) -> Result<(), TrainerError> {
    if !path.exists() {
        log::info!("Initializing JSON file: {:?}", path);
        write_json_file(path, default)?;
    }
    Ok(())
}
