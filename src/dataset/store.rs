// Dataset upload storage
// Holds at most one dataset: a CSV file or the extracted contents of a zip

use crate::error::TrainerError;
use log::{debug, info, warn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const ALLOWED_EXTENSIONS: [&str; 2] = ["zip", "csv"];

#[derive(Debug, Clone)]
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<(), TrainerError> {
        if !self.dir.exists() {
            info!("Creating upload directory {:?}", self.dir);
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Names of everything currently in the upload directory, sorted
    pub fn entries(&self) -> Result<Vec<String>, TrainerError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            names.push(entry?.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    pub fn is_empty(&self) -> Result<bool, TrainerError> {
        Ok(self.entries()?.is_empty())
    }

    /// Refuse a second dataset before any bytes are written
    pub fn check_available(&self) -> Result<(), TrainerError> {
        if self.is_empty()? {
            Ok(())
        } else {
            Err(TrainerError::DatasetAlreadyUploaded)
        }
    }

    /// Store an uploaded file as `<stem>_<unix millis><ext>`. Zip archives are
    /// extracted in place and the archive itself removed.
    pub fn store_upload(&self, original_name: &str, bytes: &[u8]) -> Result<String, TrainerError> {
        let original = Path::new(original_name);
        let extension = original
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| TrainerError::UnsupportedFileType(original_name.to_string()))?;
        let stem = original
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| TrainerError::MissingUpload("file name is empty".to_string()))?;

        self.ensure_dir()?;
        self.check_available()?;

        let stored_name = format!("{}_{}.{}", stem, chrono::Utc::now().timestamp_millis(), extension);
        let stored_path = self.dir.join(&stored_name);
        fs::write(&stored_path, bytes)?;
        debug!("Saved upload {} as {:?}", original_name, stored_path);

        if extension == "zip" {
            // The directory was empty before this upload, so a failed
            // extraction is undone by clearing it
            if let Err(e) = self.extract_zip(&stored_path) {
                warn!("Extracting {} failed, discarding partial dataset: {}", original_name, e);
                self.clear()?;
                return Err(e);
            }
            fs::remove_file(&stored_path)?;
        }

        info!("Stored dataset {}", original_name);
        Ok(stored_name)
    }

    fn extract_zip(&self, archive_path: &Path) -> Result<(), TrainerError> {
        let file = File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        archive.extract(&self.dir)?;
        debug!("Extracted {} entries from {:?}", archive.len(), archive_path);
        Ok(())
    }

    /// Delete everything in the upload directory. Returns the removed names,
    /// empty when there was nothing to delete.
    pub fn clear(&self) -> Result<Vec<String>, TrainerError> {
        let names = self.entries()?;
        for name in &names {
            let path = self.dir.join(name);
            if fs::symlink_metadata(&path)?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        if !names.is_empty() {
            info!("Deleted dataset: {}", names.join(", "));
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store() -> (tempfile::TempDir, DatasetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path().join("uploads"));
        (dir, store)
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, contents) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_csv_upload_gets_timestamp_suffix() {
        let (_dir, store) = store();
        let stored = store.store_upload("iris.csv", b"a,b\n1,2\n").unwrap();

        assert!(stored.starts_with("iris_"));
        assert!(stored.ends_with(".csv"));
        assert_eq!(store.entries().unwrap(), vec![stored.clone()]);
        assert_eq!(fs::read(store.dir().join(stored)).unwrap(), b"a,b\n1,2\n");
    }

    #[test]
    fn test_zip_upload_is_extracted_and_archive_removed() {
        let (_dir, store) = store();
        let bytes = zip_bytes(&[("cats/1.txt", "meow"), ("dogs/1.txt", "woof")]);

        store.store_upload("pets.zip", &bytes).unwrap();

        assert_eq!(store.entries().unwrap(), vec!["cats".to_string(), "dogs".to_string()]);
        assert_eq!(fs::read_to_string(store.dir().join("dogs/1.txt")).unwrap(), "woof");
    }

    #[test]
    fn test_corrupt_zip_is_rejected_and_not_kept() {
        let (_dir, store) = store();
        let result = store.store_upload("broken.zip", b"not a zip archive");

        assert!(matches!(result, Err(TrainerError::Archive(_))));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_zip_failing_midway_leaves_no_partial_dataset() {
        let (_dir, store) = store();
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer.start_file("first.csv", options).unwrap();
            writer.write_all(b"a,b\n1,2\n").unwrap();
            writer.start_file("second.csv", options).unwrap();
            writer.write_all(b"SECOND-ENTRY-PAYLOAD").unwrap();
            writer.finish().unwrap();
        }
        let mut bytes = cursor.into_inner();

        // Flip one byte of the second entry so its checksum fails on extraction
        let payload = b"SECOND-ENTRY-PAYLOAD";
        let offset = bytes
            .windows(payload.len())
            .position(|window| window == payload)
            .unwrap();
        bytes[offset] = b'X';

        assert!(store.store_upload("partial.zip", &bytes).is_err());
        assert!(store.is_empty().unwrap());
        assert!(store.store_upload("retry.csv", b"x\n").is_ok());
    }

    #[test]
    fn test_other_extensions_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.store_upload("weights.pt", b"..."),
            Err(TrainerError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            store.store_upload("README", b"..."),
            Err(TrainerError::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn test_second_upload_is_refused() {
        let (_dir, store) = store();
        store.store_upload("train.csv", b"x\n").unwrap();

        assert!(matches!(
            store.store_upload("more.csv", b"y\n"),
            Err(TrainerError::DatasetAlreadyUploaded)
        ));
    }

    #[test]
    fn test_clear_removes_files_and_directories() {
        let (_dir, store) = store();
        store
            .store_upload("images.zip", &zip_bytes(&[("train/a.txt", "a"), ("labels.csv", "x")]))
            .unwrap();

        let removed = store.clear().unwrap();
        assert_eq!(removed, vec!["labels.csv".to_string(), "train".to_string()]);
        assert!(store.is_empty().unwrap());
        assert!(store.clear().unwrap().is_empty());
    }
}
