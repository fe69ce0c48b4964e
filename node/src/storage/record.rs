//! Persisted volume-to-device records.
//!
//! One file per volume under the record directory, named `<volume_id>.conf`
//! and holding the device path. Deleting a record moves it into the
//! `remove/` subdirectory with a timestamp suffix so it can still be
//! inspected after a bad detach.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use diskplug_shared::constants::paths;
use diskplug_shared::errors::{DiskplugError, DiskplugResult};

const RECORD_SUFFIX: &str = "conf";

pub trait VolumeRecordStore: Send + Sync {
    fn save(&self, volume_id: &str, device: &Path) -> DiskplugResult<()>;

    /// `None` when no record exists for the volume.
    fn load(&self, volume_id: &str) -> DiskplugResult<Option<PathBuf>>;

    fn delete(&self, volume_id: &str) -> DiskplugResult<()>;
}

/// [`VolumeRecordStore`] backed by plain files.
#[derive(Debug)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, volume_id: &str) -> DiskplugResult<PathBuf> {
        if volume_id.is_empty() || volume_id.contains('/') || volume_id.starts_with('.') {
            return Err(DiskplugError::InvalidArgument(format!(
                "Invalid volume id for record: '{}'",
                volume_id
            )));
        }
        Ok(self.dir.join(format!("{}.{}", volume_id, RECORD_SUFFIX)))
    }

    fn remove_dir(&self) -> PathBuf {
        self.dir.join(paths::VOLUME_RECORD_REMOVE_DIR)
    }
}

impl VolumeRecordStore for FileRecordStore {
    fn save(&self, volume_id: &str, device: &Path) -> DiskplugResult<()> {
        let path = self.record_path(volume_id)?;
        fs::create_dir_all(&self.dir).map_err(|e| {
            DiskplugError::Storage(format!(
                "Failed to create record directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        fs::write(&path, device.to_string_lossy().as_bytes()).map_err(|e| {
            DiskplugError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;

        tracing::debug!(volume_id, device = %device.display(), "Saved volume record");
        Ok(())
    }

    fn load(&self, volume_id: &str) -> DiskplugResult<Option<PathBuf>> {
        let path = self.record_path(volume_id)?;
        match fs::read_to_string(&path) {
            Ok(content) => {
                let device = content.trim();
                Ok((!device.is_empty()).then(|| PathBuf::from(device)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DiskplugError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn delete(&self, volume_id: &str) -> DiskplugResult<()> {
        let path = self.record_path(volume_id)?;
        if !path.exists() {
            return Ok(());
        }

        let remove_dir = self.remove_dir();
        fs::create_dir_all(&remove_dir).map_err(|e| {
            DiskplugError::Storage(format!(
                "Failed to create {}: {}",
                remove_dir.display(),
                e
            ))
        })?;

        let stamp = Local::now().format("%Y-%m-%d-%H:%M:%S");
        let dest = remove_dir.join(format!("{}-{}", volume_id, stamp));
        fs::rename(&path, &dest).map_err(|e| {
            DiskplugError::Storage(format!(
                "Failed to move {} to {}: {}",
                path.display(),
                dest.display(),
                e
            ))
        })?;

        tracing::debug!(volume_id, dest = %dest.display(), "Soft-deleted volume record");
        Ok(())
    }
}
