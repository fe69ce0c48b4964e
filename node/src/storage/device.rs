//! Device resolution: volume id to device node, mount point to device.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use diskplug_shared::constants::paths;
use diskplug_shared::errors::{DiskplugError, DiskplugResult};

use super::mountinfo::{self, MountEntry};

/// Cloud disk serials are the volume id without its `d-` prefix, cut to the
/// length virtio exposes.
const SERIAL_MAX_LEN: usize = 20;

/// by-id link prefixes created by udev for paravirtual disks.
const BY_ID_PREFIXES: &[&str] = &["virtio-", "nvme-"];

/// Resolves which device node backs a volume or a mount.
pub trait DeviceLocator: Send + Sync {
    /// Current device node of an attached volume.
    fn device_for_volume(&self, volume_id: &str) -> DiskplugResult<PathBuf>;

    /// Device mounted at `mount_point`, if any.
    fn device_for_mount_point(&self, mount_point: &Path) -> DiskplugResult<Option<PathBuf>>;

    /// Fails unless `device` exists, is a block device, and is not the
    /// disk the host booted from.
    fn check_device(&self, device: &Path) -> DiskplugResult<()>;
}

/// [`DeviceLocator`] backed by `/dev/disk/by-id` and the mount table.
#[derive(Debug)]
pub struct ByIdLocator {
    by_id_dir: PathBuf,
}

impl ByIdLocator {
    pub fn new() -> Self {
        Self::with_dir(PathBuf::from(paths::DISK_BY_ID))
    }

    pub fn with_dir(by_id_dir: PathBuf) -> Self {
        Self { by_id_dir }
    }
}

impl Default for ByIdLocator {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn disk_serial(volume_id: &str) -> String {
    let serial = volume_id.strip_prefix("d-").unwrap_or(volume_id);
    serial.chars().take(SERIAL_MAX_LEN).collect()
}

/// Device node behind a mount table entry.
///
/// A raw block volume staged by binding `/dev/vdb` shows up as a devtmpfs
/// mount whose root is `/vdb`.
pub(crate) fn entry_device(entry: &MountEntry) -> Option<PathBuf> {
    match entry.source.as_deref() {
        Some(source) if source.starts_with("/dev/") => Some(PathBuf::from(source)),
        _ if entry.fs_type == "devtmpfs" && entry.root != "/" => {
            Some(Path::new("/dev").join(entry.root.trim_start_matches('/')))
        }
        _ => None,
    }
}

/// True when `root_source` is `device` itself or one of its partitions
/// (`/dev/vda1`, `/dev/nvme0n1p2`).
fn is_system_disk(root_source: &str, device: &Path) -> bool {
    let device = device.to_string_lossy();
    if device.is_empty() {
        return false;
    }
    let Some(rest) = root_source.strip_prefix(&*device) else {
        return false;
    };
    let number = rest.strip_prefix('p').unwrap_or(rest);
    rest.is_empty() || (!number.is_empty() && number.bytes().all(|b| b.is_ascii_digit()))
}

impl DeviceLocator for ByIdLocator {
    fn device_for_volume(&self, volume_id: &str) -> DiskplugResult<PathBuf> {
        let serial = disk_serial(volume_id);
        if serial.is_empty() {
            return Err(DiskplugError::InvalidArgument(format!(
                "Cannot derive disk serial from volume id '{}'",
                volume_id
            )));
        }

        let entries = match fs::read_dir(&self.by_id_dir) {
            Ok(entries) => entries,
            Err(e) => {
                return Err(DiskplugError::NotFound(format!(
                    "Cannot list {}: {}",
                    self.by_id_dir.display(),
                    e
                )));
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let matches = BY_ID_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix) && name.ends_with(serial.as_str()));
            if !matches {
                continue;
            }

            let device = fs::canonicalize(entry.path()).map_err(|e| {
                DiskplugError::Storage(format!("Failed to resolve {}: {}", name, e))
            })?;
            tracing::debug!(volume_id, device = %device.display(), "Resolved volume device");
            return Ok(device);
        }

        Err(DiskplugError::NotFound(format!(
            "No device found for volume {}",
            volume_id
        )))
    }

    fn device_for_mount_point(&self, mount_point: &Path) -> DiskplugResult<Option<PathBuf>> {
        let mounts = mountinfo::read_mounts()?;
        Ok(mountinfo::find_mount(&mounts, &mountinfo::normalize(mount_point)).and_then(entry_device))
    }

    fn check_device(&self, device: &Path) -> DiskplugResult<()> {
        if device.as_os_str().is_empty() {
            return Err(DiskplugError::Storage("Device path is empty".to_string()));
        }

        let metadata = fs::metadata(device).map_err(|e| {
            DiskplugError::Storage(format!("Device {} not usable: {}", device.display(), e))
        })?;
        if !metadata.file_type().is_block_device() {
            return Err(DiskplugError::Storage(format!(
                "{} is not a block device",
                device.display()
            )));
        }

        let mounts = mountinfo::read_mounts()?;
        if let Some(root_source) = mountinfo::find_mount(&mounts, Path::new("/"))
            .and_then(|entry| entry.source.as_deref())
        {
            if is_system_disk(root_source, device) {
                return Err(DiskplugError::Storage(format!(
                    "{} is the system disk",
                    device.display()
                )));
            }
        }
        Ok(())
    }
}
