//! Capacity and inode usage of a published volume.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use diskplug_shared::errors::{DiskplugError, DiskplugResult};
use nix::sys::stat::{major, minor};
use nix::sys::statvfs::statvfs;

/// sysfs reports device sizes in 512-byte sectors regardless of the
/// logical block size.
const SYSFS_SECTOR_SIZE: i64 = 512;

/// Byte and inode usage. Raw block volumes report only `total_bytes`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VolumeStats {
    /// The path is a raw block device rather than a filesystem.
    pub block: bool,
    pub total_bytes: i64,
    pub available_bytes: i64,
    pub used_bytes: i64,
    pub total_inodes: i64,
    pub free_inodes: i64,
    pub used_inodes: i64,
}

pub trait StatsCollector: Send + Sync {
    fn collect(&self, path: &Path) -> DiskplugResult<VolumeStats>;
}

/// [`StatsCollector`] backed by `statvfs(3)` and sysfs.
#[derive(Debug)]
pub struct StatvfsCollector {
    sysfs_dev_block: PathBuf,
}

impl StatvfsCollector {
    pub fn new() -> Self {
        Self {
            sysfs_dev_block: PathBuf::from("/sys/dev/block"),
        }
    }

    fn block_stats(&self, rdev: u64) -> DiskplugResult<VolumeStats> {
        let size_path = self
            .sysfs_dev_block
            .join(format!("{}:{}", major(rdev), minor(rdev)))
            .join("size");
        let sectors: i64 = fs::read_to_string(&size_path)?
            .trim()
            .parse()
            .map_err(|e| {
                DiskplugError::Storage(format!("Bad size in {}: {}", size_path.display(), e))
            })?;

        Ok(VolumeStats {
            block: true,
            total_bytes: sectors * SYSFS_SECTOR_SIZE,
            ..Default::default()
        })
    }
}

impl Default for StatvfsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl StatsCollector for StatvfsCollector {
    fn collect(&self, path: &Path) -> DiskplugResult<VolumeStats> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DiskplugError::NotFound(format!(
                    "Volume path {} does not exist",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.file_type().is_block_device() {
            return self.block_stats(metadata.rdev());
        }

        let vfs = statvfs(path).map_err(|e| {
            DiskplugError::Storage(format!("statvfs {} failed: {}", path.display(), e))
        })?;

        let frsize = vfs.fragment_size() as u64;
        let blocks = vfs.blocks() as u64;
        let blocks_free = vfs.blocks_free() as u64;
        let blocks_avail = vfs.blocks_available() as u64;
        let files = vfs.files() as u64;
        let files_free = vfs.files_free() as u64;

        Ok(VolumeStats {
            block: false,
            total_bytes: to_i64(blocks.saturating_mul(frsize)),
            available_bytes: to_i64(blocks_avail.saturating_mul(frsize)),
            used_bytes: to_i64(blocks.saturating_sub(blocks_free).saturating_mul(frsize)),
            total_inodes: to_i64(files),
            free_inodes: to_i64(files_free),
            used_inodes: to_i64(files.saturating_sub(files_free)),
        })
    }
}
