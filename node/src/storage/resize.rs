//! Online filesystem growth.

use std::path::Path;
use std::process::Command;

use diskplug_shared::errors::{DiskplugError, DiskplugResult};

use super::format;

pub trait Resizer: Send + Sync {
    /// Grow the filesystem on `device`, mounted at `mount_path`, to fill the
    /// device. `Ok(false)` means the filesystem cannot be grown online.
    fn resize(&self, device: &Path, mount_path: &Path) -> DiskplugResult<bool>;
}

/// [`Resizer`] that shells out to `resize2fs` or `xfs_growfs`.
#[derive(Debug, Default)]
pub struct HostResizer;

impl HostResizer {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn resize_command(fs_type: &str, device: &Path, mount_path: &Path) -> Option<Command> {
    match fs_type {
        "ext2" | "ext3" | "ext4" => {
            let mut cmd = Command::new("resize2fs");
            cmd.arg(device);
            Some(cmd)
        }
        "xfs" => {
            let mut cmd = Command::new("xfs_growfs");
            cmd.arg("-d").arg(mount_path);
            Some(cmd)
        }
        _ => None,
    }
}

impl Resizer for HostResizer {
    fn resize(&self, device: &Path, mount_path: &Path) -> DiskplugResult<bool> {
        let Some(fs_type) = format::probe_filesystem(device)? else {
            return Err(DiskplugError::Storage(format!(
                "No filesystem found on {}",
                device.display()
            )));
        };

        let Some(mut cmd) = resize_command(&fs_type, device, mount_path) else {
            tracing::warn!(device = %device.display(), fs_type = %fs_type, "Online resize not supported");
            return Ok(false);
        };

        tracing::info!(
            device = %device.display(),
            path = %mount_path.display(),
            fs_type = %fs_type,
            "Resizing filesystem"
        );
        let output = cmd
            .output()
            .map_err(|e| DiskplugError::Storage(format!("Failed to run resize: {}", e)))?;

        if !output.status.success() {
            return Err(DiskplugError::Storage(format!(
                "Failed to resize {}: {}",
                device.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_command_by_fs() {
        let dev = Path::new("/dev/vdb");
        let path = Path::new("/stage/v1");

        let ext4 = resize_command("ext4", dev, path).unwrap();
        assert_eq!(ext4.get_program(), "resize2fs");
        assert_eq!(ext4.get_args().collect::<Vec<_>>(), vec!["/dev/vdb"]);

        let xfs = resize_command("xfs", dev, path).unwrap();
        assert_eq!(xfs.get_program(), "xfs_growfs");
        assert_eq!(xfs.get_args().collect::<Vec<_>>(), vec!["-d", "/stage/v1"]);

        assert!(resize_command("vfat", dev, path).is_none());
    }
}
