//! Mount executor: mount, format, unmount and path inspection.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use diskplug_shared::errors::{DiskplugError, DiskplugResult};
use nix::mount::{mount, umount, MsFlags};

use super::format;
use super::mountinfo;
use super::options::MountSpec;

/// What a path on the host currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    Directory,
    BlockDevice,
    File,
    Other,
}

/// Host mount operations used by the lifecycle engine.
pub trait Mounter: Send + Sync {
    /// Whether something is mounted exactly at `path`.
    fn is_mount_point(&self, path: &Path) -> DiskplugResult<bool>;

    /// Mount `source` on `target`. `fs_type` is ignored for bind mounts.
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> DiskplugResult<()>;

    fn unmount(&self, target: &Path) -> DiskplugResult<()>;

    /// Mount `device` on `target`, creating a filesystem first if the device
    /// is blank. A device already formatted with another type is an error.
    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        mkfs_options: &[String],
        options: &[String],
    ) -> DiskplugResult<()>;

    /// Other mount points sharing the filesystem mounted at `path`.
    fn mount_refs(&self, path: &Path) -> DiskplugResult<Vec<PathBuf>>;

    fn ensure_folder(&self, path: &Path) -> DiskplugResult<()>;

    /// Make sure an empty file exists at `path` to bind a device onto.
    fn ensure_block(&self, path: &Path) -> DiskplugResult<()>;

    /// Remove a file or an empty directory. Missing paths are fine.
    fn safe_remove(&self, path: &Path) -> DiskplugResult<()>;

    /// `None` when the path does not exist.
    fn path_kind(&self, path: &Path) -> DiskplugResult<Option<PathKind>>;

    fn is_dir_empty(&self, path: &Path) -> DiskplugResult<bool>;
}

/// [`Mounter`] backed by `mount(2)` and `/proc/self/mountinfo`.
#[derive(Debug, Default)]
pub struct HostMounter;

impl HostMounter {
    pub fn new() -> Self {
        Self
    }

    fn apply(
        source: Option<&Path>,
        target: &Path,
        fs_type: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> DiskplugResult<()> {
        mount(source, target, fs_type, flags, data).map_err(|e| {
            DiskplugError::Storage(format!(
                "Failed to mount {} to {} (flags={:?}): {}",
                source.map(|s| s.display().to_string()).unwrap_or_default(),
                target.display(),
                flags,
                e
            ))
        })
    }
}

impl Mounter for HostMounter {
    fn is_mount_point(&self, path: &Path) -> DiskplugResult<bool> {
        let mounts = mountinfo::read_mounts()?;
        Ok(mountinfo::find_mount(&mounts, &mountinfo::normalize(path)).is_some())
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> DiskplugResult<()> {
        let spec = MountSpec::parse(options);
        let fs_type = (!spec.is_bind() && !fs_type.is_empty()).then_some(fs_type);

        tracing::info!(
            source = %source.display(),
            target = %target.display(),
            fs_type = fs_type.unwrap_or("none"),
            options = ?options,
            "Mounting"
        );

        Self::apply(
            Some(source),
            target,
            fs_type,
            spec.flags,
            spec.data.as_deref(),
        )?;

        if let Some(flags) = spec.remount_flags() {
            Self::apply(None, target, None, flags, None)?;
        }
        if let Some(propagation) = spec.propagation() {
            Self::apply(None, target, None, propagation, None)?;
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> DiskplugResult<()> {
        tracing::info!(target = %target.display(), "Unmounting");
        umount(target).map_err(|e| {
            DiskplugError::Storage(format!("Failed to unmount {}: {}", target.display(), e))
        })
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        mkfs_options: &[String],
        options: &[String],
    ) -> DiskplugResult<()> {
        match format::probe_filesystem(device)? {
            None => format::format(device, fs_type, mkfs_options)?,
            Some(existing) if existing == fs_type => {
                tracing::info!(device = %device.display(), fs_type, "Using existing filesystem");
            }
            Some(existing) => {
                return Err(DiskplugError::Storage(format!(
                    "Device {} is already formatted as {}, requested {}",
                    device.display(),
                    existing,
                    fs_type
                )));
            }
        }

        self.mount(device, target, fs_type, options)
    }

    fn mount_refs(&self, path: &Path) -> DiskplugResult<Vec<PathBuf>> {
        let mounts = mountinfo::read_mounts()?;
        Ok(mountinfo::mount_refs(&mounts, &mountinfo::normalize(path)))
    }

    fn ensure_folder(&self, path: &Path) -> DiskplugResult<()> {
        fs::create_dir_all(path).map_err(|e| {
            DiskplugError::Storage(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn ensure_block(&self, path: &Path) -> DiskplugResult<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            self.ensure_folder(parent)?;
        }
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map(|_| ())
            .map_err(|e| {
                DiskplugError::Storage(format!(
                    "Failed to create block target {}: {}",
                    path.display(),
                    e
                ))
            })
    }

    fn safe_remove(&self, path: &Path) -> DiskplugResult<()> {
        let result = match self.path_kind(path)? {
            None => return Ok(()),
            Some(PathKind::Directory) => fs::remove_dir(path),
            Some(_) => fs::remove_file(path),
        };
        result.map_err(|e| {
            DiskplugError::Storage(format!("Failed to remove {}: {}", path.display(), e))
        })
    }

    fn path_kind(&self, path: &Path) -> DiskplugResult<Option<PathKind>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file_type = metadata.file_type();
        let kind = if file_type.is_dir() {
            PathKind::Directory
        } else if file_type.is_block_device() {
            PathKind::BlockDevice
        } else if file_type.is_file() {
            PathKind::File
        } else {
            PathKind::Other
        };
        Ok(Some(kind))
    }

    fn is_dir_empty(&self, path: &Path) -> DiskplugResult<bool> {
        Ok(fs::read_dir(path)?.next().is_none())
    }
}
