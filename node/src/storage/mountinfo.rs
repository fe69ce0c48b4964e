//! Mount table queries backed by `/proc/self/mountinfo`.

use std::path::{Path, PathBuf};

use diskplug_shared::errors::{DiskplugError, DiskplugResult};

/// One row of the mount table, reduced to the fields the agent inspects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MountEntry {
    pub mount_point: PathBuf,
    pub source: Option<String>,
    pub root: String,
    pub majmin: String,
    pub fs_type: String,
}

/// Snapshot the current process's mount table.
pub(crate) fn read_mounts() -> DiskplugResult<Vec<MountEntry>> {
    let process = procfs::process::Process::myself()
        .map_err(|e| DiskplugError::Storage(format!("Failed to open /proc/self: {}", e)))?;
    let infos = process
        .mountinfo()
        .map_err(|e| DiskplugError::Storage(format!("Failed to read mountinfo: {}", e)))?;

    Ok(infos
        .0
        .into_iter()
        .map(|info| MountEntry {
            mount_point: info.mount_point,
            source: info.mount_source,
            root: info.root,
            majmin: info.majmin,
            fs_type: info.fs_type,
        })
        .collect())
}

/// Resolve symlinks where possible; mountinfo always records real paths.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Topmost mount at exactly `path`.
pub(crate) fn find_mount<'a>(mounts: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    mounts.iter().rev().find(|entry| entry.mount_point == path)
}

/// Other mount points exposing the same filesystem subtree as `path`.
///
/// Bind mounts share the device numbers and root of their source, so every
/// entry matching both (other than `path` itself) is a reference.
pub(crate) fn mount_refs(mounts: &[MountEntry], path: &Path) -> Vec<PathBuf> {
    let Some(target) = find_mount(mounts, path) else {
        return Vec::new();
    };

    mounts
        .iter()
        .filter(|entry| {
            entry.mount_point != path && entry.majmin == target.majmin && entry.root == target.root
        })
        .map(|entry| entry.mount_point.clone())
        .collect()
}
