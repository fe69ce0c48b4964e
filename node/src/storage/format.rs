//! Filesystem probing and creation.

use std::path::Path;
use std::process::Command;

use diskplug_shared::errors::{DiskplugError, DiskplugResult};

/// `blkid` exit status when the device carries no recognizable signature.
const BLKID_NO_SIGNATURE: i32 = 2;

/// Report the filesystem already on `device`, or `None` for a blank disk.
///
/// A device that carries a partition table but no filesystem is not blank
/// and yields an error.
pub fn probe_filesystem(device: &Path) -> DiskplugResult<Option<String>> {
    let output = Command::new("blkid")
        .args(["-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export"])
        .arg(device)
        .output()
        .map_err(|e| DiskplugError::Storage(format!("Failed to run blkid: {}", e)))?;

    if output.status.code() == Some(BLKID_NO_SIGNATURE) {
        return Ok(None);
    }
    if !output.status.success() {
        return Err(DiskplugError::Storage(format!(
            "Failed to probe {}: {}",
            device.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe(device, &String::from_utf8_lossy(&output.stdout))
}

/// Interpret `blkid -o export` output.
pub(crate) fn parse_probe(device: &Path, export: &str) -> DiskplugResult<Option<String>> {
    let mut fs_type = None;
    let mut pt_type = None;
    for (key, value) in export.lines().filter_map(|line| line.trim().split_once('=')) {
        match key {
            "TYPE" if !value.is_empty() => fs_type = Some(value.to_string()),
            "PTTYPE" if !value.is_empty() => pt_type = Some(value.to_string()),
            _ => {}
        }
    }

    match (fs_type, pt_type) {
        (Some(fs_type), _) => Ok(Some(fs_type)),
        (None, Some(pt_type)) => Err(DiskplugError::Storage(format!(
            "{} has a {} partition table and no filesystem, refusing to format",
            device.display(),
            pt_type
        ))),
        (None, None) => Ok(None),
    }
}

/// Arguments for `mkfs.<fs_type>`, device last.
pub(crate) fn mkfs_args(fs_type: &str, extra: &[String], device: &Path) -> Vec<String> {
    let mut args: Vec<String> = match fs_type {
        // No reserved blocks: the volume belongs to a single workload
        "ext2" | "ext3" | "ext4" => vec!["-F".into(), "-m0".into()],
        "xfs" => vec!["-f".into()],
        _ => Vec::new(),
    };
    args.extend(extra.iter().cloned());
    args.push(device.display().to_string());
    args
}

/// Create a filesystem on `device`.
pub fn format(device: &Path, fs_type: &str, extra: &[String]) -> DiskplugResult<()> {
    tracing::info!(
        device = %device.display(),
        fs_type,
        options = ?extra,
        "Formatting device"
    );

    let mkfs_cmd = format!("mkfs.{}", fs_type);
    let output = Command::new(&mkfs_cmd)
        .args(mkfs_args(fs_type, extra, device))
        .output()
        .map_err(|e| DiskplugError::Storage(format!("Failed to run {}: {}", mkfs_cmd, e)))?;

    if !output.status.success() {
        return Err(DiskplugError::Storage(format!(
            "Failed to format {} with {}: {}",
            device.display(),
            fs_type,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    tracing::info!(device = %device.display(), "Formatted successfully");
    Ok(())
}
