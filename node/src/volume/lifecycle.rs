//! Stage, publish, unpublish, unstage and expand.
//!
//! Each operation re-derives the volume's state from the host before acting
//! and treats "already done" as success. Errors are mapped to the three
//! outcomes the orchestrator distinguishes: invalid argument (do not retry),
//! aborted (retry with backoff) and everything else (internal).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use diskplug_shared::constants::fs;
use diskplug_shared::errors::{DiskplugError, DiskplugResult};

use super::capability::{VolumeCapability, VolumeOptions};
use super::cleanup;
use crate::attach::{AttachGate, DiskAttacher};
use crate::storage::{
    DeviceLocator, Mounter, PathKind, Resizer, StatsCollector, VolumeRecordStore, VolumeStats,
};

/// Who performs the cloud attach.
#[derive(Clone)]
pub enum AttachMode {
    /// A controller attaches before Stage; the node only waits for the device.
    Controller,
    /// The node attaches in Stage and detaches in Unstage.
    Node(Arc<dyn DiskAttacher>),
}

impl std::fmt::Debug for AttachMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachMode::Controller => f.write_str("Controller"),
            AttachMode::Node(_) => f.write_str("Node"),
        }
    }
}

/// Host-side collaborators of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub locator: Arc<dyn DeviceLocator>,
    pub mounter: Arc<dyn Mounter>,
    pub records: Arc<dyn VolumeRecordStore>,
    pub resizer: Arc<dyn Resizer>,
    pub stats: Arc<dyn StatsCollector>,
}

/// Host directories the engine needs to recognize.
#[derive(Clone, Debug)]
pub struct LifecyclePaths {
    /// Raw block publish targets live here.
    pub publish_device_dir: PathBuf,
    /// Root of `<pv>/globalmount` staging directories.
    pub global_mount_root: PathBuf,
}

#[derive(Clone, Debug, Default)]
pub struct StageRequest {
    pub volume_id: String,
    pub staging_path: PathBuf,
    pub capability: Option<VolumeCapability>,
    pub volume_context: HashMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct PublishRequest {
    pub volume_id: String,
    pub staging_path: PathBuf,
    pub target_path: PathBuf,
    pub capability: Option<VolumeCapability>,
    pub readonly: bool,
}

/// The node volume lifecycle engine.
///
/// Synchronous and blocking: callers on an async runtime must move calls
/// onto a blocking thread.
pub struct VolumeLifecycle {
    node_id: String,
    attach: AttachMode,
    gate: Arc<AttachGate>,
    paths: LifecyclePaths,
    locator: Arc<dyn DeviceLocator>,
    mounter: Arc<dyn Mounter>,
    records: Arc<dyn VolumeRecordStore>,
    resizer: Arc<dyn Resizer>,
    stats: Arc<dyn StatsCollector>,
}

fn require(value: &str, what: &str) -> DiskplugResult<()> {
    if value.is_empty() {
        return Err(DiskplugError::InvalidArgument(format!(
            "{} must be provided",
            what
        )));
    }
    Ok(())
}

fn require_path(path: &Path, what: &str) -> DiskplugResult<()> {
    if path.as_os_str().is_empty() {
        return Err(DiskplugError::InvalidArgument(format!(
            "{} must be provided",
            what
        )));
    }
    Ok(())
}

fn require_capability(capability: Option<&VolumeCapability>) -> DiskplugResult<&VolumeCapability> {
    capability.ok_or_else(|| {
        DiskplugError::InvalidArgument("Volume capability must be provided".to_string())
    })
}

fn internal(context: impl std::fmt::Display, err: DiskplugError) -> DiskplugError {
    DiskplugError::Internal(format!("{}: {}", context, err))
}

/// Raw block volumes are bound onto a file named after the volume inside
/// the staging directory.
fn staged_path(staging_path: &Path, volume_id: &str, capability: &VolumeCapability) -> PathBuf {
    if capability.is_block() {
        staging_path.join(volume_id)
    } else {
        staging_path.to_path_buf()
    }
}

fn with_option(flags: &[String], extra: &str) -> Vec<String> {
    let mut options = flags.to_vec();
    options.push(extra.to_string());
    options
}

impl VolumeLifecycle {
    pub fn new(
        node_id: impl Into<String>,
        attach: AttachMode,
        gate: Arc<AttachGate>,
        paths: LifecyclePaths,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            locator,
            mounter,
            records,
            resizer,
            stats,
        } = collaborators;

        Self {
            node_id: node_id.into(),
            attach,
            gate,
            paths,
            locator,
            mounter,
            records,
            resizer,
            stats,
        }
    }

    // ========================================================================
    // Stage / Unstage
    // ========================================================================

    /// Make the volume's device available at the staging path.
    pub fn stage(&self, req: &StageRequest) -> DiskplugResult<()> {
        require(&req.volume_id, "Volume ID")?;
        require_path(&req.staging_path, "Staging target path")?;
        let capability = require_capability(req.capability.as_ref())?;

        let volume_id = req.volume_id.as_str();
        let options = VolumeOptions::from_context(&req.volume_context);
        let target = staged_path(&req.staging_path, volume_id, capability);

        tracing::info!(
            volume_id,
            target = %target.display(),
            block = capability.is_block(),
            "Staging volume"
        );

        if capability.is_block() && self.mounter.is_mount_point(&target)? {
            tracing::info!(volume_id, target = %target.display(), "Block volume already staged");
            return Ok(());
        }

        if capability.is_block() {
            self.mounter.ensure_block(&target)?;
        } else {
            self.mounter.ensure_folder(&target)?;
        }

        if self.mounter.is_mount_point(&target)? {
            let device = self
                .locator
                .device_for_mount_point(&target)?
                .ok_or_else(|| {
                    DiskplugError::Internal(format!(
                        "{} is mounted but its device cannot be resolved",
                        target.display()
                    ))
                })?;
            self.locator
                .check_device(&device)
                .map_err(|e| internal(format!("Staged device {} unusable", device.display()), e))?;

            tracing::info!(volume_id, device = %device.display(), "Volume already staged");
            return Ok(());
        }

        // A concurrent stage of the same volume may have finished meanwhile
        if self.mounter.is_mount_point(&target)? {
            tracing::info!(volume_id, target = %target.display(), "Volume staged concurrently");
            return Ok(());
        }

        let device = self.acquire_device(volume_id, options.shared)?;

        self.locator
            .check_device(&device)
            .map_err(|e| internal(format!("Device {} unusable", device.display()), e))?;

        self.records.save(volume_id, &device).map_err(|e| {
            DiskplugError::Aborted(format!("Failed to record device of {}: {}", volume_id, e))
        })?;

        if capability.is_block() {
            self.mounter
                .mount(&device, &target, "", &["bind".to_string()])?;
        } else {
            let fs_type = capability.fs_type();
            let mount_options = with_option(capability.mount_flags(), "shared");
            let mkfs_options: &[String] = match fs_type {
                "ext3" | "ext4" => &options.mkfs_options[..],
                _ => &[],
            };
            self.mounter.format_and_mount(
                &device,
                &target,
                fs_type,
                mkfs_options,
                &mount_options,
            )?;
        }

        tracing::info!(
            volume_id,
            device = %device.display(),
            target = %target.display(),
            "Staged volume"
        );
        Ok(())
    }

    /// Tear down the staging mount and, when the node owns attachment,
    /// detach the disk.
    pub fn unstage(&self, volume_id: &str, staging_path: &Path) -> DiskplugResult<()> {
        require(volume_id, "Volume ID")?;
        require_path(staging_path, "Staging target path")?;

        let block_target = staging_path.join(volume_id);
        let target = match self.mounter.path_kind(&block_target) {
            Ok(Some(PathKind::BlockDevice)) => block_target,
            Ok(_) => staging_path.to_path_buf(),
            Err(e) => {
                return Err(DiskplugError::InvalidArgument(format!(
                    "Cannot stat {}: {}",
                    block_target.display(),
                    e
                )));
            }
        };

        tracing::info!(volume_id, target = %target.display(), "Unstaging volume");

        if self.mounter.path_kind(&target)?.is_some() {
            if self.mounter.is_mount_point(&target)? {
                self.mounter
                    .unmount(&target)
                    .map_err(|e| internal(format!("Unstage {}", volume_id), e))?;
            }
            self.mounter
                .safe_remove(&target)
                .map_err(|e| internal(format!("Unstage {}", volume_id), e))?;
        } else {
            tracing::info!(volume_id, target = %target.display(), "Staging path already gone");
        }

        if let AttachMode::Node(attacher) = &self.attach {
            let _permit = self.enter_gate(volume_id)?;
            attacher
                .detach_disk(volume_id, &self.node_id, true)
                .map_err(|e| internal(format!("Detach {}", volume_id), e))?;

            if let Err(e) = self.records.delete(volume_id) {
                tracing::warn!(volume_id, "Failed to remove volume record: {}", e);
            }
        }

        tracing::info!(volume_id, "Unstaged volume");
        Ok(())
    }

    fn enter_gate(&self, volume_id: &str) -> DiskplugResult<crate::attach::AttachPermit<'_>> {
        self.gate.try_enter().ok_or_else(|| {
            tracing::warn!(volume_id, "Attach gate busy");
            DiskplugError::Aborted(format!(
                "Another attach or detach is in progress, retry {} later",
                volume_id
            ))
        })
    }

    fn acquire_device(&self, volume_id: &str, shared: bool) -> DiskplugResult<PathBuf> {
        match &self.attach {
            AttachMode::Controller => self.locator.device_for_volume(volume_id).map_err(|e| {
                DiskplugError::Aborted(format!(
                    "Volume {} is not attached yet: {}",
                    volume_id, e
                ))
            }),
            AttachMode::Node(attacher) => {
                let _permit = self.enter_gate(volume_id)?;
                attacher.attach_disk(volume_id, &self.node_id, shared, true)
            }
        }
    }

    // ========================================================================
    // Publish / Unpublish
    // ========================================================================

    /// Bind the staged volume into a workload's target path.
    pub fn publish(&self, req: &PublishRequest) -> DiskplugResult<()> {
        require(&req.volume_id, "Volume ID")?;
        require_path(&req.staging_path, "Staging target path")?;
        let capability = require_capability(req.capability.as_ref())?;
        require_path(&req.target_path, "Target path")?;

        let volume_id = req.volume_id.as_str();
        let target = req.target_path.as_path();
        let source = staged_path(&req.staging_path, volume_id, capability);

        tracing::info!(
            volume_id,
            source = %source.display(),
            target = %target.display(),
            readonly = req.readonly,
            "Publishing volume"
        );

        if capability.is_block() {
            if !self.mounter.is_mount_point(target)? {
                self.mounter.ensure_block(target)?;
                self.mounter
                    .mount(&source, target, "", &["bind".to_string()])?;
            }
            tracing::info!(volume_id, target = %target.display(), "Published block volume");
            return Ok(());
        }

        if !target.to_string_lossy().ends_with(fs::PUBLISH_SUFFIX) {
            return Err(DiskplugError::InvalidArgument(format!(
                "Target path {} must end with {}",
                target.display(),
                fs::PUBLISH_SUFFIX
            )));
        }

        self.mounter.ensure_folder(target)?;
        if self.mounter.is_mount_point(target)? {
            tracing::info!(volume_id, target = %target.display(), "Volume already published");
            return Ok(());
        }

        let fs_type = capability.fs_type();
        let mut options = with_option(capability.mount_flags(), "bind");
        if req.readonly {
            options.push("ro".to_string());
        }

        self.verify_staged_device(volume_id, &req.staging_path, capability)?;

        self.mounter.mount(&source, target, fs_type, &options)?;
        tracing::info!(volume_id, target = %target.display(), "Published volume");
        Ok(())
    }

    /// Make sure the staging mount is backed by the device this volume was
    /// attached as, restoring a lost staging mount on the way.
    fn verify_staged_device(
        &self,
        volume_id: &str,
        staging_path: &Path,
        capability: &VolumeCapability,
    ) -> DiskplugResult<()> {
        let expected = match &self.attach {
            AttachMode::Controller => self
                .locator
                .device_for_volume(volume_id)
                .map_err(|e| internal(format!("Resolve device of {}", volume_id), e))?,
            AttachMode::Node(_) => self
                .records
                .load(volume_id)
                .map_err(|e| internal(format!("Load record of {}", volume_id), e))?
                .ok_or_else(|| {
                    DiskplugError::Internal(format!("No device recorded for {}", volume_id))
                })?,
        };
        if expected.as_os_str().is_empty() {
            return Err(DiskplugError::Internal(format!(
                "Empty device recorded for {}",
                volume_id
            )));
        }

        let actual = match self.locator.device_for_mount_point(staging_path)? {
            Some(device) => device,
            None => {
                tracing::warn!(
                    volume_id,
                    device = %expected.display(),
                    staging = %staging_path.display(),
                    "Staging mount missing, remounting"
                );
                let options = with_option(capability.mount_flags(), "shared");
                self.mounter
                    .mount(&expected, staging_path, capability.fs_type(), &options)?;
                self.locator
                    .device_for_mount_point(staging_path)?
                    .ok_or_else(|| {
                        DiskplugError::Internal(format!(
                            "No device mounted at {} after remount",
                            staging_path.display()
                        ))
                    })?
            }
        };

        if actual != expected {
            tracing::error!(
                volume_id,
                expected = %expected.display(),
                actual = %actual.display(),
                "Staged device mismatch"
            );
            return Err(DiskplugError::Internal(format!(
                "Volume {} expects device {} but {} is mounted at {}",
                volume_id,
                expected.display(),
                actual.display(),
                staging_path.display()
            )));
        }
        Ok(())
    }

    /// Remove a workload's bind mount, then release the global mount if
    /// nothing else uses it.
    pub fn unpublish(&self, volume_id: &str, target: &Path) -> DiskplugResult<()> {
        require_path(target, "Target path")?;
        tracing::info!(volume_id, target = %target.display(), "Unpublishing volume");

        let Some(kind) = self.mounter.path_kind(target)? else {
            tracing::info!(volume_id, target = %target.display(), "Target already gone");
            return Ok(());
        };

        if !self.mounter.is_mount_point(target)? {
            return match kind {
                PathKind::Directory if self.mounter.is_dir_empty(target)? => {
                    tracing::info!(volume_id, target = %target.display(), "Target not mounted");
                    Ok(())
                }
                kind if kind != PathKind::Directory
                    && target.starts_with(&self.paths.publish_device_dir) =>
                {
                    self.mounter
                        .safe_remove(target)
                        .map_err(|e| internal(format!("Unpublish {}", volume_id), e))?;
                    tracing::info!(volume_id, target = %target.display(), "Removed leftover device file");
                    Ok(())
                }
                _ => Err(DiskplugError::Internal(format!(
                    "{} is not mounted but not empty, refusing to touch it",
                    target.display()
                ))),
            };
        }

        self.mounter
            .unmount(target)
            .map_err(|e| internal(format!("Unpublish {}", volume_id), e))?;

        cleanup::release_global_mount(
            self.mounter.as_ref(),
            &self.paths.global_mount_root,
            target,
        );

        tracing::info!(volume_id, target = %target.display(), "Unpublished volume");
        Ok(())
    }

    // ========================================================================
    // Expand / Stats
    // ========================================================================

    /// Grow the filesystem to the device's current size.
    pub fn expand(&self, volume_id: &str, volume_path: &Path) -> DiskplugResult<()> {
        require(volume_id, "Volume ID")?;
        require_path(volume_path, "Volume path")?;

        let device = self
            .locator
            .device_for_volume(volume_id)
            .map_err(|e| internal(format!("Resolve device of {}", volume_id), e))?;

        tracing::info!(
            volume_id,
            device = %device.display(),
            path = %volume_path.display(),
            "Expanding volume"
        );

        match self.resizer.resize(&device, volume_path) {
            Ok(true) => {
                tracing::info!(volume_id, "Expanded volume");
                Ok(())
            }
            Ok(false) => Err(DiskplugError::Internal(format!(
                "Filesystem on {} cannot be expanded",
                device.display()
            ))),
            Err(e) => Err(internal(format!("Expand {}", volume_id), e)),
        }
    }

    pub fn volume_stats(&self, volume_path: &Path) -> DiskplugResult<VolumeStats> {
        require_path(volume_path, "Volume path")?;

        if self.mounter.path_kind(volume_path)?.is_none() {
            return Err(DiskplugError::NotFound(format!(
                "Volume path {} does not exist",
                volume_path.display()
            )));
        }
        self.stats.collect(volume_path)
    }
}
