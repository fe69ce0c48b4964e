//! Typed views of the volume capability and volume context.

use std::collections::HashMap;

use diskplug_shared::constants::{fs, volume_context};
use diskplug_shared::errors::{DiskplugError, DiskplugResult};
use diskplug_shared::generated::{self, volume_capability};

/// How a volume is consumed by the workload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessType {
    /// Raw device node, never formatted.
    Block,
    Mount(MountAccess),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MountAccess {
    /// Empty means the default filesystem.
    pub fs_type: String,
    pub mount_flags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeCapability {
    pub access: AccessType,
}

impl VolumeCapability {
    pub fn block() -> Self {
        Self {
            access: AccessType::Block,
        }
    }

    pub fn mount(fs_type: impl Into<String>, mount_flags: Vec<String>) -> Self {
        Self {
            access: AccessType::Mount(MountAccess {
                fs_type: fs_type.into(),
                mount_flags,
            }),
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.access, AccessType::Block)
    }

    /// Requested filesystem, falling back to the default.
    pub fn fs_type(&self) -> &str {
        match &self.access {
            AccessType::Mount(m) if !m.fs_type.is_empty() => m.fs_type.as_str(),
            _ => fs::DEFAULT_FS_TYPE,
        }
    }

    pub fn mount_flags(&self) -> &[String] {
        match &self.access {
            AccessType::Mount(m) => m.mount_flags.as_slice(),
            AccessType::Block => &[],
        }
    }
}

impl TryFrom<generated::VolumeCapability> for VolumeCapability {
    type Error = DiskplugError;

    fn try_from(cap: generated::VolumeCapability) -> DiskplugResult<Self> {
        match cap.access_type {
            Some(volume_capability::AccessType::Block(_)) => Ok(Self::block()),
            Some(volume_capability::AccessType::Mount(m)) => {
                Ok(Self::mount(m.fs_type, m.mount_flags))
            }
            None => Err(DiskplugError::InvalidArgument(
                "Volume capability access type must be provided".to_string(),
            )),
        }
    }
}

/// Options carried in the volume context, parsed once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeOptions {
    /// The disk may be attached to more than one instance.
    pub shared: bool,
    /// Extra `mkfs` arguments.
    pub mkfs_options: Vec<String>,
}

impl VolumeOptions {
    pub fn from_context(context: &HashMap<String, String>) -> Self {
        let shared = context
            .get(volume_context::SHARED)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "enable" | "true" | "yes"))
            .unwrap_or(false);
        let mkfs_options = context
            .get(volume_context::MKFS_OPTIONS)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            shared,
            mkfs_options,
        }
    }
}
