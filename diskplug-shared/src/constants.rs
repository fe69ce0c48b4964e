//! Well-known names shared between the node agent and its deployment.
//!
//! These must stay in sync with the driver registration and the manifests
//! that mount host paths into the agent container.

/// Driver identity reported by the Identity service
pub mod driver {
    /// CSI driver name
    pub const NAME: &str = "disk.csi.diskplug.io";

    /// Topology segment key carrying the node's zone
    pub const TOPOLOGY_ZONE_KEY: &str = "topology.diskplug.io/zone";
}

/// Volume context keys understood by Stage
pub mod volume_context {
    /// Multi-attach flag; "enable", "true" and "yes" turn it on
    pub const SHARED: &str = "shared";

    /// Whitespace-separated extra flags for mkfs (ext3/ext4 only)
    pub const MKFS_OPTIONS: &str = "mkfsOptions";
}

/// Filesystem defaults
pub mod fs {
    /// Filesystem used when the capability leaves fsType empty
    pub const DEFAULT_FS_TYPE: &str = "ext4";

    /// Suffix the orchestrator appends to per-pod publish directories
    pub const PUBLISH_SUFFIX: &str = "/mount";

    /// Directory name of the per-volume global staging mount
    pub const GLOBAL_MOUNT_DIR: &str = "globalmount";
}

/// Default host paths
pub mod paths {
    /// Default listen endpoint
    pub const DEFAULT_ENDPOINT: &str = "unix:///csi/csi.sock";

    /// Per-volume device records
    pub const VOLUME_RECORD_DIR: &str = "/host/etc/kubernetes/volumes/disk";

    /// Soft-deleted records, relative to the record directory
    pub const VOLUME_RECORD_REMOVE_DIR: &str = "remove";

    /// Raw-block publish targets live under this directory
    pub const PUBLISH_DEVICE_DIR: &str =
        "/var/lib/kubelet/plugins/kubernetes.io/csi/volumeDevices/publish";

    /// Root of global staging mounts that some kubelet layouts fail to unmount
    pub const GLOBAL_MOUNT_ROOT: &str = "/var/lib/container/kubelet/plugins/kubernetes.io/csi/pv";

    /// Stable device links
    pub const DISK_BY_ID: &str = "/dev/disk/by-id";
}

/// Node limits
pub mod limits {
    /// Upper bound (and default) for attachable volumes per instance
    pub const MAX_VOLUMES_PER_NODE: i64 = 15;
}

/// Instance metadata
pub mod metadata {
    /// Instance identity document endpoint
    pub const DEFAULT_DOCUMENT_URL: &str =
        "http://100.100.100.200/latest/dynamic/instance-identity/document";
}
