//! Command-line and environment configuration.
//!
//! Every flag has an environment fallback so the agent can be configured
//! from a DaemonSet manifest without templating its command line.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use diskplug_shared::constants::{limits, metadata, paths};
use diskplug_shared::errors::{DiskplugError, DiskplugResult};
use diskplug_shared::Transport;

/// diskplug CSI node agent - stages and publishes block volumes on this host
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "diskplug CSI node agent")]
pub struct NodeArgs {
    /// CSI endpoint to serve on
    ///
    /// Examples:
    ///   --endpoint unix:///csi/csi.sock
    ///   --endpoint tcp://127.0.0.1:10000
    #[arg(long, env = "CSI_ENDPOINT", default_value = paths::DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Instance id reported as the node id (skips the metadata lookup)
    #[arg(long, env = "NODE_ID")]
    pub node_id: Option<String>,

    /// Zone reported in the node topology (skips the metadata lookup)
    #[arg(long, env = "NODE_ZONE")]
    pub zone: Option<String>,

    /// Instance identity document URL
    #[arg(long, env = "METADATA_URL", default_value = metadata::DEFAULT_DOCUMENT_URL)]
    pub metadata_url: String,

    /// Volumes this node can attach, between 0 and 15
    #[arg(long, env = "MAX_VOLUMES_PERNODE")]
    pub max_volumes_per_node: Option<i64>,

    /// Let the controller attach disks; the node only waits for the device
    #[arg(
        long,
        env = "DISK_ATTACH_BY_CONTROLLER",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub attach_by_controller: bool,

    /// Tag passed to the attach helper for disks attached by this node
    #[arg(long, env = "DISK_TAGED_BY_PLUGIN")]
    pub tag_disk: Option<String>,

    /// Executable performing cloud attach and detach
    #[arg(long, env = "DISK_ATTACH_HELPER")]
    pub attach_helper: Option<PathBuf>,

    /// Seconds to wait for an attached device to appear or vanish
    #[arg(long, env = "DISK_ATTACH_TIMEOUT", default_value_t = 60)]
    pub attach_timeout_secs: u64,

    /// Directory holding volume to device records
    #[arg(long, default_value = paths::VOLUME_RECORD_DIR)]
    pub volume_record_dir: PathBuf,

    /// Directory under which raw block volumes are published
    #[arg(long, default_value = paths::PUBLISH_DEVICE_DIR)]
    pub publish_device_dir: PathBuf,

    /// Root of per-volume global staging mounts
    #[arg(long, default_value = paths::GLOBAL_MOUNT_ROOT)]
    pub global_mount_root: PathBuf,
}

/// How disks reach this node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttachConfig {
    Controller,
    Node {
        helper: PathBuf,
        tag: Option<String>,
        timeout: Duration,
    },
}

/// Resolved, immutable agent configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub transport: Transport,
    pub node_id: Option<String>,
    pub zone: Option<String>,
    pub metadata_url: String,
    pub max_volumes_per_node: i64,
    pub attach: AttachConfig,
    pub volume_record_dir: PathBuf,
    pub publish_device_dir: PathBuf,
    pub global_mount_root: PathBuf,
}

fn max_volumes(requested: Option<i64>) -> i64 {
    match requested {
        None => limits::MAX_VOLUMES_PER_NODE,
        Some(n) if (0..=limits::MAX_VOLUMES_PER_NODE).contains(&n) => n,
        Some(n) => {
            tracing::error!(
                requested = n,
                "Max volumes per node must be between 0 and {}, using {}",
                limits::MAX_VOLUMES_PER_NODE,
                limits::MAX_VOLUMES_PER_NODE
            );
            limits::MAX_VOLUMES_PER_NODE
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl NodeArgs {
    pub fn into_config(self) -> DiskplugResult<NodeConfig> {
        let transport = Transport::from_uri(&self.endpoint)
            .map_err(|e| DiskplugError::Config(format!("Invalid endpoint: {}", e)))?;

        let attach = if self.attach_by_controller {
            AttachConfig::Controller
        } else {
            let helper = self.attach_helper.ok_or_else(|| {
                DiskplugError::Config(
                    "--attach-helper is required unless --attach-by-controller is set"
                        .to_string(),
                )
            })?;
            AttachConfig::Node {
                helper,
                tag: non_empty(self.tag_disk),
                timeout: Duration::from_secs(self.attach_timeout_secs),
            }
        };

        Ok(NodeConfig {
            transport,
            node_id: non_empty(self.node_id),
            zone: non_empty(self.zone),
            metadata_url: self.metadata_url,
            max_volumes_per_node: max_volumes(self.max_volumes_per_node),
            attach,
            volume_record_dir: self.volume_record_dir,
            publish_device_dir: self.publish_device_dir,
            global_mount_root: self.global_mount_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> NodeArgs {
        NodeArgs::try_parse_from(std::iter::once("diskplug-node").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_controller_mode() {
        let config = parse(&[
            "--attach-by-controller",
            "--endpoint",
            "tcp://127.0.0.1:10000",
            "--node-id",
            "i-123",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.attach, AttachConfig::Controller);
        assert_eq!(config.transport, Transport::tcp("127.0.0.1", 10000));
        assert_eq!(config.node_id.as_deref(), Some("i-123"));
        assert_eq!(config.max_volumes_per_node, 15);
    }

    #[test]
    fn test_node_mode_requires_helper() {
        let err = parse(&[]).into_config().unwrap_err();
        assert!(matches!(err, DiskplugError::Config(_)));

        let config = parse(&[
            "--attach-helper",
            "/usr/bin/disk-attach",
            "--tag-disk",
            "k8s",
            "--attach-timeout-secs",
            "5",
        ])
        .into_config()
        .unwrap();
        assert_eq!(
            config.attach,
            AttachConfig::Node {
                helper: PathBuf::from("/usr/bin/disk-attach"),
                tag: Some("k8s".to_string()),
                timeout: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn test_max_volumes_range() {
        assert_eq!(max_volumes(None), 15);
        assert_eq!(max_volumes(Some(0)), 0);
        assert_eq!(max_volumes(Some(8)), 8);
        assert_eq!(max_volumes(Some(16)), 15);
        assert_eq!(max_volumes(Some(-1)), 15);
    }

    #[test]
    fn test_invalid_endpoint() {
        let err = parse(&["--attach-by-controller", "--endpoint", "vsock://3"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, DiskplugError::Config(_)));
    }

    #[test]
    fn test_default_paths() {
        let config = parse(&["--attach-by-controller"]).into_config().unwrap();
        assert_eq!(config.transport, Transport::unix(PathBuf::from("/csi/csi.sock")));
        assert_eq!(
            config.volume_record_dir,
            PathBuf::from(paths::VOLUME_RECORD_DIR)
        );
    }
}
