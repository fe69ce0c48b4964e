use std::future::Future;
use std::sync::Arc;

use diskplug_shared::errors::{DiskplugError, DiskplugResult};
use diskplug_shared::{IdentityServer, NodeServer, Transport};
use tonic::transport::Server;
use tonic::Status;
use tracing::{info, warn};

use crate::attach::{AttachGate, CommandAttacher};
use crate::config::{AttachConfig, NodeConfig};
use crate::metadata::NodeIdentity;
use crate::storage::{
    ByIdLocator, DeviceLocator, FileRecordStore, HostMounter, HostResizer, StatvfsCollector,
};
use crate::volume::{AttachMode, Collaborators, LifecyclePaths, VolumeLifecycle};

/// Node agent server.
///
/// Implements the CSI Identity and Node services over one listener. The
/// lifecycle engine is synchronous; every call is moved onto tokio's
/// blocking pool.
pub struct NodeAgent {
    pub(crate) identity: NodeIdentity,
    pub(crate) lifecycle: Arc<VolumeLifecycle>,
}

impl NodeAgent {
    pub fn new(identity: NodeIdentity, lifecycle: Arc<VolumeLifecycle>) -> Self {
        Self {
            identity,
            lifecycle,
        }
    }

    /// Wire the host implementations of every collaborator.
    pub fn from_config(config: &NodeConfig, identity: NodeIdentity) -> DiskplugResult<Self> {
        let locator: Arc<dyn DeviceLocator> = Arc::new(ByIdLocator::new());

        let attach = match &config.attach {
            AttachConfig::Controller => AttachMode::Controller,
            AttachConfig::Node {
                helper,
                tag,
                timeout,
            } => {
                if !helper.exists() {
                    return Err(DiskplugError::Config(format!(
                        "Attach helper {} does not exist",
                        helper.display()
                    )));
                }
                AttachMode::Node(Arc::new(CommandAttacher::new(
                    helper.clone(),
                    tag.clone(),
                    *timeout,
                    Arc::clone(&locator),
                )))
            }
        };
        info!(mode = ?attach, node_id = %identity.node_id, "Configured attach mode");

        let lifecycle = VolumeLifecycle::new(
            identity.node_id.clone(),
            attach,
            Arc::new(AttachGate::new()),
            LifecyclePaths {
                publish_device_dir: config.publish_device_dir.clone(),
                global_mount_root: config.global_mount_root.clone(),
            },
            Collaborators {
                locator,
                mounter: Arc::new(HostMounter::new()),
                records: Arc::new(FileRecordStore::new(&config.volume_record_dir)),
                resizer: Arc::new(HostResizer::new()),
                stats: Arc::new(StatvfsCollector::new()),
            },
        );

        Ok(Self::new(identity, Arc::new(lifecycle)))
    }

    /// Run a lifecycle call on the blocking pool.
    pub(crate) async fn run_blocking<T, F>(&self, op: F) -> Result<T, Status>
    where
        F: FnOnce(&VolumeLifecycle) -> DiskplugResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::task::spawn_blocking(move || op(&lifecycle))
            .await
            .map_err(|e| Status::internal(format!("Lifecycle task failed: {}", e)))?
            .map_err(Status::from)
    }

    /// Serve the CSI services on `transport` until SIGTERM or SIGINT.
    pub async fn run(self, transport: Transport) -> DiskplugResult<()> {
        info!("Starting CSI gRPC server on {}", transport);

        let agent = Arc::new(self);
        let router = Server::builder()
            .add_service(IdentityServer::from_arc(agent.clone()))
            .add_service(NodeServer::from_arc(agent.clone()));

        match transport {
            Transport::Unix { socket_path } => {
                use tokio_stream::wrappers::UnixListenerStream;

                // Remove a socket left behind by a previous run
                if socket_path.exists() {
                    std::fs::remove_file(&socket_path)?;
                }
                if let Some(parent) = socket_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                let listener = tokio::net::UnixListener::bind(&socket_path)?;
                info!("Listening on unix://{}", socket_path.display());

                let result = router
                    .serve_with_incoming_shutdown(
                        UnixListenerStream::new(listener),
                        shutdown_signal(),
                    )
                    .await;

                if let Err(e) = std::fs::remove_file(&socket_path) {
                    warn!("Failed to remove socket {}: {}", socket_path.display(), e);
                }
                result.map_err(|e| DiskplugError::Rpc(format!("Server error: {}", e)))?;
            }

            Transport::Tcp { host, port } => {
                use tokio_stream::wrappers::TcpListenerStream;

                let addr = format!("{}:{}", host, port);
                let listener = tokio::net::TcpListener::bind(&addr).await?;
                info!("Listening on tcp://{}", addr);

                router
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown_signal())
                    .await
                    .map_err(|e| DiskplugError::Rpc(format!("Server error: {}", e)))?;
            }
        }

        info!("CSI gRPC server stopped");
        Ok(())
    }
}

fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
        }
    }
}
