//! CSI Node service.
//!
//! Converts protocol messages into engine requests and back. All volume
//! work happens in [`crate::volume::VolumeLifecycle`].

use std::collections::HashMap;
use std::path::PathBuf;

use diskplug_shared::constants::driver;
use diskplug_shared::{
    node_service_capability, volume_usage, Node as NodeService, NodeExpandVolumeRequest,
    NodeExpandVolumeResponse, NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse,
    NodeGetInfoRequest, NodeGetInfoResponse, NodeGetVolumeStatsRequest,
    NodeGetVolumeStatsResponse, NodePublishVolumeRequest, NodePublishVolumeResponse,
    NodeServiceCapability, NodeStageVolumeRequest, NodeStageVolumeResponse,
    NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse, NodeUnstageVolumeRequest,
    NodeUnstageVolumeResponse, Topology, VolumeUsage,
};
use tonic::{Request, Response, Status};
use tracing::{error, info};

use crate::service::server::NodeAgent;
use crate::storage::VolumeStats;
use crate::volume::{PublishRequest, StageRequest, VolumeCapability};

const NODE_CAPABILITIES: &[node_service_capability::rpc::Type] = &[
    node_service_capability::rpc::Type::StageUnstageVolume,
    node_service_capability::rpc::Type::ExpandVolume,
    node_service_capability::rpc::Type::GetVolumeStats,
];

fn capability(
    cap: Option<diskplug_shared::VolumeCapability>,
) -> Result<Option<VolumeCapability>, Status> {
    cap.map(VolumeCapability::try_from)
        .transpose()
        .map_err(Status::from)
}

fn log_failure<T>(rpc: &str, volume_id: &str, result: Result<T, Status>) -> Result<T, Status> {
    if let Err(status) = &result {
        error!(volume_id, code = ?status.code(), "{} failed: {}", rpc, status.message());
    }
    result
}

fn usage(stats: VolumeStats) -> Vec<VolumeUsage> {
    let bytes = VolumeUsage {
        available: stats.available_bytes,
        total: stats.total_bytes,
        used: stats.used_bytes,
        unit: volume_usage::Unit::Bytes as i32,
    };
    if stats.block {
        return vec![bytes];
    }

    let inodes = VolumeUsage {
        available: stats.free_inodes,
        total: stats.total_inodes,
        used: stats.used_inodes,
        unit: volume_usage::Unit::Inodes as i32,
    };
    vec![bytes, inodes]
}

#[tonic::async_trait]
impl NodeService for NodeAgent {
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();
        info!(volume_id = %req.volume_id, staging = %req.staging_target_path, "NodeStageVolume");

        let volume_id = req.volume_id.clone();
        let stage = StageRequest {
            volume_id: req.volume_id,
            staging_path: PathBuf::from(req.staging_target_path),
            capability: capability(req.volume_capability)?,
            volume_context: req.volume_context,
        };

        let result = self.run_blocking(move |lc| lc.stage(&stage)).await;
        log_failure("NodeStageVolume", &volume_id, result)?;
        Ok(Response::new(NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();
        info!(volume_id = %req.volume_id, staging = %req.staging_target_path, "NodeUnstageVolume");

        let volume_id = req.volume_id.clone();
        let staging_path = PathBuf::from(req.staging_target_path);
        let result = self
            .run_blocking(move |lc| lc.unstage(&req.volume_id, &staging_path))
            .await;
        log_failure("NodeUnstageVolume", &volume_id, result)?;
        Ok(Response::new(NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let req = request.into_inner();
        info!(volume_id = %req.volume_id, target = %req.target_path, "NodePublishVolume");

        let volume_id = req.volume_id.clone();
        let publish = PublishRequest {
            volume_id: req.volume_id,
            staging_path: PathBuf::from(req.staging_target_path),
            target_path: PathBuf::from(req.target_path),
            capability: capability(req.volume_capability)?,
            readonly: req.readonly,
        };

        let result = self.run_blocking(move |lc| lc.publish(&publish)).await;
        log_failure("NodePublishVolume", &volume_id, result)?;
        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();
        info!(volume_id = %req.volume_id, target = %req.target_path, "NodeUnpublishVolume");

        let volume_id = req.volume_id.clone();
        let target = PathBuf::from(req.target_path);
        let result = self
            .run_blocking(move |lc| lc.unpublish(&req.volume_id, &target))
            .await;
        log_failure("NodeUnpublishVolume", &volume_id, result)?;
        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        let req = request.into_inner();
        let volume_path = PathBuf::from(&req.volume_path);

        let result = self
            .run_blocking(move |lc| lc.volume_stats(&volume_path))
            .await;
        let stats = log_failure("NodeGetVolumeStats", &req.volume_id, result)?;

        Ok(Response::new(NodeGetVolumeStatsResponse {
            usage: usage(stats),
            volume_condition: None,
        }))
    }

    async fn node_expand_volume(
        &self,
        request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        let req = request.into_inner();
        info!(volume_id = %req.volume_id, path = %req.volume_path, "NodeExpandVolume");

        let capacity_bytes = req
            .capacity_range
            .as_ref()
            .map(|range| range.required_bytes)
            .unwrap_or_default();
        let volume_id = req.volume_id.clone();
        let volume_path = PathBuf::from(req.volume_path);

        let result = self
            .run_blocking(move |lc| lc.expand(&req.volume_id, &volume_path))
            .await;
        log_failure("NodeExpandVolume", &volume_id, result)?;
        Ok(Response::new(NodeExpandVolumeResponse { capacity_bytes }))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        let capabilities = NODE_CAPABILITIES
            .iter()
            .map(|rpc_type| NodeServiceCapability {
                r#type: Some(node_service_capability::Type::Rpc(
                    node_service_capability::Rpc {
                        r#type: *rpc_type as i32,
                    },
                )),
            })
            .collect();

        Ok(Response::new(NodeGetCapabilitiesResponse { capabilities }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        let segments = HashMap::from([(
            driver::TOPOLOGY_ZONE_KEY.to_string(),
            self.identity.zone.clone(),
        )]);

        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.identity.node_id.clone(),
            max_volumes_per_node: self.identity.max_volumes_per_node,
            accessible_topology: Some(Topology { segments }),
        }))
    }
}
