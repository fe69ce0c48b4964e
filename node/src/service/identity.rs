//! CSI Identity service.

use std::collections::HashMap;

use diskplug_shared::constants::driver;
use diskplug_shared::{
    plugin_capability, GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse,
    GetPluginInfoRequest, GetPluginInfoResponse, Identity as IdentityService, PluginCapability,
    ProbeRequest, ProbeResponse,
};
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::service::server::NodeAgent;

#[tonic::async_trait]
impl IdentityService for NodeAgent {
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        Ok(Response::new(GetPluginInfoResponse {
            name: driver::NAME.to_string(),
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
            manifest: HashMap::new(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        let topology = PluginCapability {
            r#type: Some(plugin_capability::Type::Service(plugin_capability::Service {
                r#type: plugin_capability::service::Type::VolumeAccessibilityConstraints as i32,
            })),
        };

        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: vec![topology],
        }))
    }

    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        debug!("Probe");
        Ok(Response::new(ProbeResponse { ready: Some(true) }))
    }
}
