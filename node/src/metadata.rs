//! Node identity resolution.
//!
//! The node id and zone come from flags when given, otherwise from the
//! instance identity document served by the cloud metadata endpoint. The
//! result is resolved once at startup and never changes.

use std::time::Duration;

use diskplug_shared::errors::{DiskplugError, DiskplugResult};
use serde::Deserialize;

use crate::config::NodeConfig;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity reported by NodeGetInfo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_id: String,
    pub zone: String,
    pub max_volumes_per_node: i64,
}

#[derive(Debug, Deserialize)]
struct InstanceDocument {
    #[serde(rename = "instance-id")]
    instance_id: String,
    #[serde(rename = "zone-id")]
    zone_id: String,
}

async fn fetch_document(url: &str) -> DiskplugResult<InstanceDocument> {
    let client = reqwest::Client::builder()
        .timeout(METADATA_TIMEOUT)
        .build()
        .map_err(|e| DiskplugError::Metadata(format!("Failed to build HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| DiskplugError::Metadata(format!("Failed to fetch {}: {}", url, e)))?;

    let body = response
        .text()
        .await
        .map_err(|e| DiskplugError::Metadata(format!("Failed to read {}: {}", url, e)))?;

    serde_json::from_str(&body)
        .map_err(|e| DiskplugError::Metadata(format!("Invalid instance document: {}", e)))
}

/// Resolve the node identity, consulting the metadata service only for
/// values not set in the configuration.
pub async fn resolve(config: &NodeConfig) -> DiskplugResult<NodeIdentity> {
    let (node_id, zone) = match (&config.node_id, &config.zone) {
        (Some(node_id), Some(zone)) => (node_id.clone(), zone.clone()),
        (node_id, zone) => {
            tracing::info!(url = %config.metadata_url, "Fetching instance identity document");
            let document = fetch_document(&config.metadata_url).await?;
            (
                node_id.clone().unwrap_or(document.instance_id),
                zone.clone().unwrap_or(document.zone_id),
            )
        }
    };

    if node_id.is_empty() {
        return Err(DiskplugError::Metadata("Resolved node id is empty".to_string()));
    }

    tracing::info!(node_id = %node_id, zone = %zone, "Resolved node identity");
    Ok(NodeIdentity {
        node_id,
        zone,
        max_volumes_per_node: config.max_volumes_per_node,
    })
}
