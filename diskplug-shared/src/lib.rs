//! diskplug shared crate
//!
//! Common types used by the node agent and its tooling: the generated CSI
//! protocol, the error taxonomy, endpoint parsing, and well-known constants.

pub mod constants;
pub mod errors;
pub mod transport;

// Generated protobuf types
pub mod generated {
    #![allow(clippy::all, unused_qualifications)]
    tonic::include_proto!("csi.v1");
}

pub use errors::{DiskplugError, DiskplugResult};
pub use transport::Transport;

// Identity service
pub use generated::identity_client::IdentityClient;
pub use generated::identity_server::{Identity, IdentityServer};

// Node service
pub use generated::node_client::NodeClient;
pub use generated::node_server::{Node, NodeServer};

// All generated types
pub use generated::*;
