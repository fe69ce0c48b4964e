//! CSI gRPC services.
//!
//! - `identity`: plugin name, version and capabilities
//! - `node`: volume lifecycle RPCs, dispatched onto the blocking pool
//! - `server`: listener setup and graceful shutdown

mod identity;
mod node;
pub mod server;

pub use server::NodeAgent;
