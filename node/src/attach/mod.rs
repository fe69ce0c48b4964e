//! Cloud-side disk attachment for nodes that own the attach decision.

mod gate;
mod helper;

use std::path::PathBuf;

use diskplug_shared::errors::DiskplugResult;

pub use gate::{AttachGate, AttachPermit};
pub use helper::CommandAttacher;

/// Attaches and detaches cloud disks to this instance.
///
/// Calls may block for as long as the cloud API takes. Callers serialize
/// them through [`AttachGate`].
pub trait DiskAttacher: Send + Sync {
    /// Attach `volume_id` to `node_id` and return the device node it shows
    /// up as. With `wait`, block until the device appears on the host.
    fn attach_disk(
        &self,
        volume_id: &str,
        node_id: &str,
        shared: bool,
        wait: bool,
    ) -> DiskplugResult<PathBuf>;

    /// Detach `volume_id` from `node_id`. With `wait`, block until the
    /// device is gone from the host.
    fn detach_disk(&self, volume_id: &str, node_id: &str, wait: bool) -> DiskplugResult<()>;
}
