//! Node-side volume lifecycle.
//!
//! Volume state is never cached: every call reconstructs it from the mount
//! table, the device locator and the record store, so any step can be
//! retried after a crash or a partial failure.

mod capability;
mod cleanup;
mod lifecycle;

pub use capability::{AccessType, MountAccess, VolumeCapability, VolumeOptions};
pub use lifecycle::{
    AttachMode, Collaborators, LifecyclePaths, PublishRequest, StageRequest, VolumeLifecycle,
};
