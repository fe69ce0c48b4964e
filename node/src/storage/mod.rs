//! Host storage collaborators.
//!
//! Each collaborator is a trait so the lifecycle engine can be driven against
//! the real host or an in-memory double:
//! - [`DeviceLocator`]: volume id / mount point to device resolution
//! - [`Mounter`]: mount, format, unmount and path queries
//! - [`VolumeRecordStore`]: persisted volume to device records
//! - [`Resizer`]: online filesystem growth
//! - [`StatsCollector`]: capacity and inode usage

pub mod device;
pub mod format;
pub mod mounter;
pub(crate) mod mountinfo;
pub mod options;
pub mod record;
pub mod resize;
pub mod stats;

pub use device::{ByIdLocator, DeviceLocator};
pub use mounter::{HostMounter, Mounter, PathKind};
pub use record::{FileRecordStore, VolumeRecordStore};
pub use resize::{HostResizer, Resizer};
pub use stats::{StatsCollector, StatvfsCollector, VolumeStats};
