//! diskplug node agent.
//!
//! Serves the CSI Identity and Node services for one host: attaches cloud
//! disks (or waits for a controller to), formats and mounts them, binds them
//! into workloads, and tears everything down again on request.

#[cfg(not(target_os = "linux"))]
compile_error!("diskplug node agent is Linux-only; build with a Linux target");

pub mod attach;
pub mod config;
pub mod metadata;
pub mod service;
pub mod storage;
pub mod volume;
