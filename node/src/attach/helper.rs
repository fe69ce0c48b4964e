//! [`DiskAttacher`] that drives an external attach helper.
//!
//! The helper owns the cloud credentials and API calls. It is invoked as
//!
//! ```text
//! <helper> attach --disk-id <id> --instance-id <node> [--shared] [--tag <tag>]
//! <helper> detach --disk-id <id> --instance-id <node>
//! ```
//!
//! and may print the device path on stdout after attaching.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use diskplug_shared::errors::{DiskplugError, DiskplugResult};

use super::DiskAttacher;
use crate::storage::DeviceLocator;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct CommandAttacher {
    helper: PathBuf,
    tag: Option<String>,
    timeout: Duration,
    locator: Arc<dyn DeviceLocator>,
}

impl CommandAttacher {
    pub fn new(
        helper: PathBuf,
        tag: Option<String>,
        timeout: Duration,
        locator: Arc<dyn DeviceLocator>,
    ) -> Self {
        Self {
            helper,
            tag,
            timeout,
            locator,
        }
    }

    fn run(&self, args: &[String]) -> DiskplugResult<String> {
        tracing::debug!(helper = %self.helper.display(), ?args, "Running attach helper");
        let output = Command::new(&self.helper)
            .args(args)
            .output()
            .map_err(|e| {
                DiskplugError::Attach(format!(
                    "Failed to run {}: {}",
                    self.helper.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(DiskplugError::Attach(format!(
                "{} {} failed ({}): {}",
                self.helper.display(),
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn wait_for<T>(
        &self,
        what: &str,
        mut check: impl FnMut() -> Option<T>,
    ) -> DiskplugResult<T> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(value) = check() {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(DiskplugError::Attach(format!(
                    "Timed out after {:?} waiting for {}",
                    self.timeout, what
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn base_args(action: &str, volume_id: &str, node_id: &str) -> Vec<String> {
    vec![
        action.to_string(),
        "--disk-id".to_string(),
        volume_id.to_string(),
        "--instance-id".to_string(),
        node_id.to_string(),
    ]
}

impl DiskAttacher for CommandAttacher {
    fn attach_disk(
        &self,
        volume_id: &str,
        node_id: &str,
        shared: bool,
        wait: bool,
    ) -> DiskplugResult<PathBuf> {
        let mut args = base_args("attach", volume_id, node_id);
        if shared {
            args.push("--shared".to_string());
        }
        if let Some(tag) = &self.tag {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }

        tracing::info!(volume_id, node_id, shared, "Attaching disk");
        let stdout = self.run(&args)?;
        if !stdout.is_empty() {
            // Helpers may report a by-id link; mountinfo carries the kernel name
            return fs::canonicalize(&stdout).map_err(|e| {
                DiskplugError::Attach(format!(
                    "Attach helper reported {} for {}: {}",
                    stdout, volume_id, e
                ))
            });
        }
        if !wait {
            return Err(DiskplugError::Attach(format!(
                "Attach helper reported no device for {}",
                volume_id
            )));
        }

        self.wait_for(&format!("device of {}", volume_id), || {
            self.locator.device_for_volume(volume_id).ok()
        })
    }

    fn detach_disk(&self, volume_id: &str, node_id: &str, wait: bool) -> DiskplugResult<()> {
        tracing::info!(volume_id, node_id, "Detaching disk");
        self.run(&base_args("detach", volume_id, node_id))?;

        if wait {
            self.wait_for(&format!("{} to detach", volume_id), || {
                self.locator.device_for_volume(volume_id).is_err().then_some(())
            })?;
        }
        Ok(())
    }
}
