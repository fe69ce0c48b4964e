//! Single-slot admission control for the host's attach/detach channel.
//!
//! The cloud attach API is not safe to drive concurrently for one instance.
//! Callers that find the gate closed fail fast and let the orchestrator retry
//! with backoff instead of parking an RPC thread.

use parking_lot::Mutex;

/// Process-wide attach gate.
///
/// Owned by the agent context and shared by reference with the lifecycle
/// engine.
#[derive(Debug)]
pub struct AttachGate {
    attachable: Mutex<bool>,
}

impl AttachGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self {
            attachable: Mutex::new(true),
        }
    }

    /// Try to take the single slot without blocking.
    ///
    /// Returns `None` when another attach or detach is in flight. The slot is
    /// given back when the returned permit is dropped, including on unwind.
    pub fn try_enter(&self) -> Option<AttachPermit<'_>> {
        let mut attachable = self.attachable.lock();
        if !*attachable {
            return None;
        }
        *attachable = false;
        tracing::debug!("Attach gate entered");
        Some(AttachPermit { gate: self })
    }

    /// Whether the slot is currently free.
    pub fn is_available(&self) -> bool {
        *self.attachable.lock()
    }

    fn leave(&self) {
        *self.attachable.lock() = true;
        tracing::debug!("Attach gate released");
    }
}

impl Default for AttachGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of holding the attach slot. Dropping it reopens the gate.
#[derive(Debug)]
#[must_use = "the gate reopens as soon as the permit is dropped"]
pub struct AttachPermit<'a> {
    gate: &'a AttachGate,
}

impl Drop for AttachPermit<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}
