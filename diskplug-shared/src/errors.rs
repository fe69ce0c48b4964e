//! Error taxonomy for the node agent.
//!
//! Variants are grouped by how the orchestrator should react:
//! - [`DiskplugError::InvalidArgument`]: caller error, never retried internally
//! - [`DiskplugError::Aborted`]: transient, caller retries with backoff
//! - everything else: internal failure surfaced as-is

use thiserror::Error;

/// Result alias used across the workspace.
pub type DiskplugResult<T> = Result<T, DiskplugError>;

#[derive(Debug, Error)]
pub enum DiskplugError {
    /// Missing or malformed request field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Retryable condition: attach gate busy, device not attached yet.
    #[error("aborted: {0}")]
    Aborted(String),

    /// Requested path or volume does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Mount, format, or consistency failure on this node.
    #[error("storage: {0}")]
    Storage(String),

    /// Cloud attach or detach failure.
    #[error("attach: {0}")]
    Attach(String),

    /// Invalid agent configuration.
    #[error("config: {0}")]
    Config(String),

    /// Instance metadata lookup failure.
    #[error("metadata: {0}")]
    Metadata(String),

    /// gRPC transport failure.
    #[error("rpc: {0}")]
    Rpc(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DiskplugError {
    /// True when the orchestrator is expected to retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl From<DiskplugError> for tonic::Status {
    fn from(err: DiskplugError) -> Self {
        match err {
            DiskplugError::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            DiskplugError::Aborted(msg) => tonic::Status::aborted(msg),
            DiskplugError::NotFound(msg) => tonic::Status::not_found(msg),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_status_codes() {
        let cases = [
            (DiskplugError::InvalidArgument("x".into()), Code::InvalidArgument),
            (DiskplugError::Aborted("x".into()), Code::Aborted),
            (DiskplugError::NotFound("x".into()), Code::NotFound),
            (DiskplugError::Storage("x".into()), Code::Internal),
            (DiskplugError::Attach("x".into()), Code::Internal),
            (DiskplugError::Internal("x".into()), Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(tonic::Status::from(err).code(), code);
        }
    }

    #[test]
    fn test_invalid_argument_keeps_message() {
        let status = tonic::Status::from(DiskplugError::InvalidArgument(
            "Volume ID must be provided".to_string(),
        ));
        assert_eq!(status.message(), "Volume ID must be provided");
    }

    #[test]
    fn test_only_aborted_is_retryable() {
        assert!(DiskplugError::Aborted("busy".into()).is_retryable());
        assert!(!DiskplugError::Storage("mount".into()).is_retryable());
    }
}
