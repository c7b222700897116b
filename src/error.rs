use thiserror::Error;

pub type Result<T, E = QaError> = std::result::Result<T, E>;

/// Error kinds surfaced to callers. Each maps to a stable wire string and an
/// HTTP status for the transport boundary.
#[derive(Debug, Error)]
pub enum QaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service unavailable: kill switch is set")]
    ServiceUnavailable,

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("upstream timeout in stage '{stage}'")]
    UpstreamTimeout { stage: &'static str },

    #[error("upstream error (status {status:?}): {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("snapshot I/O error: {0}")]
    SnapshotIo(#[from] std::io::Error),

    #[error("snapshot incompatible: {0}")]
    SnapshotIncompatible(String),

    #[error("canceled in stage '{stage}': deadline elapsed")]
    Canceled { stage: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl QaError {
    /// Stable machine-readable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            Self::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::SnapshotIo(_) => "SNAPSHOT_IO",
            Self::SnapshotIncompatible(_) => "SNAPSHOT_INCOMPATIBLE",
            Self::Canceled { .. } => "CANCELED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status the transport boundary should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::ServiceUnavailable => 503,
            Self::UpstreamTimeout { .. } | Self::Canceled { .. } => 504,
            _ => 500,
        }
    }

    /// Whether a retry at the boundary could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UpstreamTimeout { .. } => true,
            Self::Upstream { status: Some(s), .. } => *s >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(QaError::InvalidInput("x".into()).kind(), "INVALID_INPUT");
        assert_eq!(QaError::ServiceUnavailable.kind(), "SERVICE_UNAVAILABLE");
        assert_eq!(
            QaError::UpstreamTimeout { stage: "solver" }.kind(),
            "UPSTREAM_TIMEOUT"
        );
        assert_eq!(
            QaError::Canceled { stage: "request" }.kind(),
            "CANCELED"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(QaError::InvalidInput("x".into()).http_status(), 400);
        assert_eq!(QaError::ServiceUnavailable.http_status(), 503);
        assert_eq!(
            QaError::UpstreamTimeout { stage: "embed" }.http_status(),
            504
        );
        assert_eq!(QaError::Internal("bug".into()).http_status(), 500);
        assert_eq!(
            QaError::SnapshotIncompatible("dim".into()).http_status(),
            500
        );
    }
}
