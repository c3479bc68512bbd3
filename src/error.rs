//! Pipeline error taxonomy
//!
//! One enum for the whole pipeline, with `is_retryable()` deciding whether an
//! error is absorbed by the retry loops or surfaced to the caller.

use ethers::types::{TxHash, U256};
use std::fmt;
use thiserror::Error;

/// What the confirmation poller last knew about a transaction when its
/// attempt budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Never observed by any endpoint.
    NotFound,
    /// Known to the network but not yet mined.
    StillPending,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::NotFound => write!(f, "not found"),
            TimeoutPhase::StillPending => write!(f, "still pending"),
        }
    }
}

/// Errors produced by the session-wallet pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Malformed or missing signing identity. Fatal, never retried.
    #[error("identity error: {0}")]
    Identity(String),

    /// The session wallet cannot cover the quoted cost. Not retried; the
    /// user must fund the wallet.
    #[error("insufficient funds: required {required} wei, available {available} wei, shortfall {shortfall} wei")]
    InsufficientFunds {
        required: U256,
        available: U256,
        shortfall: U256,
    },

    /// Per-endpoint network failure. Retried against the next endpoint.
    #[error("transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// The endpoint answered and explicitly rejected the transaction.
    #[error("transaction rejected: {reason} (endpoint: {endpoint})")]
    Rejected { endpoint: String, reason: String },

    /// Every configured endpoint failed; carries the last observed failure.
    #[error("all endpoints failed: {last}")]
    AllEndpointsFailed { last: String },

    /// The transaction was mined and reverted. A ledger-side rejection of
    /// the action, not retried.
    #[error("transaction reverted on chain ({hash:#x})")]
    Reverted { hash: TxHash },

    /// The confirmation budget ran out. Indeterminate: the transaction may
    /// still land later. Reported distinctly from failure.
    #[error("confirmation timed out, transaction {phase} ({hash:#x})")]
    ConfirmationTimeout { hash: TxHash, phase: TimeoutPhase },

    /// An operation was refused because submissions are in flight or queued.
    #[error("session busy: {0}")]
    Busy(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether the retry loops may absorb this error and move on to the
    /// next endpoint or attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transport { .. } | PipelineError::AllEndpointsFailed { .. }
        )
    }

    /// Classify an endpoint error string. Explicit rejections (the endpoint
    /// understood the transaction and refused it) must abort the whole
    /// submission; everything else is transport-level and worth retrying
    /// elsewhere.
    pub fn from_endpoint_error(endpoint: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        let rejected = lower.contains("insufficient funds")
            || lower.contains("nonce too low")
            || lower.contains("exceeds allowance")
            || lower.contains("invalid transaction")
            || lower.contains("execution reverted");

        if rejected {
            PipelineError::Rejected {
                endpoint: endpoint.to_string(),
                reason: message,
            }
        } else {
            PipelineError::Transport {
                endpoint: endpoint.to_string(),
                message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_retryable() {
        let err = PipelineError::Transport {
            endpoint: "http://node-a".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!PipelineError::Identity("bad key".to_string()).is_retryable());
        assert!(!PipelineError::InsufficientFunds {
            required: U256::from(10),
            available: U256::from(1),
            shortfall: U256::from(9),
        }
        .is_retryable());
        assert!(!PipelineError::Reverted {
            hash: TxHash::repeat_byte(0xab),
        }
        .is_retryable());
        assert!(!PipelineError::ConfirmationTimeout {
            hash: TxHash::repeat_byte(0xab),
            phase: TimeoutPhase::NotFound,
        }
        .is_retryable());
    }

    #[test]
    fn endpoint_error_classification() {
        let rejected =
            PipelineError::from_endpoint_error("http://node-a", "insufficient funds for transfer");
        assert!(matches!(rejected, PipelineError::Rejected { .. }));
        assert!(!rejected.is_retryable());

        let transport = PipelineError::from_endpoint_error("http://node-a", "connection reset");
        assert!(matches!(transport, PipelineError::Transport { .. }));
        assert!(transport.is_retryable());
    }

    #[test]
    fn all_endpoints_failed_wraps_last_error() {
        let err = PipelineError::AllEndpointsFailed {
            last: "timeout after 5000ms".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("all endpoints failed"));
        assert!(rendered.contains("timeout after 5000ms"));
    }
}
