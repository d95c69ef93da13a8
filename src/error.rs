//! Crate-level error type (§7).
//!
//! Per-module errors (e.g. [`crate::domain::order::OrderInvariantError`])
//! stay typed at their own boundary, matching the teacher's per-module
//! error enum convention; `CoreError` is the one consolidated type the
//! facade surfaces to the strategy, since the facade is the single public
//! seam the rest of this crate funnels through.

use thiserror::Error;

/// Errors surfaced at the Adapter Facade boundary (§7).
///
/// Propagation policy (unchanged from spec):
/// - `Transport` / `Timeout` → handled internally as a silent reconnect;
///   only surfaced here if retries are exhausted.
/// - `Auth` → handled internally as refresh + resubscribe; surfaces only
///   if token refresh itself fails persistently.
/// - `Validation` → always a synchronous caller error.
/// - `Venue` (carries a `req_id`) → fails that one in-flight operation.
/// - `Reconciliation` → never a failure; always delivered as an
///   `AdapterEvent`, included here only so components downstream of the
///   reconciler can log it uniformly.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("venue rejected request {request_id}: {message}")]
    Venue { request_id: String, message: String },

    #[error("reconciliation anomaly: {0}")]
    Reconciliation(String),
}

impl Clone for CoreError {
    fn clone(&self) -> Self {
        match self {
            CoreError::Transport(s) => CoreError::Transport(s.clone()),
            CoreError::Timeout {
                operation,
                timeout_ms,
            } => CoreError::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            CoreError::Protocol(s) => CoreError::Protocol(s.clone()),
            CoreError::Auth(s) => CoreError::Auth(s.clone()),
            CoreError::Validation(s) => CoreError::Validation(s.clone()),
            CoreError::Venue { request_id, message } => CoreError::Venue {
                request_id: request_id.clone(),
                message: message.clone(),
            },
            CoreError::Reconciliation(s) => CoreError::Reconciliation(s.clone()),
        }
    }
}
