//! Error kinds for the audit engine, and the structured shape that crosses
//! the JSON-RPC boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The machine-readable error shape returned to MCP clients. Never carries a
/// Rust backtrace or `Debug`-formatted internals -- those go to the tracing
/// stream instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
    pub recovery_action: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub retryable: bool,
}

impl StructuredError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: recovery_action.into(),
            context: HashMap::new(),
            retryable,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Closed set of error kinds the audit engine can surface.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("auditor executable unavailable: {message}")]
    AuditorUnavailable { message: String },

    #[error("auditor invocation timed out after {elapsed_secs}s")]
    AuditorTimeout { elapsed_secs: u64 },

    #[error("auditor output could not be parsed: {message}")]
    AuditorParseError { message: String },

    #[error("auditor process exited non-zero with no parseable output: {message}")]
    AuditorCrash { message: String },

    #[error("queue wait exceeded deadline of {waited_secs}s")]
    QueueTimeout { waited_secs: u64 },

    #[error("work queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("session state corrupt: {session_id}: {message}")]
    SessionCorrupt { session_id: String, message: String },

    #[error("session {session_id} is already complete")]
    SessionComplete { session_id: String },

    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("invalid input: {message}")]
    InputInvalid { message: String },

    #[error("external-context lifecycle error: {message}")]
    ContextLifecycleError { message: String },

    #[error("session cap of {cap} concurrent sessions exceeded")]
    SessionCapExceeded { cap: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether a client retry of the same request is safe and likely to
    /// eventually succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueTimeout { .. } | Self::AuditorUnavailable { .. }
        )
    }

    pub fn to_structured(&self) -> StructuredError {
        let (code, recovery, retryable): (&str, String, bool) = match self {
            Self::AuditorUnavailable { .. } => (
                "AuditorUnavailable",
                "Verify AUDITOR_EXECUTABLE points at an installed, executable binary.".to_string(),
                true,
            ),
            Self::AuditorTimeout { elapsed_secs } => (
                "AuditorTimeout",
                format!(
                    "Auditor did not respond within {elapsed_secs}s; a synthetic revise/50 result was recorded. Consider raising AUDIT_TIMEOUT_SECONDS."
                ),
                false,
            ),
            Self::AuditorParseError { .. } => (
                "AuditorParseError",
                "Auditor output did not match any accepted shape after all parse strategies; a synthetic result was recorded.".to_string(),
                false,
            ),
            Self::AuditorCrash { .. } => (
                "AuditorCrash",
                "Auditor process exited non-zero with no usable output; check stderr diagnostics in the log stream.".to_string(),
                false,
            ),
            Self::QueueTimeout { waited_secs } => (
                "QueueTimeout",
                format!("Request waited {waited_secs}s for an admission slot; retry later or raise MAX_CONCURRENT_AUDITS."),
                true,
            ),
            Self::QueueFull { .. } => (
                "QueueFull",
                "Work queue capacity exceeded; retry later.".to_string(),
                true,
            ),
            Self::SessionNotFound { .. } => (
                "SessionNotFound",
                "The referenced session does not exist; omit branchId to start a new one.".to_string(),
                false,
            ),
            Self::SessionCorrupt { .. } => (
                "SessionCorrupt",
                "Session file failed structural validation; an administrator must delete and recreate it.".to_string(),
                false,
            ),
            Self::SessionComplete { .. } => (
                "SessionComplete",
                "This session already reached a terminal state; start a new session.".to_string(),
                false,
            ),
            Self::ConfigInvalid { .. } => (
                "ConfigInvalid",
                "Fix the reported configuration value and restart the service.".to_string(),
                false,
            ),
            Self::InputInvalid { .. } => (
                "InputInvalid",
                "Correct the request parameters and retry.".to_string(),
                false,
            ),
            Self::ContextLifecycleError { .. } => (
                "ContextLifecycleError",
                "External-context start/maintain/terminate call failed; this may leak a handle -- check logs.".to_string(),
                false,
            ),
            Self::SessionCapExceeded { .. } => (
                "SessionCapExceeded",
                "Raise MAX_CONCURRENT_SESSIONS or let existing sessions complete before starting new ones.".to_string(),
                true,
            ),
            Self::Io(_) => (
                "IoError",
                "Check state directory permissions and available disk space.".to_string(),
                false,
            ),
            Self::Json(_) => (
                "JsonError",
                "Validate the malformed JSON payload.".to_string(),
                false,
            ),
        };
        StructuredError::new(code, self.to_string(), recovery, retryable)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_error_display_matches_code_and_message() {
        let e = EngineError::SessionNotFound {
            session_id: "s1".to_string(),
        };
        let structured = e.to_structured();
        assert_eq!(structured.code, "SessionNotFound");
        assert!(structured.message.contains("s1"));
    }

    #[test]
    fn auditor_timeout_is_not_retryable_but_unavailable_is() {
        assert!(!EngineError::AuditorTimeout { elapsed_secs: 5 }.is_retryable());
        assert!(EngineError::AuditorUnavailable {
            message: "not found".to_string()
        }
        .is_retryable());
    }
}
