//! External-context lifecycle bookkeeping (C9).
//!
//! The real external auditor-context network API is out of scope here;
//! this tracks the opaque handle's start/maintain/terminate state machine
//! so a session never leaks or double-frees a context, and logs a warning
//! if a session completes while a context is still open.

use super::error::EngineError;
use tracing::warn;
use uuid::Uuid;

/// Possible states of a per-session external-context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Inactive,
    Active,
    Terminated,
}

/// Tracks the lifecycle of one session's external-context handle. Exactly
/// one `start` must precede any `maintain`, and exactly one `terminate`
/// must follow the last `maintain` before the handle is dropped.
pub struct ContextLifecycle {
    state: ContextState,
    context_id: Option<String>,
}

impl ContextLifecycle {
    pub fn new() -> Self {
        Self {
            state: ContextState::Inactive,
            context_id: None,
        }
    }

    pub fn from_existing(context_id: Option<String>, active: bool) -> Self {
        Self {
            state: if active {
                ContextState::Active
            } else {
                ContextState::Inactive
            },
            context_id,
        }
    }

    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.state == ContextState::Active
    }

    /// Begin a new external context. Fails if one is already active for
    /// this lifecycle (start is not idempotent).
    pub fn start(&mut self) -> Result<String, EngineError> {
        if self.state == ContextState::Active {
            return Err(EngineError::ContextLifecycleError {
                message: "context already active; cannot start a second one".to_string(),
            });
        }
        let id = Uuid::new_v4().to_string();
        self.context_id = Some(id.clone());
        self.state = ContextState::Active;
        Ok(id)
    }

    /// Record a maintain (keep-alive) call against the active context.
    /// Fails if no context is active.
    pub fn maintain(&self) -> Result<(), EngineError> {
        if self.state != ContextState::Active {
            return Err(EngineError::ContextLifecycleError {
                message: "cannot maintain: no active context".to_string(),
            });
        }
        Ok(())
    }

    /// Terminate the active context exactly once. Fails if no context is
    /// active; calling twice without an intervening `start` is rejected.
    pub fn terminate(&mut self) -> Result<(), EngineError> {
        if self.state != ContextState::Active {
            return Err(EngineError::ContextLifecycleError {
                message: "cannot terminate: no active context".to_string(),
            });
        }
        self.state = ContextState::Terminated;
        Ok(())
    }

    /// Called when a session reaches a terminal completion state. Logs a
    /// leak warning if the context was never terminated -- this does not
    /// itself terminate the context, since doing so would require the
    /// external call this module does not make.
    pub fn warn_if_leaked(&self, session_id: &str) {
        if self.state == ContextState::Active {
            warn!(
                session_id,
                context_id = ?self.context_id,
                "session completed with an external context still active"
            );
        }
    }
}

impl Default for ContextLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_maintain_then_terminate_succeeds() {
        let mut ctx = ContextLifecycle::new();
        ctx.start().unwrap();
        assert!(ctx.maintain().is_ok());
        assert!(ctx.terminate().is_ok());
        assert!(!ctx.is_active());
    }

    #[test]
    fn double_start_without_terminate_is_rejected() {
        let mut ctx = ContextLifecycle::new();
        ctx.start().unwrap();
        assert!(ctx.start().is_err());
    }

    #[test]
    fn maintain_without_start_is_rejected() {
        let ctx = ContextLifecycle::new();
        assert!(ctx.maintain().is_err());
    }

    #[test]
    fn terminate_without_start_is_rejected() {
        let mut ctx = ContextLifecycle::new();
        assert!(ctx.terminate().is_err());
    }

    #[test]
    fn double_terminate_is_rejected() {
        let mut ctx = ContextLifecycle::new();
        ctx.start().unwrap();
        ctx.terminate().unwrap();
        assert!(ctx.terminate().is_err());
    }
}
