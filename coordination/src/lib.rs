//! Iterative code-audit orchestration library.
//!
//! Exposes a single MCP tool, `audit_thought`, that runs a submitted code
//! change through an external auditor subprocess, tracks its trajectory
//! across a session, and returns a tiered completion verdict.
//!
//! # Usage
//!
//! ```bash
//! gan-audit-engine
//! ```

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod audit;
pub mod otel;

pub use audit::{AuditEngine, AuditRequest, EngineConfig, EngineError, EngineResult, FeedbackPayload};
