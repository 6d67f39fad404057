//! Iterative code-audit orchestration: fingerprinted caching, bounded
//! auditor subprocess driving, and tiered completion/stagnation detection
//! exposed as a single MCP tool.

pub mod assembler;
pub mod cache;
pub mod completion;
pub mod config;
pub mod context;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod queue;
pub mod session;
pub mod stagnation;
pub mod types;

pub use config::EngineConfig;
pub use engine::{AuditEngine, AuditRequest};
pub use error::{EngineError, EngineResult, StructuredError};
pub use types::FeedbackPayload;

use std::sync::Arc;
use std::time::Duration;

/// Build a fully-wired `AuditEngine` from a resolved config: the cache, the
/// queue (with its dispatcher task spawned), and the session store.
pub fn build_engine(config: EngineConfig) -> AuditEngine {
    let config = Arc::new(config);
    let cache = Arc::new(cache::AuditCache::new(
        config.cache_max_entries,
        config.cache_max_age,
    ));
    let driver: Arc<dyn driver::AuditorDriver> = Arc::new(driver::ProcessAuditorDriver::new(
        config.auditor_executable.clone(),
        config.audit_timeout,
    ));
    let queue = queue::AuditQueue::spawn(
        driver,
        config.max_concurrent_audits,
        config.max_concurrent_audits.saturating_mul(4).max(16),
        config.queue_wait_timeout,
    );
    let sessions = Arc::new(session::SessionStore::new(
        config.session_state_dir.clone(),
        config.max_concurrent_sessions,
    ));

    // Periodic sweep of aged session files; detached, best-effort.
    if config.enable_session_persistence {
        let sweep_sessions = sessions.clone();
        let max_age = config.session_max_age;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let removed = sweep_sessions.sweep_aged_sessions(max_age).await;
                if removed > 0 {
                    tracing::info!(removed, "swept aged session files");
                }
            }
        });
    }

    AuditEngine::new(config, cache, queue, sessions)
}
