//! C8: the orchestrator that wires C1 (fingerprint/cache), C2 (driver, via
//! C3's queue), C4 (session store), C5 (stagnation), C6 (completion), C7
//! (assembler), and C9 (external-context lifecycle) into one
//! request-response cycle.

use super::assembler::assemble;
use super::cache::{AuditCache, CacheOutcome};
use super::completion::decide;
use super::config::EngineConfig;
use super::error::EngineError;
use super::fingerprint::{fingerprint, normalize_submission};
use super::queue::AuditQueue;
use super::session::SessionStore;
use super::stagnation::StagnationDetector;
use super::types::{AuditResult, FeedbackPayload, IterationRecord, Session};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// One request into `audit_and_wait`.
pub struct AuditRequest {
    pub session_id: Option<String>,
    pub external_loop_id: Option<String>,
    pub thought_number: u32,
    pub submission_text: String,
}

/// Everything C8 needs, constructed once at startup and shared behind `Arc`.
pub struct AuditEngine {
    config: Arc<EngineConfig>,
    cache: Arc<AuditCache>,
    queue: AuditQueue,
    sessions: Arc<SessionStore>,
    stagnation: StagnationDetector,
    // Per-session recent normalized submissions, kept out-of-band from the
    // persisted Session (only fingerprints are durable) for the lifetime of
    // the process -- see `types::Session::last_scores`'s doc note.
    recent_submissions: Mutex<HashMap<String, Vec<String>>>,
}

impl AuditEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        cache: Arc<AuditCache>,
        queue: AuditQueue,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let stagnation = StagnationDetector::new(
            config.stagnation_threshold,
            config.stagnation_start_loop,
            config.stagnation_window,
        );
        Self {
            config,
            cache,
            queue,
            sessions,
            stagnation,
            recent_submissions: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip(self, request), fields(session_id = request.session_id.as_deref(), thought_number = request.thought_number))]
    pub async fn audit_and_wait(
        &self,
        request: AuditRequest,
    ) -> Result<FeedbackPayload, EngineError> {
        // Step 1: decode + normalize.
        let normalized = normalize_submission(&request.submission_text);

        // Step 2: session lookup/creation.
        let session = match &request.session_id {
            Some(id) => self.sessions.load(id).await?,
            None => self.sessions.create(request.external_loop_id.clone()).await?,
        };
        if session.is_complete {
            return Err(EngineError::SessionComplete {
                session_id: session.session_id.clone(),
            });
        }

        // Step 3: must-audit gate.
        if !looks_like_code(&normalized) {
            return self.pass_through(session, &request, &normalized).await;
        }

        // Step 4: fingerprint/cache.
        let key = fingerprint(&normalized);
        let cache_enabled = self.config.enable_audit_caching;
        let (audit_result, cache_hit, audit_error) = if cache_enabled {
            match self.cache.lookup_or_lead(&key).await {
                CacheOutcome::Hit(result) => (Some(result), true, None),
                CacheOutcome::MissFollower(result) => (Some(result), true, None),
                CacheOutcome::MissLeader => {
                    self.run_context_lifecycle(&session).await;
                    self.run_and_publish(&normalized, &key).await
                }
            }
        } else {
            self.run_context_lifecycle(&session).await;
            self.run_uncached(&normalized).await
        };

        // Step 8: stagnation check, using process-local recent-submission history.
        let stag = self
            .check_stagnation(&session.session_id, session.current_loop + 1, &normalized)
            .await;

        // Step 9/10/11: append iteration, evaluate completion, terminate if done.
        let score = audit_result.as_ref().map(|a| a.overall_score).unwrap_or(0);
        let decision = decide(&self.config, session.current_loop + 1, score, stag.is_some());

        let thought_number = request.thought_number;
        let key_for_write = key.clone();
        let audit_for_write = audit_result.clone();
        let decision_for_write = decision.clone();
        let stag_for_write = stag.clone();

        let updated = self
            .sessions
            .with_session(&session.session_id, move |mut s| async move {
                s.current_loop += 1;
                s.iterations.push(IterationRecord {
                    thought_number,
                    submitted_at: Utc::now(),
                    submission_fingerprint: key_for_write,
                    audit: audit_for_write,
                    audit_error,
                    cache_hit,
                });
                s.stagnation_info = stag_for_write.or(s.stagnation_info.clone());
                s.updated_at = Utc::now();
                if decision_for_write.is_complete {
                    s.is_complete = true;
                    s.completion_reason = decision_for_write.reason;
                }
                Ok(s)
            })
            .await?;

        if updated.is_complete {
            info!(session_id = %updated.session_id, reason = ?updated.completion_reason, "session complete");
            self.terminate_context_if_active(&updated).await;
        }

        let max_loops = decision
            .reason
            .map(|_| decision.threshold_loops)
            .unwrap_or(self.config.tier1.loop_cap);

        Ok(assemble(audit_result, decision, &updated, max_loops))
    }

    async fn pass_through(
        &self,
        session: super::types::Session,
        request: &AuditRequest,
        normalized: &str,
    ) -> Result<FeedbackPayload, EngineError> {
        let key = fingerprint(normalized);
        let updated = self
            .sessions
            .with_session(&session.session_id, |mut s| {
                let key = key.clone();
                async move {
                    s.current_loop += 1;
                    s.iterations.push(IterationRecord {
                        thought_number: request.thought_number,
                        submitted_at: Utc::now(),
                        submission_fingerprint: key,
                        audit: None,
                        audit_error: None,
                        cache_hit: false,
                    });
                    s.updated_at = Utc::now();
                    Ok(s)
                }
            })
            .await?;

        let decision = decide(&self.config, updated.current_loop, 0, false);
        Ok(assemble(None, decision, &updated, self.config.tier1.loop_cap))
    }

    async fn run_and_publish(
        &self,
        normalized: &str,
        key: &str,
    ) -> (Option<AuditResult>, bool, Option<String>) {
        match self.queue.submit(normalized.to_string()).await {
            Ok(result) => {
                self.cache.publish(key, result.clone()).await;
                (Some(result), false, None)
            }
            Err(EngineError::AuditorTimeout { elapsed_secs }) => {
                let fallback = AuditResult::synthetic_timeout_fallback();
                self.cache.publish(key, fallback.clone()).await;
                (
                    Some(fallback),
                    false,
                    Some(format!("auditor timed out after {elapsed_secs}s")),
                )
            }
            Err(EngineError::AuditorParseError { message }) => {
                let fallback = AuditResult::synthetic_parse_error_fallback();
                self.cache.publish(key, fallback.clone()).await;
                (Some(fallback), false, Some(message))
            }
            Err(e) => {
                warn!(error = %e, "abandoning cache gate after unrecoverable auditor error");
                self.cache
                    .abandon(key, AuditResult::synthetic_parse_error_fallback())
                    .await;
                (None, false, Some(e.to_string()))
            }
        }
    }

    async fn run_uncached(
        &self,
        normalized: &str,
    ) -> (Option<AuditResult>, bool, Option<String>) {
        match self.queue.submit(normalized.to_string()).await {
            Ok(result) => (Some(result), false, None),
            Err(EngineError::AuditorTimeout { elapsed_secs }) => (
                Some(AuditResult::synthetic_timeout_fallback()),
                false,
                Some(format!("auditor timed out after {elapsed_secs}s")),
            ),
            Err(EngineError::AuditorParseError { message }) => {
                (Some(AuditResult::synthetic_parse_error_fallback()), false, Some(message))
            }
            Err(e) => (None, false, Some(e.to_string())),
        }
    }

    async fn check_stagnation(
        &self,
        session_id: &str,
        current_loop: u32,
        normalized: &str,
    ) -> Option<super::types::StagnationInfo> {
        let mut recents = self.recent_submissions.lock().await;
        let entry = recents.entry(session_id.to_string()).or_default();
        entry.push(normalized.to_string());
        let window = self.config.stagnation_window;
        if entry.len() > window {
            let excess = entry.len() - window;
            entry.drain(0..excess);
        }

        self.stagnation
            .evaluate(current_loop, entry)
            .map(|similarity| super::types::StagnationInfo {
                detected_at_loop: current_loop,
                similarity,
            })
    }

    /// Step 5 of C8: start the external context on first contact for a
    /// loop-bound session, or keep it alive on every subsequent iteration.
    /// A no-op for sessions with no `external_loop_id` -- not every caller
    /// opts into context lifecycle tracking.
    async fn run_context_lifecycle(&self, session: &Session) {
        if session.external_loop_id.is_none() {
            return;
        }
        if !session.external_context_active {
            match self.sessions.start_external_context(&session.session_id).await {
                Ok(handle) => {
                    info!(session_id = %session.session_id, handle, "started external context")
                }
                Err(e) => {
                    warn!(session_id = %session.session_id, error = %e, "failed to start external context")
                }
            }
        } else if let Err(e) = self.sessions.maintain_external_context(&session.session_id).await {
            warn!(session_id = %session.session_id, error = %e, "failed to maintain external context");
        }
    }

    async fn terminate_context_if_active(&self, session: &Session) {
        if session.external_context_active {
            if let Err(e) = self.sessions.terminate_external_context(&session.session_id).await {
                warn!(session_id = %session.session_id, error = %e, "failed to terminate external context on completion");
            }
        }
    }
}

/// Heuristic for step 3's must-audit gate: does this submission contain
/// code-like content worth running a full audit over?
fn looks_like_code(normalized: &str) -> bool {
    const DIFF_MARKERS: &[&str] = &["+++", "---", "@@ "];
    const KEYWORDS: &[&str] = &[
        "fn ", "function ", "class ", "def ", "impl ", "struct ", "import ", "const ", "let ",
        "var ", "public ", "private ",
    ];
    normalized.contains("```")
        || DIFF_MARKERS.iter().any(|m| normalized.contains(m))
        || KEYWORDS.iter().any(|k| normalized.contains(k))
}
