//! End-to-end coverage of `AuditEngine::audit_and_wait` against a scripted
//! auditor driver: no real subprocess, no real cache misses beyond what the
//! test drives deliberately.

use async_trait::async_trait;
use gan_audit_engine::audit::cache::AuditCache;
use gan_audit_engine::audit::driver::AuditorDriver;
use gan_audit_engine::audit::queue::AuditQueue;
use gan_audit_engine::audit::session::SessionStore;
use gan_audit_engine::audit::types::{AuditResult, DimensionScore, Verdict};
use gan_audit_engine::{AuditEngine, AuditRequest, EngineConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns the next score off a fixed script on each call, clamping to the
/// last entry once exhausted.
struct ScriptedDriver {
    scores: Vec<u8>,
    call: AtomicUsize,
}

impl ScriptedDriver {
    fn new(scores: Vec<u8>) -> Self {
        Self {
            scores,
            call: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AuditorDriver for ScriptedDriver {
    async fn audit(&self, submission: &str) -> Result<AuditResult, gan_audit_engine::EngineError> {
        let idx = self.call.fetch_add(1, Ordering::SeqCst);
        let score = *self
            .scores
            .get(idx)
            .unwrap_or_else(|| self.scores.last().expect("scripted driver needs at least one score"));
        Ok(AuditResult {
            overall_score: score,
            verdict: if score >= 85 { Verdict::Pass } else { Verdict::Revise },
            dimensions: vec![DimensionScore {
                name: "correctness".to_string(),
                score,
            }],
            summary: format!("scripted verdict for {submission} iteration {idx}"),
            inline_comments: Vec::new(),
            judge_cards: Vec::new(),
            raw_auditor_id: "scripted".to_string(),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}

fn build_test_engine(scores: Vec<u8>, state_dir: &std::path::Path) -> AuditEngine {
    let config = Arc::new(EngineConfig {
        session_state_dir: state_dir.to_path_buf(),
        ..EngineConfig::default()
    });
    let cache = Arc::new(AuditCache::new(config.cache_max_entries, config.cache_max_age));
    let driver: Arc<dyn AuditorDriver> = Arc::new(ScriptedDriver::new(scores));
    let queue = AuditQueue::spawn(driver, 1, 8, Duration::from_secs(5));
    let sessions = Arc::new(SessionStore::new(state_dir.to_path_buf(), 16));
    AuditEngine::new(config, cache, queue, sessions)
}

#[tokio::test]
async fn first_loop_at_a_tier1_score_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_test_engine(vec![96], dir.path());

    let payload = engine
        .audit_and_wait(AuditRequest {
            session_id: None,
            external_loop_id: None,
            thought_number: 1,
            submission_text: "fn main() { println!(\"ok\"); }".to_string(),
        })
        .await
        .expect("first iteration should succeed");

    assert!(payload.completion.is_complete);
    assert_eq!(
        payload.completion.reason,
        Some(gan_audit_engine::audit::types::CompletionReason::Tier1)
    );
    assert_eq!(payload.current_loop, 1);
    assert!(!payload.session_id.is_empty());
}

#[tokio::test]
async fn low_scoring_submission_continues_across_loops() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_test_engine(vec![40, 45, 96], dir.path());

    let first = engine
        .audit_and_wait(AuditRequest {
            session_id: None,
            external_loop_id: None,
            thought_number: 1,
            submission_text: "fn attempt_one() {}".to_string(),
        })
        .await
        .unwrap();
    assert!(!first.completion.is_complete);
    assert!(first.loop_info.is_none(), "only one iteration recorded so far");

    let second = engine
        .audit_and_wait(AuditRequest {
            session_id: Some(first.session_id.clone()),
            external_loop_id: None,
            thought_number: 2,
            submission_text: "fn attempt_two() {}".to_string(),
        })
        .await
        .unwrap();
    assert!(!second.completion.is_complete);
    assert!(second.loop_info.is_some(), "second iteration should surface loop_info");

    let third = engine
        .audit_and_wait(AuditRequest {
            session_id: Some(first.session_id.clone()),
            external_loop_id: None,
            thought_number: 3,
            submission_text: "fn attempt_three() {}".to_string(),
        })
        .await
        .unwrap();
    assert!(third.completion.is_complete);
    assert!(third.termination.is_some());
}

#[tokio::test]
async fn external_context_lifecycle_starts_maintains_and_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_test_engine(vec![40, 96], dir.path());

    let first = engine
        .audit_and_wait(AuditRequest {
            session_id: None,
            external_loop_id: Some("loop-42".to_string()),
            thought_number: 1,
            submission_text: "fn attempt_one() {}".to_string(),
        })
        .await
        .unwrap();
    assert!(!first.completion.is_complete);

    let sessions = SessionStore::new(dir.path().to_path_buf(), 16);
    let after_first = sessions.load(&first.session_id).await.unwrap();
    assert!(
        after_first.external_context_active,
        "C9 should have started a context on the first cache-miss iteration"
    );
    let handle = after_first.external_context_id.clone();
    assert!(handle.is_some());

    let second = engine
        .audit_and_wait(AuditRequest {
            session_id: Some(first.session_id.clone()),
            external_loop_id: Some("loop-42".to_string()),
            thought_number: 2,
            submission_text: "fn attempt_two() {}".to_string(),
        })
        .await
        .unwrap();
    assert!(second.completion.is_complete);

    let after_second = sessions.load(&first.session_id).await.unwrap();
    assert!(
        !after_second.external_context_active,
        "C9 should terminate the context once the session completes"
    );
    assert_eq!(after_second.external_context_id, handle, "terminate keeps the handle, only clears the active flag");
}

#[tokio::test]
async fn sessions_without_a_loop_id_never_touch_the_context_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_test_engine(vec![30, 96], dir.path());

    let first = engine
        .audit_and_wait(AuditRequest {
            session_id: None,
            external_loop_id: None,
            thought_number: 1,
            submission_text: "fn attempt_one() {}".to_string(),
        })
        .await
        .unwrap();

    let sessions = SessionStore::new(dir.path().to_path_buf(), 16);
    let loaded = sessions.load(&first.session_id).await.unwrap();
    assert!(!loaded.external_context_active);
    assert!(loaded.external_context_id.is_none());
}

#[tokio::test]
async fn non_code_submission_passes_through_without_auditing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_test_engine(vec![99], dir.path());

    let payload = engine
        .audit_and_wait(AuditRequest {
            session_id: None,
            external_loop_id: None,
            thought_number: 1,
            submission_text: "just thinking out loud about the plan".to_string(),
        })
        .await
        .unwrap();

    assert!(payload.audit.is_none());
    assert!(!payload.completion.is_complete);
}
