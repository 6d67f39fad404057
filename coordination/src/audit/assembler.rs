//! Assembles the final `FeedbackPayload` returned to the MCP caller from an
//! `AuditResult`, a `CompletionDecision`, and session history (C7).

use super::completion::progress_trend;
use super::types::{
    AuditResult, CompletionDecision, FeedbackPayload, InlineComment, LoopInfo, Session,
    StagnationInfo, TerminationInfo,
};

/// Keywords that mark an inline comment as critical for the `termination`
/// block's `critical_issues` list. The auditor's wire shape carries no
/// explicit severity field, so this is a best-effort scan over comment
/// text rather than a structured field read.
const CRITICAL_KEYWORDS: &[&str] = &[
    "security",
    "vulnerability",
    "panic",
    "unsafe",
    "data loss",
    "crash",
    "injection",
    "overflow",
    "deadlock",
    "race condition",
];

fn is_critical(comment: &InlineComment) -> bool {
    let lower = comment.comment.to_ascii_lowercase();
    CRITICAL_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Build the full feedback payload for one audited iteration.
///
/// `max_loops` is the loop cap relevant to the decision that was actually
/// reached (hard stop uses `hard_stop_loops`; a tier completion uses that
/// tier's cap; an incomplete decision uses tier1's cap as the nearest
/// target).
pub fn assemble(
    audit: Option<AuditResult>,
    completion: CompletionDecision,
    session: &Session,
    max_loops: u32,
) -> FeedbackPayload {
    // A trend needs at least two scored iterations to mean anything, so the
    // block itself is omitted below that, matching the wire shape's
    // optionality rather than reporting a misleadingly confident default.
    let loop_info = if session.current_loop >= 2 {
        Some(LoopInfo {
            current_loop: session.current_loop,
            max_loops,
            progress_trend: progress_trend(&session.last_scores(3)),
            stagnation_detected: session.stagnation_info.is_some(),
        })
    } else {
        None
    };

    let termination = if completion.is_complete {
        Some(build_termination(&audit, &completion, &session.stagnation_info))
    } else {
        None
    };

    FeedbackPayload {
        session_id: session.session_id.clone(),
        current_loop: session.current_loop,
        audit,
        completion,
        loop_info,
        termination,
    }
}

fn build_termination(
    audit: &Option<AuditResult>,
    completion: &CompletionDecision,
    stagnation: &Option<StagnationInfo>,
) -> TerminationInfo {
    let reason = completion
        .reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let critical_issues = audit
        .as_ref()
        .map(|a| {
            a.inline_comments
                .iter()
                .filter(|c| is_critical(c))
                .map(|c| format!("{}:{}: {}", c.path, c.line, c.comment))
                .collect()
        })
        .unwrap_or_default();

    let final_assessment = match (audit, stagnation) {
        (Some(a), _) => a.summary.clone(),
        (None, Some(s)) => format!(
            "Session stopped due to stagnation detected at loop {} (similarity {:.2})",
            s.detected_at_loop, s.similarity
        ),
        (None, None) => "Session terminated without a final audit result".to_string(),
    };

    TerminationInfo {
        reason,
        critical_issues,
        final_assessment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::{CompletionReason, DimensionScore, Session, Verdict};

    fn sample_audit(score: u8) -> AuditResult {
        AuditResult {
            overall_score: score,
            verdict: Verdict::Pass,
            dimensions: vec![DimensionScore {
                name: "correctness".to_string(),
                score,
            }],
            summary: "looks fine".to_string(),
            inline_comments: vec![
                InlineComment {
                    path: "src/lib.rs".to_string(),
                    line: 10,
                    comment: "minor style nit".to_string(),
                },
                InlineComment {
                    path: "src/lib.rs".to_string(),
                    line: 42,
                    comment: "possible SQL injection here".to_string(),
                },
            ],
            judge_cards: Vec::new(),
            raw_auditor_id: "test".to_string(),
        }
    }

    #[test]
    fn incomplete_decision_has_no_termination_block() {
        let session = Session::new("s1", None);
        let payload = assemble(
            Some(sample_audit(70)),
            CompletionDecision {
                is_complete: false,
                reason: None,
                threshold_score: 95,
                threshold_loops: 10,
            },
            &session,
            10,
        );
        assert!(payload.termination.is_none());
    }

    #[test]
    fn complete_decision_surfaces_only_critical_comments() {
        let session = Session::new("s1", None);
        let payload = assemble(
            Some(sample_audit(96)),
            CompletionDecision {
                is_complete: true,
                reason: Some(CompletionReason::Tier1),
                threshold_score: 95,
                threshold_loops: 10,
            },
            &session,
            10,
        );
        let termination = payload.termination.expect("should be present");
        assert_eq!(termination.critical_issues.len(), 1);
        assert!(termination.critical_issues[0].contains("SQL injection"));
    }

    #[test]
    fn loop_info_absent_below_two_iterations_present_at_or_above() {
        let mut session = Session::new("s1", None);
        session.current_loop = 1;
        let payload = assemble(
            Some(sample_audit(70)),
            CompletionDecision {
                is_complete: false,
                reason: None,
                threshold_score: 95,
                threshold_loops: 10,
            },
            &session,
            10,
        );
        assert!(payload.loop_info.is_none());

        session.current_loop = 2;
        let payload = assemble(
            Some(sample_audit(70)),
            CompletionDecision {
                is_complete: false,
                reason: None,
                threshold_score: 95,
                threshold_loops: 10,
            },
            &session,
            10,
        );
        assert!(payload.loop_info.is_some());
    }

    #[test]
    fn stagnation_termination_without_audit_uses_similarity_summary() {
        let mut session = Session::new("s1", None);
        session.stagnation_info = Some(StagnationInfo {
            detected_at_loop: 12,
            similarity: 0.97,
        });
        let payload = assemble(
            None,
            CompletionDecision {
                is_complete: true,
                reason: Some(CompletionReason::Stagnation),
                threshold_score: 0,
                threshold_loops: 0,
            },
            &session,
            25,
        );
        let termination = payload.termination.expect("should be present");
        assert!(termination.final_assessment.contains("stagnation"));
    }
}
