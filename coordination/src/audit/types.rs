//! Core data model: Session, IterationRecord, AuditResult, CompletionDecision,
//! FeedbackPayload.
//!
//! Kept separate from the components that operate on these types so the
//! wire/storage shapes stay free of component-specific logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a session stopped accepting further audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Tier1,
    Tier2,
    Tier3,
    HardStop,
    Stagnation,
    ExternalTerminate,
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::HardStop => "hard_stop",
            Self::Stagnation => "stagnation",
            Self::ExternalTerminate => "external_terminate",
        };
        write!(f, "{s}")
    }
}

/// Auditor's disposition on a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Revise,
    Reject,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Revise => "revise",
            Self::Reject => "reject",
        };
        write!(f, "{s}")
    }
}

/// A single scored rubric dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub name: String,
    pub score: u8,
}

/// One inline code-location comment from the auditor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineComment {
    pub path: String,
    pub line: u32,
    pub comment: String,
}

/// One judge's individual score and notes, for multi-judge auditors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeCard {
    pub judge_id: String,
    pub score: u8,
    pub notes: Option<String>,
}

/// The structured verdict produced by one auditor invocation (C2's output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub overall_score: u8,
    pub verdict: Verdict,
    #[serde(default)]
    pub dimensions: Vec<DimensionScore>,
    pub summary: String,
    #[serde(default)]
    pub inline_comments: Vec<InlineComment>,
    #[serde(default)]
    pub judge_cards: Vec<JudgeCard>,
    pub raw_auditor_id: String,
}

impl AuditResult {
    /// The synthetic fallback returned when the auditor times out or its
    /// output cannot be parsed by any of the three parse strategies.
    pub fn synthetic_timeout_fallback() -> Self {
        Self {
            overall_score: 50,
            verdict: Verdict::Revise,
            dimensions: Vec::new(),
            summary: "Audit could not be completed due to timeout".to_string(),
            inline_comments: Vec::new(),
            judge_cards: Vec::new(),
            raw_auditor_id: "synthetic-fallback".to_string(),
        }
    }

    pub fn synthetic_parse_error_fallback() -> Self {
        Self {
            overall_score: 50,
            verdict: Verdict::Revise,
            dimensions: Vec::new(),
            summary: "Audit could not be completed due to unparseable auditor output".to_string(),
            inline_comments: Vec::new(),
            judge_cards: Vec::new(),
            raw_auditor_id: "synthetic-fallback".to_string(),
        }
    }
}

/// One submit -> audit -> feedback cycle, recorded permanently on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub thought_number: u32,
    pub submitted_at: DateTime<Utc>,
    pub submission_fingerprint: String,
    pub audit: Option<AuditResult>,
    pub audit_error: Option<String>,
    pub cache_hit: bool,
}

/// Stagnation detector result attached to a session once it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagnationInfo {
    pub detected_at_loop: u32,
    pub similarity: f64,
}

/// A durable, per-`session_id` audit trajectory.
///
/// Invariant: `iterations.len() == current_loop as usize`.
/// Invariant: once `is_complete` is true, no further iterations may be
/// appended and no further audits may run for this session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_loop: u32,
    pub iterations: Vec<IterationRecord>,
    pub is_complete: bool,
    pub completion_reason: Option<CompletionReason>,
    pub stagnation_info: Option<StagnationInfo>,
    pub external_context_active: bool,
    pub external_context_id: Option<String>,
    pub external_loop_id: Option<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, external_loop_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
            current_loop: 0,
            iterations: Vec::new(),
            is_complete: false,
            completion_reason: None,
            stagnation_info: None,
            external_context_active: false,
            external_context_id: None,
            external_loop_id,
        }
    }

    /// Check the structural invariants this type promises. Used by the
    /// session store on every load and before every write commit.
    pub fn validate(&self) -> Result<(), String> {
        if self.iterations.len() as u32 != self.current_loop {
            return Err(format!(
                "current_loop ({}) does not match iterations.len() ({})",
                self.current_loop,
                self.iterations.len()
            ));
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".to_string());
        }
        if self.is_complete && self.completion_reason.is_none() {
            return Err("is_complete is true but completion_reason is absent".to_string());
        }
        if self.external_context_active && self.external_context_id.is_none() {
            return Err(
                "external_context_active is true but external_context_id is absent".to_string(),
            );
        }
        Ok(())
    }

    /// Most recent `n` normalized submission texts are not stored on the
    /// session itself (only fingerprints are) -- callers needing raw text
    /// for stagnation comparison must retain it out-of-band for the
    /// lifetime of the in-flight request. See `audit::stagnation`.
    pub fn last_scores(&self, n: usize) -> Vec<u8> {
        self.iterations
            .iter()
            .rev()
            .take(n)
            .filter_map(|it| it.audit.as_ref().map(|a| a.overall_score))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

/// C6's decision for a single evaluated iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionDecision {
    pub is_complete: bool,
    pub reason: Option<CompletionReason>,
    pub threshold_score: u8,
    pub threshold_loops: u32,
}

/// Trend classification over the last window of iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressTrend {
    Improving,
    Stagnant,
    Declining,
}

impl std::fmt::Display for ProgressTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Improving => "improving",
            Self::Stagnant => "stagnant",
            Self::Declining => "declining",
        };
        write!(f, "{s}")
    }
}

/// C7's `loop_info` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopInfo {
    pub current_loop: u32,
    pub max_loops: u32,
    pub progress_trend: ProgressTrend,
    pub stagnation_detected: bool,
}

/// C7's `termination` block, present only when the completion decision is
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationInfo {
    pub reason: String,
    pub critical_issues: Vec<String>,
    pub final_assessment: String,
}

/// C7's output: the full response body before transport envelope framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub session_id: String,
    pub current_loop: u32,
    pub audit: Option<AuditResult>,
    pub completion: CompletionDecision,
    pub loop_info: Option<LoopInfo>,
    pub termination: Option<TerminationInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_validate_rejects_loop_mismatch() {
        let mut s = Session::new("s1", None);
        s.current_loop = 2;
        assert!(s.validate().is_err());
    }

    #[test]
    fn session_validate_rejects_complete_without_reason() {
        let mut s = Session::new("s1", None);
        s.is_complete = true;
        assert!(s.validate().is_err());
        s.completion_reason = Some(CompletionReason::Tier1);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn session_validate_rejects_dangling_external_context() {
        let mut s = Session::new("s1", None);
        s.external_context_active = true;
        assert!(s.validate().is_err());
        s.external_context_id = Some("handle-1".to_string());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn completion_reason_display_matches_wire_strings() {
        assert_eq!(CompletionReason::Tier1.to_string(), "tier1");
        assert_eq!(CompletionReason::HardStop.to_string(), "hard_stop");
    }
}
