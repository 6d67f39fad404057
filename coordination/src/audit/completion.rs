//! Tiered completion evaluation: pure functions over the current config,
//! loop count, and score history -- no I/O, no mutable state (C6).
//!
//! Mirrors the dispatch-by-tier pattern used for escalation decisions
//! elsewhere in this workspace: one `decide` entrypoint that routes to a
//! small set of specific-condition checks in priority order.

use super::config::EngineConfig;
use super::types::{CompletionDecision, CompletionReason, ProgressTrend};

/// Evaluate whether a session should stop after its latest scored
/// iteration. Checked in priority order: stagnation first (independent of
/// score), then the three score/loop-cap tiers from tightest to loosest,
/// then the hard stop as a last-resort ceiling once no tier has fired.
///
/// A tier's `loop_cap` is a ceiling, not a floor: `score >= tier.score &&
/// current_loop <= tier.loop_cap` fires as soon as both hold, at any loop
/// from the first one onward.
pub fn decide(
    config: &EngineConfig,
    current_loop: u32,
    overall_score: u8,
    is_stagnant: bool,
) -> CompletionDecision {
    if is_stagnant {
        return CompletionDecision {
            is_complete: true,
            reason: Some(CompletionReason::Stagnation),
            threshold_score: 0,
            threshold_loops: current_loop,
        };
    }

    for (reason, tier) in [
        (CompletionReason::Tier1, config.tier1),
        (CompletionReason::Tier2, config.tier2),
        (CompletionReason::Tier3, config.tier3),
    ] {
        if overall_score >= tier.score && current_loop <= tier.loop_cap {
            return CompletionDecision {
                is_complete: true,
                reason: Some(reason),
                threshold_score: tier.score,
                threshold_loops: tier.loop_cap,
            };
        }
    }

    if current_loop >= config.hard_stop_loops {
        return CompletionDecision {
            is_complete: true,
            reason: Some(CompletionReason::HardStop),
            threshold_score: 0,
            threshold_loops: config.hard_stop_loops,
        };
    }

    CompletionDecision {
        is_complete: false,
        reason: None,
        threshold_score: config.tier1.score,
        threshold_loops: config.tier1.loop_cap,
    }
}

/// Classify the trend of the last `window` scores (oldest first). Fewer
/// than two scores is reported as `Stagnant` -- there is no trend to read
/// yet, and "no evidence of improvement" is the conservative default.
pub fn progress_trend(scores: &[u8]) -> ProgressTrend {
    if scores.len() < 2 {
        return ProgressTrend::Stagnant;
    }
    let first = scores[0] as i32;
    let last = scores[scores.len() - 1] as i32;
    let delta = last - first;
    if delta >= 5 {
        ProgressTrend::Improving
    } else if delta <= -5 {
        ProgressTrend::Declining
    } else {
        ProgressTrend::Stagnant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier1_fires_on_the_first_loop_once_its_score_is_met() {
        // The motivating worked example: loop 1, score 96 must complete as
        // tier1 even though current_loop is far below tier1's loop_cap.
        let config = EngineConfig::default();
        let decision = decide(&config, 1, 96, false);
        assert!(decision.is_complete);
        assert_eq!(decision.reason, Some(CompletionReason::Tier1));
    }

    #[test]
    fn tier1_fires_when_score_and_loop_cap_are_met_exactly_at_the_cap() {
        let config = EngineConfig::default();
        let decision = decide(&config, config.tier1.loop_cap, config.tier1.score, false);
        assert!(decision.is_complete);
        assert_eq!(decision.reason, Some(CompletionReason::Tier1));
    }

    #[test]
    fn tier1_does_not_fire_once_loop_exceeds_its_cap_even_with_a_passing_score() {
        let config = EngineConfig::default();
        let decision = decide(
            &config,
            config.tier1.loop_cap + 1,
            config.tier1.score,
            false,
        );
        assert_eq!(decision.reason, Some(CompletionReason::Tier2));
    }

    #[test]
    fn tier3_is_the_loosest_score_floor_once_its_loop_cap_is_reached() {
        let config = EngineConfig::default();
        let decision = decide(&config, config.tier3.loop_cap, config.tier3.score, false);
        assert_eq!(decision.reason, Some(CompletionReason::Tier3));
    }

    #[test]
    fn hard_stop_fires_when_no_tier_is_satisfied_and_the_cap_is_reached() {
        let config = EngineConfig::default();
        let decision = decide(&config, config.hard_stop_loops, 10, false);
        assert_eq!(decision.reason, Some(CompletionReason::HardStop));
    }

    #[test]
    fn stagnation_overrides_tier_and_hard_stop_checks() {
        let config = EngineConfig::default();
        let decision = decide(&config, 12, 40, true);
        assert_eq!(decision.reason, Some(CompletionReason::Stagnation));
    }

    #[test]
    fn no_tier_satisfied_and_below_hard_stop_continues() {
        let config = EngineConfig::default();
        let decision = decide(&config, 1, 10, false);
        assert!(!decision.is_complete);
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn progress_trend_detects_improving_and_declining() {
        assert_eq!(progress_trend(&[50, 60, 70]), ProgressTrend::Improving);
        assert_eq!(progress_trend(&[70, 60, 50]), ProgressTrend::Declining);
        assert_eq!(progress_trend(&[60, 60, 60]), ProgressTrend::Stagnant);
        assert_eq!(progress_trend(&[60, 63]), ProgressTrend::Stagnant);
    }

    #[test]
    fn progress_trend_with_fewer_than_two_scores_is_stagnant() {
        assert_eq!(progress_trend(&[]), ProgressTrend::Stagnant);
        assert_eq!(progress_trend(&[60]), ProgressTrend::Stagnant);
    }
}
