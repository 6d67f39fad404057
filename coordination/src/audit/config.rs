//! Immutable engine configuration, parsed from environment variables and
//! validated once at startup. A validation failure is fatal.

use super::error::EngineError;
use std::time::Duration;

/// One `(threshold_score, loop_cap)` tier used by the completion evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub score: u8,
    pub loop_cap: u32,
}

/// Resolved, immutable configuration for the whole engine. Constructed once
/// at startup via [`EngineConfig::from_env`] and shared thereafter behind an
/// `Arc`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub audit_timeout: Duration,
    pub max_concurrent_audits: usize,
    pub max_concurrent_sessions: usize,
    pub tier1: Tier,
    pub tier2: Tier,
    pub tier3: Tier,
    pub hard_stop_loops: u32,
    pub stagnation_threshold: f64,
    pub stagnation_start_loop: u32,
    pub stagnation_window: usize,
    pub enable_audit_caching: bool,
    pub enable_session_persistence: bool,
    pub session_state_dir: std::path::PathBuf,
    pub auditor_executable: std::path::PathBuf,
    pub queue_wait_timeout: Duration,
    pub session_max_age: Duration,
    pub cache_max_entries: usize,
    pub cache_max_age: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audit_timeout: Duration::from_secs(120),
            max_concurrent_audits: 1,
            max_concurrent_sessions: 256,
            tier1: Tier {
                score: 95,
                loop_cap: 10,
            },
            tier2: Tier {
                score: 90,
                loop_cap: 15,
            },
            tier3: Tier {
                score: 85,
                loop_cap: 20,
            },
            hard_stop_loops: 25,
            stagnation_threshold: 0.95,
            stagnation_start_loop: 10,
            stagnation_window: 3,
            enable_audit_caching: true,
            enable_session_persistence: true,
            session_state_dir: std::path::PathBuf::from(".mcp-gan-state"),
            auditor_executable: std::path::PathBuf::from("gan-auditor"),
            queue_wait_timeout: Duration::from_secs(60),
            session_max_age: Duration::from_secs(7 * 24 * 3600),
            cache_max_entries: 512,
            cache_max_age: Duration::from_secs(3600),
        }
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64, EngineError> {
    match std::env::var(name) {
        Ok(v) => v.parse::<u64>().map_err(|e| EngineError::ConfigInvalid {
            message: format!("{name}={v:?} is not a valid integer: {e}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, EngineError> {
    env_u64(name, default as u64).map(|v| v as u32)
}

fn env_usize(name: &str, default: usize) -> Result<usize, EngineError> {
    env_u64(name, default as u64).map(|v| v as usize)
}

fn env_u8(name: &str, default: u8) -> Result<u8, EngineError> {
    env_u64(name, default as u64).map(|v| v as u8)
}

fn env_f64(name: &str, default: f64) -> Result<f64, EngineError> {
    match std::env::var(name) {
        Ok(v) => v.parse::<f64>().map_err(|e| EngineError::ConfigInvalid {
            message: format!("{name}={v:?} is not a valid float: {e}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, EngineError> {
    match std::env::var(name) {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(EngineError::ConfigInvalid {
                message: format!("{name}={other:?} is not a valid boolean"),
            }),
        },
        Err(_) => Ok(default),
    }
}

fn env_path(name: &str, default: &std::path::Path) -> std::path::PathBuf {
    std::env::var(name)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default.to_path_buf())
}

impl EngineConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults, then validate it.
    pub fn from_env() -> Result<Self, EngineError> {
        let defaults = Self::default();

        let config = Self {
            audit_timeout: Duration::from_secs(env_u64(
                "AUDIT_TIMEOUT_SECONDS",
                defaults.audit_timeout.as_secs(),
            )?),
            max_concurrent_audits: env_usize(
                "MAX_CONCURRENT_AUDITS",
                defaults.max_concurrent_audits,
            )?,
            max_concurrent_sessions: env_usize(
                "MAX_CONCURRENT_SESSIONS",
                defaults.max_concurrent_sessions,
            )?,
            tier1: Tier {
                score: env_u8("TIER1_SCORE", defaults.tier1.score)?,
                loop_cap: env_u32("TIER1_LOOPS", defaults.tier1.loop_cap)?,
            },
            tier2: Tier {
                score: env_u8("TIER2_SCORE", defaults.tier2.score)?,
                loop_cap: env_u32("TIER2_LOOPS", defaults.tier2.loop_cap)?,
            },
            tier3: Tier {
                score: env_u8("TIER3_SCORE", defaults.tier3.score)?,
                loop_cap: env_u32("TIER3_LOOPS", defaults.tier3.loop_cap)?,
            },
            hard_stop_loops: env_u32("HARD_STOP_LOOPS", defaults.hard_stop_loops)?,
            stagnation_threshold: env_f64(
                "STAGNATION_THRESHOLD",
                defaults.stagnation_threshold,
            )?,
            stagnation_start_loop: env_u32(
                "STAGNATION_START_LOOP",
                defaults.stagnation_start_loop,
            )?,
            stagnation_window: env_usize("STAGNATION_WINDOW", defaults.stagnation_window)?,
            enable_audit_caching: env_bool(
                "ENABLE_AUDIT_CACHING",
                defaults.enable_audit_caching,
            )?,
            enable_session_persistence: env_bool(
                "ENABLE_SESSION_PERSISTENCE",
                defaults.enable_session_persistence,
            )?,
            session_state_dir: env_path("SESSION_STATE_DIR", &defaults.session_state_dir),
            auditor_executable: env_path("AUDITOR_EXECUTABLE", &defaults.auditor_executable),
            queue_wait_timeout: Duration::from_secs(env_u64(
                "QUEUE_WAIT_TIMEOUT_SECONDS",
                defaults.queue_wait_timeout.as_secs(),
            )?),
            session_max_age: Duration::from_secs(env_u64(
                "SESSION_MAX_AGE_SECONDS",
                defaults.session_max_age.as_secs(),
            )?),
            cache_max_entries: defaults.cache_max_entries,
            cache_max_age: defaults.cache_max_age,
        };

        config.validate()?;
        Ok(config)
    }

    /// Tier and loop-cap orderings must hold: `T1.score >= T2.score >=
    /// T3.score` and `T1.cap <= T2.cap <= T3.cap <= hard_stop.cap`.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.tier1.score >= self.tier2.score && self.tier2.score >= self.tier3.score) {
            return Err(EngineError::ConfigInvalid {
                message: format!(
                    "tier scores must satisfy T1 >= T2 >= T3, got {} >= {} >= {}",
                    self.tier1.score, self.tier2.score, self.tier3.score
                ),
            });
        }
        if !(self.tier1.loop_cap <= self.tier2.loop_cap
            && self.tier2.loop_cap <= self.tier3.loop_cap
            && self.tier3.loop_cap <= self.hard_stop_loops)
        {
            return Err(EngineError::ConfigInvalid {
                message: format!(
                    "loop caps must satisfy T1 <= T2 <= T3 <= hard_stop, got {} <= {} <= {} <= {}",
                    self.tier1.loop_cap, self.tier2.loop_cap, self.tier3.loop_cap, self.hard_stop_loops
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.stagnation_threshold) {
            return Err(EngineError::ConfigInvalid {
                message: format!(
                    "STAGNATION_THRESHOLD must be within [0, 1], got {}",
                    self.stagnation_threshold
                ),
            });
        }
        if self.max_concurrent_audits == 0 {
            return Err(EngineError::ConfigInvalid {
                message: "MAX_CONCURRENT_AUDITS must be at least 1".to_string(),
            });
        }
        if self.stagnation_window == 0 {
            return Err(EngineError::ConfigInvalid {
                message: "STAGNATION_WINDOW must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_tier_scores() {
        let mut config = EngineConfig::default();
        config.tier1.score = 80;
        config.tier2.score = 90;
        assert!(matches!(
            config.validate(),
            Err(EngineError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn rejects_inverted_loop_caps() {
        let mut config = EngineConfig::default();
        config.tier1.loop_cap = 20;
        config.tier2.loop_cap = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_stagnation_threshold() {
        let mut config = EngineConfig::default();
        config.stagnation_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = EngineConfig::default();
        config.max_concurrent_audits = 0;
        assert!(config.validate().is_err());
    }
}
