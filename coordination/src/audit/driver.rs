//! Bounded subprocess invocation of the external auditor binary, with a
//! three-tier JSON recovery pass over its stdout (C2).
//!
//! Grounded on the kill-on-drop + process-group + `tokio::time::timeout`
//! pattern used for gate subprocesses elsewhere in this workspace.

use super::error::EngineError;
use super::types::AuditResult;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Anything that can run one auditor pass over a normalized submission and
/// return either a structured result or a hard engine error. The real
/// implementation shells out to a subprocess; tests substitute a stub.
#[async_trait]
pub trait AuditorDriver: Send + Sync {
    async fn audit(&self, submission: &str) -> Result<AuditResult, EngineError>;

    /// Cheap liveness probe, used by `--probe-auditor` and startup checks.
    async fn is_available(&self) -> bool;
}

/// Drives the real `AUDITOR_EXECUTABLE` binary as a child process: writes
/// the normalized submission to its stdin, waits up to `timeout` for it to
/// exit, and recovers a verdict from stdout by three progressively looser
/// strategies.
pub struct ProcessAuditorDriver {
    executable: PathBuf,
    timeout: Duration,
}

impl ProcessAuditorDriver {
    pub fn new(executable: PathBuf, timeout: Duration) -> Self {
        Self { executable, timeout }
    }

    /// Run a tokio command under the configured timeout. On Unix the child
    /// is placed in its own process group so the whole tree dies on
    /// timeout, not just the immediate child.
    async fn run_with_timeout(
        &self,
        cmd: &mut tokio::process::Command,
    ) -> Result<std::process::Output, EngineError> {
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(EngineError::AuditorUnavailable {
                message: format!("failed to execute {}: {e}", self.executable.display()),
            }),
            Err(_) => Err(EngineError::AuditorTimeout {
                elapsed_secs: self.timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl AuditorDriver for ProcessAuditorDriver {
    async fn audit(&self, submission: &str) -> Result<AuditResult, EngineError> {
        use std::process::Stdio;
        use tokio::io::AsyncWriteExt;

        let start = Instant::now();
        let mut cmd = tokio::process::Command::new(&self.executable);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // `Command::output()` takes ownership of stdio pipes internally, so
        // to feed stdin we spawn manually and write before awaiting output.
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| EngineError::AuditorUnavailable {
            message: format!("failed to spawn {}: {e}", self.executable.display()),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(submission.as_bytes()).await {
                warn!(error = %e, "failed writing submission to auditor stdin");
            }
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(EngineError::AuditorUnavailable {
                    message: format!("auditor process error: {e}"),
                })
            }
            Err(_) => {
                return Err(EngineError::AuditorTimeout {
                    elapsed_secs: self.timeout.as_secs(),
                })
            }
        };

        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "auditor invocation finished");

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(result) = parse_auditor_output(&stdout) {
                return Ok(result);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::AuditorCrash {
                message: truncate(&stderr, 2000),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_auditor_output(&stdout).ok_or_else(|| EngineError::AuditorParseError {
            message: format!("unparseable output tail: {}", truncate(&stdout, 500)),
        })
    }

    async fn is_available(&self) -> bool {
        let mut cmd = tokio::process::Command::new(&self.executable);
        cmd.arg("--version");
        matches!(self.run_with_timeout(&mut cmd).await, Ok(output) if output.status.success())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max_chars).collect();
        t.push_str("...[truncated]");
        t
    }
}

/// Three-tier recovery over raw auditor stdout:
/// 1. Strict `serde_json::from_str` over the whole trimmed string.
/// 2. Greedy balanced-brace extraction of the first top-level `{...}` span,
///    then strict parse of that span.
/// 3. A light repair pass (quote bare keys, normalize single quotes, drop
///    trailing commas) over the extracted span, then a final parse attempt.
///
/// Returns `None` if all three strategies fail.
fn parse_auditor_output(raw: &str) -> Option<AuditResult> {
    let trimmed = raw.trim();
    if let Ok(result) = serde_json::from_str::<AuditResult>(trimmed) {
        return Some(result);
    }

    let span = extract_balanced_braces(trimmed)?;
    if let Ok(result) = serde_json::from_str::<AuditResult>(&span) {
        return Some(result);
    }

    let repaired = repair_json(&span);
    serde_json::from_str::<AuditResult>(&repaired).ok()
}

fn extract_balanced_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort repair of common near-JSON defects: unquoted object keys,
/// single-quoted strings, and trailing commas before a closing brace/bracket.
fn repair_json(span: &str) -> String {
    let single_quotes_normalized = span.replace('\'', "\"");

    let key_pattern = regex::Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)").unwrap();
    let keys_quoted = key_pattern
        .replace_all(&single_quotes_normalized, r#"$1"$2"$3"#)
        .to_string();

    let trailing_comma = regex::Regex::new(r",(\s*[}\]])").unwrap();
    trailing_comma.replace_all(&keys_quoted, "$1").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_succeeds_on_well_formed_json() {
        let raw = r#"{"overall_score":90,"verdict":"pass","summary":"fine","raw_auditor_id":"a1"}"#;
        let result = parse_auditor_output(raw).expect("should parse");
        assert_eq!(result.overall_score, 90);
    }

    #[test]
    fn brace_extraction_ignores_leading_and_trailing_prose() {
        let raw = format!(
            "Here is my verdict:\n{}\nThanks!",
            r#"{"overall_score":70,"verdict":"revise","summary":"needs work","raw_auditor_id":"a1"}"#
        );
        let result = parse_auditor_output(&raw).expect("should parse");
        assert_eq!(result.overall_score, 70);
    }

    #[test]
    fn repair_pass_recovers_unquoted_keys_and_trailing_commas() {
        let raw = r#"{overall_score: 60, verdict: 'revise', summary: 'needs work', raw_auditor_id: 'a1',}"#;
        let result = parse_auditor_output(raw).expect("should parse after repair");
        assert_eq!(result.overall_score, 60);
    }

    #[test]
    fn completely_unparseable_output_returns_none() {
        assert!(parse_auditor_output("not json at all, no braces here").is_none());
    }

    struct StubDriver {
        result: AuditResult,
    }

    #[async_trait]
    impl AuditorDriver for StubDriver {
        async fn audit(&self, _submission: &str) -> Result<AuditResult, EngineError> {
            Ok(self.result.clone())
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn stub_driver_satisfies_the_trait_object_seam() {
        use super::super::types::Verdict;
        let stub: Box<dyn AuditorDriver> = Box::new(StubDriver {
            result: AuditResult {
                overall_score: 99,
                verdict: Verdict::Pass,
                dimensions: Vec::new(),
                summary: "great".to_string(),
                inline_comments: Vec::new(),
                judge_cards: Vec::new(),
                raw_auditor_id: "stub".to_string(),
            },
        });
        let result = stub.audit("anything").await.unwrap();
        assert_eq!(result.overall_score, 99);
    }
}
