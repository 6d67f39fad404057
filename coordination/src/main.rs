//! MCP server exposing iterative code-audit orchestration as a single
//! `audit_thought` tool.
//!
//! # Usage
//!
//! ```bash
//! gan-audit-engine
//! gan-audit-engine --dump-config
//! gan-audit-engine --check-config
//! gan-audit-engine --probe-auditor
//! ```

#![allow(dead_code)]

use anyhow::Result;
use clap::Parser;
use gan_audit_engine::audit::driver::{AuditorDriver, ProcessAuditorDriver};
use gan_audit_engine::audit::types::FeedbackPayload;
use gan_audit_engine::audit::{build_engine, AuditEngine, AuditRequest, EngineConfig};
use rmcp::{
    handler::server::wrapper::Parameters,
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use tokio::io::{stdin, stdout};

/// One judge's score on the wire, mirroring `audit::types::JudgeCard`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JudgeCardWire {
    judge_id: String,
    score: u8,
    notes: Option<String>,
}

/// The review body nested under `gan`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewWire {
    summary: String,
    inline: Vec<InlineCommentWire>,
    citations: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineCommentWire {
    path: String,
    line: u32,
    comment: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionStatusWire {
    is_complete: bool,
    reason: Option<String>,
    current_loop: u32,
    score: u8,
    threshold: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoopInfoWire {
    current_loop: u32,
    max_loops: u32,
    progress_trend: String,
    stagnation_detected: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TerminationInfoWire {
    reason: String,
    critical_issues: Vec<String>,
    final_assessment: String,
}

/// The `gan` block, present only once an audit has actually run for this
/// iteration (absent on pass-through submissions that skipped auditing).
#[derive(Debug, Serialize)]
struct GanWire {
    overall: u8,
    verdict: String,
    dimensions: Vec<DimensionScoreWire>,
    review: ReviewWire,
    judge_cards: Vec<JudgeCardWire>,
    #[serde(rename = "completionStatus")]
    completion_status: CompletionStatusWire,
    #[serde(rename = "loopInfo", skip_serializing_if = "Option::is_none")]
    loop_info: Option<LoopInfoWire>,
    #[serde(rename = "terminationInfo", skip_serializing_if = "Option::is_none")]
    termination_info: Option<TerminationInfoWire>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DimensionScoreWire {
    name: String,
    score: u8,
}

/// The full `audit_thought` response envelope (§6 of the wire contract).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditThoughtResponse {
    thought_number: u32,
    total_thoughts: u32,
    next_thought_needed: bool,
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gan: Option<GanWire>,
}

/// Citations are a presentational concern synthesized at the wire boundary
/// from the raw auditor id and any per-judge ids; the core `AuditResult`
/// carries neither concept.
fn build_citations(audit: &gan_audit_engine::audit::types::AuditResult) -> Vec<String> {
    let mut citations = vec![audit.raw_auditor_id.clone()];
    citations.extend(audit.judge_cards.iter().map(|j| j.judge_id.clone()));
    citations
}

fn build_response(
    thought_number: u32,
    total_thoughts: u32,
    payload: FeedbackPayload,
) -> AuditThoughtResponse {
    let next_thought_needed = !payload.completion.is_complete;

    let gan = payload.audit.as_ref().map(|audit| GanWire {
        overall: audit.overall_score,
        verdict: audit.verdict.to_string(),
        dimensions: audit
            .dimensions
            .iter()
            .map(|d| DimensionScoreWire {
                name: d.name.clone(),
                score: d.score,
            })
            .collect(),
        review: ReviewWire {
            summary: audit.summary.clone(),
            inline: audit
                .inline_comments
                .iter()
                .map(|c| InlineCommentWire {
                    path: c.path.clone(),
                    line: c.line,
                    comment: c.comment.clone(),
                })
                .collect(),
            citations: build_citations(audit),
        },
        judge_cards: audit
            .judge_cards
            .iter()
            .map(|j| JudgeCardWire {
                judge_id: j.judge_id.clone(),
                score: j.score,
                notes: j.notes.clone(),
            })
            .collect(),
        completion_status: CompletionStatusWire {
            is_complete: payload.completion.is_complete,
            reason: payload.completion.reason.map(|r| r.to_string()),
            current_loop: payload.current_loop,
            score: audit.overall_score,
            threshold: payload.completion.threshold_score,
        },
        loop_info: payload.loop_info.as_ref().map(|l| LoopInfoWire {
            current_loop: l.current_loop,
            max_loops: l.max_loops,
            progress_trend: l.progress_trend.to_string(),
            stagnation_detected: l.stagnation_detected,
        }),
        termination_info: payload.termination.as_ref().map(|t| TerminationInfoWire {
            reason: t.reason.clone(),
            critical_issues: t.critical_issues.clone(),
            final_assessment: t.final_assessment.clone(),
        }),
    });

    AuditThoughtResponse {
        thought_number,
        total_thoughts,
        next_thought_needed,
        session_id: payload.session_id,
        gan,
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print the resolved configuration as JSON and exit, without starting
    /// the MCP server.
    #[arg(long, default_value_t = false)]
    dump_config: bool,

    /// Validate the resolved configuration and exit with a nonzero status
    /// on failure, without starting the MCP server.
    #[arg(long, default_value_t = false)]
    check_config: bool,

    /// Probe whether the configured auditor executable is reachable and
    /// responds to `--version`, then exit.
    #[arg(long, default_value_t = false)]
    probe_auditor: bool,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct AuditThoughtRequest {
    /// Free text of the submission under audit; may contain fenced code
    /// blocks, unified diffs, or plain prose.
    #[schemars(description = "The submitted thought or code change to audit")]
    thought: String,

    /// 1-based index of this submission within its session.
    #[schemars(description = "1-based index of this thought within its loop")]
    thought_number: u32,

    /// Total thoughts the caller currently expects to need; advisory only.
    #[schemars(description = "Total thoughts currently expected for this loop")]
    total_thoughts: u32,

    /// Whether the caller intends to submit a further thought after this one.
    #[schemars(description = "Whether another thought is expected after this one")]
    next_thought_needed: bool,

    /// Existing session id to continue; absent starts a new session.
    #[schemars(description = "Session id to continue; omit to start a new session")]
    branch_id: Option<String>,

    /// External multi-turn loop id, for engines with an external-context API.
    #[schemars(description = "External loop id for context lifecycle bookkeeping")]
    loop_id: Option<String>,
}

#[derive(Clone)]
struct AuditServer {
    engine: std::sync::Arc<AuditEngine>,
}

#[tool_router]
impl AuditServer {
    fn new(engine: std::sync::Arc<AuditEngine>) -> Self {
        Self { engine }
    }

    #[tool(description = "Submit a code change or thought for iterative audit; returns a scored verdict, inline comments, and a completion decision")]
    async fn audit_thought(
        &self,
        Parameters(req): Parameters<AuditThoughtRequest>,
    ) -> Result<String, String> {
        // nextThoughtNeeded is accepted per the external contract but does
        // not affect orchestration; the engine derives completion purely
        // from C6's tiered evaluation and the response echoes its own
        // answer back to the caller.
        let _ = req.next_thought_needed;

        let thought_number = req.thought_number;
        let total_thoughts = req.total_thoughts;

        let request = AuditRequest {
            session_id: req.branch_id,
            external_loop_id: req.loop_id,
            thought_number,
            submission_text: req.thought,
        };

        match self.engine.audit_and_wait(request).await {
            Ok(payload) => {
                let response = build_response(thought_number, total_thoughts, payload);
                serde_json::to_string_pretty(&response).map_err(|e| e.to_string())
            }
            Err(e) => {
                let structured = e.to_structured();
                serde_json::to_string_pretty(&structured).map_err(|e| e.to_string())
            }
        }
    }
}

impl ServerHandler for AuditServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Iterative code-audit orchestration over a single tool, audit_thought. \
                 Submit a thought with a branchId to continue an existing audit session, \
                 or omit branchId to start a new one. The response includes the audit \
                 verdict, a completion decision, and (once complete) a termination summary."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gan_audit_engine=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env()?;

    if args.dump_config {
        println!("{}", dump_config_json(&config));
        return Ok(());
    }

    if args.check_config {
        config.validate()?;
        eprintln!("configuration is valid");
        return Ok(());
    }

    if args.probe_auditor {
        let driver = ProcessAuditorDriver::new(config.auditor_executable.clone(), config.audit_timeout);
        if driver.is_available().await {
            eprintln!("auditor executable is reachable");
            return Ok(());
        } else {
            anyhow::bail!("auditor executable at {:?} is not reachable", config.auditor_executable);
        }
    }

    tracing::info!("starting audit engine MCP server");
    let engine = std::sync::Arc::new(build_engine(config));
    let server = AuditServer::new(engine);

    let transport = (stdin(), stdout());
    let service = server.serve(transport).await?;
    service.waiting().await?;

    Ok(())
}

fn dump_config_json(config: &EngineConfig) -> String {
    serde_json::json!({
        "audit_timeout_secs": config.audit_timeout.as_secs(),
        "max_concurrent_audits": config.max_concurrent_audits,
        "max_concurrent_sessions": config.max_concurrent_sessions,
        "tier1": {"score": config.tier1.score, "loop_cap": config.tier1.loop_cap},
        "tier2": {"score": config.tier2.score, "loop_cap": config.tier2.loop_cap},
        "tier3": {"score": config.tier3.score, "loop_cap": config.tier3.loop_cap},
        "hard_stop_loops": config.hard_stop_loops,
        "stagnation_threshold": config.stagnation_threshold,
        "stagnation_start_loop": config.stagnation_start_loop,
        "stagnation_window": config.stagnation_window,
        "enable_audit_caching": config.enable_audit_caching,
        "enable_session_persistence": config.enable_session_persistence,
        "session_state_dir": config.session_state_dir,
        "auditor_executable": config.auditor_executable,
        "queue_wait_timeout_secs": config.queue_wait_timeout.as_secs(),
        "session_max_age_secs": config.session_max_age.as_secs(),
        "cache_max_entries": config.cache_max_entries,
        "cache_max_age_secs": config.cache_max_age.as_secs(),
    })
    .to_string()
}
