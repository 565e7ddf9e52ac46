//! Security agent capabilities
//!
//! `POST /audit` is paid: it reviews contract source, through the inference
//! backend when one is configured and with static pattern checks otherwise.
//! `GET /threats` is free, and paying for it adds remediation guidance.
//! `POST /quote` opens a pending ledger entry for an audit paid out of band.

use axum::{http::StatusCode, routing::MethodFilter, Extension, Json};
use chrono::Duration as ChronoDuration;
use meshwork_agent::{AgentHandle, AgentRuntime, InferenceOptions};
use meshwork_syndicate::{SyndicateConfig, SyndicateStrategy};
use meshwork_types::TokenAmount;
use meshwork_x402::{PaymentContext, PaymentLedger, Pricing};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Syndicate the security agent founds
pub const SYNDICATE_ID: &str = "security-audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreatPattern {
    pub id: &'static str,
    pub needle: &'static str,
    pub severity: Severity,
    pub title: &'static str,
    pub remediation: &'static str,
}

pub const PATTERNS: &[ThreatPattern] = &[
    ThreatPattern {
        id: "tx-origin-auth",
        needle: "tx.origin",
        severity: Severity::High,
        title: "Authorization through tx.origin",
        remediation: "Compare msg.sender against the owner instead of tx.origin",
    },
    ThreatPattern {
        id: "unprotected-selfdestruct",
        needle: "selfdestruct",
        severity: Severity::Critical,
        title: "Contract can be destroyed",
        remediation: "Remove selfdestruct or gate it behind a timelocked owner check",
    },
    ThreatPattern {
        id: "delegatecall",
        needle: "delegatecall",
        severity: Severity::High,
        title: "delegatecall to a possibly untrusted target",
        remediation: "Only delegatecall into immutable, audited implementation addresses",
    },
    ThreatPattern {
        id: "block-timestamp",
        needle: "block.timestamp",
        severity: Severity::Low,
        title: "Logic depends on block.timestamp",
        remediation: "Tolerate validator drift of several seconds",
    },
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub contract_address: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub title: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub contract_address: String,
    pub findings: Vec<Finding>,
    /// Model commentary when an inference backend is configured
    pub analysis: Option<String>,
    pub evidence_id: Option<String>,
    pub paid_by: Option<String>,
}

/// Pattern matches in `source`, most severe first
pub fn static_findings(source: &str) -> Vec<Finding> {
    let mut findings: Vec<Finding> = PATTERNS
        .iter()
        .filter(|p| source.contains(p.needle))
        .map(|p| Finding {
            id: p.id.to_string(),
            severity: p.severity,
            title: p.title.to_string(),
        })
        .collect();
    findings.sort_by_key(|f| std::cmp::Reverse(f.severity as u8));
    findings
}

async fn audit(
    agent: AgentHandle,
    ctx: PaymentContext,
    request: AuditRequest,
) -> Result<Json<AuditReport>, (StatusCode, Json<Value>)> {
    let source = request.source.unwrap_or_default();
    let findings = static_findings(&source);

    let (analysis, evidence_id) = match agent.inference() {
        Some(backend) => {
            let prompt = format!(
                "Audit the smart contract deployed at {}. List vulnerabilities by severity.\n\n{}",
                request.contract_address, source
            );
            match backend.infer(&prompt, &InferenceOptions::default()).await {
                Ok(response) => (Some(response.content), response.evidence_id),
                Err(e) => {
                    warn!(agent_id = %agent.agent_id(), error = %e, "Inference failed");
                    return Err((
                        StatusCode::BAD_GATEWAY,
                        Json(json!({ "error": "inference backend unavailable" })),
                    ));
                }
            }
        }
        None => (None, None),
    };

    // earnings were credited when the payment was accepted
    agent.record_task_completed(TokenAmount::ZERO);
    info!(
        agent_id = %agent.agent_id(),
        contract = %request.contract_address,
        findings = findings.len(),
        "Audit completed"
    );

    Ok(Json(AuditReport {
        contract_address: request.contract_address,
        findings,
        analysis,
        evidence_id,
        paid_by: ctx.receipt.map(|r| r.payer),
    }))
}

async fn threats(ctx: PaymentContext) -> Json<Value> {
    let patterns: Vec<Value> = PATTERNS
        .iter()
        .map(|p| {
            if ctx.paid {
                json!({ "id": p.id, "severity": p.severity, "title": p.title, "remediation": p.remediation })
            } else {
                json!({ "id": p.id, "severity": p.severity, "title": p.title })
            }
        })
        .collect();
    Json(json!({ "premium": ctx.paid, "patterns": patterns }))
}

/// Prices and lifetimes for the security routes
#[derive(Debug, Clone, Copy)]
pub struct SecurityPricing {
    pub audit: TokenAmount,
    pub threat_feed: TokenAmount,
    /// How long an audit quote stays payable
    pub quote_ttl: ChronoDuration,
}

async fn quote(
    ledger: Arc<PaymentLedger>,
    agent: AgentHandle,
    token: String,
    pricing: SecurityPricing,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match ledger.request_payment(agent.agent_id(), pricing.audit, &token, pricing.quote_ttl) {
        Ok(payment) => {
            agent.touch();
            Ok(Json(json!({ "payment": payment })))
        }
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// Register the security capabilities and the agent's syndicate
pub fn register(runtime: &mut AgentRuntime, pricing: SecurityPricing) -> meshwork_agent::Result<()> {
    let handle = runtime.handle();
    runtime.paid_route(
        "/audit",
        MethodFilter::POST,
        Pricing::Fixed(pricing.audit),
        move |Extension(ctx): Extension<PaymentContext>, Json(request): Json<AuditRequest>| {
            audit(handle.clone(), ctx, request)
        },
    )?;
    runtime.optional_paid_route(
        "/threats",
        MethodFilter::GET,
        Pricing::Fixed(pricing.threat_feed),
        |Extension(ctx): Extension<PaymentContext>| threats(ctx),
    )?;

    let ledger = runtime.ledger().clone();
    let token = runtime.gateway().config().asset.clone();
    let agent = runtime.handle();
    runtime.route("/quote", MethodFilter::POST, move || {
        quote(ledger.clone(), agent.clone(), token.clone(), pricing)
    })?;

    let config = SyndicateConfig::new(SYNDICATE_ID, "Security Audit Syndicate", SyndicateStrategy::SecurityAudit)
        .with_required_capabilities(&["smart-contract-audit"]);
    if runtime.found_syndicate(config) {
        info!(syndicate_id = SYNDICATE_ID, "Founded syndicate");
    } else if !runtime.join_syndicate(SYNDICATE_ID) {
        warn!(
            syndicate_id = SYNDICATE_ID,
            agent_id = %runtime.profile().id,
            "Agent could not join syndicate"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_findings_rank_by_severity() {
        let source = "if (tx.origin == owner) { selfdestruct(payable(owner)); }";
        let findings = static_findings(source);
        let ids: Vec<&str> = findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["unprotected-selfdestruct", "tx-origin-auth"]);
    }

    #[test]
    fn clean_source_has_no_findings() {
        assert!(static_findings("function add(uint a, uint b) returns (uint) { return a + b; }").is_empty());
    }
}
