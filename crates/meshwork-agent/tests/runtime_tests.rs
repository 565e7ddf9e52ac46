//! HTTP-level tests for the agent runtime

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    routing::MethodFilter,
    Extension, Json, Router,
};
use chrono::Duration as ChronoDuration;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use meshwork_agent::{AgentError, AgentProfile, AgentRuntime, AgentStatus, AgentType};
use meshwork_identity::{IdentityConfig, IdentityProvider};
use meshwork_syndicate::{
    MemberRole, NewTask, SyndicateConfig, SyndicateEvents, SyndicateManager, SyndicateStore, SyndicateStrategy,
    TaskOutcome,
};
use meshwork_types::{Clock, ManualClock, TokenAmount};
use meshwork_x402::{
    Authorization, GatewayConfig, LedgerError, PaymentContext, PaymentGateway, PaymentLedger, PaymentProof,
    PaymentStatus, Pricing, ProofPayload, PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
};

const NOW: i64 = 1_700_000_000;
const PRICE: u128 = 250_000;

fn runtime_with_clock(clock: Arc<ManualClock>) -> AgentRuntime {
    let profile = AgentProfile::new("sentinel-1", "Sentinel", AgentType::Security)
        .with_capabilities(&["audit", "scan"]);
    let identity = Arc::new(IdentityProvider::new(
        IdentityConfig::new("sentinel-1", "test-salt"),
        None,
    ));
    let gateway = Arc::new(PaymentGateway::new(GatewayConfig::default()).with_clock(clock.clone()));
    let ledger = Arc::new(PaymentLedger::with_clock(clock.clone()));
    let syndicates = Arc::new(SyndicateManager::new(
        Arc::new(SyndicateStore::new()),
        Arc::new(SyndicateEvents::new()),
    ));
    AgentRuntime::new(profile, identity, gateway, ledger, syndicates).with_clock(clock)
}

fn runtime() -> AgentRuntime {
    runtime_with_clock(Arc::new(ManualClock::at_unix(NOW)))
}

async fn get(router: Router, uri: &str) -> Response {
    router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post(router: Router, uri: &str, payment: Option<String>) -> Response {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(value) = payment {
        builder = builder.header(PAYMENT_HEADER, value);
    }
    router
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn proof_for(pay_to: &str, nonce: &str) -> String {
    PaymentProof {
        x402_version: 1,
        scheme: "exact".into(),
        network: "base-sepolia".into(),
        payload: ProofPayload {
            signature: "0xfeed".into(),
            authorization: Authorization {
                from: "0x3333333333333333333333333333333333333333".into(),
                to: pay_to.into(),
                value: TokenAmount(PRICE),
                valid_after: NOW - 10,
                valid_before: NOW + 300,
                nonce: nonce.into(),
            },
        },
    }
    .to_header()
    .unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let agent = runtime();
    let response = get(agent.router(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].as_str().unwrap().starts_with("2023-11-14"));
}

#[tokio::test]
async fn identity_needs_initialization() {
    let agent = runtime();
    let response = get(agent.router(), "/identity").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let identity = agent.initialize().await.unwrap();
    let body = body_json(get(agent.router(), "/identity").await).await;
    assert_eq!(body["id"], "sentinel-1");
    assert_eq!(body["name"], "Sentinel");
    assert_eq!(body["type"], "security");
    assert_eq!(body["capabilities"], json!(["audit", "scan"]));
    assert_eq!(body["address"], identity.owner_address.as_str());
    assert_eq!(body["publicKey"], identity.public_key.as_str());
}

#[tokio::test]
async fn fallback_identity_is_unattested() {
    let agent = runtime();
    agent.initialize().await.unwrap();

    let body = body_json(get(agent.router(), "/attestation").await).await;
    assert_eq!(body["attested"], false);
    assert_eq!(body["attestation"], "unattested");
}

#[tokio::test]
async fn state_starts_empty() {
    let agent = runtime();
    let body = body_json(get(agent.router(), "/state").await).await;
    assert_eq!(body["status"], "active");
    assert_eq!(body["tasksCompleted"], 0);
    assert_eq!(body["earnings"], "0");
    assert_eq!(body["reputation"], 50.0);
}

#[tokio::test]
async fn paid_route_requires_initialized_identity() {
    let mut agent = runtime();
    let err = agent
        .paid_route("/audit", MethodFilter::POST, Pricing::fixed(PRICE), || async { "ok" })
        .err()
        .unwrap();
    assert!(matches!(err, AgentError::IdentityNotInitialized));
}

#[tokio::test]
async fn standard_paths_are_reserved() {
    let mut agent = runtime();
    let err = agent
        .route("/health", MethodFilter::GET, || async { "mine" })
        .err()
        .unwrap();
    assert!(matches!(err, AgentError::ReservedPath(p) if p == "/health"));
}

#[tokio::test]
async fn paid_route_charges_and_credits_earnings() {
    let clock = Arc::new(ManualClock::at_unix(NOW));
    let mut agent = runtime_with_clock(clock.clone());
    let identity = agent.initialize().await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    agent
        .paid_route("/audit", MethodFilter::POST, Pricing::fixed(PRICE), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "findings": [] }))
            }
        })
        .unwrap();

    let response = post(agent.router(), "/audit", None).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let challenge = body_json(response).await;
    assert_eq!(challenge["accepts"][0]["payTo"], identity.owner_address.as_str());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    clock.advance(ChronoDuration::seconds(5));
    let response = post(
        agent.router(),
        "/audit",
        Some(proof_for(&identity.owner_address, "0xa1")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(PAYMENT_RESPONSE_HEADER));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let state = agent.state();
    assert_eq!(state.earnings, TokenAmount(PRICE));
    assert_eq!(state.last_activity, clock.now());

    let body = body_json(get(agent.router(), "/state").await).await;
    assert_eq!(body["earnings"], PRICE.to_string());
}

#[tokio::test]
async fn optional_paid_route_serves_unpaid_callers() {
    let mut agent = runtime();
    agent.initialize().await.unwrap();
    agent
        .optional_paid_route(
            "/scan",
            MethodFilter::POST,
            Pricing::fixed(PRICE),
            |Extension(ctx): Extension<PaymentContext>| async move {
                Json(json!({ "premium": ctx.paid }))
            },
        )
        .unwrap();

    let response = post(agent.router(), "/scan", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["premium"], false);
    assert_eq!(agent.state().earnings, TokenAmount::ZERO);
}

#[tokio::test]
async fn ledger_sweeper_expires_overdue_payments() {
    let clock = Arc::new(ManualClock::at_unix(NOW));
    let mut agent = runtime_with_clock(clock.clone());
    agent.initialize().await.unwrap();

    let payment = agent
        .request_payment(TokenAmount(PRICE), ChronoDuration::seconds(30))
        .unwrap();
    assert_eq!(payment.agent_id, "sentinel-1");
    assert_eq!(payment.token, GatewayConfig::default().asset);

    clock.advance(ChronoDuration::seconds(31));
    agent.spawn_ledger_sweeper(Duration::from_millis(10), ChronoDuration::hours(1));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the sweeper already did the work
    assert_eq!(agent.ledger().expire_overdue(), 0);
    assert_eq!(
        agent.ledger().get(&payment.id).unwrap().status,
        PaymentStatus::Expired
    );

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn ledger_sweeper_prunes_finalized_payments() {
    let clock = Arc::new(ManualClock::at_unix(NOW));
    let mut agent = runtime_with_clock(clock.clone());
    agent.initialize().await.unwrap();

    for _ in 0..20 {
        let payment = agent
            .request_payment(TokenAmount(PRICE), ChronoDuration::minutes(5))
            .unwrap();
        agent.ledger().fail(&payment.id).unwrap();
    }
    let open = agent
        .request_payment(TokenAmount(PRICE), ChronoDuration::hours(2))
        .unwrap();
    assert_eq!(agent.ledger().len(), 21);

    clock.advance(ChronoDuration::minutes(11));
    agent.spawn_ledger_sweeper(Duration::from_millis(10), ChronoDuration::minutes(10));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(agent.ledger().len(), 1);
    assert!(agent.ledger().get(&open.id).is_some());

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_ttl_is_rejected() {
    let agent = runtime();
    agent.initialize().await.unwrap();
    let err = agent
        .request_payment(TokenAmount(PRICE), ChronoDuration::MAX)
        .unwrap_err();
    assert!(matches!(err, AgentError::Ledger(LedgerError::InvalidTtl(_))));
    assert!(agent.ledger().is_empty());
}

#[tokio::test]
async fn shutdown_stops_work_and_closes_stores() {
    let mut agent = runtime();
    agent.initialize().await.unwrap();
    agent.spawn_ledger_sweeper(Duration::from_millis(10), ChronoDuration::hours(1));
    assert_eq!(agent.background_tasks(), 1);

    agent.shutdown().await.unwrap();
    assert_eq!(agent.background_tasks(), 0);
    assert_eq!(agent.state().status, AgentStatus::Offline);
    assert!(agent
        .request_payment(TokenAmount(1), ChronoDuration::seconds(30))
        .is_err());
}

#[tokio::test]
async fn syndicate_work_updates_agent_state() {
    let agent = runtime();
    agent.initialize().await.unwrap();

    let syndicates = agent.syndicates().clone();
    assert!(syndicates.create_syndicate(SyndicateConfig::new(
        "audit-guild",
        "Audit Guild",
        SyndicateStrategy::SecurityAudit,
    )));
    assert!(agent.join_syndicate("audit-guild"));
    assert!(!agent.join_syndicate("no-such-guild"));

    let task_id = syndicates
        .create_task("audit-guild", NewTask::new("review vault", &["audit"]))
        .unwrap();
    let assignment = syndicates.assign_task("audit-guild", &task_id).unwrap();
    assert_eq!(assignment.agent_id, "sentinel-1");

    let task = agent
        .complete_syndicate_task(
            "audit-guild",
            &task_id,
            TaskOutcome::success("no findings", TokenAmount(1_000)),
        )
        .unwrap();
    assert!(task.status.is_terminal());

    let state = agent.state();
    assert_eq!(state.tasks_completed, 1);
    assert_eq!(state.earnings, TokenAmount(1_000));
    assert!((state.reputation - 52.0).abs() < 1e-9);
}

#[tokio::test]
async fn founding_agent_becomes_founder() {
    let agent = runtime();
    agent.initialize().await.unwrap();

    let config = SyndicateConfig::new("audit-guild", "Audit Guild", SyndicateStrategy::SecurityAudit);
    assert!(agent.found_syndicate(config.clone()));
    assert!(!agent.found_syndicate(config));
    assert!(!agent.join_syndicate("audit-guild"));

    let member = agent.syndicates().member("audit-guild", "sentinel-1").unwrap();
    assert_eq!(member.role, MemberRole::Founder);
    assert_eq!(member.capabilities, vec!["audit", "scan"]);
}
