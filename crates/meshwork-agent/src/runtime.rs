//! Agent runtime
//!
//! `AgentRuntime` is built once per process. Capability routes are registered
//! on it, then `router()` produces the axum app that serves them next to the
//! standard surface. `AgentHandle` is the cheap, cloneable view handlers use to
//! read and update the agent's counters.

use axum::{
    extract::State,
    handler::Handler,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, on, MethodFilter},
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use meshwork_identity::{Attestation, Identity, IdentityProvider};
use meshwork_syndicate::{
    SyndicateConfig, SyndicateManager, SyndicateMember, SyndicateTask, TaskOutcome,
};
use meshwork_types::{Repository, SharedClock, SystemClock, TaskId, TokenAmount};
use meshwork_x402::{
    OptionalPaymentLayer, PaidRouteConfig, Payment, PaymentGateway, PaymentHooks, PaymentLedger,
    PaymentReceipt, Pricing,
};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::inference::InferenceBackend;
use crate::profile::{AgentProfile, AgentState, AgentStatus};
use crate::schedule::PeriodicTask;
use crate::{AgentError, Result};

/// Paths served by every agent
pub const RESERVED_PATHS: [&str; 4] = ["/health", "/identity", "/state", "/attestation"];

struct Shared {
    profile: AgentProfile,
    identity: Arc<IdentityProvider>,
    clock: SharedClock,
    inference: Option<Arc<dyn InferenceBackend>>,
    state: RwLock<AgentState>,
}

/// Cloneable view of a running agent
#[derive(Clone)]
pub struct AgentHandle {
    shared: Arc<Shared>,
}

impl AgentHandle {
    fn new(profile: AgentProfile, identity: Arc<IdentityProvider>, clock: SharedClock) -> Self {
        let state = AgentState::new(clock.now());
        Self {
            shared: Arc::new(Shared {
                profile,
                identity,
                clock,
                inference: None,
                state: RwLock::new(state),
            }),
        }
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.shared.profile
    }

    pub fn agent_id(&self) -> &str {
        &self.shared.profile.id
    }

    /// `None` until the identity provider has been initialized
    pub fn identity(&self) -> Option<Identity> {
        self.shared.identity.identity()
    }

    pub fn attestation(&self) -> Attestation {
        self.shared.identity.attestation()
    }

    pub fn inference(&self) -> Option<Arc<dyn InferenceBackend>> {
        self.shared.inference.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    pub fn state(&self) -> AgentState {
        self.shared.state.read().clone()
    }

    /// Mark the agent as having done something just now
    pub fn touch(&self) {
        let now = self.now();
        self.shared.state.write().last_activity = now;
    }

    /// Credit an accepted payment
    pub fn record_payment(&self, amount: TokenAmount) {
        let now = self.now();
        let mut state = self.shared.state.write();
        state.earnings = state.earnings.saturating_add(amount);
        state.last_activity = now;
    }

    pub fn record_task_completed(&self, earnings: TokenAmount) {
        let now = self.now();
        let mut state = self.shared.state.write();
        state.tasks_completed += 1;
        state.earnings = state.earnings.saturating_add(earnings);
        state.last_activity = now;
    }

    /// Reputation is kept in `[0, 100]`
    pub fn set_reputation(&self, score: f64) {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 100.0) };
        self.shared.state.write().reputation = score;
    }

    pub fn set_status(&self, status: AgentStatus) {
        let mut state = self.shared.state.write();
        if state.status != status {
            debug!(agent_id = %self.shared.profile.id, ?status, "Agent status changed");
        }
        state.status = status;
    }
}

/// Runtime owning an agent's identity, payments and syndicate view
pub struct AgentRuntime {
    handle: AgentHandle,
    gateway: Arc<PaymentGateway>,
    ledger: Arc<PaymentLedger>,
    syndicates: Arc<SyndicateManager>,
    routes: Router,
    tasks: Vec<PeriodicTask>,
}

impl AgentRuntime {
    pub fn new(
        profile: AgentProfile,
        identity: Arc<IdentityProvider>,
        gateway: Arc<PaymentGateway>,
        ledger: Arc<PaymentLedger>,
        syndicates: Arc<SyndicateManager>,
    ) -> Self {
        Self {
            handle: AgentHandle::new(profile, identity, SystemClock::shared()),
            gateway,
            ledger,
            syndicates,
            routes: Router::new(),
            tasks: Vec::new(),
        }
    }

    /// Replace the clock. Has no effect once routes hold the handle.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        match Arc::get_mut(&mut self.handle.shared) {
            Some(shared) => {
                shared.state.get_mut().last_activity = clock.now();
                shared.clock = clock;
            }
            None => warn!(agent_id = %self.handle.agent_id(), "Clock set after routes were registered; ignored"),
        }
        self
    }

    /// Attach an inference backend. Has no effect once routes hold the handle.
    pub fn with_inference(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        match Arc::get_mut(&mut self.handle.shared) {
            Some(shared) => shared.inference = Some(backend),
            None => warn!(agent_id = %self.handle.agent_id(), "Inference backend set after routes were registered; ignored"),
        }
        self
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    pub fn profile(&self) -> &AgentProfile {
        self.handle.profile()
    }

    pub fn gateway(&self) -> &Arc<PaymentGateway> {
        &self.gateway
    }

    pub fn ledger(&self) -> &Arc<PaymentLedger> {
        &self.ledger
    }

    pub fn syndicates(&self) -> &Arc<SyndicateManager> {
        &self.syndicates
    }

    pub fn state(&self) -> AgentState {
        self.handle.state()
    }

    pub fn record_task_completed(&self, earnings: TokenAmount) {
        self.handle.record_task_completed(earnings)
    }

    pub fn set_reputation(&self, score: f64) {
        self.handle.set_reputation(score)
    }

    pub fn set_status(&self, status: AgentStatus) {
        self.handle.set_status(status)
    }

    /// Bring up the identity and the stores. Identity configuration errors are
    /// returned; an unreachable enclave is not an error.
    pub async fn initialize(&self) -> Result<Identity> {
        let identity = self.handle.shared.identity.initialize().await?;
        self.ledger.init().await?;
        self.syndicates.store().init().await?;

        info!(
            agent_id = %self.handle.agent_id(),
            address = %identity.owner_address,
            attested = identity.attestation.is_attested(),
            "Agent initialized"
        );
        Ok(identity)
    }

    fn pay_to(&self) -> Result<String> {
        self.handle
            .identity()
            .map(|identity| identity.owner_address)
            .ok_or(AgentError::IdentityNotInitialized)
    }

    fn check_path(path: &str) -> Result<()> {
        if RESERVED_PATHS.contains(&path) {
            return Err(AgentError::ReservedPath(path.to_string()));
        }
        Ok(())
    }

    fn paid_route_config(&self, path: &str, pricing: Pricing) -> Result<PaidRouteConfig> {
        let pay_to = self.pay_to()?;

        let received = self.handle.clone();
        let agent_id = self.handle.agent_id().to_string();
        let hooks = PaymentHooks::default()
            .on_received(move |receipt: &PaymentReceipt| {
                received.record_payment(receipt.amount);
                info!(
                    agent_id = %received.agent_id(),
                    payer = %receipt.payer,
                    amount = %receipt.amount,
                    receipt_id = %receipt.id,
                    "Payment received"
                );
            })
            .on_failed(move |proof, error| {
                warn!(agent_id = %agent_id, payer = proof.payer(), error, "Payment rejected");
            });

        Ok(PaidRouteConfig::new(pricing, pay_to)
            .with_description(format!("{} {}", self.handle.profile().name, path))
            .with_hooks(hooks))
    }

    /// Register an ungated route
    pub fn route<H, T>(&mut self, path: &str, method: MethodFilter, handler: H) -> Result<&mut Self>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::check_path(path)?;
        let routes = std::mem::take(&mut self.routes);
        self.routes = routes.route(path, on(method, handler));
        debug!(agent_id = %self.handle.agent_id(), path, "Route registered");
        Ok(self)
    }

    /// Register a route that only runs after a valid payment. The payee is
    /// this agent's wallet, so the identity must be initialized first.
    pub fn paid_route<H, T>(
        &mut self,
        path: &str,
        method: MethodFilter,
        pricing: Pricing,
        handler: H,
    ) -> Result<&mut Self>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::check_path(path)?;
        let config = self.paid_route_config(path, pricing)?;
        let layer = meshwork_x402::PaymentLayer::new(self.gateway.clone(), config);
        let routes = std::mem::take(&mut self.routes);
        self.routes = routes.route(path, on(method, handler).layer(layer));
        debug!(agent_id = %self.handle.agent_id(), path, "Paid route registered");
        Ok(self)
    }

    /// Register a route that runs for everyone and tells the handler through
    /// `PaymentContext` whether the caller paid.
    pub fn optional_paid_route<H, T>(
        &mut self,
        path: &str,
        method: MethodFilter,
        pricing: Pricing,
        handler: H,
    ) -> Result<&mut Self>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::check_path(path)?;
        let config = self.paid_route_config(path, pricing)?;
        let layer = OptionalPaymentLayer::new(self.gateway.clone(), config);
        let routes = std::mem::take(&mut self.routes);
        self.routes = routes.route(path, on(method, handler).layer(layer));
        debug!(agent_id = %self.handle.agent_id(), path, "Optional paid route registered");
        Ok(self)
    }

    /// The complete app: standard surface, registered routes, request tracing
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/identity", get(identity))
            .route("/state", get(state))
            .route("/attestation", get(attestation))
            .with_state(self.handle.clone())
            .merge(self.routes.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Open a pending payment owed to this agent
    pub fn request_payment(&self, amount: TokenAmount, ttl: ChronoDuration) -> Result<Payment> {
        let token = self.gateway.config().asset.clone();
        let payment = self
            .ledger
            .request_payment(self.handle.agent_id(), amount, &token, ttl)?;
        self.handle.touch();
        Ok(payment)
    }

    /// Run `job` every `period` until shutdown
    pub fn spawn_periodic<F, Fut>(&mut self, name: impl Into<String>, period: Duration, job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(PeriodicTask::spawn(name, period, job));
    }

    /// Expire overdue ledger entries in the background and drop entries that
    /// have been final for longer than `retention`
    pub fn spawn_ledger_sweeper(&mut self, period: Duration, retention: ChronoDuration) {
        let ledger = self.ledger.clone();
        let name = format!("{}-ledger-sweeper", self.handle.agent_id());
        self.spawn_periodic(name, period, move || {
            let ledger = ledger.clone();
            async move {
                ledger.expire_overdue();
                ledger.prune_finalized(retention);
            }
        });
    }

    pub fn background_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn as_member(&self) -> SyndicateMember {
        let profile = self.handle.profile();
        let capabilities: Vec<&str> = profile.capabilities.iter().map(String::as_str).collect();
        SyndicateMember::new(
            profile.id.clone(),
            self.handle.state().reputation,
            &capabilities,
        )
    }

    /// Join a syndicate with this agent's capabilities and current reputation
    pub fn join_syndicate(&self, syndicate_id: &str) -> bool {
        let joined = self.syndicates.add_member(syndicate_id, self.as_member());
        if joined {
            self.handle.touch();
        }
        joined
    }

    /// Create a syndicate with this agent as its founder
    pub fn found_syndicate(&self, config: SyndicateConfig) -> bool {
        let founded = self.syndicates.found_syndicate(config, self.as_member());
        if founded {
            self.handle.touch();
        }
        founded
    }

    /// Report the outcome of a syndicate task. When this agent was the
    /// assignee its counters and reputation follow the syndicate's view.
    pub fn complete_syndicate_task(
        &self,
        syndicate_id: &str,
        task_id: &TaskId,
        outcome: TaskOutcome,
    ) -> Option<SyndicateTask> {
        let earnings = outcome.earnings.unwrap_or(TokenAmount::ZERO);
        let success = outcome.success;
        let task = self.syndicates.complete_task(syndicate_id, task_id, outcome)?;

        let mine = task
            .assignments
            .last()
            .map_or(false, |a| a.agent_id == self.handle.agent_id());
        if mine {
            if success {
                self.handle.record_task_completed(earnings);
            } else {
                self.handle.touch();
            }
            if let Some(member) = self.syndicates.member(syndicate_id, self.handle.agent_id()) {
                self.handle.set_reputation(member.reputation.score());
            }
        }
        Some(task)
    }

    /// Stop background work and close the stores
    pub async fn shutdown(&mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.stop().await;
        }
        self.handle.set_status(AgentStatus::Offline);
        self.ledger.close().await?;
        self.syndicates.store().close().await?;
        info!(agent_id = %self.handle.agent_id(), "Agent stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityResponse {
    id: String,
    name: String,
    #[serde(rename = "type")]
    agent_type: crate::profile::AgentType,
    capabilities: Vec<String>,
    address: String,
    public_key: String,
}

#[derive(Debug, Serialize)]
struct AttestationResponse {
    attested: bool,
    attestation: Attestation,
}

async fn health(State(agent): State<AgentHandle>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: agent.now(),
    })
}

async fn identity(State(agent): State<AgentHandle>) -> Response {
    let Some(identity) = agent.identity() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "identity not initialized" })),
        )
            .into_response();
    };
    let profile = agent.profile();
    Json(IdentityResponse {
        id: profile.id.clone(),
        name: profile.name.clone(),
        agent_type: profile.agent_type,
        capabilities: profile.capabilities.clone(),
        address: identity.owner_address,
        public_key: identity.public_key,
    })
    .into_response()
}

async fn state(State(agent): State<AgentHandle>) -> Json<AgentState> {
    Json(agent.state())
}

async fn attestation(State(agent): State<AgentHandle>) -> Json<AttestationResponse> {
    let attestation = agent.attestation();
    Json(AttestationResponse {
        attested: attestation.is_attested(),
        attestation,
    })
}
