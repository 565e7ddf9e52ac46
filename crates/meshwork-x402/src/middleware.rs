//! Payment middleware for Axum
//!
//! `PaymentLayer` gates a route: unpaid requests never reach the handler.
//! `OptionalPaymentLayer` lets every request through and tells the handler
//! whether it was paid for through the `PaymentContext` extension.

use axum::{
    extract::Request,
    http::{header::CONTENT_LENGTH, request::Parts, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use meshwork_types::X402_VERSION;
use serde_json::json;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::gateway::PaymentGateway;
use crate::pricing::{Pricing, RequestInfo};
use crate::types::{
    PaymentChallenge, PaymentProof, PaymentReceipt, PaymentRequired, PAYMENT_HEADER,
    PAYMENT_RESPONSE_HEADER, VERSION_HEADER,
};

type ReceivedHook = Arc<dyn Fn(&PaymentReceipt) + Send + Sync>;
type FailedHook = Arc<dyn Fn(&PaymentProof, &str) + Send + Sync>;

/// Callbacks fired once per verified or rejected proof
#[derive(Clone, Default)]
pub struct PaymentHooks {
    on_payment_received: Option<ReceivedHook>,
    on_payment_failed: Option<FailedHook>,
}

impl PaymentHooks {
    pub fn on_received<F>(mut self, f: F) -> Self
    where
        F: Fn(&PaymentReceipt) + Send + Sync + 'static,
    {
        self.on_payment_received = Some(Arc::new(f));
        self
    }

    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&PaymentProof, &str) + Send + Sync + 'static,
    {
        self.on_payment_failed = Some(Arc::new(f));
        self
    }

    fn received(&self, receipt: &PaymentReceipt) {
        if let Some(hook) = &self.on_payment_received {
            hook(receipt);
        }
    }

    fn failed(&self, proof: &PaymentProof, error: &str) {
        if let Some(hook) = &self.on_payment_failed {
            hook(proof, error);
        }
    }
}

impl std::fmt::Debug for PaymentHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentHooks")
            .field("on_payment_received", &self.on_payment_received.is_some())
            .field("on_payment_failed", &self.on_payment_failed.is_some())
            .finish()
    }
}

/// Terms of a paid route
#[derive(Debug, Clone)]
pub struct PaidRouteConfig {
    pub pricing: Pricing,
    pub pay_to: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub hooks: PaymentHooks,
}

impl PaidRouteConfig {
    pub fn new(pricing: Pricing, pay_to: impl Into<String>) -> Self {
        Self {
            pricing,
            pay_to: pay_to.into(),
            description: None,
            mime_type: None,
            timeout_seconds: None,
            hooks: PaymentHooks::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_hooks(mut self, hooks: PaymentHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Payment state visible to handlers via `Extension<PaymentContext>`
#[derive(Debug, Clone, Default)]
pub struct PaymentContext {
    pub paid: bool,
    pub proof: Option<PaymentProof>,
    pub receipt: Option<PaymentReceipt>,
}

enum Outcome {
    Missing(PaymentChallenge),
    Malformed(String),
    Rejected {
        challenge: PaymentChallenge,
        proof: PaymentProof,
        error: String,
    },
    Accepted {
        proof: PaymentProof,
        receipt: PaymentReceipt,
    },
}

fn request_info(parts: &Parts) -> RequestInfo {
    RequestInfo {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        content_length: parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
    }
}

fn challenge_for(
    gateway: &PaymentGateway,
    route: &PaidRouteConfig,
    info: &RequestInfo,
) -> PaymentChallenge {
    let amount = gateway.price(&route.pricing, info);
    let mut challenge = gateway.create_challenge(
        &info.path,
        amount,
        &route.pay_to,
        route.description.as_deref(),
        route.timeout_seconds,
    );
    if let Some(mime) = &route.mime_type {
        challenge.mime_type = mime.clone();
    }
    challenge
}

/// Inspect the request's payment header and verify any proof it carries
async fn evaluate(gateway: &PaymentGateway, route: &PaidRouteConfig, parts: &Parts) -> Outcome {
    let info = request_info(parts);

    let Some(header) = parts.headers.get(PAYMENT_HEADER) else {
        return Outcome::Missing(challenge_for(gateway, route, &info));
    };

    let proof = match header
        .to_str()
        .map_err(|e| e.to_string())
        .and_then(|v| PaymentProof::from_header(v).map_err(|e| e.to_string()))
    {
        Ok(proof) => proof,
        Err(e) => return Outcome::Malformed(e),
    };

    let challenge = challenge_for(gateway, route, &info);
    let verification = gateway.verify_against(&proof, &challenge).await;
    match (verification.valid, verification.receipt) {
        (true, Some(receipt)) => Outcome::Accepted { proof, receipt },
        _ => Outcome::Rejected {
            challenge,
            proof,
            error: verification
                .error
                .unwrap_or_else(|| "Payment verification failed".to_string()),
        },
    }
}

fn payment_required(challenge: PaymentChallenge, error: Option<String>) -> Response {
    let body = PaymentRequired {
        x402_version: X402_VERSION,
        accepts: vec![challenge],
        error,
    };
    (
        StatusCode::PAYMENT_REQUIRED,
        [(VERSION_HEADER, X402_VERSION.to_string())],
        Json(body),
    )
        .into_response()
}

fn malformed_proof() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid payment proof format" })),
    )
        .into_response()
}

fn attach_receipt(response: &mut Response, receipt: &PaymentReceipt) {
    match receipt.to_header().map(HeaderValue::try_from) {
        Ok(Ok(value)) => {
            response
                .headers_mut()
                .insert(HeaderName::from_static(PAYMENT_RESPONSE_HEADER), value);
        }
        _ => warn!(receipt_id = %receipt.id, "Could not encode payment receipt header"),
    }
}

// ============================================================================
// Required payment
// ============================================================================

/// Layer that requires payment before the wrapped service runs
#[derive(Clone)]
pub struct PaymentLayer {
    gateway: Arc<PaymentGateway>,
    route: Arc<PaidRouteConfig>,
}

impl PaymentLayer {
    pub fn new(gateway: Arc<PaymentGateway>, route: PaidRouteConfig) -> Self {
        Self {
            gateway,
            route: Arc::new(route),
        }
    }
}

impl<S> Layer<S> for PaymentLayer {
    type Service = PaymentMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentMiddleware {
            inner,
            gateway: self.gateway.clone(),
            route: self.route.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PaymentMiddleware<S> {
    inner: S,
    gateway: Arc<PaymentGateway>,
    route: Arc<PaidRouteConfig>,
}

impl<S> Service<Request> for PaymentMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gateway = self.gateway.clone();
        let route = self.route.clone();
        // take the service that was polled ready, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            match evaluate(&gateway, &route, &parts).await {
                Outcome::Missing(challenge) => Ok(payment_required(challenge, None)),
                Outcome::Malformed(e) => {
                    debug!(path = %parts.uri.path(), error = %e, "Malformed payment header");
                    Ok(malformed_proof())
                }
                Outcome::Rejected {
                    challenge,
                    proof,
                    error,
                } => {
                    route.hooks.failed(&proof, &error);
                    Ok(payment_required(challenge, Some(error)))
                }
                Outcome::Accepted { proof, receipt } => {
                    route.hooks.received(&receipt);

                    parts.extensions.insert(PaymentContext {
                        paid: true,
                        proof: Some(proof),
                        receipt: Some(receipt.clone()),
                    });
                    let mut response = inner.call(Request::from_parts(parts, body)).await?;
                    attach_receipt(&mut response, &receipt);
                    Ok(response)
                }
            }
        })
    }
}

// ============================================================================
// Optional payment
// ============================================================================

/// Layer that records payment when present but never blocks
#[derive(Clone)]
pub struct OptionalPaymentLayer {
    gateway: Arc<PaymentGateway>,
    route: Arc<PaidRouteConfig>,
}

impl OptionalPaymentLayer {
    pub fn new(gateway: Arc<PaymentGateway>, route: PaidRouteConfig) -> Self {
        Self {
            gateway,
            route: Arc::new(route),
        }
    }
}

impl<S> Layer<S> for OptionalPaymentLayer {
    type Service = OptionalPaymentMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OptionalPaymentMiddleware {
            inner,
            gateway: self.gateway.clone(),
            route: self.route.clone(),
        }
    }
}

#[derive(Clone)]
pub struct OptionalPaymentMiddleware<S> {
    inner: S,
    gateway: Arc<PaymentGateway>,
    route: Arc<PaidRouteConfig>,
}

impl<S> Service<Request> for OptionalPaymentMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gateway = self.gateway.clone();
        let route = self.route.clone();
        // take the service that was polled ready, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let context = match evaluate(&gateway, &route, &parts).await {
                Outcome::Accepted { proof, receipt } => {
                    route.hooks.received(&receipt);
                    PaymentContext {
                        paid: true,
                        proof: Some(proof),
                        receipt: Some(receipt),
                    }
                }
                Outcome::Rejected { proof, error, .. } => {
                    debug!(nonce = %proof.nonce(), error = %error, "Optional payment rejected");
                    PaymentContext {
                        paid: false,
                        proof: Some(proof),
                        receipt: None,
                    }
                }
                Outcome::Malformed(e) => {
                    debug!(error = %e, "Optional payment header malformed");
                    PaymentContext::default()
                }
                Outcome::Missing(_) => PaymentContext::default(),
            };

            let receipt = context.receipt.clone();
            parts.extensions.insert(context);
            let mut response = inner.call(Request::from_parts(parts, body)).await?;
            if let Some(receipt) = receipt {
                attach_receipt(&mut response, &receipt);
            }
            Ok(response)
        })
    }
}
