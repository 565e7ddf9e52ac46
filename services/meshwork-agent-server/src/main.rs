//! Meshwork Agent Server
//!
//! Runs one Meshwork agent: identity bootstrap, paid x402 routes, syndicate
//! membership and background ledger maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Development wallet (no enclave)
//! meshwork-agent-server --salt dev-salt
//!
//! # Enclave-backed identity
//! meshwork-agent-server --enclave-endpoint http://127.0.0.1:8090
//!
//! # Environment overrides
//! MESHWORK__SERVER__PORT=8080 MESHWORK__IDENTITY__SALT=s meshwork-agent-server
//! ```
//!
//! An invalid identity configuration is fatal: the process logs the error and
//! exits non-zero before binding the port.

mod config;
mod security;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meshwork_agent::{AgentProfile, AgentRuntime, HttpInferenceBackend};
use meshwork_identity::{EnclaveClient, HttpEnclaveClient, IdentityProvider};
use meshwork_syndicate::{SyndicateEvents, SyndicateManager, SyndicateStore};
use meshwork_x402::{PaymentGateway, PaymentLedger};

use crate::config::ServerConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Meshwork agent server
#[derive(Parser, Debug)]
#[command(name = "meshwork-agent-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "MESHWORK_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "MESHWORK_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MESHWORK_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MESHWORK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "MESHWORK_LOG_FORMAT")]
    log_format: Option<String>,

    /// Salt for the development wallet
    #[arg(long, env = "MESHWORK_IDENTITY_SALT")]
    salt: Option<String>,

    /// Secure enclave sidecar URL
    #[arg(long, env = "MESHWORK_ENCLAVE_ENDPOINT")]
    enclave_endpoint: Option<String>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(salt) = self.salt {
            config.identity.salt = salt;
        }
        if let Some(endpoint) = self.enclave_endpoint {
            config.identity.enclave_endpoint = Some(endpoint);
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut server_config);

    init_logging(&server_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        agent_id = %server_config.agent.id,
        "Starting Meshwork agent server"
    );

    let mut runtime = build_runtime(&server_config)?;

    if let Err(e) = runtime.initialize().await {
        tracing::error!(error = %e, "Agent initialization failed");
        return Err(e.into());
    }

    let payments = &server_config.payments;
    security::register(&mut runtime, security_pricing(payments)?)?;
    runtime.spawn_ledger_sweeper(payments.sweep_interval(), payments.ledger_retention());

    let app = runtime.router();
    let addr = server_config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(
        host = %server_config.server.host,
        port = %server_config.server.port,
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let timeout = server_config.server.shutdown_timeout();
    match tokio::time::timeout(timeout, runtime.shutdown()).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!(
            timeout_secs = timeout.as_secs(),
            "Background work did not stop in time"
        ),
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging. `RUST_LOG` wins over the configured level.
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log level {:?}", config.level))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .try_init()?;
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .try_init()?;
        }
    }

    Ok(())
}

fn security_pricing(payments: &config::PaymentSettings) -> anyhow::Result<security::SecurityPricing> {
    Ok(security::SecurityPricing {
        audit: payments.amount(&payments.audit_price)?,
        threat_feed: payments.amount(&payments.threat_feed_price)?,
        quote_ttl: payments.ledger_ttl(),
    })
}

/// Wire identity, payments, syndicates and inference into a runtime
fn build_runtime(config: &ServerConfig) -> anyhow::Result<AgentRuntime> {
    let enclave: Option<Arc<dyn EnclaveClient>> = match &config.identity.enclave_endpoint {
        Some(url) if !url.trim().is_empty() => {
            tracing::info!(endpoint = %url, "Using secure enclave");
            Some(Arc::new(HttpEnclaveClient::new(
                url.as_str(),
                config.identity.enclave_timeout(),
            )?))
        }
        _ => None,
    };
    let identity = Arc::new(IdentityProvider::new(
        config.identity.identity_config(&config.agent.id),
        enclave,
    ));

    let gateway = Arc::new(PaymentGateway::new(config.payments.gateway_config()?));
    let ledger = Arc::new(PaymentLedger::new().with_max_entries(config.payments.max_ledger_entries));
    let syndicates = Arc::new(SyndicateManager::new(
        Arc::new(SyndicateStore::new()),
        Arc::new(SyndicateEvents::new()),
    ));

    let mut profile = AgentProfile::new(&config.agent.id, &config.agent.name, config.agent.agent_type);
    profile.capabilities = config.agent.capabilities.clone();

    let mut runtime = AgentRuntime::new(profile, identity, gateway, ledger, syndicates);
    if let Some(backend) = config.inference.backend_config() {
        tracing::info!(base_url = %backend.base_url, model = %backend.model, "Inference backend configured");
        runtime = runtime.with_inference(Arc::new(HttpInferenceBackend::new(backend)?));
    }
    Ok(runtime)
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from([
            "meshwork-agent-server",
            "--port",
            "8080",
            "--salt",
            "pepper",
            "--log-format",
            "json",
        ]);
        assert_eq!(args.port, Some(8080));

        let mut config = ServerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.identity.salt, "pepper");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert!(config.identity.enclave_endpoint.is_none());
    }

    #[tokio::test]
    async fn missing_salt_is_fatal() {
        let runtime = build_runtime(&ServerConfig::default()).unwrap();
        assert!(matches!(
            runtime.initialize().await,
            Err(meshwork_agent::AgentError::Identity(
                meshwork_identity::IdentityError::InvalidConfig(_)
            ))
        ));
    }

    #[tokio::test]
    async fn development_agent_serves_security_routes() {
        let mut runtime = build_runtime(&ServerConfig::development()).unwrap();
        runtime.initialize().await.unwrap();

        let pricing = security_pricing(&crate::config::PaymentSettings::default()).unwrap();
        security::register(&mut runtime, pricing).unwrap();

        let unpaid = runtime
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/audit")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"contractAddress":"0xabc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unpaid.status(), StatusCode::PAYMENT_REQUIRED);

        let feed = runtime
            .router()
            .oneshot(Request::builder().uri("/threats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(feed.status(), StatusCode::OK);

        let quote = runtime
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/quote")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(quote.status(), StatusCode::OK);
        assert_eq!(runtime.ledger().pending().len(), 1);

        let member = runtime
            .syndicates()
            .member(security::SYNDICATE_ID, "security-agent-1")
            .unwrap();
        assert_eq!(member.role, meshwork_syndicate::MemberRole::Founder);

        runtime.shutdown().await.unwrap();
    }
}
