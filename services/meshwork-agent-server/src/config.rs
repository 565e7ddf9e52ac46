//! Server Configuration
//!
//! Layered configuration for the agent server: optional file, `config/default`,
//! `config/local`, then `MESHWORK__SECTION__KEY` environment variables. CLI
//! arguments are applied on top by `main`.

use anyhow::Context;
use meshwork_agent::{AgentType, InferenceConfig};
use meshwork_identity::IdentityConfig;
use meshwork_types::{parse_units, TokenAmount};
use meshwork_x402::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

const MAX_LEDGER_TTL_SECS: u64 = 365 * 24 * 3600;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub identity: IdentitySettings,

    #[serde(default)]
    pub payments: PaymentSettings,

    #[serde(default)]
    pub inference: InferenceSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server binding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on stopping background work after the listener closes
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Who this agent is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_agent_id")]
    pub id: String,

    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default = "default_agent_type", rename = "type")]
    pub agent_type: AgentType,

    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            name: default_agent_name(),
            agent_type: default_agent_type(),
            capabilities: default_capabilities(),
        }
    }
}

/// Identity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    /// Salt for the development wallet; required
    #[serde(default)]
    pub salt: String,

    /// Enclave sidecar base URL; unset means fallback only
    #[serde(default)]
    pub enclave_endpoint: Option<String>,

    #[serde(default = "default_enclave_timeout")]
    pub enclave_timeout_ms: u64,

    #[serde(default = "default_derivation_path")]
    pub derivation_path: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            salt: String::new(),
            enclave_endpoint: None,
            enclave_timeout_ms: default_enclave_timeout(),
            derivation_path: default_derivation_path(),
            chain_id: default_chain_id(),
        }
    }
}

impl IdentitySettings {
    pub fn identity_config(&self, agent_id: &str) -> IdentityConfig {
        IdentityConfig {
            agent_id: agent_id.to_string(),
            salt: self.salt.clone(),
            derivation_path: self.derivation_path.clone(),
            chain_id: self.chain_id,
        }
    }

    pub fn enclave_timeout(&self) -> Duration {
        Duration::from_millis(self.enclave_timeout_ms)
    }
}

/// x402 settings. Prices are decimal strings in whole tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_asset")]
    pub asset: String,

    #[serde(default = "default_decimals")]
    pub decimals: u8,

    #[serde(default = "default_payment_timeout")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_fallback_price")]
    pub fallback_price: String,

    /// Price of a contract audit
    #[serde(default = "default_audit_price")]
    pub audit_price: String,

    /// Price of the premium threat feed
    #[serde(default = "default_threat_feed_price")]
    pub threat_feed_price: String,

    /// Lifetime of pending ledger entries
    #[serde(default = "default_ledger_ttl")]
    pub ledger_ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long finalized ledger entries are kept before pruning
    #[serde(default = "default_ledger_retention")]
    pub ledger_retention_secs: u64,

    /// Upper bound on ledger entries held at once
    #[serde(default = "default_max_ledger_entries")]
    pub max_ledger_entries: usize,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            network: default_network(),
            asset: default_asset(),
            decimals: default_decimals(),
            default_timeout_secs: default_payment_timeout(),
            fallback_price: default_fallback_price(),
            audit_price: default_audit_price(),
            threat_feed_price: default_threat_feed_price(),
            ledger_ttl_secs: default_ledger_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            ledger_retention_secs: default_ledger_retention(),
            max_ledger_entries: default_max_ledger_entries(),
        }
    }
}

impl PaymentSettings {
    pub fn amount(&self, text: &str) -> anyhow::Result<TokenAmount> {
        parse_units(text, self.decimals).with_context(|| format!("invalid price {:?}", text))
    }

    pub fn gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        Ok(GatewayConfig {
            network: self.network.clone(),
            asset: self.asset.clone(),
            decimals: self.decimals,
            default_timeout_seconds: self.default_timeout_secs,
            fallback_price: self.amount(&self.fallback_price)?,
        })
    }

    /// Between one second and one year
    pub fn ledger_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ledger_ttl_secs.clamp(1, MAX_LEDGER_TTL_SECS) as i64)
    }

    pub fn ledger_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ledger_retention_secs.min(MAX_LEDGER_TTL_SECS) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Inference backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// OpenAI-compatible server; unset disables inference
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_model(),
            api_key: None,
            timeout_secs: default_inference_timeout(),
        }
    }
}

impl InferenceSettings {
    pub fn backend_config(&self) -> Option<InferenceConfig> {
        let base_url = self.base_url.as_ref().filter(|u| !u.trim().is_empty())?;
        Some(InferenceConfig {
            base_url: base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4021
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_agent_id() -> String {
    "security-agent-1".to_string()
}

fn default_agent_name() -> String {
    "Sentinel".to_string()
}

fn default_agent_type() -> AgentType {
    AgentType::Security
}

fn default_capabilities() -> Vec<String> {
    vec![
        "smart-contract-audit".to_string(),
        "threat-detection".to_string(),
    ]
}

fn default_enclave_timeout() -> u64 {
    2_000
}

fn default_derivation_path() -> String {
    "meshwork/agent/{agent_id}".to_string()
}

fn default_chain_id() -> u64 {
    8453
}

fn default_network() -> String {
    GatewayConfig::default().network
}

fn default_asset() -> String {
    GatewayConfig::default().asset
}

fn default_decimals() -> u8 {
    6
}

fn default_payment_timeout() -> u64 {
    300
}

fn default_fallback_price() -> String {
    "0.01".to_string()
}

fn default_audit_price() -> String {
    "0.50".to_string()
}

fn default_threat_feed_price() -> String {
    "0.01".to_string()
}

fn default_ledger_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_ledger_retention() -> u64 {
    3600
}

fn default_max_ledger_entries() -> usize {
    10_000
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_inference_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl ServerConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("MESHWORK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build().context("failed to read configuration")?;
        config
            .try_deserialize()
            .context("failed to parse configuration")
    }

    /// Configuration for local development
    pub fn development() -> Self {
        let mut config = Self::default();
        config.identity.salt = "meshwork-dev-salt".to_string();
        config.logging.level = "debug".to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 4021);
        assert_eq!(config.agent.agent_type, AgentType::Security);
        assert!(config.identity.salt.is_empty());
        assert!(config.inference.backend_config().is_none());
        assert_eq!(
            config.server.socket_addr().unwrap(),
            "0.0.0.0:4021".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn prices_parse_with_configured_decimals() {
        let payments = PaymentSettings::default();
        let gateway = payments.gateway_config().unwrap();
        assert_eq!(gateway.fallback_price, TokenAmount(10_000));
        assert_eq!(payments.amount(&payments.audit_price).unwrap(), TokenAmount(500_000));
        assert!(payments.amount("0.0000001").is_err());
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: ServerConfig = serde_json::from_value(serde_json::json!({
            "agent": { "id": "gov-7", "type": "governance" },
            "identity": { "salt": "pepper" },
            "inference": { "base_url": "http://localhost:8000" }
        }))
        .unwrap();
        assert_eq!(config.agent.id, "gov-7");
        assert_eq!(config.agent.agent_type, AgentType::Governance);
        assert_eq!(config.agent.name, "Sentinel");
        assert_eq!(config.identity.chain_id, 8453);
        assert_eq!(config.identity.identity_config("gov-7").salt, "pepper");
        assert_eq!(
            config.inference.backend_config().unwrap().model,
            "llama3.1:8b"
        );
    }

    #[test]
    fn blank_inference_url_disables_backend() {
        let mut settings = InferenceSettings::default();
        settings.base_url = Some("  ".to_string());
        assert!(settings.backend_config().is_none());
    }

    #[test]
    fn bad_bind_address_is_an_error() {
        let settings = ServerSettings {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(settings.socket_addr().is_err());
    }
}
