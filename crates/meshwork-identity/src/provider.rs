//! Identity provider
//!
//! Builds the agent identity exactly once per process and dispatches signing to
//! whichever wallet won at startup.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::enclave::EnclaveClient;
use crate::signer::{EnclaveSigner, WalletSigner};
use crate::wallet::{LocalSigner, Wallet};
use crate::{IdentityError, Result};

/// Sentinel used when no enclave quote exists
pub const UNATTESTED: &str = "unattested";

/// Identity provider configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub agent_id: String,
    /// Salt mixed into the fallback wallet seed
    pub salt: String,
    /// Enclave derivation path; `{agent_id}` is substituted
    pub derivation_path: String,
    pub chain_id: u64,
}

impl IdentityConfig {
    pub fn new(agent_id: impl Into<String>, salt: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            salt: salt.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(IdentityError::InvalidConfig("agent id is empty".into()));
        }
        if self.agent_id.contains(':') {
            return Err(IdentityError::InvalidConfig(
                "agent id must not contain ':'".into(),
            ));
        }
        if self.salt.is_empty() {
            return Err(IdentityError::InvalidConfig("salt is empty".into()));
        }
        if self.salt.contains(':') || self.salt.chars().any(char::is_control) {
            return Err(IdentityError::InvalidConfig(
                "salt must not contain ':' or control characters".into(),
            ));
        }
        Ok(())
    }

    fn resolved_path(&self) -> String {
        self.derivation_path.replace("{agent_id}", &self.agent_id)
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            salt: String::new(),
            derivation_path: "meshwork/agent/{agent_id}".to_string(),
            chain_id: 8453,
        }
    }
}

/// Attestation evidence attached to an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attestation {
    /// Enclave quote, hex encoded
    Quote(String),
    Unattested,
}

impl Attestation {
    pub fn is_attested(&self) -> bool {
        matches!(self, Attestation::Quote(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Attestation::Quote(q) => q,
            Attestation::Unattested => UNATTESTED,
        }
    }
}

impl fmt::Display for Attestation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Attestation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Attestation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(if s == UNATTESTED {
            Attestation::Unattested
        } else {
            Attestation::Quote(s)
        })
    }
}

/// The agent's public identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub owner_address: String,
    pub public_key: String,
    pub attestation: Attestation,
}

struct ActiveIdentity {
    identity: Identity,
    signer: Arc<dyn WalletSigner>,
}

/// Per-agent identity provider
pub struct IdentityProvider {
    config: IdentityConfig,
    enclave: Option<Arc<dyn EnclaveClient>>,
    active: OnceCell<ActiveIdentity>,
}

impl IdentityProvider {
    pub fn new(config: IdentityConfig, enclave: Option<Arc<dyn EnclaveClient>>) -> Self {
        Self {
            config,
            enclave,
            active: OnceCell::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    /// Build the identity. Only the first call does any work; concurrent and
    /// later callers receive the same identity.
    pub async fn initialize(&self) -> Result<Identity> {
        let active = self.active.get_or_try_init(|| self.build()).await?;
        Ok(active.identity.clone())
    }

    async fn build(&self) -> Result<ActiveIdentity> {
        self.config.validate()?;

        if let Some(client) = &self.enclave {
            match self.connect_enclave(client.clone()).await {
                Ok(active) => {
                    info!(
                        agent_id = %self.config.agent_id,
                        address = %active.identity.owner_address,
                        "Identity initialized from secure enclave"
                    );
                    return Ok(active);
                }
                Err(e) => {
                    debug!(agent_id = %self.config.agent_id, error = %e, "Enclave unavailable");
                }
            }
        }

        let signer = LocalSigner::deterministic(&self.config.agent_id, &self.config.salt)?;
        let identity = identity_for(&self.config.agent_id, signer.wallet(), Attestation::Unattested);
        warn!(
            agent_id = %self.config.agent_id,
            address = %identity.owner_address,
            "Secure enclave not available, using deterministic development wallet (unattested)"
        );

        Ok(ActiveIdentity {
            identity,
            signer: Arc::new(signer),
        })
    }

    async fn connect_enclave(&self, client: Arc<dyn EnclaveClient>) -> Result<ActiveIdentity> {
        let wallet: Wallet = client.derive_wallet(&self.config.resolved_path()).await?.into();
        let quote = client.attestation().await?;
        let identity = identity_for(&self.config.agent_id, &wallet, Attestation::Quote(quote));
        let signer = EnclaveSigner::new(client, wallet, self.config.chain_id);
        Ok(ActiveIdentity {
            identity,
            signer: Arc::new(signer),
        })
    }

    /// Sign with the active wallet
    pub async fn sign(&self, message: &[u8]) -> Result<String> {
        let active = self.active.get().ok_or(IdentityError::NotInitialized)?;
        active.signer.sign(message).await
    }

    pub fn identity(&self) -> Option<Identity> {
        self.active.get().map(|a| a.identity.clone())
    }

    /// Attestation for the active identity; unattested before initialization
    pub fn attestation(&self) -> Attestation {
        self.active
            .get()
            .map(|a| a.identity.attestation.clone())
            .unwrap_or(Attestation::Unattested)
    }

    pub fn is_attested(&self) -> bool {
        self.attestation().is_attested()
    }
}

fn identity_for(agent_id: &str, wallet: &Wallet, attestation: Attestation) -> Identity {
    Identity {
        id: agent_id.to_string(),
        owner_address: wallet.address.to_string(),
        public_key: wallet.public_key.clone(),
        attestation,
    }
}
