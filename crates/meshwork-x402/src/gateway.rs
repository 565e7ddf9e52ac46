//! Payment gateway
//!
//! Issues challenges and verifies proofs. A proof moves through
//! `ProofPresented → Valid → ReceiptIssued` or `ProofPresented → Invalid`; the
//! middleware turns an invalid proof back into a challenge carrying the reason.
//!
//! Proof signatures are not verified cryptographically here. That is the job of
//! an optional `SettlementFacilitator`.

use async_trait::async_trait;
use meshwork_types::{ReceiptId, SharedClock, SystemClock, TokenAmount, X402_VERSION};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::X402Error;
use crate::pricing::{Pricing, RequestInfo};
use crate::types::{PaymentChallenge, PaymentProof, PaymentReceipt, ReceiptStatus, SCHEME_EXACT};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub network: String,
    /// Token contract address
    pub asset: String,
    pub decimals: u8,
    pub default_timeout_seconds: u64,
    /// Price used when a dynamic price cannot be computed
    pub fallback_price: TokenAmount,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            network: "base-sepolia".to_string(),
            // USDC on Base Sepolia
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            decimals: 6,
            default_timeout_seconds: 300,
            fallback_price: TokenAmount(10_000),
        }
    }
}

/// Why a proof was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Invalid proof version or scheme")]
    InvalidVersionOrScheme,

    #[error("Network mismatch")]
    NetworkMismatch,

    #[error("Payment recipient mismatch")]
    RecipientMismatch,

    #[error("Insufficient payment amount")]
    InsufficientAmount,

    #[error("Payment not yet valid")]
    NotYetValid,

    #[error("Payment expired")]
    Expired,

    #[error("Payment nonce already used")]
    NonceReused,

    #[error("{0}")]
    SettlementRejected(String),

    #[error("Settlement facilitator unavailable")]
    FacilitatorUnavailable,
}

/// Outcome of verifying a proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PaymentReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub rejection: Option<Rejection>,
}

impl Verification {
    fn accepted(receipt: PaymentReceipt) -> Self {
        Self {
            valid: true,
            receipt: Some(receipt),
            error: None,
            rejection: None,
        }
    }

    fn rejected(rejection: Rejection) -> Self {
        Self {
            valid: false,
            receipt: None,
            error: Some(rejection.to_string()),
            rejection: Some(rejection),
        }
    }
}

/// Facilitator verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Accepted { transaction_hash: Option<String> },
    Rejected { reason: String },
}

/// External service that checks signatures and settles payments on-chain
#[async_trait]
pub trait SettlementFacilitator: Send + Sync {
    async fn verify(&self, proof: &PaymentProof, resource: &str)
        -> Result<Settlement, X402Error>;
}

/// x402 payment gateway
pub struct PaymentGateway {
    config: GatewayConfig,
    clock: SharedClock,
    facilitator: Option<Arc<dyn SettlementFacilitator>>,
    used_nonces: Mutex<HashSet<String>>,
}

impl PaymentGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            clock: SystemClock::shared(),
            facilitator: None,
            used_nonces: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_facilitator(mut self, facilitator: Arc<dyn SettlementFacilitator>) -> Self {
        self.facilitator = Some(facilitator);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Price for a request, falling back to the configured price
    pub fn price(&self, pricing: &Pricing, request: &RequestInfo) -> TokenAmount {
        pricing.resolve(request, self.config.fallback_price)
    }

    pub fn create_challenge(
        &self,
        resource: &str,
        amount: TokenAmount,
        pay_to: &str,
        description: Option<&str>,
        timeout_seconds: Option<u64>,
    ) -> PaymentChallenge {
        PaymentChallenge {
            scheme: SCHEME_EXACT.to_string(),
            network: self.config.network.clone(),
            max_amount_required: amount,
            resource: resource.to_string(),
            description: description
                .map(str::to_string)
                .unwrap_or_else(|| format!("Access to {}", resource)),
            mime_type: "application/json".to_string(),
            pay_to: pay_to.to_string(),
            max_timeout_seconds: timeout_seconds.unwrap_or(self.config.default_timeout_seconds),
            asset: self.config.asset.clone(),
        }
    }

    /// Verify a proof on its own: version, time window, replay, facilitator.
    pub async fn verify_proof(&self, proof: &PaymentProof, expected_resource: &str) -> Verification {
        if let Err(rejection) = self.check_structure(proof) {
            return self.reject(proof, rejection);
        }
        self.settle(proof, expected_resource).await
    }

    /// Verify a proof against the challenge it answers.
    ///
    /// In addition to `verify_proof`, the authorization must pay the challenge's
    /// recipient on the challenge's network at least the required amount.
    pub async fn verify_against(
        &self,
        proof: &PaymentProof,
        challenge: &PaymentChallenge,
    ) -> Verification {
        if let Err(rejection) = self
            .check_structure(proof)
            .and_then(|_| check_terms(proof, challenge))
        {
            return self.reject(proof, rejection);
        }
        self.settle(proof, &challenge.resource).await
    }

    /// Number of nonces consumed so far
    pub fn nonces_used(&self) -> usize {
        self.used_nonces.lock().len()
    }

    fn check_structure(&self, proof: &PaymentProof) -> Result<(), Rejection> {
        if proof.x402_version != X402_VERSION || proof.scheme != SCHEME_EXACT {
            return Err(Rejection::InvalidVersionOrScheme);
        }
        Ok(())
    }

    async fn settle(&self, proof: &PaymentProof, resource: &str) -> Verification {
        let auth = &proof.payload.authorization;
        let now = self.clock.unix_seconds();
        if now < auth.valid_after {
            return self.reject(proof, Rejection::NotYetValid);
        }
        if now > auth.valid_before {
            return self.reject(proof, Rejection::Expired);
        }
        if self.used_nonces.lock().contains(&auth.nonce) {
            return self.reject(proof, Rejection::NonceReused);
        }

        let mut transaction_hash = None;
        if let Some(facilitator) = &self.facilitator {
            match facilitator.verify(proof, resource).await {
                Ok(Settlement::Accepted { transaction_hash: tx }) => transaction_hash = tx,
                Ok(Settlement::Rejected { reason }) => {
                    return self.reject(proof, Rejection::SettlementRejected(reason))
                }
                Err(e) => {
                    debug!(error = %e, "Facilitator call failed");
                    return self.reject(proof, Rejection::FacilitatorUnavailable);
                }
            }
        }

        // a concurrent request may have consumed the nonce while we awaited
        if !self.used_nonces.lock().insert(auth.nonce.clone()) {
            return self.reject(proof, Rejection::NonceReused);
        }

        let receipt = PaymentReceipt {
            id: ReceiptId::new(),
            payment_id: auth.nonce.clone(),
            status: ReceiptStatus::Confirmed,
            confirmed_at: self.clock.now(),
            transaction_hash: transaction_hash
                .unwrap_or_else(|| synthetic_tx_hash(&proof.payload.signature, &auth.nonce)),
            payer: auth.from.clone(),
            amount: auth.value,
            network: proof.network.clone(),
        };

        info!(
            nonce = %auth.nonce,
            payer = %auth.from,
            amount = %auth.value,
            resource = %resource,
            "Payment accepted"
        );
        Verification::accepted(receipt)
    }

    fn reject(&self, proof: &PaymentProof, rejection: Rejection) -> Verification {
        debug!(nonce = %proof.nonce(), reason = %rejection, "Payment proof rejected");
        Verification::rejected(rejection)
    }
}

fn check_terms(proof: &PaymentProof, challenge: &PaymentChallenge) -> Result<(), Rejection> {
    let auth = &proof.payload.authorization;
    if proof.network != challenge.network {
        return Err(Rejection::NetworkMismatch);
    }
    if !auth.to.eq_ignore_ascii_case(&challenge.pay_to) {
        return Err(Rejection::RecipientMismatch);
    }
    if auth.value < challenge.max_amount_required {
        return Err(Rejection::InsufficientAmount);
    }
    Ok(())
}

/// `0x` + keccak256(signature ‖ nonce)
fn synthetic_tx_hash(signature: &str, nonce: &str) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    hasher.update(nonce.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Authorization, ProofPayload};
    use meshwork_types::ManualClock;

    const NOW: i64 = 1_700_000_000;
    const PAYEE: &str = "0xAbC0000000000000000000000000000000000001";

    fn gateway() -> PaymentGateway {
        PaymentGateway::new(GatewayConfig::default()).with_clock(Arc::new(ManualClock::at_unix(NOW)))
    }

    fn proof(nonce: &str, value: u128) -> PaymentProof {
        PaymentProof {
            x402_version: 1,
            scheme: "exact".into(),
            network: "base-sepolia".into(),
            payload: ProofPayload {
                signature: "0xdeadbeef".into(),
                authorization: Authorization {
                    from: "0xpayer".into(),
                    to: PAYEE.to_lowercase(),
                    value: TokenAmount(value),
                    valid_after: NOW - 10,
                    valid_before: NOW + 300,
                    nonce: nonce.into(),
                },
            },
        }
    }

    struct StaticFacilitator(Result<Settlement, X402Error>);

    #[async_trait]
    impl SettlementFacilitator for StaticFacilitator {
        async fn verify(&self, _: &PaymentProof, _: &str) -> Result<Settlement, X402Error> {
            self.0.clone()
        }
    }

    #[test]
    fn challenge_uses_config_defaults() {
        let gw = gateway();
        let c = gw.create_challenge("/audit", TokenAmount(10_000), PAYEE, None, None);
        assert_eq!(c.scheme, "exact");
        assert_eq!(c.network, "base-sepolia");
        assert_eq!(c.max_timeout_seconds, 300);
        assert_eq!(c.description, "Access to /audit");
        assert_eq!(c.mime_type, "application/json");
    }

    #[tokio::test]
    async fn valid_proof_yields_receipt() {
        let gw = gateway();
        let p = proof("0x01", 10_000);
        let v = gw.verify_proof(&p, "/audit").await;
        assert!(v.valid);
        let receipt = v.receipt.unwrap();
        assert_eq!(receipt.payment_id, "0x01");
        assert_eq!(receipt.status, ReceiptStatus::Confirmed);
        assert_eq!(receipt.transaction_hash, synthetic_tx_hash("0xdeadbeef", "0x01"));
        assert_eq!(receipt.transaction_hash.len(), 66);
        assert_eq!(receipt.confirmed_at.timestamp(), NOW);
    }

    #[tokio::test]
    async fn wrong_version_or_scheme_rejected() {
        let gw = gateway();
        let mut p = proof("0x02", 1);
        p.x402_version = 2;
        let v = gw.verify_proof(&p, "/audit").await;
        assert_eq!(v.error.as_deref(), Some("Invalid proof version or scheme"));

        let mut p = proof("0x03", 1);
        p.scheme = "upto".into();
        let v = gw.verify_proof(&p, "/audit").await;
        assert_eq!(v.rejection, Some(Rejection::InvalidVersionOrScheme));
    }

    #[tokio::test]
    async fn window_is_enforced() {
        let gw = gateway();
        let mut early = proof("0x04", 1);
        early.payload.authorization.valid_after = NOW + 5;
        assert_eq!(
            gw.verify_proof(&early, "/x").await.error.as_deref(),
            Some("Payment not yet valid")
        );

        let mut late = proof("0x05", 1);
        late.payload.authorization.valid_before = NOW - 1;
        assert_eq!(
            gw.verify_proof(&late, "/x").await.error.as_deref(),
            Some("Payment expired")
        );

        // boundaries are inclusive
        let mut edge = proof("0x06", 1);
        edge.payload.authorization.valid_after = NOW;
        edge.payload.authorization.valid_before = NOW;
        assert!(gw.verify_proof(&edge, "/x").await.valid);
    }

    #[tokio::test]
    async fn nonce_replay_rejected() {
        let gw = gateway();
        let p = proof("0x07", 1);
        assert!(gw.verify_proof(&p, "/x").await.valid);
        let again = gw.verify_proof(&p, "/x").await;
        assert_eq!(again.error.as_deref(), Some("Payment nonce already used"));
        assert_eq!(gw.nonces_used(), 1);
    }

    #[tokio::test]
    async fn rejected_proof_does_not_consume_nonce() {
        let gw = gateway();
        let mut p = proof("0x08", 1);
        p.payload.authorization.valid_after = NOW + 60;
        assert!(!gw.verify_proof(&p, "/x").await.valid);
        assert_eq!(gw.nonces_used(), 0);
    }

    #[tokio::test]
    async fn terms_are_checked_against_challenge() {
        let gw = gateway();
        let challenge = gw.create_challenge("/audit", TokenAmount(10_000), PAYEE, None, None);

        let short = proof("0x09", 9_999);
        assert_eq!(
            gw.verify_against(&short, &challenge).await.rejection,
            Some(Rejection::InsufficientAmount)
        );

        let mut elsewhere = proof("0x0a", 10_000);
        elsewhere.payload.authorization.to = "0xsomeoneelse".into();
        assert_eq!(
            gw.verify_against(&elsewhere, &challenge).await.rejection,
            Some(Rejection::RecipientMismatch)
        );

        let mut mainnet = proof("0x0b", 10_000);
        mainnet.network = "base".into();
        assert_eq!(
            gw.verify_against(&mainnet, &challenge).await.rejection,
            Some(Rejection::NetworkMismatch)
        );

        // recipient comparison ignores case
        let exact = proof("0x0c", 10_000);
        assert!(gw.verify_against(&exact, &challenge).await.valid);
    }

    #[tokio::test]
    async fn facilitator_outcomes() {
        let accepted = gateway().with_facilitator(Arc::new(StaticFacilitator(Ok(
            Settlement::Accepted {
                transaction_hash: Some("0xchain".into()),
            },
        ))));
        let v = accepted.verify_proof(&proof("0x0d", 1), "/x").await;
        assert_eq!(v.receipt.unwrap().transaction_hash, "0xchain");

        let refused = gateway().with_facilitator(Arc::new(StaticFacilitator(Ok(
            Settlement::Rejected {
                reason: "Invalid signature".into(),
            },
        ))));
        let v = refused.verify_proof(&proof("0x0e", 1), "/x").await;
        assert_eq!(v.error.as_deref(), Some("Invalid signature"));
        assert_eq!(refused.nonces_used(), 0);

        let down = gateway().with_facilitator(Arc::new(StaticFacilitator(Err(
            X402Error::FacilitatorUnavailable("timeout".into()),
        ))));
        let v = down.verify_proof(&proof("0x0f", 1), "/x").await;
        assert_eq!(v.error.as_deref(), Some("Settlement facilitator unavailable"));
    }
}
