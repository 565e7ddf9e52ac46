//! Local secp256k1 wallet
//!
//! Each agent wallet is an Ethereum-compatible secp256k1 keypair. The address is
//! the last 20 bytes of keccak256 over the uncompressed public key (sans prefix).
//!
//! The signer never exports raw private key bytes. All signing happens inside
//! `LocalSigner`; callers receive `0x`-prefixed hex signatures only.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::{IdentityError, Result};

// ── EVM Address ───────────────────────────────────────────────────────────────

/// A 20-byte Ethereum address, lowercase hex with 0x prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvmAddress(pub String);

impl EvmAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_verifying_key(vk: &VerifyingKey) -> Self {
        let encoded = vk.to_encoded_point(false);
        // bytes[0] == 0x04 (uncompressed prefix), skip it
        let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
        EvmAddress(format!("0x{}", hex::encode(&hash[12..])))
    }
}

impl std::fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public half of an agent wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub address: EvmAddress,
    /// Compressed SEC1 public key, 0x-prefixed hex
    pub public_key: String,
}

// ── Local signer ──────────────────────────────────────────────────────────────

/// In-process secp256k1 signer
pub struct LocalSigner {
    key: SigningKey,
    wallet: Wallet,
}

impl LocalSigner {
    /// Build a signer from 32 private key bytes.
    pub fn from_private_key(bytes: &[u8; 32]) -> Result<Self> {
        let key = SigningKey::from_bytes(bytes.into())
            .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
        let vk = key.verifying_key();
        let wallet = Wallet {
            address: EvmAddress::from_verifying_key(vk),
            public_key: format!("0x{}", hex::encode(vk.to_encoded_point(true).as_bytes())),
        };
        Ok(Self { key, wallet })
    }

    /// Deterministic development wallet: `privateKey = keccak256(agent_id ":" salt)`.
    ///
    /// The same `(agent_id, salt)` always yields the same address.
    pub fn deterministic(agent_id: &str, salt: &str) -> Result<Self> {
        let mut hasher = Keccak256::new();
        hasher.update(agent_id.as_bytes());
        hasher.update(b":");
        hasher.update(salt.as_bytes());
        let seed: [u8; 32] = hasher.finalize().into();
        Self::from_private_key(&seed)
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Sign keccak256(message) with recoverable ECDSA.
    ///
    /// Returns 65 bytes `r || s || v` (v = 27 + recovery id) as 0x-prefixed hex.
    pub fn sign_message(&self, message: &[u8]) -> Result<String> {
        let digest = Keccak256::new_with_prefix(message);
        let (sig, recovery): (Signature, RecoveryId) = self
            .key
            .sign_digest_recoverable(digest)
            .map_err(|e| IdentityError::SigningFailed(e.to_string()))?;

        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(27 + recovery.to_byte());
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.wallet.address)
            .finish_non_exhaustive()
    }
}

/// Recover the signer address from a signature produced by `LocalSigner::sign_message`.
pub fn recover_address(message: &[u8], signature_hex: &str) -> Result<EvmAddress> {
    let raw = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|_| IdentityError::InvalidSignature)?;
    if raw.len() != 65 {
        return Err(IdentityError::InvalidSignature);
    }

    let sig = Signature::from_slice(&raw[..64]).map_err(|_| IdentityError::InvalidSignature)?;
    let recovery = raw[64]
        .checked_sub(27)
        .and_then(RecoveryId::from_byte)
        .ok_or(IdentityError::InvalidSignature)?;

    let digest = Keccak256::new_with_prefix(message);
    let vk = VerifyingKey::recover_from_digest(digest, &sig, recovery)
        .map_err(|_| IdentityError::InvalidSignature)?;
    Ok(EvmAddress::from_verifying_key(&vk))
}
