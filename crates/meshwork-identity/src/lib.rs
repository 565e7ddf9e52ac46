//! Meshwork Identity - per-agent wallet identity and signing
//!
//! An agent proves who it is with an EVM wallet. When a secure enclave is
//! reachable the wallet key never leaves it and every identity carries an
//! attestation quote. Otherwise a deterministic development wallet is derived
//! from `(agent_id, salt)` and the identity is tagged unattested.
//!
//! ```text
//! IdentityProvider::initialize()
//!   ├─ enclave.derive_wallet(path) ok ─► EnclaveSigner   + Attestation::Quote
//!   └─ no enclave / any error ─────────► LocalSigner      + Attestation::Unattested
//! ```

pub mod enclave;
pub mod provider;
pub mod signer;
pub mod wallet;

pub use enclave::{EnclaveClient, EnclaveError, EnclaveWallet, HttpEnclaveClient};
pub use provider::{Attestation, Identity, IdentityConfig, IdentityProvider};
pub use signer::{EnclaveSigner, WalletSigner};
pub use wallet::{recover_address, EvmAddress, LocalSigner, Wallet};

use thiserror::Error;

/// Identity errors
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    #[error("Invalid identity configuration: {0}")]
    InvalidConfig(String),

    #[error("Identity provider not initialized")]
    NotInitialized,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Enclave error: {0}")]
    Enclave(#[from] EnclaveError),
}

pub type Result<T> = std::result::Result<T, IdentityError>;
