//! Signing capability shared by both wallet kinds

use async_trait::async_trait;
use std::sync::Arc;

use crate::enclave::EnclaveClient;
use crate::wallet::{EvmAddress, LocalSigner, Wallet};
use crate::Result;

/// A wallet that can sign on the agent's behalf
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn wallet(&self) -> &Wallet;

    /// Sign `message`, returning a 0x-prefixed hex signature
    async fn sign(&self, message: &[u8]) -> Result<String>;
}

#[async_trait]
impl WalletSigner for LocalSigner {
    fn wallet(&self) -> &Wallet {
        LocalSigner::wallet(self)
    }

    async fn sign(&self, message: &[u8]) -> Result<String> {
        self.sign_message(message)
    }
}

/// Signer whose key lives inside the enclave
pub struct EnclaveSigner {
    client: Arc<dyn EnclaveClient>,
    wallet: Wallet,
    chain_id: u64,
}

impl EnclaveSigner {
    pub fn new(client: Arc<dyn EnclaveClient>, wallet: Wallet, chain_id: u64) -> Self {
        Self {
            client,
            wallet,
            chain_id,
        }
    }
}

impl From<crate::enclave::EnclaveWallet> for Wallet {
    fn from(w: crate::enclave::EnclaveWallet) -> Self {
        Wallet {
            address: EvmAddress(w.address.to_lowercase()),
            public_key: w.public_key,
        }
    }
}

#[async_trait]
impl WalletSigner for EnclaveSigner {
    fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    async fn sign(&self, message: &[u8]) -> Result<String> {
        Ok(self.client.sign(self.chain_id, message).await?)
    }
}
