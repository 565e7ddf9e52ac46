//! Secure enclave collaborator
//!
//! The enclave subsystem itself lives outside this workspace. Agents talk to
//! it through `EnclaveClient`; `HttpEnclaveClient` speaks the JSON protocol of
//! the enclave sidecar.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by an enclave
#[derive(Debug, Clone, Error)]
pub enum EnclaveError {
    #[error("enclave unreachable: {0}")]
    Unreachable(String),

    #[error("enclave rejected request: {0}")]
    Rejected(String),

    #[error("invalid enclave response: {0}")]
    InvalidResponse(String),
}

/// Wallet derived inside the enclave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnclaveWallet {
    pub address: String,
    pub public_key: String,
}

/// Hardware-backed key custody
#[async_trait]
pub trait EnclaveClient: Send + Sync {
    /// Derive (or look up) the wallet at a derivation path
    async fn derive_wallet(&self, path: &str) -> Result<EnclaveWallet, EnclaveError>;

    /// Sign a message with the enclave wallet for `chain_id`
    async fn sign(&self, chain_id: u64, message: &[u8]) -> Result<String, EnclaveError>;

    /// Fetch the remote attestation quote as hex
    async fn attestation(&self) -> Result<String, EnclaveError>;
}

#[derive(Serialize)]
struct DeriveRequest<'a> {
    path: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    chain_id: u64,
    message: String,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

#[derive(Deserialize)]
struct AttestationResponse {
    quote: String,
}

/// Enclave sidecar reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpEnclaveClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEnclaveClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EnclaveError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnclaveError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EnclaveError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnclaveError::Rejected(format!("{}: {}", status, body)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| EnclaveError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl EnclaveClient for HttpEnclaveClient {
    async fn derive_wallet(&self, path: &str) -> Result<EnclaveWallet, EnclaveError> {
        let response = self
            .client
            .post(format!("{}/derive", self.base_url))
            .json(&DeriveRequest { path })
            .send()
            .await
            .map_err(|e| EnclaveError::Unreachable(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn sign(&self, chain_id: u64, message: &[u8]) -> Result<String, EnclaveError> {
        let request = SignRequest {
            chain_id,
            message: format!("0x{}", hex::encode(message)),
        };
        let response = self
            .client
            .post(format!("{}/sign", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| EnclaveError::Unreachable(e.to_string()))?;
        let body: SignResponse = Self::read_json(response).await?;
        Ok(body.signature)
    }

    async fn attestation(&self) -> Result<String, EnclaveError> {
        let response = self
            .client
            .get(format!("{}/attestation", self.base_url))
            .send()
            .await
            .map_err(|e| EnclaveError::Unreachable(e.to_string()))?;
        let body: AttestationResponse = Self::read_json(response).await?;
        Ok(body.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = HttpEnclaveClient::new("http://127.0.0.1:8090/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:8090");
    }

    #[tokio::test]
    async fn unreachable_enclave_is_reported() {
        // port 9 (discard) is not expected to run an HTTP server
        let client = HttpEnclaveClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = client.derive_wallet("meshwork/agent/a").await.unwrap_err();
        assert!(matches!(err, EnclaveError::Unreachable(_)));
    }
}
