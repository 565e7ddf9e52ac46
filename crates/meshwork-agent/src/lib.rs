//! Meshwork Agent - runtime shared by every agent service
//!
//! An agent is an axum service with a fixed public surface and a set of
//! capability routes, some of them paid. The runtime owns the agent's
//! identity, payment gateway, pending-payment ledger and syndicate view, and
//! keeps the counters reported by `/state`.
//!
//! ```text
//! GET  /health       liveness
//! GET  /identity     who the agent is and which wallet gets paid
//! GET  /state        status, activity, reputation, earnings
//! GET  /attestation  enclave quote or "unattested"
//! ...                routes registered with route / paid_route / optional_paid_route
//! ```

pub mod inference;
pub mod profile;
pub mod runtime;
pub mod schedule;

use thiserror::Error;

pub use inference::{
    HttpInferenceBackend, InferenceBackend, InferenceConfig, InferenceError, InferenceOptions,
    InferenceResponse,
};
pub use profile::{AgentProfile, AgentState, AgentStatus, AgentType};
pub use runtime::{AgentHandle, AgentRuntime};
pub use schedule::PeriodicTask;

/// Agent runtime errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Identity has not been initialized")]
    IdentityNotInitialized,

    #[error("Identity error: {0}")]
    Identity(#[from] meshwork_identity::IdentityError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] meshwork_x402::LedgerError),

    #[error("Repository error: {0}")]
    Repository(#[from] meshwork_types::RepositoryError),

    #[error("Reserved path: {0}")]
    ReservedPath(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
