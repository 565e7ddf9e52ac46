//! Repository lifecycle
//!
//! Stores that hold process state (payment ledger, syndicate store) are explicit
//! structs injected into the components that use them. They share one lifecycle
//! so a persistent implementation can replace the in-memory one without touching
//! business logic.

use async_trait::async_trait;
use thiserror::Error;

/// Repository errors
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("repository {0} is closed")]
    Closed(&'static str),

    #[error("repository backend unavailable: {0}")]
    Unavailable(String),
}

/// Lifecycle contract for injected stores
#[async_trait]
pub trait Repository: Send + Sync {
    /// Human-readable name used in logs
    fn name(&self) -> &'static str;

    /// Prepare the store for use (open connections, load snapshots)
    async fn init(&self) -> Result<(), RepositoryError>;

    /// Flush and release resources; the store rejects writes afterwards
    async fn close(&self) -> Result<(), RepositoryError>;
}
