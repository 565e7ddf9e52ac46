//! Payment error types

use meshwork_types::{AmountError, PaymentId};
use thiserror::Error;

use crate::ledger::PaymentStatus;

/// Protocol errors
#[derive(Debug, Clone, Error)]
pub enum X402Error {
    #[error("Invalid payment proof format: {0}")]
    MalformedProof(String),

    #[error("Settlement facilitator unavailable: {0}")]
    FacilitatorUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// Dynamic pricing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("price source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid price: {0}")]
    Invalid(String),
}

/// Pending-payment ledger errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Payment not found: {0}")]
    NotFound(PaymentId),

    #[error("Payment {id} already finalized as {status}")]
    AlreadyFinalized { id: PaymentId, status: PaymentStatus },

    #[error("Payment expired: {0}")]
    Expired(PaymentId),

    #[error("Payment ledger is closed")]
    Closed,

    #[error("Invalid payment TTL: {0}")]
    InvalidTtl(chrono::Duration),

    #[error("Payment ledger is full ({0} entries)")]
    Full(usize),
}

pub type Result<T> = std::result::Result<T, X402Error>;
