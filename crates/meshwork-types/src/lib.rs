//! Meshwork Types - Foundation types shared by every agent crate
//!
//! This crate has zero dependencies on other meshwork crates. It defines:
//!
//! - Identity types (PaymentId, ReceiptId, TaskId)
//! - Fixed-point token amounts with exact decimal formatting
//! - A clock abstraction so time-dependent logic can be tested deterministically
//! - The repository lifecycle contract used by in-memory stores
//!
//! # Invariants
//!
//! 1. Token amounts are integers in minor units; floating point never touches money
//! 2. `format_units(parse_units(s, d), d) == s` modulo trailing-zero normalisation

pub mod amount;
pub mod clock;
pub mod identity;
pub mod repository;

pub use amount::*;
pub use clock::*;
pub use identity::*;
pub use repository::*;

/// Version of the x402 protocol spoken by Meshwork agents
pub const X402_VERSION: u32 = 1;
