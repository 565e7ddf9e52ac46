//! Meshwork x402 - HTTP 402 payment protocol for agent endpoints
//!
//! A paid route answers an unpaid request with `402 Payment Required` and a
//! machine-readable challenge. The client retries with an `X-PAYMENT` header
//! carrying a signed authorization; the gateway checks it, records the nonce
//! and issues a receipt that travels back in `X-PAYMENT-RESPONSE`.
//!
//! ```text
//! request ──► PaymentLayer ──► no X-PAYMENT ──────────► 402 {x402Version, accepts}
//!                 │
//!                 ├─► malformed X-PAYMENT ────────────► 400
//!                 ├─► PaymentGateway rejects ─────────► 402 {.., error}
//!                 └─► PaymentGateway accepts ─► handler ─► 2xx + X-PAYMENT-RESPONSE
//! ```
//!
//! # Invariants
//!
//! 1. A nonce is accepted at most once per process lifetime
//! 2. The wrapped handler never runs for an unpaid request on a gated route
//! 3. Verification completes before the wrapped handler is invoked

pub mod error;
pub mod gateway;
pub mod ledger;
pub mod middleware;
pub mod pricing;
pub mod types;

pub use error::{LedgerError, PricingError, Result, X402Error};
pub use gateway::{
    GatewayConfig, PaymentGateway, Rejection, Settlement, SettlementFacilitator, Verification,
};
pub use ledger::{Payment, PaymentLedger, PaymentStatus};
pub use middleware::{
    OptionalPaymentLayer, PaidRouteConfig, PaymentContext, PaymentHooks, PaymentLayer,
};
pub use pricing::{Pricing, RequestInfo};
pub use types::*;
