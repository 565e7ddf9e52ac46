//! Meshwork Syndicates - cooperating groups of agents
//!
//! A syndicate pools agents with complementary capabilities. Tasks go to the
//! best eligible member, reputation moves with outcomes, and earnings are split
//! in proportion to reputation.
//!
//! ```text
//! create_task ─► assign_task ─► complete_task ─► distribute_earnings
//!   pending        in-progress     completed|failed
//! ```
//!
//! # Invariants
//!
//! 1. Membership never exceeds `max_members`
//! 2. Reputation changes only through `update_reputation` / `slash_member`
//! 3. Distributed shares never sum to more than the distributed total
//! 4. Operations on unknown syndicates return `None`/`false`, never panic
//! 5. A syndicate has at most one founder, fixed at creation

pub mod events;
pub mod manager;
pub mod reputation;
pub mod store;
pub mod types;

pub use events::{Subscription, SubscriptionId, SyndicateEvent, SyndicateEvents};
pub use manager::SyndicateManager;
pub use reputation::{
    Reputation, ReputationChange, ReputationHistory, ReputationLevel, ReputationScore,
    ReputationUpdate, HISTORY_LIMIT,
};
pub use store::{SyndicateRecord, SyndicateStore};
pub use types::*;
