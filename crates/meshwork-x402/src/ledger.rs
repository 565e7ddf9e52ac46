//! Pending-payment ledger
//!
//! Tracks payments an agent explicitly asked for. Entries only move forward:
//! `pending → confirmed | failed | expired`. Expiry is applied lazily whenever an
//! entry is read or transitioned; `expire_overdue` exists for periodic sweeps.
//! Finalized entries are kept for a retention window and then dropped by
//! `prune_finalized`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use meshwork_types::{
    PaymentId, ReceiptId, Repository, RepositoryError, SharedClock, SystemClock, TokenAmount,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub agent_id: String,
    pub amount: TokenAmount,
    pub token: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub receipt_id: Option<ReceiptId>,
    /// When the entry left `pending`
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Move a pending entry to expired if its deadline has passed
    fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == PaymentStatus::Pending && now > self.expires_at {
            self.status = PaymentStatus::Expired;
            self.finalized_at = Some(now);
            return true;
        }
        false
    }
}

/// In-memory ledger of pending payments
pub struct PaymentLedger {
    entries: DashMap<PaymentId, Payment>,
    clock: SharedClock,
    closed: AtomicBool,
    max_entries: Option<usize>,
}

impl PaymentLedger {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            closed: AtomicBool::new(false),
            max_entries: None,
        }
    }

    /// Refuse new requests once `max` entries are held
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LedgerError::Closed);
        }
        Ok(())
    }

    /// Open a pending payment that expires after `ttl`.
    ///
    /// `ttl` must be positive and small enough that the deadline is representable.
    pub fn request_payment(
        &self,
        agent_id: &str,
        amount: TokenAmount,
        token: &str,
        ttl: Duration,
    ) -> Result<Payment, LedgerError> {
        self.ensure_open()?;

        if ttl <= Duration::zero() {
            return Err(LedgerError::InvalidTtl(ttl));
        }
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(LedgerError::InvalidTtl(ttl))?;

        if let Some(max) = self.max_entries {
            if self.entries.len() >= max {
                warn!(agent_id, max, "Payment ledger full, rejecting request");
                return Err(LedgerError::Full(max));
            }
        }

        let payment = Payment {
            id: PaymentId::new(),
            agent_id: agent_id.to_string(),
            amount,
            token: token.to_string(),
            status: PaymentStatus::Pending,
            created_at: now,
            expires_at,
            receipt_id: None,
            finalized_at: None,
        };
        self.entries.insert(payment.id, payment.clone());

        debug!(payment_id = %payment.id, agent_id, amount = %amount, "Payment requested");
        Ok(payment)
    }

    /// Look up an entry, expiring it first if overdue
    pub fn get(&self, id: &PaymentId) -> Option<Payment> {
        let now = self.clock.now();
        let mut entry = self.entries.get_mut(id)?;
        entry.expire_if_due(now);
        Some(entry.clone())
    }

    pub fn confirm(&self, id: &PaymentId, receipt_id: ReceiptId) -> Result<Payment, LedgerError> {
        self.transition(id, PaymentStatus::Confirmed, Some(receipt_id))
    }

    pub fn fail(&self, id: &PaymentId) -> Result<Payment, LedgerError> {
        self.transition(id, PaymentStatus::Failed, None)
    }

    fn transition(
        &self,
        id: &PaymentId,
        to: PaymentStatus,
        receipt_id: Option<ReceiptId>,
    ) -> Result<Payment, LedgerError> {
        self.ensure_open()?;

        let now = self.clock.now();
        // the shard guard serializes transitions of this entry
        let mut entry = self.entries.get_mut(id).ok_or(LedgerError::NotFound(*id))?;

        if entry.expire_if_due(now) && to == PaymentStatus::Confirmed {
            return Err(LedgerError::Expired(*id));
        }
        match entry.status {
            PaymentStatus::Pending => {}
            PaymentStatus::Expired if to == PaymentStatus::Confirmed => {
                return Err(LedgerError::Expired(*id))
            }
            status => return Err(LedgerError::AlreadyFinalized { id: *id, status }),
        }

        entry.status = to;
        entry.receipt_id = receipt_id;
        entry.finalized_at = Some(now);
        info!(payment_id = %id, status = %to, "Payment finalized");
        Ok(entry.clone())
    }

    /// Expire every overdue pending entry; returns how many changed
    pub fn expire_overdue(&self) -> usize {
        let now = self.clock.now();
        let expired = self
            .entries
            .iter_mut()
            .filter_map(|mut entry| entry.expire_if_due(now).then_some(()))
            .count();
        if expired > 0 {
            debug!(expired, "Expired overdue payments");
        }
        expired
    }

    /// Drop entries that were finalized at least `retention` ago; returns how
    /// many were removed. Overdue pending entries are expired first.
    pub fn prune_finalized(&self, retention: Duration) -> usize {
        let now = self.clock.now();
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };

        let before = self.entries.len();
        self.entries.retain(|_, payment| {
            payment.expire_if_due(now);
            !matches!(payment.finalized_at, Some(at) if at <= cutoff)
        });
        let pruned = before.saturating_sub(self.entries.len());
        if pruned > 0 {
            debug!(pruned, "Pruned finalized payments");
        }
        pruned
    }

    /// Entries still awaiting payment
    pub fn pending(&self) -> Vec<Payment> {
        let now = self.clock.now();
        self.entries
            .iter_mut()
            .filter_map(|mut entry| {
                entry.expire_if_due(now);
                (entry.status == PaymentStatus::Pending).then(|| entry.clone())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PaymentLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for PaymentLedger {
    fn name(&self) -> &'static str {
        "payment-ledger"
    }

    async fn init(&self) -> Result<(), RepositoryError> {
        self.closed.store(false, Ordering::SeqCst);
        debug!(repository = self.name(), "Repository initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        self.closed.store(true, Ordering::SeqCst);
        info!(
            repository = self.name(),
            entries = self.entries.len(),
            "Repository closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwork_types::ManualClock;
    use std::sync::Arc;

    fn ledger() -> (PaymentLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        (PaymentLedger::with_clock(clock.clone()), clock)
    }

    #[test]
    fn request_and_confirm() {
        let (ledger, _) = ledger();
        let p = ledger
            .request_payment("sentinel", TokenAmount(10_000), "USDC", Duration::minutes(5))
            .unwrap();
        assert_eq!(p.status, PaymentStatus::Pending);

        let receipt = ReceiptId::new();
        let confirmed = ledger.confirm(&p.id, receipt).unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Confirmed);
        assert_eq!(confirmed.receipt_id, Some(receipt));
    }

    #[test]
    fn terminal_states_are_final() {
        let (ledger, _) = ledger();
        let p = ledger
            .request_payment("sentinel", TokenAmount(1), "USDC", Duration::minutes(5))
            .unwrap();
        ledger.fail(&p.id).unwrap();

        assert_eq!(
            ledger.confirm(&p.id, ReceiptId::new()),
            Err(LedgerError::AlreadyFinalized {
                id: p.id,
                status: PaymentStatus::Failed
            })
        );
    }

    #[test]
    fn lazy_expiry_on_read() {
        let (ledger, clock) = ledger();
        let p = ledger
            .request_payment("sentinel", TokenAmount(1), "USDC", Duration::seconds(30))
            .unwrap();

        clock.advance(Duration::seconds(31));
        assert_eq!(ledger.get(&p.id).unwrap().status, PaymentStatus::Expired);
        assert_eq!(ledger.confirm(&p.id, ReceiptId::new()), Err(LedgerError::Expired(p.id)));
    }

    #[test]
    fn confirm_after_deadline_is_expired() {
        let (ledger, clock) = ledger();
        let p = ledger
            .request_payment("sentinel", TokenAmount(1), "USDC", Duration::seconds(30))
            .unwrap();
        clock.advance(Duration::minutes(1));
        assert_eq!(ledger.confirm(&p.id, ReceiptId::new()), Err(LedgerError::Expired(p.id)));
    }

    #[test]
    fn sweep_expires_overdue_only() {
        let (ledger, clock) = ledger();
        ledger
            .request_payment("a", TokenAmount(1), "USDC", Duration::seconds(10))
            .unwrap();
        ledger
            .request_payment("b", TokenAmount(1), "USDC", Duration::seconds(100))
            .unwrap();

        clock.advance(Duration::seconds(50));
        assert_eq!(ledger.expire_overdue(), 1);
        assert_eq!(ledger.expire_overdue(), 0);
        assert_eq!(ledger.pending().len(), 1);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn unknown_payment() {
        let (ledger, _) = ledger();
        let id = PaymentId::new();
        assert!(ledger.get(&id).is_none());
        assert_eq!(ledger.fail(&id), Err(LedgerError::NotFound(id)));
    }

    #[test]
    fn ttl_must_be_positive_and_representable() {
        let (ledger, _) = ledger();
        for ttl in [Duration::zero(), Duration::seconds(-5), Duration::MAX] {
            assert_eq!(
                ledger.request_payment("a", TokenAmount(1), "USDC", ttl),
                Err(LedgerError::InvalidTtl(ttl))
            );
        }
        assert!(ledger.is_empty());
    }

    #[test]
    fn finalized_entries_are_pruned_after_retention() {
        let (ledger, clock) = ledger();
        let failed = ledger
            .request_payment("a", TokenAmount(1), "USDC", Duration::minutes(5))
            .unwrap();
        let overdue = ledger
            .request_payment("b", TokenAmount(1), "USDC", Duration::seconds(10))
            .unwrap();
        let open = ledger
            .request_payment("c", TokenAmount(1), "USDC", Duration::hours(2))
            .unwrap();
        ledger.fail(&failed.id).unwrap();
        assert!(ledger.get(&failed.id).unwrap().finalized_at.is_some());

        // nothing has aged past the retention window yet
        clock.advance(Duration::seconds(30));
        assert_eq!(ledger.prune_finalized(Duration::minutes(10)), 0);
        assert_eq!(ledger.get(&overdue.id).unwrap().status, PaymentStatus::Expired);

        clock.advance(Duration::minutes(10));
        assert_eq!(ledger.prune_finalized(Duration::minutes(10)), 2);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get(&failed.id).is_none());
        assert_eq!(ledger.get(&open.id).unwrap().status, PaymentStatus::Pending);
    }

    #[test]
    fn failed_entries_do_not_accumulate() {
        let (ledger, clock) = ledger();
        for _ in 0..1000 {
            let p = ledger
                .request_payment("a", TokenAmount(1), "USDC", Duration::minutes(5))
                .unwrap();
            ledger.fail(&p.id).unwrap();
        }
        clock.advance(Duration::seconds(1));
        assert_eq!(ledger.prune_finalized(Duration::zero()), 1000);
        assert!(ledger.is_empty());
    }

    #[test]
    fn capped_ledger_refuses_new_entries() {
        let (ledger, _) = ledger();
        let ledger = ledger.with_max_entries(2);
        for agent in ["a", "b"] {
            ledger
                .request_payment(agent, TokenAmount(1), "USDC", Duration::minutes(5))
                .unwrap();
        }
        assert_eq!(
            ledger.request_payment("c", TokenAmount(1), "USDC", Duration::minutes(5)),
            Err(LedgerError::Full(2))
        );
    }

    #[tokio::test]
    async fn closed_ledger_rejects_writes() {
        let (ledger, _) = ledger();
        ledger.init().await.unwrap();
        ledger.close().await.unwrap();
        assert_eq!(
            ledger
                .request_payment("a", TokenAmount(1), "USDC", Duration::seconds(10))
                .unwrap_err(),
            LedgerError::Closed
        );
    }
}
