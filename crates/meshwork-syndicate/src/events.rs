//! Syndicate events
//!
//! Published synchronously right after the state change that caused them.
//! Subscribers hold an unbounded receiver and detach with `unsubscribe`.

use meshwork_types::{TaskId, TokenAmount};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{MemberRole, MemberStatus};

/// Events emitted by the syndicate manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyndicateEvent {
    SyndicateCreated {
        syndicate_id: String,
    },

    MemberJoined {
        syndicate_id: String,
        agent_id: String,
    },

    MemberLeft {
        syndicate_id: String,
        agent_id: String,
    },

    MemberStatusChanged {
        syndicate_id: String,
        agent_id: String,
        status: MemberStatus,
    },

    MemberRoleChanged {
        syndicate_id: String,
        agent_id: String,
        role: MemberRole,
        changed_by: String,
    },

    ContributionRecorded {
        syndicate_id: String,
        agent_id: String,
        amount: TokenAmount,
        total: TokenAmount,
    },

    ConfigUpdated {
        syndicate_id: String,
        updated_by: String,
    },

    TaskCreated {
        syndicate_id: String,
        task_id: TaskId,
    },

    TaskAssigned {
        syndicate_id: String,
        task_id: TaskId,
        agent_id: String,
        score: f64,
    },

    TaskCompleted {
        syndicate_id: String,
        task_id: TaskId,
        agent_id: Option<String>,
        success: bool,
        earnings: Option<TokenAmount>,
    },

    ReputationChanged {
        syndicate_id: String,
        agent_id: String,
        old_score: f64,
        new_score: f64,
    },

    MemberSlashed {
        syndicate_id: String,
        agent_id: String,
        amount: f64,
        reason: String,
        suspended: bool,
    },

    EarningsDistributed {
        syndicate_id: String,
        total: TokenAmount,
        distributed: TokenAmount,
        remainder: TokenAmount,
    },
}

/// Handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription
pub struct Subscription {
    pub id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<SyndicateEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<SyndicateEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SyndicateEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything published since the last call
    pub fn drain(&mut self) -> Vec<SyndicateEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Event bus for syndicate state changes
#[derive(Default)]
pub struct SyndicateEvents {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, mpsc::UnboundedSender<SyndicateEvent>)>>,
}

impl SyndicateEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push((id, tx));
        Subscription { id, receiver: rx }
    }

    /// Detach a subscriber; true if it was attached
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver to every subscriber, dropping those whose receiver is gone
    pub fn publish(&self, event: SyndicateEvent) {
        trace!(?event, "Publishing syndicate event");
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(agent: &str) -> SyndicateEvent {
        SyndicateEvent::MemberJoined {
            syndicate_id: "s".into(),
            agent_id: agent.into(),
        }
    }

    #[test]
    fn subscribers_receive_in_order() {
        let bus = SyndicateEvents::new();
        let mut sub = bus.subscribe();
        bus.publish(joined("a"));
        bus.publish(joined("b"));
        assert_eq!(sub.drain(), vec![joined("a"), joined("b")]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = SyndicateEvents::new();
        let mut sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id));
        assert!(!bus.unsubscribe(sub.id));
        bus.publish(joined("a"));
        assert!(sub.try_recv().is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = SyndicateEvents::new();
        let sub = bus.subscribe();
        let _keep = bus.subscribe();
        drop(sub);
        bus.publish(joined("a"));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn event_json_is_tagged() {
        let json = serde_json::to_value(joined("a")).unwrap();
        assert_eq!(json["type"], "MemberJoined");
        assert_eq!(json["agent_id"], "a");
    }
}
