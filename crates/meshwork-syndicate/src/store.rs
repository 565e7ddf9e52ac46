//! In-memory syndicate repository
//!
//! Each syndicate sits behind its own mutex so operations on one syndicate are
//! serialized while different syndicates proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meshwork_types::{Repository, RepositoryError, TaskId, TokenAmount};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::reputation::ReputationHistory;
use crate::types::{MemberRole, SyndicateConfig, SyndicateMember, SyndicateSnapshot, SyndicateTask};

/// Mutable state of one syndicate
#[derive(Debug, Clone)]
pub struct SyndicateRecord {
    pub config: SyndicateConfig,
    /// Insertion order is the assignment tie-break order
    pub members: Vec<SyndicateMember>,
    /// Tasks not yet completed or failed, in creation order
    pub active_tasks: Vec<SyndicateTask>,
    pub tasks_completed: u64,
    pub total_earnings: TokenAmount,
    pub treasury: TokenAmount,
    /// Keyed by agent id; dropped when the member leaves
    pub reputation_history: HashMap<String, ReputationHistory>,
    pub created_at: DateTime<Utc>,
}

impl SyndicateRecord {
    pub fn new(config: SyndicateConfig, created_at: DateTime<Utc>) -> Self {
        Self {
            config,
            members: Vec::new(),
            active_tasks: Vec::new(),
            tasks_completed: 0,
            total_earnings: TokenAmount::ZERO,
            treasury: TokenAmount::ZERO,
            reputation_history: HashMap::new(),
            created_at,
        }
    }

    pub fn member(&self, agent_id: &str) -> Option<&SyndicateMember> {
        self.members.iter().find(|m| m.agent_id == agent_id)
    }

    pub fn member_mut(&mut self, agent_id: &str) -> Option<&mut SyndicateMember> {
        self.members.iter_mut().find(|m| m.agent_id == agent_id)
    }

    pub fn founder(&self) -> Option<&SyndicateMember> {
        self.members.iter().find(|m| m.role == MemberRole::Founder)
    }

    pub fn task_mut(&mut self, task_id: &TaskId) -> Option<&mut SyndicateTask> {
        self.active_tasks.iter_mut().find(|t| &t.id == task_id)
    }

    pub fn snapshot(&self) -> SyndicateSnapshot {
        SyndicateSnapshot {
            config: self.config.clone(),
            members: self.members.clone(),
            active_tasks: self.active_tasks.clone(),
            tasks_completed: self.tasks_completed,
            total_earnings: self.total_earnings,
            treasury: self.treasury,
            founder: self.founder().map(|m| m.agent_id.clone()),
            created_at: self.created_at,
        }
    }
}

/// Syndicate repository
#[derive(Default)]
pub struct SyndicateStore {
    syndicates: DashMap<String, Arc<Mutex<SyndicateRecord>>>,
    closed: AtomicBool,
}

impl SyndicateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new syndicate; false if the id is taken or the store is closed
    pub fn insert(&self, record: SyndicateRecord) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.syndicates.entry(record.config.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(record)));
                true
            }
        }
    }

    /// Handle for reading a syndicate
    pub fn get(&self, id: &str) -> Option<Arc<Mutex<SyndicateRecord>>> {
        self.syndicates.get(id).map(|r| r.value().clone())
    }

    /// Handle for mutating a syndicate; `None` once the store is closed
    pub fn get_for_write(&self, id: &str) -> Option<Arc<Mutex<SyndicateRecord>>> {
        if self.is_closed() {
            return None;
        }
        self.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.syndicates.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.syndicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syndicates.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for SyndicateStore {
    fn name(&self) -> &'static str {
        "syndicate-store"
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
            syndicates = self.syndicates.len(),
            "Repository closed"
        );
        Ok(())
    }
}
