//! Syndicate manager
//!
//! Business rules for membership, task routing, reputation and earnings. All
//! state lives in the injected `SyndicateStore`; every mutation of a syndicate
//! runs under that syndicate's lock, and events are published after the lock is
//! released.
//!
//! `add_member` and `remove_member` are the operator path. Members act on each
//! other through `approve_member`, `expel_member`, `set_member_role` and
//! `update_config`, which check the acting member's `MemberRole`.

use chrono::{DateTime, Utc};
use meshwork_types::{SharedClock, SystemClock, TaskId, TokenAmount};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::{SyndicateEvent, SyndicateEvents};
use crate::reputation::{ReputationChange, ReputationUpdate};
use crate::store::{SyndicateRecord, SyndicateStore};
use crate::types::{
    AssignmentStatus, EarningsDistribution, LeaderboardEntry, MemberRole, MemberShare,
    MemberStatus, NewTask, RemainderPolicy, SyndicateConfig, SyndicateMember, SyndicateSnapshot,
    SyndicateStats, SyndicateTask, TaskAssignment, TaskOutcome, TaskStatus,
};

/// Earnings weight for a reputation score: `floor(score × 100) + 100`
pub fn share_weight(score: f64) -> u64 {
    (score.clamp(0.0, 100.0) * 100.0).floor() as u64 + 100
}

/// Split `total` in proportion to `weights`.
///
/// Each share is `floor(total × w / Σw)`, computed without overflowing `u128`.
/// Returns the shares and the undistributed remainder.
fn proportional_split(total: u128, weights: &[u64]) -> (Vec<u128>, u128) {
    let sum: u128 = weights.iter().map(|w| u128::from(*w)).sum();
    if sum == 0 {
        return (vec![0; weights.len()], total);
    }

    let quotient = total / sum;
    let rest = total % sum;
    let shares: Vec<u128> = weights
        .iter()
        .map(|w| {
            let w = u128::from(*w);
            quotient * w + rest * w / sum
        })
        .collect();
    let distributed: u128 = shares.iter().sum();
    (shares, total - distributed)
}

/// Coordinates syndicates held in a `SyndicateStore`
pub struct SyndicateManager {
    store: Arc<SyndicateStore>,
    events: Arc<SyndicateEvents>,
    clock: SharedClock,
}

impl SyndicateManager {
    pub fn new(store: Arc<SyndicateStore>, events: Arc<SyndicateEvents>) -> Self {
        Self {
            store,
            events,
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(&self) -> &Arc<SyndicateEvents> {
        &self.events
    }

    pub fn store(&self) -> &Arc<SyndicateStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Syndicates
    // ------------------------------------------------------------------

    /// Register a syndicate; false if the id already exists
    pub fn create_syndicate(&self, config: SyndicateConfig) -> bool {
        let id = config.id.clone();
        if !self.store.insert(SyndicateRecord::new(config, self.clock.now())) {
            debug!(syndicate_id = %id, "Syndicate already exists");
            return false;
        }
        info!(syndicate_id = %id, "Syndicate created");
        self.events
            .publish(SyndicateEvent::SyndicateCreated { syndicate_id: id });
        true
    }

    /// Register a syndicate with `founder` as its first member.
    ///
    /// The founder takes the `Founder` role and is not subject to the joining
    /// rules. False if the id already exists or the syndicate has no room.
    pub fn found_syndicate(&self, config: SyndicateConfig, mut founder: SyndicateMember) -> bool {
        if config.max_members == 0 {
            return false;
        }
        let id = config.id.clone();
        let now = self.clock.now();
        founder.role = MemberRole::Founder;
        founder.joined_at = now;
        let agent_id = founder.agent_id.clone();

        let mut record = SyndicateRecord::new(config, now);
        record.members.push(founder);
        if !self.store.insert(record) {
            debug!(syndicate_id = %id, "Syndicate already exists");
            return false;
        }

        info!(syndicate_id = %id, founder = %agent_id, "Syndicate founded");
        self.events.publish(SyndicateEvent::SyndicateCreated {
            syndicate_id: id.clone(),
        });
        self.events.publish(SyndicateEvent::MemberJoined {
            syndicate_id: id,
            agent_id,
        });
        true
    }

    pub fn syndicate(&self, id: &str) -> Option<SyndicateSnapshot> {
        self.store.get(id).map(|s| s.lock().snapshot())
    }

    /// All syndicates ordered by id
    pub fn list_syndicates(&self) -> Vec<SyndicateSnapshot> {
        self.store
            .ids()
            .iter()
            .filter_map(|id| self.syndicate(id))
            .collect()
    }

    pub fn member(&self, id: &str, agent_id: &str) -> Option<SyndicateMember> {
        let handle = self.store.get(id)?;
        let record = handle.lock();
        record.member(agent_id).cloned()
    }

    pub fn task(&self, id: &str, task_id: &TaskId) -> Option<SyndicateTask> {
        let handle = self.store.get(id)?;
        let record = handle.lock();
        record.active_tasks.iter().find(|t| &t.id == task_id).cloned()
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add a member.
    ///
    /// Returns false when the syndicate is unknown or full, the agent is already
    /// a member, its reputation is below the syndicate minimum, it lacks a
    /// required capability, or it claims the founder role.
    pub fn add_member(&self, id: &str, member: SyndicateMember) -> bool {
        let Some(handle) = self.store.get_for_write(id) else {
            return false;
        };
        let admitted = self.admit(id, &mut handle.lock(), member);
        self.announce_join(id, admitted)
    }

    /// Add a member on behalf of `approver_id`, who must be an active member
    /// allowed to approve members and ranked above the newcomer's role
    pub fn approve_member(&self, id: &str, approver_id: &str, member: SyndicateMember) -> bool {
        let Some(handle) = self.store.get_for_write(id) else {
            return false;
        };

        let admitted = {
            let mut record = handle.lock();
            let allowed = record.member(approver_id).is_some_and(|approver| {
                approver.is_active()
                    && approver.role.can_approve_members()
                    && approver.role.outranks(member.role)
            });
            if !allowed {
                debug!(syndicate_id = id, approver_id, agent_id = %member.agent_id, "Approval not permitted");
                return false;
            }
            self.admit(id, &mut record, member)
        };
        self.announce_join(id, admitted)
    }

    /// Joining rules shared by every admission path; runs under the syndicate lock
    fn admit(
        &self,
        id: &str,
        record: &mut SyndicateRecord,
        mut member: SyndicateMember,
    ) -> Option<String> {
        let config = &record.config;

        if member.role == MemberRole::Founder {
            debug!(syndicate_id = id, agent_id = %member.agent_id, "Founder role is only granted at creation");
            return None;
        }
        if record.member(&member.agent_id).is_some() {
            debug!(syndicate_id = id, agent_id = %member.agent_id, "Already a member");
            return None;
        }
        if record.members.len() >= config.max_members {
            debug!(syndicate_id = id, max = config.max_members, "Syndicate is full");
            return None;
        }
        if member.reputation.score() < config.min_reputation {
            debug!(
                syndicate_id = id,
                agent_id = %member.agent_id,
                reputation = member.reputation.score(),
                "Reputation below syndicate minimum"
            );
            return None;
        }
        if !member.has_capabilities(&config.required_capabilities) {
            debug!(syndicate_id = id, agent_id = %member.agent_id, "Missing required capability");
            return None;
        }

        member.joined_at = self.clock.now();
        let agent_id = member.agent_id.clone();
        record.members.push(member);
        Some(agent_id)
    }

    fn announce_join(&self, id: &str, admitted: Option<String>) -> bool {
        let Some(agent_id) = admitted else {
            return false;
        };
        info!(syndicate_id = id, agent_id = %agent_id, "Member joined syndicate");
        self.events.publish(SyndicateEvent::MemberJoined {
            syndicate_id: id.to_string(),
            agent_id,
        });
        true
    }

    /// Remove a member; true iff it was present
    pub fn remove_member(&self, id: &str, agent_id: &str) -> bool {
        let Some(handle) = self.store.get_for_write(id) else {
            return false;
        };

        let removed = {
            let mut record = handle.lock();
            let before = record.members.len();
            record.members.retain(|m| m.agent_id != agent_id);
            record.reputation_history.remove(agent_id);
            record.members.len() != before
        };

        if removed {
            info!(syndicate_id = id, agent_id, "Member left syndicate");
            self.events.publish(SyndicateEvent::MemberLeft {
                syndicate_id: id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        removed
    }

    /// Remove `agent_id` on behalf of `actor_id`, who must be an active member
    /// allowed to approve members and ranked above the target
    pub fn expel_member(&self, id: &str, actor_id: &str, agent_id: &str) -> bool {
        let Some(handle) = self.store.get_for_write(id) else {
            return false;
        };

        {
            let mut record = handle.lock();
            let Some(actor_role) = record
                .member(actor_id)
                .filter(|actor| actor.is_active())
                .map(|actor| actor.role)
            else {
                return false;
            };
            let Some(target_role) = record.member(agent_id).map(|m| m.role) else {
                return false;
            };
            if !actor_role.can_approve_members() || !actor_role.outranks(target_role) {
                debug!(syndicate_id = id, actor_id, agent_id, "Expulsion not permitted");
                return false;
            }
            record.members.retain(|m| m.agent_id != agent_id);
            record.reputation_history.remove(agent_id);
        }

        info!(syndicate_id = id, actor_id, agent_id, "Member expelled from syndicate");
        self.events.publish(SyndicateEvent::MemberLeft {
            syndicate_id: id.to_string(),
            agent_id: agent_id.to_string(),
        });
        true
    }

    /// Change a member's role. Only the founder may do this, and the founder
    /// role itself can be neither granted nor taken away.
    pub fn set_member_role(&self, id: &str, actor_id: &str, agent_id: &str, role: MemberRole) -> bool {
        if role == MemberRole::Founder {
            return false;
        }
        let Some(handle) = self.store.get_for_write(id) else {
            return false;
        };

        {
            let mut record = handle.lock();
            if !record
                .member(actor_id)
                .is_some_and(|actor| actor.role.can_modify_config())
            {
                debug!(syndicate_id = id, actor_id, "Role change not permitted");
                return false;
            }
            let Some(member) = record.member_mut(agent_id) else {
                return false;
            };
            if member.role == MemberRole::Founder {
                return false;
            }
            member.role = role;
        }

        info!(syndicate_id = id, actor_id, agent_id, ?role, "Member role changed");
        self.events.publish(SyndicateEvent::MemberRoleChanged {
            syndicate_id: id.to_string(),
            agent_id: agent_id.to_string(),
            role,
            changed_by: actor_id.to_string(),
        });
        true
    }

    /// Let the founder edit the syndicate's settings.
    ///
    /// The edit is discarded when it changes the id or lowers `max_members`
    /// below the current membership.
    pub fn update_config<F>(&self, id: &str, actor_id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut SyndicateConfig),
    {
        let Some(handle) = self.store.get_for_write(id) else {
            return false;
        };

        {
            let mut record = handle.lock();
            if !record
                .member(actor_id)
                .is_some_and(|actor| actor.role.can_modify_config())
            {
                debug!(syndicate_id = id, actor_id, "Config change not permitted");
                return false;
            }

            let mut next = record.config.clone();
            edit(&mut next);
            if next.id != record.config.id || next.max_members < record.members.len() {
                debug!(syndicate_id = id, actor_id, "Rejected invalid config change");
                return false;
            }
            record.config = next;
        }

        info!(syndicate_id = id, actor_id, "Syndicate config updated");
        self.events.publish(SyndicateEvent::ConfigUpdated {
            syndicate_id: id.to_string(),
            updated_by: actor_id.to_string(),
        });
        true
    }

    /// Credit value a member brought in; returns the member's new total
    pub fn record_contribution(&self, id: &str, agent_id: &str, amount: TokenAmount) -> Option<TokenAmount> {
        let handle = self.store.get_for_write(id)?;
        let total = {
            let mut record = handle.lock();
            let member = record.member_mut(agent_id)?;
            member.contribution = member.contribution.saturating_add(amount);
            member.contribution
        };

        debug!(syndicate_id = id, agent_id, amount = %amount, total = %total, "Contribution recorded");
        self.events.publish(SyndicateEvent::ContributionRecorded {
            syndicate_id: id.to_string(),
            agent_id: agent_id.to_string(),
            amount,
            total,
        });
        Some(total)
    }

    pub fn set_member_status(&self, id: &str, agent_id: &str, status: MemberStatus) -> bool {
        let Some(handle) = self.store.get_for_write(id) else {
            return false;
        };

        {
            let mut record = handle.lock();
            let Some(member) = record.member_mut(agent_id) else {
                return false;
            };
            member.status = status;
        }

        self.events.publish(SyndicateEvent::MemberStatusChanged {
            syndicate_id: id.to_string(),
            agent_id: agent_id.to_string(),
            status,
        });
        true
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Create a pending task
    pub fn create_task(&self, id: &str, task: NewTask) -> Option<TaskId> {
        let handle = self.store.get_for_write(id)?;
        let task_id = TaskId::new();

        handle.lock().active_tasks.push(SyndicateTask {
            id: task_id,
            syndicate_id: id.to_string(),
            description: task.description,
            required_capabilities: task.required_capabilities,
            priority: task.priority,
            status: TaskStatus::Pending,
            assignments: Vec::new(),
            created_at: self.clock.now(),
            completed_at: None,
        });

        debug!(syndicate_id = id, task_id = %task_id, "Task created");
        self.events.publish(SyndicateEvent::TaskCreated {
            syndicate_id: id.to_string(),
            task_id,
        });
        Some(task_id)
    }

    /// Assign a pending task to the highest-scoring eligible member.
    ///
    /// Eligible means active and holding every required capability. Ties go to
    /// the member who joined first. Returns `None` (task stays pending) when
    /// nobody is eligible.
    pub fn assign_task(&self, id: &str, task_id: &TaskId) -> Option<TaskAssignment> {
        let handle = self.store.get_for_write(id)?;

        let (assignment, score) = {
            let mut record = handle.lock();
            let required = {
                let task = record.active_tasks.iter().find(|t| &t.id == task_id)?;
                if task.status != TaskStatus::Pending {
                    debug!(syndicate_id = id, task_id = %task_id, status = ?task.status, "Task is not assignable");
                    return None;
                }
                task.required_capabilities.clone()
            };

            let mut ranked: Vec<(&SyndicateMember, f64)> = record
                .members
                .iter()
                .filter(|m| m.is_active() && m.has_capabilities(&required))
                .map(|m| (m, m.reputation.score()))
                .collect();
            // stable: equal scores keep membership order
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

            let Some((best, score)) = ranked.first().map(|(m, s)| (m.agent_id.clone(), *s)) else {
                debug!(syndicate_id = id, task_id = %task_id, "No eligible member for task");
                return None;
            };

            let assignment = TaskAssignment {
                task_id: *task_id,
                agent_id: best,
                assigned_at: self.clock.now(),
                status: AssignmentStatus::Active,
                completed_at: None,
                result: None,
            };
            let task = record.task_mut(task_id)?;
            task.assignments.push(assignment.clone());
            task.status = TaskStatus::InProgress;
            (assignment, score)
        };

        info!(
            syndicate_id = id,
            task_id = %task_id,
            agent_id = %assignment.agent_id,
            score,
            "Task assigned"
        );
        self.events.publish(SyndicateEvent::TaskAssigned {
            syndicate_id: id.to_string(),
            task_id: *task_id,
            agent_id: assignment.agent_id.clone(),
            score,
        });
        Some(assignment)
    }

    /// Finish an assigned task.
    ///
    /// The task leaves the active set, earnings accrue to the syndicate, and the
    /// assignee's reputation moves with the outcome.
    pub fn complete_task(
        &self,
        id: &str,
        task_id: &TaskId,
        outcome: TaskOutcome,
    ) -> Option<SyndicateTask> {
        let handle = self.store.get_for_write(id)?;
        let now = self.clock.now();

        let (task, assignee, reputation_change) = {
            let mut record = handle.lock();
            let index = record
                .active_tasks
                .iter()
                .position(|t| &t.id == task_id)?;
            if !matches!(
                record.active_tasks[index].status,
                TaskStatus::Assigned | TaskStatus::InProgress
            ) {
                return None;
            }

            let mut task = record.active_tasks.remove(index);
            task.status = if outcome.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            task.completed_at = Some(now);

            let assignee = task.assignee().map(str::to_string);
            if let Some(assignment) = task
                .assignments
                .iter_mut()
                .rev()
                .find(|a| a.status == AssignmentStatus::Active)
            {
                assignment.status = if outcome.success {
                    AssignmentStatus::Completed
                } else {
                    AssignmentStatus::Failed
                };
                assignment.completed_at = Some(now);
                assignment.result = outcome.output.clone();
            }

            if let Some(earnings) = outcome.earnings {
                record.total_earnings = record.total_earnings.saturating_add(earnings);
                if let Some(member) = assignee.as_deref().and_then(|a| record.member_mut(a)) {
                    member.contribution = member.contribution.saturating_add(earnings);
                }
            }
            record.tasks_completed += 1;

            let update = if outcome.success {
                ReputationUpdate::TaskSucceeded
            } else {
                ReputationUpdate::TaskFailed
            };
            let reputation_change = assignee.as_deref().and_then(|agent_id| {
                apply_update(&mut record, agent_id, &update, now)
                    .map(|(old, new)| (agent_id.to_string(), old, new))
            });
            (task, assignee, reputation_change)
        };

        info!(
            syndicate_id = id,
            task_id = %task_id,
            success = outcome.success,
            "Task completed"
        );
        self.events.publish(SyndicateEvent::TaskCompleted {
            syndicate_id: id.to_string(),
            task_id: *task_id,
            agent_id: assignee,
            success: outcome.success,
            earnings: outcome.earnings,
        });
        if let Some((agent_id, old_score, new_score)) = reputation_change {
            self.events.publish(SyndicateEvent::ReputationChanged {
                syndicate_id: id.to_string(),
                agent_id,
                old_score,
                new_score,
            });
        }
        Some(task)
    }

    // ------------------------------------------------------------------
    // Reputation
    // ------------------------------------------------------------------

    /// Apply a reputation update; returns the new score
    pub fn update_reputation(
        &self,
        id: &str,
        agent_id: &str,
        update: ReputationUpdate,
    ) -> Option<f64> {
        let handle = self.store.get_for_write(id)?;
        let now = self.clock.now();
        let (old_score, new_score) = apply_update(&mut handle.lock(), agent_id, &update, now)?;

        debug!(syndicate_id = id, agent_id, old_score, new_score, "Reputation updated");
        self.events.publish(SyndicateEvent::ReputationChanged {
            syndicate_id: id.to_string(),
            agent_id: agent_id.to_string(),
            old_score,
            new_score,
        });
        Some(new_score)
    }

    /// Penalise a member. A member that drops below the syndicate minimum is
    /// suspended. Returns the new score.
    pub fn slash_member(&self, id: &str, agent_id: &str, amount: f64, reason: &str) -> Option<f64> {
        let handle = self.store.get_for_write(id)?;
        let update = ReputationUpdate::Slashed {
            amount,
            reason: reason.to_string(),
        };

        let now = self.clock.now();

        let (old_score, new_score, suspended) = {
            let mut record = handle.lock();
            let min = record.config.min_reputation;
            let (old_score, new_score) = apply_update(&mut record, agent_id, &update, now)?;
            let member = record.member_mut(agent_id)?;
            let suspended = new_score < min && member.status != MemberStatus::Suspended;
            if suspended {
                member.status = MemberStatus::Suspended;
            }
            (old_score, new_score, suspended)
        };

        warn!(syndicate_id = id, agent_id, amount, reason, suspended, "Member slashed");
        self.events.publish(SyndicateEvent::ReputationChanged {
            syndicate_id: id.to_string(),
            agent_id: agent_id.to_string(),
            old_score,
            new_score,
        });
        self.events.publish(SyndicateEvent::MemberSlashed {
            syndicate_id: id.to_string(),
            agent_id: agent_id.to_string(),
            amount,
            reason: reason.to_string(),
            suspended,
        });
        Some(new_score)
    }

    /// Up to `count` most recent reputation changes of a member, oldest first
    pub fn reputation_history(&self, id: &str, agent_id: &str, count: usize) -> Option<Vec<ReputationChange>> {
        let handle = self.store.get(id)?;
        let record = handle.lock();
        record.member(agent_id)?;
        Some(
            record
                .reputation_history
                .get(agent_id)
                .map(|h| h.recent(count))
                .unwrap_or_default(),
        )
    }

    /// Net reputation movement of a member over the last seven days
    pub fn weekly_trend(&self, id: &str, agent_id: &str) -> Option<f64> {
        let handle = self.store.get(id)?;
        let record = handle.lock();
        record.member(agent_id)?;
        Some(weekly_trend_of(&record, agent_id, self.clock.now()))
    }

    /// The `count` highest-scoring members; equal scores keep membership order
    pub fn leaderboard(&self, id: &str, count: usize) -> Option<Vec<LeaderboardEntry>> {
        let handle = self.store.get(id)?;
        let record = handle.lock();
        let now = self.clock.now();

        let mut entries: Vec<LeaderboardEntry> = record
            .members
            .iter()
            .map(|m| LeaderboardEntry {
                agent_id: m.agent_id.clone(),
                role: m.role,
                score: m.reputation.score(),
                level: m.reputation.level(),
                contribution: m.contribution,
                weekly_trend: weekly_trend_of(&record, &m.agent_id, now),
            })
            .collect();
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));
        entries.truncate(count);
        Some(entries)
    }

    // ------------------------------------------------------------------
    // Earnings
    // ------------------------------------------------------------------

    /// Split `total` across active members in proportion to reputation.
    ///
    /// The flooring remainder follows the syndicate's `RemainderPolicy`. An empty
    /// active set yields an empty distribution with the whole amount as remainder.
    /// Under `HighestWeight` the remainder is handed out one unit at a time in
    /// descending weight order, so every share stays within one unit of its
    /// proportional value.
    pub fn distribute_earnings(&self, id: &str, total: TokenAmount) -> Option<EarningsDistribution> {
        let handle = self.store.get_for_write(id)?;

        let distribution = {
            let mut record = handle.lock();
            let policy = record.config.remainder_policy;

            let active: Vec<(&str, u64)> = record
                .members
                .iter()
                .filter(|m| m.is_active())
                .map(|m| (m.agent_id.as_str(), share_weight(m.reputation.score())))
                .collect();
            let weights: Vec<u64> = active.iter().map(|(_, w)| *w).collect();
            let (amounts, remainder) = proportional_split(total.0, &weights);

            let mut shares: Vec<MemberShare> = active
                .iter()
                .zip(amounts)
                .map(|((agent_id, weight), amount)| MemberShare {
                    agent_id: agent_id.to_string(),
                    weight: *weight,
                    amount: TokenAmount(amount),
                })
                .collect();

            match policy {
                RemainderPolicy::HighestWeight if !shares.is_empty() => {
                    // stable: equal weights keep membership order
                    let mut order: Vec<usize> = (0..shares.len()).collect();
                    order.sort_by_key(|&i| std::cmp::Reverse(shares[i].weight));
                    let mut left = remainder;
                    for &i in order.iter().cycle() {
                        if left == 0 {
                            break;
                        }
                        shares[i].amount = shares[i].amount.saturating_add(TokenAmount(1));
                        left -= 1;
                    }
                }
                _ => record.treasury = record.treasury.saturating_add(TokenAmount(remainder)),
            }

            EarningsDistribution {
                syndicate_id: id.to_string(),
                total,
                shares,
                remainder: TokenAmount(remainder),
                remainder_policy: policy,
            }
        };

        info!(
            syndicate_id = id,
            total = %total,
            members = distribution.shares.len(),
            remainder = %distribution.remainder,
            "Earnings distributed"
        );
        self.events.publish(SyndicateEvent::EarningsDistributed {
            syndicate_id: id.to_string(),
            total,
            distributed: distribution.distributed(),
            remainder: distribution.remainder,
        });
        Some(distribution)
    }

    pub fn stats(&self, id: &str) -> Option<SyndicateStats> {
        let handle = self.store.get(id)?;
        let record = handle.lock();

        let member_count = record.members.len();
        let average_reputation = if member_count == 0 {
            0.0
        } else {
            record.members.iter().map(|m| m.reputation.score()).sum::<f64>() / member_count as f64
        };

        Some(SyndicateStats {
            syndicate_id: id.to_string(),
            member_count,
            active_members: record.members.iter().filter(|m| m.is_active()).count(),
            active_tasks: record.active_tasks.len(),
            tasks_completed: record.tasks_completed,
            total_earnings: record.total_earnings,
            treasury: record.treasury,
            average_reputation,
        })
    }
}

/// The single reputation mutation path; returns `(old, new)` scores
fn apply_update(
    record: &mut SyndicateRecord,
    agent_id: &str,
    update: &ReputationUpdate,
    now: DateTime<Utc>,
) -> Option<(f64, f64)> {
    let member = record.member_mut(agent_id)?;
    let old = member.reputation.score();
    member.reputation = member.reputation.apply(update);
    let new = member.reputation.score();

    record
        .reputation_history
        .entry(agent_id.to_string())
        .or_default()
        .record(ReputationChange {
            update: update.clone(),
            delta: new - old,
            score_after: new,
            at: now,
        });
    Some((old, new))
}

fn weekly_trend_of(record: &SyndicateRecord, agent_id: &str, now: DateTime<Utc>) -> f64 {
    record
        .reputation_history
        .get(agent_id)
        .map(|h| h.weekly_trend(now))
        .unwrap_or(0.0)
}
