//! Syndicate data model

use chrono::{DateTime, Utc};
use meshwork_types::{TaskId, TokenAmount};
use serde::{Deserialize, Serialize};

use crate::reputation::{Reputation, ReputationLevel};

/// What a syndicate is organised around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyndicateStrategy {
    SecurityAudit,
    Trading,
    Governance,
    General,
}

/// Where the flooring remainder of an earnings split goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemainderPolicy {
    /// Credited to the syndicate treasury
    #[default]
    Treasury,
    /// Added to the first member with the highest weight
    HighestWeight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyndicateConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub strategy: SyndicateStrategy,
    pub max_members: usize,
    /// Minimum reputation score to join and to stay unsuspended after slashing
    pub min_reputation: f64,
    /// Capabilities every member must have
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub remainder_policy: RemainderPolicy,
}

impl SyndicateConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, strategy: SyndicateStrategy) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            strategy,
            max_members: 10,
            min_reputation: 0.0,
            required_capabilities: Vec::new(),
            remainder_policy: RemainderPolicy::default(),
        }
    }

    pub fn with_max_members(mut self, max: usize) -> Self {
        self.max_members = max;
        self
    }

    pub fn with_min_reputation(mut self, min: f64) -> Self {
        self.min_reputation = min;
        self
    }

    pub fn with_required_capabilities(mut self, caps: &[&str]) -> Self {
        self.required_capabilities = caps.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_remainder_policy(mut self, policy: RemainderPolicy) -> Self {
        self.remainder_policy = policy;
        self
    }
}

/// What a member may do to the rest of the syndicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Created the syndicate; exactly one, never expelled
    Founder,
    Admin,
    /// May admit and expel regular members
    Approver,
    Member,
}

impl MemberRole {
    pub fn can_approve_members(&self) -> bool {
        matches!(self, Self::Approver | Self::Admin | Self::Founder)
    }

    /// Changing roles and syndicate settings
    pub fn can_modify_config(&self) -> bool {
        matches!(self, Self::Founder)
    }

    /// Members may only act on roles strictly below their own
    pub fn outranks(&self, other: MemberRole) -> bool {
        self.rank() > other.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Member => 0,
            Self::Approver => 1,
            Self::Admin => 2,
            Self::Founder => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyndicateMember {
    pub agent_id: String,
    pub role: MemberRole,
    /// Operator-assigned weight; informational, earnings follow reputation
    pub weight: u32,
    pub reputation: Reputation,
    pub capabilities: Vec<String>,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
    /// Value the member has brought in, including task earnings
    #[serde(default)]
    pub contribution: TokenAmount,
}

impl SyndicateMember {
    pub fn new(agent_id: impl Into<String>, reputation: impl Into<Reputation>, capabilities: &[&str]) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: MemberRole::Member,
            weight: 1,
            reputation: reputation.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            status: MemberStatus::Active,
            joined_at: Utc::now(),
            contribution: TokenAmount::ZERO,
        }
    }

    pub fn with_role(mut self, role: MemberRole) -> Self {
        self.role = role;
        self
    }

    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|r| self.capabilities.contains(r))
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub agent_id: String,
    pub assigned_at: DateTime<Utc>,
    pub status: AssignmentStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyndicateTask {
    pub id: TaskId,
    pub syndicate_id: String,
    pub description: String,
    pub required_capabilities: Vec<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub assignments: Vec<TaskAssignment>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyndicateTask {
    /// Agent holding the current assignment
    pub fn assignee(&self) -> Option<&str> {
        self.assignments
            .iter()
            .rev()
            .find(|a| a.status == AssignmentStatus::Active)
            .map(|a| a.agent_id.as_str())
    }
}

/// Parameters for `create_task`
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub description: String,
    pub required_capabilities: Vec<String>,
    pub priority: TaskPriority,
}

impl NewTask {
    pub fn new(description: impl Into<String>, required_capabilities: &[&str]) -> Self {
        Self {
            description: description.into(),
            required_capabilities: required_capabilities.iter().map(|c| c.to_string()).collect(),
            priority: TaskPriority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Result reported by the member that worked a task
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub earnings: Option<TokenAmount>,
}

impl TaskOutcome {
    pub fn success(output: impl Into<String>, earnings: TokenAmount) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            earnings: Some(earnings),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Some(output.into()),
            earnings: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberShare {
    pub agent_id: String,
    pub weight: u64,
    pub amount: TokenAmount,
}

/// Result of splitting an amount across active members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsDistribution {
    pub syndicate_id: String,
    pub total: TokenAmount,
    /// In member order
    pub shares: Vec<MemberShare>,
    /// Flooring remainder and where it went
    pub remainder: TokenAmount,
    pub remainder_policy: RemainderPolicy,
}

impl EarningsDistribution {
    pub fn amount_for(&self, agent_id: &str) -> Option<TokenAmount> {
        self.shares
            .iter()
            .find(|s| s.agent_id == agent_id)
            .map(|s| s.amount)
    }

    /// Sum paid out to members
    pub fn distributed(&self) -> TokenAmount {
        self.shares
            .iter()
            .fold(TokenAmount::ZERO, |acc, s| acc.saturating_add(s.amount))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyndicateStats {
    pub syndicate_id: String,
    pub member_count: usize,
    pub active_members: usize,
    pub active_tasks: usize,
    pub tasks_completed: u64,
    pub total_earnings: TokenAmount,
    pub treasury: TokenAmount,
    pub average_reputation: f64,
}

/// Ranked member as reported by `leaderboard`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub agent_id: String,
    pub role: MemberRole,
    pub score: f64,
    pub level: ReputationLevel,
    pub contribution: TokenAmount,
    /// Net reputation movement over the last seven days
    pub weekly_trend: f64,
}

/// Read-only copy of a syndicate's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyndicateSnapshot {
    pub config: SyndicateConfig,
    pub members: Vec<SyndicateMember>,
    pub active_tasks: Vec<SyndicateTask>,
    pub tasks_completed: u64,
    pub total_earnings: TokenAmount,
    pub treasury: TokenAmount,
    pub founder: Option<String>,
    pub created_at: DateTime<Utc>,
}
