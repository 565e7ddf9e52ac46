//! Agent profile and runtime state

use chrono::{DateTime, Utc};
use meshwork_types::TokenAmount;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Specialisation of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Security,
    Trading,
    Governance,
    Custom,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentType::Security => "security",
            AgentType::Trading => "trading",
            AgentType::Governance => "governance",
            AgentType::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "security" => Ok(AgentType::Security),
            "trading" => Ok(AgentType::Trading),
            "governance" => Ok(AgentType::Governance),
            "custom" => Ok(AgentType::Custom),
            other => Err(format!("unknown agent type: {}", other)),
        }
    }
}

/// Static description of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_type,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Active,
    Idle,
    Busy,
    Offline,
}

/// Mutable counters reported by `/state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub status: AgentStatus,
    pub last_activity: DateTime<Utc>,
    pub tasks_completed: u64,
    pub reputation: f64,
    /// Minor units, serialized as a decimal string
    pub earnings: TokenAmount,
}

impl AgentState {
    /// Fresh agents start active with a neutral reputation
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: AgentStatus::Active,
            last_activity: now,
            tasks_completed: 0,
            reputation: 50.0,
            earnings: TokenAmount::ZERO,
        }
    }
}
