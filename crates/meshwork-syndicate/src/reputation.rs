//! Reputation model
//!
//! A member's reputation is either a single score or a composite record. Both
//! live in `[0, 100]` and reduce to one scalar for ranking and earnings weight.
//! Every applied update is remembered in a bounded per-member history.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Changes kept per member
pub const HISTORY_LIMIT: usize = 100;

fn clamp(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_SCORE;
    }
    value.clamp(MIN_SCORE, MAX_SCORE)
}

/// Composite reputation record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationScore {
    pub overall: f64,
    pub reliability: f64,
    pub accuracy: f64,
    pub speed: f64,
    pub cost_efficiency: f64,
}

impl ReputationScore {
    /// Every component set to `value`
    pub fn uniform(value: f64) -> Self {
        let v = clamp(value);
        Self {
            overall: v,
            reliability: v,
            accuracy: v,
            speed: v,
            cost_efficiency: v,
        }
    }

    /// `0.30·overall + 0.25·reliability + 0.25·accuracy + 0.10·speed + 0.10·costEfficiency`
    pub fn weighted(&self) -> f64 {
        0.30 * self.overall
            + 0.25 * self.reliability
            + 0.25 * self.accuracy
            + 0.10 * self.speed
            + 0.10 * self.cost_efficiency
    }

    fn shifted(&self, delta: f64) -> Self {
        Self {
            overall: clamp(self.overall + delta),
            reliability: clamp(self.reliability + delta),
            accuracy: clamp(self.accuracy + delta),
            speed: clamp(self.speed + delta),
            cost_efficiency: clamp(self.cost_efficiency + delta),
        }
    }
}

/// Member reputation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reputation {
    Scalar(f64),
    Composite(ReputationScore),
}

impl Reputation {
    /// Scalar used for ranking and earnings weight
    pub fn score(&self) -> f64 {
        match self {
            Reputation::Scalar(v) => clamp(*v),
            Reputation::Composite(c) => clamp(c.weighted()),
        }
    }

    pub fn level(&self) -> ReputationLevel {
        ReputationLevel::from_score(self.score())
    }

    /// Shift by `delta`, clamping into range. A composite moves every component
    /// so its weighted score moves by `delta` as well.
    fn shifted(&self, delta: f64) -> Self {
        match self {
            Reputation::Scalar(v) => Reputation::Scalar(clamp(v + delta)),
            Reputation::Composite(c) => Reputation::Composite(c.shifted(delta)),
        }
    }

    pub fn apply(&self, update: &ReputationUpdate) -> Self {
        match update {
            ReputationUpdate::Set { reputation } => match reputation {
                Reputation::Scalar(v) => Reputation::Scalar(clamp(*v)),
                Reputation::Composite(c) => Reputation::Composite(c.shifted(0.0)),
            },
            other => self.shifted(other.delta()),
        }
    }
}

impl From<f64> for Reputation {
    fn from(v: f64) -> Self {
        Reputation::Scalar(v)
    }
}

impl From<ReputationScore> for Reputation {
    fn from(c: ReputationScore) -> Self {
        Reputation::Composite(c)
    }
}

impl Default for Reputation {
    fn default() -> Self {
        Reputation::Scalar(50.0)
    }
}

/// Reputation tier derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationLevel {
    Newcomer,
    Verified,
    Established,
    Trusted,
    Elite,
    Legendary,
}

impl ReputationLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 20.0 => Self::Newcomer,
            s if s < 40.0 => Self::Verified,
            s if s < 60.0 => Self::Established,
            s if s < 80.0 => Self::Trusted,
            s if s < 100.0 => Self::Elite,
            _ => Self::Legendary,
        }
    }

    pub fn min_score(&self) -> f64 {
        match self {
            Self::Newcomer => 0.0,
            Self::Verified => 20.0,
            Self::Established => 40.0,
            Self::Trusted => 60.0,
            Self::Elite => 80.0,
            Self::Legendary => 100.0,
        }
    }
}

/// The only ways a member's reputation may change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReputationUpdate {
    TaskSucceeded,
    TaskFailed,
    AttestationVerified,
    AttestationExpired,
    Slashed { amount: f64, reason: String },
    Adjustment { delta: f64, reason: String },
    Set { reputation: Reputation },
}

impl ReputationUpdate {
    pub fn delta(&self) -> f64 {
        match self {
            Self::TaskSucceeded => 2.0,
            Self::TaskFailed => -5.0,
            Self::AttestationVerified => 5.0,
            Self::AttestationExpired => -10.0,
            Self::Slashed { amount, .. } => -amount.abs(),
            Self::Adjustment { delta, .. } => *delta,
            Self::Set { .. } => 0.0,
        }
    }
}

/// One applied reputation update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationChange {
    pub update: ReputationUpdate,
    /// Actual movement after clamping
    pub delta: f64,
    pub score_after: f64,
    pub at: DateTime<Utc>,
}

/// Most recent reputation changes of one member, oldest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReputationHistory {
    changes: VecDeque<ReputationChange>,
    total: u64,
}

impl ReputationHistory {
    pub fn record(&mut self, change: ReputationChange) {
        if self.changes.len() == HISTORY_LIMIT {
            self.changes.pop_front();
        }
        self.changes.push_back(change);
        self.total += 1;
    }

    /// Up to `count` newest changes, oldest first
    pub fn recent(&self, count: usize) -> Vec<ReputationChange> {
        let skip = self.changes.len().saturating_sub(count);
        self.changes.iter().skip(skip).cloned().collect()
    }

    /// Net movement over the seven days before `now`
    pub fn weekly_trend(&self, now: DateTime<Utc>) -> f64 {
        let since = now - Duration::days(7);
        self.changes
            .iter()
            .filter(|c| c.at >= since)
            .map(|c| c.delta)
            .sum()
    }

    /// Updates applied over the member's lifetime, including evicted ones
    pub fn total_updates(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_weighting() {
        let c = ReputationScore {
            overall: 100.0,
            reliability: 80.0,
            accuracy: 60.0,
            speed: 40.0,
            cost_efficiency: 20.0,
        };
        // 30 + 20 + 15 + 4 + 2
        assert!((Reputation::from(c).score() - 71.0).abs() < 1e-9);
    }

    #[test]
    fn scalar_is_used_as_is() {
        assert_eq!(Reputation::Scalar(42.5).score(), 42.5);
    }

    #[test]
    fn updates_clamp() {
        let high = Reputation::Scalar(99.0).apply(&ReputationUpdate::TaskSucceeded);
        assert_eq!(high.score(), 100.0);

        let low = Reputation::Scalar(3.0).apply(&ReputationUpdate::Slashed {
            amount: 25.0,
            reason: "double signing".into(),
        });
        assert_eq!(low.score(), 0.0);
    }

    #[test]
    fn composite_shift_moves_score_by_delta() {
        let rep = Reputation::Composite(ReputationScore::uniform(50.0));
        let next = rep.apply(&ReputationUpdate::TaskFailed);
        assert!((next.score() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn levels() {
        assert_eq!(ReputationLevel::from_score(0.0), ReputationLevel::Newcomer);
        assert_eq!(ReputationLevel::from_score(20.0), ReputationLevel::Verified);
        assert_eq!(ReputationLevel::from_score(59.9), ReputationLevel::Established);
        assert_eq!(ReputationLevel::from_score(79.0), ReputationLevel::Trusted);
        assert_eq!(ReputationLevel::from_score(99.99), ReputationLevel::Elite);
        assert_eq!(ReputationLevel::from_score(100.0), ReputationLevel::Legendary);
        assert_eq!(ReputationLevel::Trusted.min_score(), 60.0);
    }

    #[test]
    fn untagged_serde() {
        let scalar: Reputation = serde_json::from_str("75").unwrap();
        assert_eq!(scalar, Reputation::Scalar(75.0));
        let composite: Reputation = serde_json::from_str(
            r#"{"overall":1,"reliability":2,"accuracy":3,"speed":4,"costEfficiency":5}"#,
        )
        .unwrap();
        assert!(matches!(composite, Reputation::Composite(_)));
    }

    fn change(delta: f64, at: DateTime<Utc>) -> ReputationChange {
        ReputationChange {
            update: ReputationUpdate::Adjustment {
                delta,
                reason: "test".into(),
            },
            delta,
            score_after: 50.0 + delta,
            at,
        }
    }

    #[test]
    fn history_is_bounded() {
        let now = Utc::now();
        let mut history = ReputationHistory::default();
        for i in 0..(HISTORY_LIMIT + 20) {
            history.record(change(i as f64, now));
        }
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.total_updates(), (HISTORY_LIMIT + 20) as u64);

        let recent = history.recent(3);
        let deltas: Vec<f64> = recent.iter().map(|c| c.delta).collect();
        assert_eq!(deltas, vec![117.0, 118.0, 119.0]);
        assert_eq!(history.recent(1_000).len(), HISTORY_LIMIT);
    }

    #[test]
    fn weekly_trend_ignores_old_changes() {
        let now = Utc::now();
        let mut history = ReputationHistory::default();
        history.record(change(-5.0, now - Duration::days(8)));
        history.record(change(2.0, now - Duration::days(3)));
        history.record(change(2.0, now));
        assert_eq!(history.weekly_trend(now), 4.0);
    }
}
