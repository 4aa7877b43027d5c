//! How an NPC feels about one character.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest relationship score.
pub const SCORE_MIN: i8 = -10;
/// Highest relationship score.
pub const SCORE_MAX: i8 = 10;

/// Change to apply to a relationship. Values are unbounded; the result is
/// clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDelta {
    pub affection: i32,
    pub trust: i32,
    pub respect: i32,
}

impl RelationshipDelta {
    pub fn new(affection: i32, trust: i32, respect: i32) -> Self {
        Self {
            affection,
            trust,
            respect,
        }
    }

    pub fn affection(amount: i32) -> Self {
        Self::new(amount, 0, 0)
    }

    pub fn trust(amount: i32) -> Self {
        Self::new(0, amount, 0)
    }

    pub fn respect(amount: i32) -> Self {
        Self::new(0, 0, amount)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Affection, trust and respect toward one character, each in
/// `SCORE_MIN..=SCORE_MAX`, plus the history behind them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcRelationship {
    pub affection: i8,
    pub trust: i8,
    pub respect: i8,
    pub history: Vec<String>,
    pub last_interaction: Option<DateTime<Utc>>,
}

fn clamp_score(current: i8, delta: i32) -> i8 {
    (current as i32)
        .saturating_add(delta)
        .clamp(SCORE_MIN as i32, SCORE_MAX as i32) as i8
}

impl NpcRelationship {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrate stored scores. Out-of-range values are clamped.
    pub fn with_scores(affection: i8, trust: i8, respect: i8) -> Self {
        Self {
            affection: clamp_score(affection, 0),
            trust: clamp_score(trust, 0),
            respect: clamp_score(respect, 0),
            ..Self::default()
        }
    }

    /// Apply a delta, append the event and stamp the time.
    pub fn record(&mut self, event: impl Into<String>, delta: RelationshipDelta, at: DateTime<Utc>) {
        self.affection = clamp_score(self.affection, delta.affection);
        self.trust = clamp_score(self.trust, delta.trust);
        self.respect = clamp_score(self.respect, delta.respect);
        self.history.push(event.into());
        self.last_interaction = Some(at);
    }

    /// Sum of the three scores.
    pub fn total(&self) -> i32 {
        self.affection as i32 + self.trust as i32 + self.respect as i32
    }

    /// Modifier this relationship adds to behavior rolls.
    pub fn bias(&self) -> i8 {
        (self.total() / 6) as i8
    }

    pub fn recent_history(&self, count: usize) -> &[String] {
        let start = self.history.len().saturating_sub(count);
        &self.history[start..]
    }
}
