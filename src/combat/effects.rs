//! Active conditions on a single combatant
//!
//! Durations count rounds and tick at the start of the holder's turn:
//! - A positive duration decrements each tick and the condition is removed
//!   when it reaches exactly 0
//! - A duration of -1 is indefinite ("until removed" or "save ends")
//! - Re-applying a present condition only ever extends it

use serde::{Deserialize, Serialize};

use super::rules::Ability;

/// Duration marker for conditions that never expire on their own
pub const INDEFINITE: i32 = -1;

/// A condition instance attached to a combatant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCondition {
    pub condition_id: String,
    /// Who applied this condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Remaining rounds, or -1 for indefinite
    pub duration_rounds: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_ends_dc: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_stat: Option<Ability>,
}

impl ActiveCondition {
    pub fn new(condition_id: impl Into<String>, duration_rounds: i32) -> Self {
        Self {
            condition_id: condition_id.into().trim().to_lowercase(),
            source_id: None,
            duration_rounds,
            save_ends_dc: None,
            save_stat: None,
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// The holder may shake this off with a save of `stat` against `dc`
    pub fn with_save_ends(mut self, dc: i32, stat: Ability) -> Self {
        self.save_ends_dc = Some(dc);
        self.save_stat = Some(stat);
        self
    }

    pub fn is_indefinite(&self) -> bool {
        self.duration_rounds < 0
    }
}

/// Conditions on one combatant, at most one entry per condition id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionState {
    conditions: Vec<ActiveCondition>,
}

impl ConditionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition. Returns true if it was not already present.
    ///
    /// An existing entry is extended only when the new duration is strictly
    /// longer or indefinite.
    pub fn add(&mut self, condition: ActiveCondition) -> bool {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| same_condition(&c.condition_id, &condition.condition_id))
        {
            if existing.is_indefinite() {
                return false;
            }
            if condition.is_indefinite() || condition.duration_rounds > existing.duration_rounds
            {
                *existing = condition;
            }
            false
        } else {
            self.conditions.push(condition);
            true
        }
    }

    /// Remove a condition by id. Returns true if it was present.
    pub fn remove(&mut self, condition_id: &str) -> bool {
        let before = self.conditions.len();
        self.conditions
            .retain(|c| !same_condition(&c.condition_id, condition_id));
        self.conditions.len() != before
    }

    pub fn has(&self, condition_id: &str) -> bool {
        self.get(condition_id).is_some()
    }

    pub fn get(&self, condition_id: &str) -> Option<&ActiveCondition> {
        self.conditions
            .iter()
            .find(|c| same_condition(&c.condition_id, condition_id))
    }

    pub fn ids(&self) -> Vec<String> {
        self.conditions
            .iter()
            .map(|c| c.condition_id.clone())
            .collect()
    }

    pub fn as_slice(&self) -> &[ActiveCondition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn clear(&mut self) {
        self.conditions.clear();
    }

    /// Start-of-turn bookkeeping: decrement every timed condition and drop
    /// those that reach 0. Returns the ids that expired.
    pub fn tick(&mut self) -> Vec<String> {
        for condition in &mut self.conditions {
            if condition.duration_rounds > 0 {
                condition.duration_rounds -= 1;
            }
        }

        let mut expired = Vec::new();
        self.conditions.retain(|c| {
            if c.duration_rounds == 0 {
                expired.push(c.condition_id.clone());
                false
            } else {
                true
            }
        });
        expired
    }
}

/// Condition ids compare trimmed and case-insensitively
fn same_condition(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
