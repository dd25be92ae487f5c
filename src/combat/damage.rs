//! Damage mitigation
//!
//! Damage types are free-form strings matched case-insensitively:
//! - Immunity (0% damage) wins over everything
//! - Resistance (50% damage, rounded down)
//! - Anything unrecognized is ordinary damage

use serde::{Deserialize, Serialize};

/// Modifier for damage resistance/immunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageModifier {
    /// Immune - takes 0% damage
    Immune,
    /// Resistant - takes 50% damage (rounded down)
    Resistant,
    /// Normal - takes 100% damage
    Normal,
}

impl DamageModifier {
    /// Apply this modifier to a non-negative damage amount
    pub fn apply(&self, damage: i32) -> i32 {
        let damage = damage.max(0);
        match self {
            DamageModifier::Immune => 0,
            DamageModifier::Resistant => damage / 2,
            DamageModifier::Normal => damage,
        }
    }
}

/// Damage profile for a combatant (their resistances/immunities)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageProfile {
    #[serde(default)]
    pub resistances: Vec<String>,
    #[serde(default)]
    pub immunities: Vec<String>,
}

impl DamageProfile {
    /// Create a new empty damage profile (all normal)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resistance(mut self, damage_type: impl Into<String>) -> Self {
        self.resistances.push(damage_type.into());
        self
    }

    pub fn with_immunity(mut self, damage_type: impl Into<String>) -> Self {
        self.immunities.push(damage_type.into());
        self
    }

    /// Get the modifier for a damage type
    pub fn get(&self, damage_type: &str) -> DamageModifier {
        let damage_type = damage_type.trim();
        let listed = |types: &[String]| {
            types
                .iter()
                .any(|t| t.trim().eq_ignore_ascii_case(damage_type))
        };

        if listed(&self.immunities) {
            DamageModifier::Immune
        } else if listed(&self.resistances) {
            DamageModifier::Resistant
        } else {
            DamageModifier::Normal
        }
    }

    /// Calculate damage after applying modifiers
    pub fn calculate(&self, amount: i32, damage_type: &str) -> i32 {
        self.get(damage_type).apply(amount)
    }

    /// A copy of this profile that also resists `damage_type`, used when a
    /// condition grants resistance to everything
    pub fn resisting(&self, damage_type: &str) -> Self {
        let mut profile = self.clone();
        profile.resistances.push(damage_type.to_string());
        profile
    }
}
