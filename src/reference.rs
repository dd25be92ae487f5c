//! Read-only reference data: weapon, spell and monster stat blocks
//!
//! Stat blocks are validated when loaded, so a bad entry fails the load
//! rather than a combat step. Lookups that miss degrade to conservative
//! defaults at the call site.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::combat::{Ability, ConditionRegistry, DiceSpec, ScriptedAction};

/// Starter library compiled into the binary
const STARTER_LIBRARY: &str = include_str!("../data/srd_starter.json");

/// Reference data errors
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to read reference data: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse reference data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {kind} '{id}': {reason}")]
    Invalid {
        kind: &'static str,
        id: String,
        reason: String,
    },
}

/// Lookup of stat blocks by string id
pub trait ReferenceData: Send + Sync {
    fn weapon(&self, id: &str) -> Option<&WeaponStats>;
    fn spell(&self, id: &str) -> Option<&SpellStats>;
    fn monster(&self, id: &str) -> Option<&MonsterStats>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponStats {
    pub name: String,
    pub damage: DiceSpec,
    pub damage_type: String,
    #[serde(default)]
    pub properties: Vec<String>,
}

impl WeaponStats {
    /// Improvised fallback: 1d4 bludgeoning
    pub fn fallback() -> Self {
        Self {
            name: "Improvised Weapon".to_string(),
            damage: DiceSpec::single(4),
            damage_type: "bludgeoning".to_string(),
            properties: Vec::new(),
        }
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .iter()
            .any(|p| p.eq_ignore_ascii_case(property))
    }

    pub fn is_ranged(&self) -> bool {
        self.has_property("ranged") || self.has_property("ammunition")
    }

    /// Attacks with this weapon use DEX rather than STR
    pub fn uses_dex(&self) -> bool {
        self.has_property("finesse") || self.is_ranged()
    }
}

fn default_half_on_success() -> bool {
    true
}

fn default_condition_rounds() -> i32 {
    1
}

fn default_spell_damage_type() -> String {
    "force".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellStats {
    pub name: String,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub damage: Option<DiceSpec>,
    #[serde(default = "default_spell_damage_type")]
    pub damage_type: String,
    /// Ability the target saves with; `None` for attack-roll spells
    #[serde(default)]
    pub save_stat: Option<Ability>,
    #[serde(default = "default_half_on_success")]
    pub half_on_success: bool,
    #[serde(default)]
    pub requires_attack_roll: bool,
    /// Condition imposed on a failed save
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "default_condition_rounds")]
    pub condition_rounds: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterStats {
    pub name: String,
    pub ac: i32,
    pub hp_max: i32,
    #[serde(default)]
    pub cr: f32,
    #[serde(default)]
    pub creature_type: String,
    #[serde(default)]
    pub dex_modifier: i32,
    #[serde(default)]
    pub actions: Vec<ScriptedAction>,
    #[serde(default)]
    pub resistances: Vec<String>,
    #[serde(default)]
    pub immunities: Vec<String>,
}

/// JSON-backed reference library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceLibrary {
    #[serde(default)]
    weapons: BTreeMap<String, WeaponStats>,
    #[serde(default)]
    spells: BTreeMap<String, SpellStats>,
    #[serde(default)]
    monsters: BTreeMap<String, MonsterStats>,
}

impl ReferenceLibrary {
    /// The bundled starter library
    pub fn starter() -> Result<Self, ReferenceError> {
        Self::from_json_str(STARTER_LIBRARY)
    }

    /// Parse and validate a library
    pub fn from_json_str(json: &str) -> Result<Self, ReferenceError> {
        let library: Self = serde_json::from_str(json)?;
        library.validate()?;
        Ok(library)
    }

    /// Load a library file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let library = Self::from_json_str(&json)?;
        info!(
            "Loaded reference data from {}: {} weapons, {} spells, {} monsters",
            path.display(),
            library.weapons.len(),
            library.spells.len(),
            library.monsters.len()
        );
        Ok(library)
    }

    /// Check what the type system can't: known conditions, usable spells,
    /// named actions, positive hit points
    pub fn validate(&self) -> Result<(), ReferenceError> {
        let registry = ConditionRegistry::global();

        for (id, spell) in &self.spells {
            let invalid = |reason: &str| ReferenceError::Invalid {
                kind: "spell",
                id: id.clone(),
                reason: reason.to_string(),
            };
            if let Some(condition) = &spell.condition {
                if !registry.contains(condition) {
                    return Err(invalid(&format!("unknown condition {}", condition)));
                }
            }
            if spell.damage.is_none() && spell.condition.is_none() {
                return Err(invalid("neither damage nor condition"));
            }
            if spell.save_stat.is_none() && !spell.requires_attack_roll {
                return Err(invalid("needs a save or an attack roll"));
            }
            if spell.requires_attack_roll && spell.damage.is_none() {
                return Err(invalid("attack roll without damage"));
            }
        }

        for (id, monster) in &self.monsters {
            let invalid = |reason: &str| ReferenceError::Invalid {
                kind: "monster",
                id: id.clone(),
                reason: reason.to_string(),
            };
            if monster.hp_max < 1 {
                return Err(invalid("hp_max must be positive"));
            }
            if monster.actions.iter().any(|a| a.name.trim().is_empty()) {
                return Err(invalid("action without a name"));
            }
        }

        Ok(())
    }
}

impl ReferenceData for ReferenceLibrary {
    fn weapon(&self, id: &str) -> Option<&WeaponStats> {
        self.weapons.get(id)
    }

    fn spell(&self, id: &str) -> Option<&SpellStats> {
        self.spells.get(id)
    }

    fn monster(&self, id: &str) -> Option<&MonsterStats> {
        self.monsters.get(id)
    }
}

/// Weapon by id, or the improvised fallback when it is missing
pub fn weapon_or_fallback(reference: &dyn ReferenceData, id: &str) -> WeaponStats {
    match reference.weapon(id) {
        Some(weapon) => weapon.clone(),
        None => {
            warn!("Unknown weapon {}, using fallback", id);
            WeaponStats::fallback()
        }
    }
}
