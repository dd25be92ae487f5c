//! Character arithmetic: ability modifiers, proficiency and armor class

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The six abilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    Str,
    Dex,
    Con,
    Int,
    Wis,
    Cha,
}

impl FromStr for Ability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "str" | "strength" => Ok(Ability::Str),
            "dex" | "dexterity" => Ok(Ability::Dex),
            "con" | "constitution" => Ok(Ability::Con),
            "int" | "intelligence" => Ok(Ability::Int),
            "wis" | "wisdom" => Ok(Ability::Wis),
            "cha" | "charisma" => Ok(Ability::Cha),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ability::Str => "str",
            Ability::Dex => "dex",
            Ability::Con => "con",
            Ability::Int => "int",
            Ability::Wis => "wis",
            Ability::Cha => "cha",
        };
        f.write_str(s)
    }
}

/// Per-ability modifiers (not scores)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityModifiers {
    pub str: i32,
    pub dex: i32,
    pub con: i32,
    pub int: i32,
    pub wis: i32,
    pub cha: i32,
}

impl AbilityModifiers {
    pub fn get(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Str => self.str,
            Ability::Dex => self.dex,
            Ability::Con => self.con,
            Ability::Int => self.int,
            Ability::Wis => self.wis,
            Ability::Cha => self.cha,
        }
    }

    /// Modifiers derived from raw ability scores, in str/dex/con/int/wis/cha order
    pub fn from_scores(scores: [i32; 6]) -> Self {
        let [s, d, c, i, w, ch] = scores.map(ability_modifier);
        Self {
            str: s,
            dex: d,
            con: c,
            int: i,
            wis: w,
            cha: ch,
        }
    }
}

/// Ability modifier from an ability score: floor((score - 10) / 2)
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}

/// Proficiency bonus by character level: +2 at 1-4, +3 at 5-8, ... +6 at 17-20.
/// `None` below level 1.
pub fn proficiency_bonus(level: u32) -> Option<i32> {
    if level < 1 {
        return None;
    }
    Some((level as i32 - 1) / 4 + 2)
}

/// Spell save DC at `level` with the given INT modifier: 8 + proficiency + INT
pub fn spell_save_dc(level: u32, int_modifier: i32) -> i32 {
    8 + proficiency_bonus(level).unwrap_or(2) + int_modifier
}

/// Spell attack bonus, five under the spell save DC
pub fn spell_attack_bonus(level: u32, int_modifier: i32) -> i32 {
    spell_save_dc(level, int_modifier) - 5
}

/// Armor weight class, which caps the DEX bonus to AC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmorType {
    Light,
    Medium,
    Heavy,
}

impl ArmorType {
    /// DEX modifier this armor allows
    pub fn dex_bonus(&self, dex_modifier: i32) -> i32 {
        match self {
            ArmorType::Light => dex_modifier,
            ArmorType::Medium => dex_modifier.min(2),
            ArmorType::Heavy => 0,
        }
    }
}

impl FromStr for ArmorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(ArmorType::Light),
            "medium" => Ok(ArmorType::Medium),
            "heavy" => Ok(ArmorType::Heavy),
            _ => Err(()),
        }
    }
}

/// Everything that can contribute to armor class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmorClassInputs {
    /// Armor's base AC; ignored unless `wears_armor`
    pub base_ac: i32,
    pub dex_modifier: i32,
    /// Weight class of the worn armor; no cap when unknown
    pub armor_type: Option<ArmorType>,
    pub shield_bonus: i32,
    pub wears_armor: bool,
    /// Precomputed alternative base ACs, e.g. an unarmored-defense formula
    pub class_features: Vec<i32>,
    pub magical_bonus: i32,
}

/// Armor class: the best single base AC among every legal source, then the
/// shield and magical bonuses, which always stack.
pub fn calculate_ac(inputs: &ArmorClassInputs) -> i32 {
    let worn = if inputs.wears_armor {
        let dex = inputs
            .armor_type
            .map_or(inputs.dex_modifier, |t| t.dex_bonus(inputs.dex_modifier));
        inputs.base_ac + dex
    } else {
        10 + inputs.dex_modifier
    };

    let base = std::iter::once(worn)
        .chain(inputs.class_features.iter().copied())
        .max()
        .unwrap_or(10);

    base + inputs.shield_bonus + inputs.magical_bonus
}
