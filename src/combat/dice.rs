//! Dice rolling system
//!
//! Every random number in combat comes from here:
//! - `DiceSpec` parses and validates notation like "2d6+3", "1d20", "4d6-2"
//! - `roll`, `d20` and `damage` produce immutable `DiceResult`s
//! - `DieSource` is the seam between the rules and the entropy behind them

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Most dice in one roll
pub const MAX_DICE: u32 = 100;

/// Most faces on one die
pub const MAX_SIDES: u32 = 1000;

/// Largest flat modifier, either sign
pub const MAX_MODIFIER: i32 = 1000;

/// Dice errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("invalid dice: {count}d{sides}")]
    InvalidShape { count: u32, sides: u32 },

    #[error("dice modifier {0} out of range")]
    InvalidModifier(i32),

    #[error("invalid dice notation: {0}")]
    InvalidNotation(String),
}

/// Shape and modifier limits shared by every entry point
fn check_dice(count: u32, sides: u32, modifier: i32) -> Result<(), DiceError> {
    if !(1..=MAX_DICE).contains(&count) || !(1..=MAX_SIDES).contains(&sides) {
        return Err(DiceError::InvalidShape { count, sides });
    }
    if !(-MAX_MODIFIER..=MAX_MODIFIER).contains(&modifier) {
        return Err(DiceError::InvalidModifier(modifier));
    }
    Ok(())
}

/// Source of individual die faces.
///
/// Implementations must return a value in `1..=sides`.
pub trait DieSource {
    fn roll_die(&mut self, sides: u32) -> u32;
}

/// Production die source backed by the thread-local CSPRNG (ChaCha, seeded
/// from the OS). Carries no state of its own, so any number of tasks can
/// each hold one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureDice;

impl DieSource for SecureDice {
    fn roll_die(&mut self, sides: u32) -> u32 {
        rand::rng().random_range(1..=sides)
    }
}

/// Die source that replays a fixed sequence of faces, for tests and
/// scenario replays. The sequence wraps around when exhausted and each face
/// is clamped into `1..=sides`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    faces: Vec<u32>,
    next: usize,
}

impl ScriptedDice {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
            next: 0,
        }
    }

    /// Number of faces drawn so far
    pub fn drawn(&self) -> usize {
        self.next
    }
}

impl DieSource for ScriptedDice {
    fn roll_die(&mut self, sides: u32) -> u32 {
        let face = if self.faces.is_empty() {
            1
        } else {
            self.faces[self.next % self.faces.len()]
        };
        self.next += 1;
        face.clamp(1, sides.max(1))
    }
}

/// Immutable result of a dice roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceResult {
    /// Individual die faces, in roll order
    pub rolls: Vec<u32>,
    pub modifier: i32,
    /// Always `sum(rolls) + modifier`
    pub total: i32,
    pub notation: String,
}

impl DiceResult {
    /// The first die face; for a d20 roll this is the natural roll
    pub fn natural(&self) -> u32 {
        self.rolls.first().copied().unwrap_or(0)
    }

    /// Sum of the dice without the modifier
    pub fn natural_total(&self) -> i32 {
        clamp_total(self.rolls.iter().map(|r| i64::from(*r)).sum())
    }
}

/// How a d20 is rolled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollMode {
    #[default]
    Normal,
    /// Roll two, keep the higher natural die
    Advantage,
    /// Roll two, keep the lower natural die
    Disadvantage,
}

impl RollMode {
    /// Advantage and disadvantage together cancel out
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Self {
        match (advantage, disadvantage) {
            (true, false) => RollMode::Advantage,
            (false, true) => RollMode::Disadvantage,
            _ => RollMode::Normal,
        }
    }
}

/// A validated dice specification: 1 to `MAX_DICE` dice of 1 to `MAX_SIDES`
/// sides, and a modifier within `MAX_MODIFIER`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiceSpec {
    count: u32,
    sides: u32,
    modifier: i32,
}

impl DiceSpec {
    pub fn new(count: u32, sides: u32, modifier: i32) -> Result<Self, DiceError> {
        check_dice(count, sides, modifier)?;
        Ok(Self {
            count,
            sides,
            modifier,
        })
    }

    /// A single die with no modifier; sides are clamped into range
    pub fn single(sides: u32) -> Self {
        Self {
            count: 1,
            sides: sides.clamp(1, MAX_SIDES),
            modifier: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn sides(&self) -> u32 {
        self.sides
    }

    pub fn modifier(&self) -> i32 {
        self.modifier
    }

    /// Same dice with `extra` added to the flat modifier
    pub fn plus(&self, extra: i32) -> Self {
        Self {
            modifier: self.modifier.saturating_add(extra),
            ..self.clone()
        }
    }

    /// Roll this spec
    pub fn roll<D: DieSource + ?Sized>(&self, dice: &mut D) -> DiceResult {
        roll_shape(dice, self.sides, self.count, self.modifier)
    }

    /// Roll with the die count doubled and the modifier left alone, as a
    /// critical hit does
    pub fn roll_critical<D: DieSource + ?Sized>(&self, dice: &mut D) -> DiceResult {
        roll_shape(dice, self.sides, self.count.saturating_mul(2), self.modifier)
    }

    /// Minimum possible result
    pub fn min(&self) -> i32 {
        clamp_total(i64::from(self.count) + i64::from(self.modifier))
    }

    /// Maximum possible result
    pub fn max(&self) -> i32 {
        clamp_total(i64::from(self.count) * i64::from(self.sides) + i64::from(self.modifier))
    }
}

impl FromStr for DiceSpec {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl TryFrom<String> for DiceSpec {
    type Error = DiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_dice(&value)
    }
}

impl From<DiceSpec> for String {
    fn from(spec: DiceSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for DiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&notation(self.count, self.sides, self.modifier))
    }
}

/// Parse a dice notation string like "2d6+3"
pub fn parse_dice(input: &str) -> Result<DiceSpec, DiceError> {
    let text = input.trim().to_lowercase();
    let invalid = || DiceError::InvalidNotation(input.trim().to_string());

    let d_pos = text.find('d').ok_or_else(invalid)?;

    // "d6" means "1d6"
    let count_str = &text[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1
    } else {
        count_str.parse().map_err(|_| invalid())?
    };

    let rest = &text[d_pos + 1..];
    let (sides_str, modifier) = match rest.find(['+', '-']) {
        Some(0) | None => (rest, 0),
        Some(pos) => {
            let modifier: i32 = rest[pos..]
                .trim_start_matches('+')
                .parse()
                .map_err(|_| invalid())?;
            (&rest[..pos], modifier)
        }
    };

    let sides: u32 = sides_str.parse().map_err(|_| invalid())?;

    DiceSpec::new(count, sides, modifier)
}

/// Roll `count` dice with `sides` faces each, plus a flat modifier.
///
/// Fails on a die shape that cannot exist; that is a caller bug, never a
/// game event.
pub fn roll<D: DieSource + ?Sized>(
    dice: &mut D,
    sides: u32,
    count: u32,
    modifier: i32,
) -> Result<DiceResult, DiceError> {
    check_dice(count, sides, modifier)?;
    Ok(roll_shape(dice, sides, count, modifier))
}

/// Standard d20 roll (attacks, saves, initiative)
pub fn d20<D: DieSource + ?Sized>(dice: &mut D, modifier: i32) -> DiceResult {
    roll_shape(dice, 20, 1, modifier)
}

/// Damage roll, e.g. 2d6+3 for a greatsword
pub fn damage<D: DieSource + ?Sized>(
    dice: &mut D,
    sides: u32,
    count: u32,
    modifier: i32,
) -> Result<DiceResult, DiceError> {
    roll(dice, sides, count, modifier)
}

/// d20 under advantage or disadvantage. The kept roll is chosen by its
/// natural die, not its total; ties keep the first roll.
pub fn d20_with_mode<D: DieSource + ?Sized>(
    dice: &mut D,
    modifier: i32,
    mode: RollMode,
) -> DiceResult {
    let first = d20(dice, modifier);
    match mode {
        RollMode::Normal => first,
        RollMode::Advantage => {
            let second = d20(dice, modifier);
            if second.natural() > first.natural() {
                second
            } else {
                first
            }
        }
        RollMode::Disadvantage => {
            let second = d20(dice, modifier);
            if second.natural() < first.natural() {
                second
            } else {
                first
            }
        }
    }
}

/// Check if a d20 roll is a natural 20 (critical hit)
pub fn is_critical(natural: u32) -> bool {
    natural == 20
}

/// Check if a d20 roll is a natural 1 (critical fail)
pub fn is_fumble(natural: u32) -> bool {
    natural == 1
}

fn roll_shape<D: DieSource + ?Sized>(
    dice: &mut D,
    sides: u32,
    count: u32,
    modifier: i32,
) -> DiceResult {
    let rolls: Vec<u32> = (0..count).map(|_| dice.roll_die(sides)).collect();
    let faces: i64 = rolls.iter().map(|r| i64::from(*r)).sum();
    let total = clamp_total(faces + i64::from(modifier));

    DiceResult {
        rolls,
        modifier,
        total,
        notation: notation(count, sides, modifier),
    }
}

fn clamp_total(total: i64) -> i32 {
    total.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn notation(count: u32, sides: u32, modifier: i32) -> String {
    if modifier > 0 {
        format!("{}d{}+{}", count, sides, modifier)
    } else if modifier < 0 {
        format!("{}d{}{}", count, sides, modifier)
    } else {
        format!("{}d{}", count, sides)
    }
}
