//! Initiative and turn order
//!
//! The tracker is a small state machine over an ordered roster:
//! - not started: combatants join, initiative may be rolled or seeded
//! - active: `start_encounter` fixes the order; `next_turn` walks it round
//!   by round, skipping inactive combatants and ticking condition durations
//! - `end_encounter` drops the non-players and returns to not started

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::damage::DamageProfile;
use super::dice::{d20, DiceSpec, DieSource};
use super::effects::{ActiveCondition, ConditionState};
use super::rules::AbilityModifiers;

/// Initiative value meaning "not rolled yet"
pub const UNROLLED: i32 = 0;

/// Tracker errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("no combatants in tracker")]
    EmptyRoster,

    #[error("unknown combatant: {0}")]
    UnknownCombatant(String),

    #[error("combatant already in roster: {0}")]
    DuplicateCombatant(String),
}

/// A validated NPC action: everything needed to resolve an attack with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedAction {
    pub name: String,
    pub attack_bonus: i32,
    pub damage: DiceSpec,
    pub damage_type: String,
    #[serde(default)]
    pub ranged: bool,
}

/// An entity taking part in an encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub abilities: AbilityModifiers,
    #[serde(default)]
    pub initiative: i32,
    pub is_active: bool,
    pub is_player: bool,
    pub hp_max: i32,
    pub hp_current: i32,
    pub ac: i32,
    #[serde(default)]
    pub cr: f32,
    /// Character level; sets proficiency for spellcasting
    #[serde(default = "first_level")]
    pub level: u32,
    #[serde(default)]
    pub creature_type: String,
    #[serde(default)]
    pub actions: Vec<ScriptedAction>,
    #[serde(default)]
    pub conditions: ConditionState,
    #[serde(default)]
    pub defenses: DamageProfile,
}

fn first_level() -> u32 {
    1
}

impl Combatant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            abilities: AbilityModifiers::default(),
            initiative: UNROLLED,
            is_active: true,
            is_player: false,
            hp_max: 10,
            hp_current: 10,
            ac: 10,
            cr: 0.0,
            level: 1,
            creature_type: String::new(),
            actions: Vec::new(),
            conditions: ConditionState::new(),
            defenses: DamageProfile::new(),
        }
    }

    pub fn player(mut self) -> Self {
        self.is_player = true;
        self
    }

    pub fn with_abilities(mut self, abilities: AbilityModifiers) -> Self {
        self.abilities = abilities;
        self
    }

    pub fn with_dex(mut self, dex: i32) -> Self {
        self.abilities.dex = dex;
        self
    }

    /// Full hit points
    pub fn with_hp(mut self, hp_max: i32) -> Self {
        self.hp_max = hp_max;
        self.hp_current = hp_max;
        self
    }

    pub fn with_ac(mut self, ac: i32) -> Self {
        self.ac = ac;
        self
    }

    pub fn with_cr(mut self, cr: f32) -> Self {
        self.cr = cr;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_creature_type(mut self, creature_type: impl Into<String>) -> Self {
        self.creature_type = creature_type.into();
        self
    }

    pub fn with_action(mut self, action: ScriptedAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_defenses(mut self, defenses: DamageProfile) -> Self {
        self.defenses = defenses;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.hp_current > 0
    }

    /// Set HP from a fact packet's remaining HP; at 0 the combatant drops out
    /// of the turn order
    pub fn set_hp(&mut self, remaining: i32) {
        self.hp_current = remaining.clamp(0, self.hp_max.max(0));
        if self.hp_current == 0 {
            self.is_active = false;
        }
    }

    /// Scripted action by name (case-insensitive)
    pub fn action(&self, name: &str) -> Option<&ScriptedAction> {
        self.actions
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name.trim()))
    }
}

/// Turn-order state machine for one encounter
#[derive(Debug, Clone)]
pub struct InitiativeTracker {
    combatants: Vec<Combatant>,
    turn_index: usize,
    round: u32,
    started: bool,
}

impl Default for InitiativeTracker {
    fn default() -> Self {
        Self {
            combatants: Vec::new(),
            turn_index: 0,
            round: 1,
            started: false,
        }
    }
}

impl InitiativeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a combatant with unrolled initiative and no conditions
    pub fn add_combatant(&mut self, mut combatant: Combatant) -> Result<(), TrackerError> {
        if self.get(&combatant.id).is_some() {
            return Err(TrackerError::DuplicateCombatant(combatant.id));
        }
        combatant.initiative = UNROLLED;
        combatant.conditions.clear();
        self.combatants.push(combatant);
        Ok(())
    }

    /// Roll d20 + DEX for one combatant, store and return the total
    pub fn roll_initiative<D: DieSource + ?Sized>(
        &mut self,
        id: &str,
        dice: &mut D,
    ) -> Result<i32, TrackerError> {
        let combatant = self.require_mut(id)?;
        let total = d20(dice, combatant.abilities.dex).total;
        combatant.initiative = total;
        debug!("{} rolled initiative {}", combatant.name, total);
        Ok(total)
    }

    /// Seed a combatant's initiative; `start_encounter` keeps seeded values
    pub fn set_initiative(&mut self, id: &str, initiative: i32) -> Result<(), TrackerError> {
        self.require_mut(id)?.initiative = initiative;
        Ok(())
    }

    /// Roll for everyone still unrolled, then fix the order: initiative
    /// descending, DEX modifier breaking ties, otherwise join order.
    pub fn start_encounter<D: DieSource + ?Sized>(
        &mut self,
        dice: &mut D,
    ) -> Result<(), TrackerError> {
        if self.combatants.is_empty() {
            return Err(TrackerError::EmptyRoster);
        }

        for combatant in &mut self.combatants {
            if combatant.initiative == UNROLLED {
                combatant.initiative = d20(dice, combatant.abilities.dex).total;
            }
        }

        self.combatants.sort_by(|a, b| {
            (b.initiative, b.abilities.dex).cmp(&(a.initiative, a.abilities.dex))
        });
        self.started = true;
        self.round = 1;
        self.turn_index = 0;
        Ok(())
    }

    /// Advance to the next active combatant and run its start-of-turn
    /// bookkeeping. If nobody is active, stops where it started after one
    /// full cycle.
    pub fn next_turn(&mut self) -> Result<&Combatant, TrackerError> {
        if self.combatants.is_empty() {
            return Err(TrackerError::EmptyRoster);
        }

        self.end_of_turn();

        let len = self.combatants.len();
        let start = self.turn_index;
        loop {
            self.turn_index = (self.turn_index + 1) % len;
            if self.turn_index == 0 {
                self.round += 1;
            }

            if self.combatants[self.turn_index].is_active {
                self.start_of_turn();
                break;
            }
            if self.turn_index == start {
                break;
            }
        }

        Ok(&self.combatants[self.turn_index])
    }

    /// Hook for end-of-turn effects; nothing ends at end of turn yet
    fn end_of_turn(&mut self) {}

    fn start_of_turn(&mut self) {
        let combatant = &mut self.combatants[self.turn_index];
        for expired in combatant.conditions.tick() {
            debug!("{} is no longer {}", combatant.name, expired);
        }
    }

    pub fn get_current_actor(&self) -> Option<&Combatant> {
        self.combatants.get(self.turn_index)
    }

    pub fn get(&self, id: &str) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Combatant> {
        self.combatants.iter_mut().find(|c| c.id == id)
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut Combatant, TrackerError> {
        self.get_mut(id)
            .ok_or_else(|| TrackerError::UnknownCombatant(id.to_string()))
    }

    /// Attach a condition. Returns true if it was newly added.
    pub fn add_condition(
        &mut self,
        id: &str,
        condition: ActiveCondition,
    ) -> Result<bool, TrackerError> {
        Ok(self.require_mut(id)?.conditions.add(condition))
    }

    /// Returns true if the condition was present
    pub fn remove_condition(&mut self, id: &str, condition_id: &str) -> Result<bool, TrackerError> {
        Ok(self.require_mut(id)?.conditions.remove(condition_id))
    }

    /// Clear the encounter: non-players leave the roster (and are returned),
    /// players stay with initiative unrolled and conditions cleared.
    pub fn end_encounter(&mut self) -> Vec<Combatant> {
        let (players, others): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.combatants)
                .into_iter()
                .partition(|c| c.is_player);

        self.combatants = players;
        for player in &mut self.combatants {
            player.initiative = UNROLLED;
            player.conditions.clear();
        }
        self.started = false;
        self.round = 1;
        self.turn_index = 0;
        others
    }

    pub fn combatants(&self) -> &[Combatant] {
        &self.combatants
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn turn_index(&self) -> usize {
        self.turn_index
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn len(&self) -> usize {
        self.combatants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combatants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::dice::ScriptedDice;
    use crate::combat::effects::INDEFINITE;

    fn roster(entries: &[(&str, i32, i32)]) -> InitiativeTracker {
        let mut tracker = InitiativeTracker::new();
        for (id, init, dex) in entries {
            tracker
                .add_combatant(Combatant::new(*id, *id).with_dex(*dex))
                .unwrap();
            tracker.set_initiative(id, *init).unwrap();
        }
        tracker
    }

    fn order(tracker: &InitiativeTracker) -> Vec<&str> {
        tracker.combatants().iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_sort_with_dex_tie_break() {
        let mut tracker = roster(&[("a", 10, 2), ("b", 10, 5), ("c", 15, 0)]);
        tracker.start_encounter(&mut ScriptedDice::default()).unwrap();

        assert_eq!(order(&tracker), ["c", "b", "a"]);
        assert!(tracker.is_started());
        assert_eq!(tracker.round(), 1);
        assert_eq!(tracker.get_current_actor().unwrap().id, "c");
    }

    #[test]
    fn test_full_ties_keep_join_order() {
        let mut tracker = roster(&[("first", 12, 1), ("second", 12, 1), ("third", 12, 1)]);
        tracker.start_encounter(&mut ScriptedDice::default()).unwrap();
        assert_eq!(order(&tracker), ["first", "second", "third"]);
    }

    #[test]
    fn test_start_rolls_only_unrolled() {
        let mut tracker = InitiativeTracker::new();
        tracker
            .add_combatant(Combatant::new("hero", "Hero").player().with_dex(3))
            .unwrap();
        tracker
            .add_combatant(Combatant::new("lair", "Lair").with_dex(0))
            .unwrap();
        tracker.set_initiative("lair", 20).unwrap();

        let mut dice = ScriptedDice::new([9]);
        tracker.start_encounter(&mut dice).unwrap();

        assert_eq!(dice.drawn(), 1);
        assert_eq!(tracker.get("hero").unwrap().initiative, 12);
        assert_eq!(tracker.get("lair").unwrap().initiative, 20);
        assert_eq!(order(&tracker), ["lair", "hero"]);
    }

    #[test]
    fn test_roll_initiative() {
        let mut tracker = InitiativeTracker::new();
        tracker
            .add_combatant(Combatant::new("rogue", "Rogue").with_dex(4))
            .unwrap();
        let total = tracker
            .roll_initiative("rogue", &mut ScriptedDice::new([11]))
            .unwrap();
        assert_eq!(total, 15);
        assert_eq!(tracker.get("rogue").unwrap().initiative, 15);

        assert_eq!(
            tracker.roll_initiative("nobody", &mut ScriptedDice::new([11])),
            Err(TrackerError::UnknownCombatant("nobody".to_string()))
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut tracker = InitiativeTracker::new();
        tracker.add_combatant(Combatant::new("x", "X")).unwrap();
        assert_eq!(
            tracker.add_combatant(Combatant::new("x", "Other X")),
            Err(TrackerError::DuplicateCombatant("x".to_string()))
        );
    }

    #[test]
    fn test_next_turn_skips_inactive_and_counts_rounds() {
        let mut tracker = roster(&[("a", 20, 0), ("b", 15, 0), ("c", 10, 0)]);
        tracker.start_encounter(&mut ScriptedDice::default()).unwrap();
        tracker.get_mut("b").unwrap().is_active = false;

        assert_eq!(tracker.next_turn().unwrap().id, "c");
        assert_eq!(tracker.round(), 1);

        assert_eq!(tracker.next_turn().unwrap().id, "a");
        assert_eq!(tracker.round(), 2);
        assert_eq!(tracker.turn_index(), 0);
    }

    #[test]
    fn test_all_inactive_terminates() {
        let mut tracker = roster(&[("a", 20, 0), ("b", 15, 0)]);
        tracker.start_encounter(&mut ScriptedDice::default()).unwrap();
        for id in ["a", "b"] {
            tracker.get_mut(id).unwrap().is_active = false;
        }

        // Lands back where it started after one cycle
        assert_eq!(tracker.next_turn().unwrap().id, "a");
        assert_eq!(tracker.round(), 2);
    }

    #[test]
    fn test_empty_roster() {
        let mut tracker = InitiativeTracker::new();
        assert_eq!(tracker.next_turn().err(), Some(TrackerError::EmptyRoster));
        assert_eq!(
            tracker.start_encounter(&mut ScriptedDice::default()),
            Err(TrackerError::EmptyRoster)
        );
        assert!(tracker.get_current_actor().is_none());
    }

    #[test]
    fn test_condition_duration_ticks_at_turn_start() {
        let mut tracker = roster(&[("solo", 10, 0)]);
        tracker.start_encounter(&mut ScriptedDice::default()).unwrap();
        tracker
            .add_condition("solo", ActiveCondition::new("blinded", 2))
            .unwrap();
        tracker
            .add_condition("solo", ActiveCondition::new("prone", INDEFINITE))
            .unwrap();

        let actor = tracker.next_turn().unwrap();
        assert_eq!(actor.conditions.get("blinded").unwrap().duration_rounds, 1);

        let actor = tracker.next_turn().unwrap();
        assert!(!actor.conditions.has("blinded"));
        assert!(actor.conditions.has("prone"));
        assert_eq!(tracker.round(), 3);
    }

    #[test]
    fn test_conditions_only_tick_for_the_actor() {
        let mut tracker = roster(&[("a", 20, 0), ("b", 10, 0)]);
        tracker.start_encounter(&mut ScriptedDice::default()).unwrap();
        tracker
            .add_condition("a", ActiveCondition::new("poisoned", 1))
            .unwrap();

        tracker.next_turn().unwrap();
        assert!(tracker.get("a").unwrap().conditions.has("poisoned"));

        tracker.next_turn().unwrap();
        assert!(!tracker.get("a").unwrap().conditions.has("poisoned"));
    }

    #[test]
    fn test_add_remove_condition() {
        let mut tracker = roster(&[("a", 10, 0)]);
        assert_eq!(
            tracker.add_condition("a", ActiveCondition::new("prone", INDEFINITE)),
            Ok(true)
        );
        assert_eq!(tracker.remove_condition("a", "prone"), Ok(true));
        assert_eq!(tracker.remove_condition("a", "prone"), Ok(false));
        assert!(tracker.add_condition("zz", ActiveCondition::new("prone", 1)).is_err());
    }

    #[test]
    fn test_end_encounter_keeps_players() {
        let mut tracker = InitiativeTracker::new();
        tracker
            .add_combatant(Combatant::new("hero", "Hero").player())
            .unwrap();
        tracker.add_combatant(Combatant::new("orc", "Orc")).unwrap();
        tracker.start_encounter(&mut ScriptedDice::new([10, 5])).unwrap();
        tracker
            .add_condition("hero", ActiveCondition::new("poisoned", 3))
            .unwrap();
        tracker.next_turn().unwrap();

        let removed = tracker.end_encounter();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "orc");
        assert_eq!(order(&tracker), ["hero"]);
        assert!(!tracker.is_started());
        assert_eq!(tracker.round(), 1);
        let hero = tracker.get("hero").unwrap();
        assert_eq!(hero.initiative, UNROLLED);
        assert!(hero.conditions.is_empty());
    }

    #[test]
    fn test_set_hp_deactivates_at_zero() {
        let mut goblin = Combatant::new("g", "Goblin").with_hp(7);
        goblin.set_hp(3);
        assert!(goblin.is_alive() && goblin.is_active);
        goblin.set_hp(-4);
        assert_eq!(goblin.hp_current, 0);
        assert!(!goblin.is_alive() && !goblin.is_active);
    }
}
