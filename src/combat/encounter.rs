//! One encounter's mutable combat state
//!
//! `Encounter` owns the tracker and the combatants' positions. Its action
//! methods read both sides' conditions through the condition policy, call
//! the pure resolver and write the outcome back to the roster, so the whole
//! read-resolve-apply sequence happens under whatever lock guards it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::conditions::{
    auto_fails_save, can_act, grants_crit, resists_all_damage, roll_mode, speed_is_zero,
    AttackRange, RollContext,
};
use super::damage::DamageProfile;
use super::dice::{DiceSpec, DieSource, RollMode};
use super::effects::{ActiveCondition, ConditionState};
use super::initiative::{Combatant, InitiativeTracker, TrackerError};
use super::resolver::{
    resolve_aoe_spell, resolve_attack, resolve_condition, resolve_saving_throw,
    resolve_spell_attack, AoeRequest, AoeTarget, AttackRequest, CombatResult, ConditionCheck,
    ConditionOutcome, SaveRequest,
};
use super::rules::Ability;

/// How an attack is made
#[derive(Debug, Clone)]
pub struct AttackProfile<'a> {
    pub attack_bonus: i32,
    pub damage: &'a DiceSpec,
    pub damage_type: &'a str,
    pub range: AttackRange,
    /// Resolve as a spell attack
    pub spell: bool,
}

/// A save-for-damage effect, single target or area
#[derive(Debug, Clone)]
pub struct SaveEffect<'a> {
    pub save_dc: i32,
    pub save_stat: Ability,
    pub damage: &'a DiceSpec,
    pub damage_type: &'a str,
    pub half_on_success: bool,
}

/// Outward view of one combatant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatantSnapshot {
    pub id: String,
    pub name: String,
    pub initiative: i32,
    pub active: bool,
    pub is_player: bool,
    pub hp: i32,
    pub hp_max: i32,
    pub ac: i32,
    pub cr: f32,
    pub creature_type: String,
    pub resistances: Vec<String>,
    pub immunities: Vec<String>,
    pub conditions: Vec<String>,
    /// No condition stops it from taking actions
    pub can_act: bool,
    /// Held in place by a condition
    pub immobile: bool,
    /// Whether it is this combatant's turn
    pub current: bool,
    pub position: Option<String>,
}

/// Outward view of the whole encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterSnapshot {
    pub round: u32,
    pub started: bool,
    pub combatants: Vec<CombatantSnapshot>,
}

#[derive(Debug, Clone, Default)]
pub struct Encounter {
    pub tracker: InitiativeTracker,
    positions: HashMap<String, String>,
}

impl Encounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(&mut self, id: &str, position: impl Into<String>) {
        self.positions.insert(id.to_string(), position.into());
    }

    pub fn position(&self, id: &str) -> Option<&str> {
        self.positions.get(id).map(String::as_str)
    }

    /// The first player in the roster
    pub fn player(&self) -> Option<&Combatant> {
        self.tracker.combatants().iter().find(|c| c.is_player)
    }

    pub fn living_enemies(&self) -> impl Iterator<Item = &Combatant> {
        self.tracker
            .combatants()
            .iter()
            .filter(|c| !c.is_player && c.is_alive())
    }

    pub fn snapshot(&self) -> EncounterSnapshot {
        let current = self
            .tracker
            .is_started()
            .then(|| self.tracker.turn_index());

        let combatants = self
            .tracker
            .combatants()
            .iter()
            .enumerate()
            .map(|(index, c)| CombatantSnapshot {
                id: c.id.clone(),
                name: c.name.clone(),
                initiative: c.initiative,
                active: c.is_active,
                is_player: c.is_player,
                hp: c.hp_current,
                hp_max: c.hp_max,
                ac: c.ac,
                cr: c.cr,
                creature_type: c.creature_type.clone(),
                resistances: c.defenses.resistances.clone(),
                immunities: c.defenses.immunities.clone(),
                conditions: c.conditions.ids(),
                can_act: can_act(c.conditions.as_slice()),
                immobile: speed_is_zero(c.conditions.as_slice()),
                current: current == Some(index),
                position: self.positions.get(&c.id).cloned(),
            })
            .collect();

        EncounterSnapshot {
            round: self.tracker.round(),
            started: self.tracker.is_started(),
            combatants,
        }
    }

    /// Resolve an attack between two roster members and apply its damage
    pub fn attack<D: DieSource + ?Sized>(
        &mut self,
        dice: &mut D,
        attacker_id: &str,
        target_id: &str,
        profile: &AttackProfile<'_>,
    ) -> Result<CombatResult, TrackerError> {
        let attacker_conditions = self.conditions_of(attacker_id)?;
        let target = self.require(target_id)?;

        let mode = roll_mode(
            attacker_conditions.as_slice(),
            RollContext::Attack(profile.range),
            target.conditions.as_slice(),
        );
        let defenses = effective_defenses(target, profile.damage_type);
        let request = AttackRequest {
            attacker_id,
            target_id,
            attack_bonus: profile.attack_bonus,
            target_ac: target.ac,
            damage: profile.damage,
            damage_type: profile.damage_type,
            target_hp: target.hp_current,
            defenses: &defenses,
            advantage: mode == RollMode::Advantage,
            disadvantage: mode == RollMode::Disadvantage,
            auto_crit: grants_crit(target.conditions.as_slice(), profile.range),
        };

        let result = if profile.spell {
            resolve_spell_attack(dice, &request)
        } else {
            resolve_attack(dice, &request)
        };
        self.apply(&result);
        Ok(result)
    }

    /// Resolve a single-target saving throw and apply its damage
    pub fn saving_throw<D: DieSource + ?Sized>(
        &mut self,
        dice: &mut D,
        attacker_id: &str,
        target_id: &str,
        effect: &SaveEffect<'_>,
    ) -> Result<CombatResult, TrackerError> {
        let target = self.require(target_id)?;
        let mode = save_mode(target, effect.save_stat);
        let defenses = effective_defenses(target, effect.damage_type);

        let request = SaveRequest {
            attacker_id,
            target_id,
            save_dc: effect.save_dc,
            save_stat: effect.save_stat,
            save_bonus: target.abilities.get(effect.save_stat),
            damage: effect.damage,
            damage_type: effect.damage_type,
            target_hp: target.hp_current,
            defenses: &defenses,
            advantage: mode == RollMode::Advantage,
            disadvantage: mode == RollMode::Disadvantage,
            half_on_success: effect.half_on_success,
            auto_fail: auto_fails_save(target.conditions.as_slice(), effect.save_stat),
        };

        let result = resolve_saving_throw(dice, &request);
        self.apply(&result);
        Ok(result)
    }

    /// Resolve an area effect over `target_ids`, in order, and apply it
    pub fn area_save<D: DieSource + ?Sized>(
        &mut self,
        dice: &mut D,
        attacker_id: &str,
        target_ids: &[String],
        effect: &SaveEffect<'_>,
    ) -> Result<Vec<CombatResult>, TrackerError> {
        let targets = target_ids
            .iter()
            .map(|id| self.require(id))
            .collect::<Result<Vec<_>, _>>()?;
        let defenses: Vec<DamageProfile> = targets
            .iter()
            .map(|t| effective_defenses(t, effect.damage_type))
            .collect();

        let aoe_targets: Vec<AoeTarget<'_>> = targets
            .iter()
            .zip(&defenses)
            .map(|(target, defenses)| {
                let mode = save_mode(target, effect.save_stat);
                AoeTarget {
                    target_id: &target.id,
                    current_hp: target.hp_current,
                    save_bonus: target.abilities.get(effect.save_stat),
                    defenses,
                    advantage: mode == RollMode::Advantage,
                    disadvantage: mode == RollMode::Disadvantage,
                    auto_fail: auto_fails_save(target.conditions.as_slice(), effect.save_stat),
                }
            })
            .collect();

        let results = resolve_aoe_spell(
            dice,
            &AoeRequest {
                attacker_id,
                save_dc: effect.save_dc,
                save_stat: effect.save_stat,
                damage: effect.damage,
                damage_type: effect.damage_type,
                targets: &aoe_targets,
            },
        );

        for result in &results {
            self.apply(result);
        }
        Ok(results)
    }

    /// Save-or-suffer: on a failed save the condition is attached
    #[allow(clippy::too_many_arguments)]
    pub fn condition_check<D: DieSource + ?Sized>(
        &mut self,
        dice: &mut D,
        source_id: &str,
        target_id: &str,
        condition_id: &str,
        save_dc: i32,
        save_stat: Ability,
        duration_rounds: i32,
    ) -> Result<ConditionOutcome, TrackerError> {
        let target = self.require(target_id)?;
        let mode = save_mode(target, save_stat);

        let outcome = resolve_condition(
            dice,
            &ConditionCheck {
                target_id,
                condition_id,
                save_dc,
                save_stat,
                save_bonus: target.abilities.get(save_stat),
                advantage: mode == RollMode::Advantage,
                disadvantage: mode == RollMode::Disadvantage,
                auto_fail: auto_fails_save(target.conditions.as_slice(), save_stat),
            },
        );

        if outcome.active {
            self.tracker.add_condition(
                target_id,
                ActiveCondition::new(&outcome.condition_id, duration_rounds)
                    .with_source(source_id),
            )?;
        }
        Ok(outcome)
    }

    /// Write a fact packet's remaining HP back to its target
    pub fn apply(&mut self, result: &CombatResult) {
        if let Some(target) = self.tracker.get_mut(&result.target_id) {
            target.set_hp(result.target_remaining_hp);
        }
    }

    /// Victory bookkeeping: drop the non-players and their positions, reset
    /// the tracker. Returns the removed combatants.
    pub fn end_encounter(&mut self) -> Vec<Combatant> {
        let removed = self.tracker.end_encounter();
        for combatant in &removed {
            self.positions.remove(&combatant.id);
        }
        removed
    }

    fn require(&self, id: &str) -> Result<&Combatant, TrackerError> {
        self.tracker
            .get(id)
            .ok_or_else(|| TrackerError::UnknownCombatant(id.to_string()))
    }

    fn conditions_of(&self, id: &str) -> Result<ConditionState, TrackerError> {
        Ok(self.require(id)?.conditions.clone())
    }
}

fn save_mode(target: &Combatant, stat: Ability) -> RollMode {
    roll_mode(target.conditions.as_slice(), RollContext::Save(stat), &[])
}

fn effective_defenses(target: &Combatant, damage_type: &str) -> DamageProfile {
    if resists_all_damage(target.conditions.as_slice()) {
        target.defenses.resisting(damage_type)
    } else {
        target.defenses.clone()
    }
}
