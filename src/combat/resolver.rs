//! Combat resolution
//!
//! Pure functions that turn one action into one immutable `CombatResult`
//! (the fact packet). They never touch a roster; callers apply the
//! packet's remaining HP and conditions to the target themselves.
//!
//! Dice are drawn in a fixed order so scripted replays line up:
//! - attacks: the d20 (two under advantage/disadvantage), then damage on a hit
//! - saving throws: the save d20(s), then damage
//! - area spells: damage once, then each target's save in input order

use serde::{Deserialize, Serialize};

use super::conditions::ConditionRegistry;
use super::damage::DamageProfile;
use super::dice::{
    d20_with_mode, is_critical, is_fumble, DiceResult, DiceSpec, DieSource, RollMode,
};
use super::rules::Ability;

/// What kind of action produced a fact packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Attack,
    SpellAttack,
    SavingThrow,
    AreaSave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Alive,
    Dead,
}

/// Immutable record of one resolved action.
///
/// Consumers treat every field as ground truth. `damage_total` is never
/// negative and `target_status` is `Dead` exactly when
/// `target_remaining_hp` is 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatResult {
    pub action_type: ActionKind,
    pub attacker_id: String,
    pub target_id: String,
    pub roll_natural: u32,
    pub roll_total: i32,
    /// 0 when no armor class was involved
    pub target_ac: i32,
    pub save_dc: Option<i32>,
    pub save_stat: Option<Ability>,
    pub save_success: Option<bool>,
    /// For saving throws this is `!save_success`
    pub hit: bool,
    pub critical: bool,
    pub fumble: bool,
    pub damage_total: i32,
    pub damage_type: String,
    pub target_remaining_hp: i32,
    pub target_status: TargetStatus,
    #[serde(default)]
    pub conditions_applied: Vec<String>,
    #[serde(default)]
    pub environment_tags: Vec<String>,
    #[serde(default)]
    pub narrative_hint: Option<String>,
}

impl CombatResult {
    /// Record conditions the action made active on the target
    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions_applied = conditions;
        self
    }

    pub fn with_environment(mut self, tags: Vec<String>) -> Self {
        self.environment_tags = tags;
        self
    }

    pub fn with_narrative_hint(mut self, hint: impl Into<String>) -> Self {
        self.narrative_hint = Some(hint.into());
        self
    }

    pub fn is_dead(&self) -> bool {
        self.target_status == TargetStatus::Dead
    }
}

/// A weapon or spell attack roll against armor class
#[derive(Debug, Clone)]
pub struct AttackRequest<'a> {
    pub attacker_id: &'a str,
    pub target_id: &'a str,
    pub attack_bonus: i32,
    pub target_ac: i32,
    pub damage: &'a DiceSpec,
    pub damage_type: &'a str,
    pub target_hp: i32,
    pub defenses: &'a DamageProfile,
    pub advantage: bool,
    pub disadvantage: bool,
    /// Any hit is a critical hit (e.g. melee against a paralyzed target)
    pub auto_crit: bool,
}

/// A single-target saving throw against damage
#[derive(Debug, Clone)]
pub struct SaveRequest<'a> {
    pub attacker_id: &'a str,
    pub target_id: &'a str,
    pub save_dc: i32,
    pub save_stat: Ability,
    pub save_bonus: i32,
    pub damage: &'a DiceSpec,
    pub damage_type: &'a str,
    pub target_hp: i32,
    pub defenses: &'a DamageProfile,
    pub advantage: bool,
    pub disadvantage: bool,
    pub half_on_success: bool,
    /// The save fails whatever the die shows
    pub auto_fail: bool,
}

/// One creature caught in an area spell
#[derive(Debug, Clone)]
pub struct AoeTarget<'a> {
    pub target_id: &'a str,
    pub current_hp: i32,
    pub save_bonus: i32,
    pub defenses: &'a DamageProfile,
    pub advantage: bool,
    pub disadvantage: bool,
    pub auto_fail: bool,
}

#[derive(Debug, Clone)]
pub struct AoeRequest<'a> {
    pub attacker_id: &'a str,
    pub save_dc: i32,
    pub save_stat: Ability,
    pub damage: &'a DiceSpec,
    pub damage_type: &'a str,
    pub targets: &'a [AoeTarget<'a>],
}

/// A save-or-be-affected condition check
#[derive(Debug, Clone)]
pub struct ConditionCheck<'a> {
    pub target_id: &'a str,
    pub condition_id: &'a str,
    pub save_dc: i32,
    pub save_stat: Ability,
    pub save_bonus: i32,
    pub advantage: bool,
    pub disadvantage: bool,
    pub auto_fail: bool,
}

/// Outcome of a condition check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub target_id: String,
    pub condition_id: String,
    pub roll_natural: u32,
    pub roll_total: i32,
    pub save_dc: i32,
    pub save_stat: Ability,
    pub save_success: bool,
    /// True when the save failed and the condition takes hold
    pub active: bool,
    pub effect_description: String,
}

/// Resolve a weapon attack
pub fn resolve_attack<D: DieSource + ?Sized>(
    dice: &mut D,
    request: &AttackRequest<'_>,
) -> CombatResult {
    attack_roll(dice, request, ActionKind::Attack)
}

/// Resolve a spell attack. `attack_bonus` is the caster's spell attack bonus.
pub fn resolve_spell_attack<D: DieSource + ?Sized>(
    dice: &mut D,
    request: &AttackRequest<'_>,
) -> CombatResult {
    attack_roll(dice, request, ActionKind::SpellAttack)
}

fn attack_roll<D: DieSource + ?Sized>(
    dice: &mut D,
    request: &AttackRequest<'_>,
    action_type: ActionKind,
) -> CombatResult {
    let mode = RollMode::from_flags(request.advantage, request.disadvantage);
    let roll = d20_with_mode(dice, request.attack_bonus, mode);
    let natural = roll.natural();

    let fumble = is_fumble(natural);
    let hit = if is_critical(natural) {
        true
    } else if fumble {
        false
    } else {
        roll.total >= request.target_ac
    };
    let critical = hit && (is_critical(natural) || request.auto_crit);

    let damage_total = if hit {
        let rolled = if critical {
            request.damage.roll_critical(dice)
        } else {
            request.damage.roll(dice)
        };
        request
            .defenses
            .calculate(rolled.total.max(0), request.damage_type)
    } else {
        0
    };

    let remaining = remaining_hp(request.target_hp, damage_total);

    CombatResult {
        action_type,
        attacker_id: request.attacker_id.to_string(),
        target_id: request.target_id.to_string(),
        roll_natural: natural,
        roll_total: roll.total,
        target_ac: request.target_ac,
        save_dc: None,
        save_stat: None,
        save_success: None,
        hit,
        critical,
        fumble,
        damage_total,
        damage_type: request.damage_type.to_string(),
        target_remaining_hp: remaining,
        target_status: status_for(remaining),
        conditions_applied: Vec::new(),
        environment_tags: Vec::new(),
        narrative_hint: None,
    }
}

/// Resolve a saving throw against damage. Damage is rolled whether or not
/// the save succeeds.
pub fn resolve_saving_throw<D: DieSource + ?Sized>(
    dice: &mut D,
    request: &SaveRequest<'_>,
) -> CombatResult {
    let (roll, success) = save_roll(
        dice,
        request.save_bonus,
        request.save_dc,
        RollMode::from_flags(request.advantage, request.disadvantage),
        request.auto_fail,
    );

    let raw = request.damage.roll(dice).total.max(0);
    let damage_total = save_damage(
        raw,
        success,
        request.half_on_success,
        request.defenses,
        request.damage_type,
    );
    let remaining = remaining_hp(request.target_hp, damage_total);

    save_packet(
        ActionKind::SavingThrow,
        request.attacker_id,
        request.target_id,
        &roll,
        request.save_dc,
        request.save_stat,
        success,
        damage_total,
        request.damage_type,
        remaining,
    )
}

/// Resolve an area spell. One damage roll is shared by every target; each
/// target saves on its own for half. Results keep the order of `targets`.
pub fn resolve_aoe_spell<D: DieSource + ?Sized>(
    dice: &mut D,
    request: &AoeRequest<'_>,
) -> Vec<CombatResult> {
    let raw = request.damage.roll(dice).total.max(0);

    request
        .targets
        .iter()
        .map(|target| {
            let (roll, success) = save_roll(
                dice,
                target.save_bonus,
                request.save_dc,
                RollMode::from_flags(target.advantage, target.disadvantage),
                target.auto_fail,
            );
            let damage_total =
                save_damage(raw, success, true, target.defenses, request.damage_type);
            let remaining = remaining_hp(target.current_hp, damage_total);

            save_packet(
                ActionKind::AreaSave,
                request.attacker_id,
                target.target_id,
                &roll,
                request.save_dc,
                request.save_stat,
                success,
                damage_total,
                request.damage_type,
                remaining,
            )
        })
        .collect()
}

/// Resolve a save-or-suffer condition. The condition is active iff the save
/// fails.
pub fn resolve_condition<D: DieSource + ?Sized>(
    dice: &mut D,
    check: &ConditionCheck<'_>,
) -> ConditionOutcome {
    let (roll, success) = save_roll(
        dice,
        check.save_bonus,
        check.save_dc,
        RollMode::from_flags(check.advantage, check.disadvantage),
        check.auto_fail,
    );

    let condition_id = check.condition_id.trim().to_lowercase();
    let effect_description = if success {
        format!("{} resists being {}", check.target_id, condition_id)
    } else {
        match ConditionRegistry::global().get(&condition_id) {
            Some(definition) => format!(
                "{} is {}: {}",
                check.target_id, condition_id, definition.description
            ),
            None => format!("{} is {}", check.target_id, condition_id),
        }
    };

    ConditionOutcome {
        target_id: check.target_id.to_string(),
        condition_id,
        roll_natural: roll.natural(),
        roll_total: roll.total,
        save_dc: check.save_dc,
        save_stat: check.save_stat,
        save_success: success,
        active: !success,
        effect_description,
    }
}

/// Roll a save; an automatic failure still rolls so the record shows a die
fn save_roll<D: DieSource + ?Sized>(
    dice: &mut D,
    bonus: i32,
    dc: i32,
    mode: RollMode,
    auto_fail: bool,
) -> (DiceResult, bool) {
    let roll = d20_with_mode(dice, bonus, mode);
    let success = !auto_fail && roll.total >= dc;
    (roll, success)
}

/// Half/full split first, then resistance and immunity
fn save_damage(
    raw: i32,
    success: bool,
    half_on_success: bool,
    defenses: &DamageProfile,
    damage_type: &str,
) -> i32 {
    let split = match (success, half_on_success) {
        (false, _) => raw,
        (true, true) => raw / 2,
        (true, false) => 0,
    };
    defenses.calculate(split, damage_type)
}

#[allow(clippy::too_many_arguments)]
fn save_packet(
    action_type: ActionKind,
    attacker_id: &str,
    target_id: &str,
    roll: &DiceResult,
    save_dc: i32,
    save_stat: Ability,
    success: bool,
    damage_total: i32,
    damage_type: &str,
    remaining: i32,
) -> CombatResult {
    CombatResult {
        action_type,
        attacker_id: attacker_id.to_string(),
        target_id: target_id.to_string(),
        roll_natural: roll.natural(),
        roll_total: roll.total,
        target_ac: 0,
        save_dc: Some(save_dc),
        save_stat: Some(save_stat),
        save_success: Some(success),
        hit: !success,
        critical: false,
        fumble: false,
        damage_total,
        damage_type: damage_type.to_string(),
        target_remaining_hp: remaining,
        target_status: status_for(remaining),
        conditions_applied: Vec::new(),
        environment_tags: Vec::new(),
        narrative_hint: None,
    }
}

fn remaining_hp(current: i32, damage: i32) -> i32 {
    (current - damage).max(0)
}

fn status_for(remaining: i32) -> TargetStatus {
    if remaining == 0 {
        TargetStatus::Dead
    } else {
        TargetStatus::Alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::dice::ScriptedDice;

    fn spec(s: &str) -> DiceSpec {
        s.parse().unwrap()
    }

    fn attack<'a>(damage: &'a DiceSpec, defenses: &'a DamageProfile) -> AttackRequest<'a> {
        AttackRequest {
            attacker_id: "fighter",
            target_id: "goblin",
            attack_bonus: 5,
            target_ac: 15,
            damage,
            damage_type: "slashing",
            target_hp: 12,
            defenses,
            advantage: false,
            disadvantage: false,
            auto_crit: false,
        }
    }

    #[test]
    fn test_attack_hit_scenario() {
        let damage = spec("2d6+3");
        let defenses = DamageProfile::new();
        let mut dice = ScriptedDice::new([15, 4, 3]);

        let result = resolve_attack(&mut dice, &attack(&damage, &defenses));
        assert_eq!(result.action_type, ActionKind::Attack);
        assert_eq!(result.roll_natural, 15);
        assert_eq!(result.roll_total, 20);
        assert!(result.hit);
        assert!(!result.critical);
        assert_eq!(result.damage_total, 10);
        assert_eq!(result.target_remaining_hp, 2);
        assert_eq!(result.target_status, TargetStatus::Alive);
        assert_eq!(result.save_success, None);
    }

    #[test]
    fn test_critical_doubles_dice_not_modifier() {
        let damage = spec("2d6+3");
        let defenses = DamageProfile::new();
        let mut dice = ScriptedDice::new([20, 1, 2, 3, 4]);

        let mut request = attack(&damage, &defenses);
        request.target_hp = 50;
        let result = resolve_attack(&mut dice, &request);
        assert!(result.hit && result.critical);
        // 4 dice + 3, not 2 dice + 6
        assert_eq!(dice.drawn(), 5);
        assert_eq!(result.damage_total, 1 + 2 + 3 + 4 + 3);
    }

    #[test]
    fn test_natural_rolls_override_ac() {
        let damage = spec("1d8");
        let defenses = DamageProfile::new();

        let mut request = attack(&damage, &defenses);
        request.target_ac = 999;
        let result = resolve_attack(&mut ScriptedDice::new([20, 5]), &request);
        assert!(result.hit && result.critical);

        let mut request = attack(&damage, &defenses);
        request.attack_bonus = 100;
        let mut dice = ScriptedDice::new([1, 5]);
        let result = resolve_attack(&mut dice, &request);
        assert!(!result.hit && result.fumble);
        assert_eq!(result.damage_total, 0);
        assert_eq!(result.target_remaining_hp, 12);
        // No damage dice on a miss
        assert_eq!(dice.drawn(), 1);
    }

    #[test]
    fn test_miss_below_ac() {
        let damage = spec("1d8");
        let defenses = DamageProfile::new();
        let result = resolve_attack(&mut ScriptedDice::new([9]), &attack(&damage, &defenses));
        assert_eq!(result.roll_total, 14);
        assert!(!result.hit && !result.fumble);
    }

    #[test]
    fn test_advantage_compares_natural_die() {
        let damage = spec("1d4");
        let defenses = DamageProfile::new();
        let mut request = attack(&damage, &defenses);
        request.advantage = true;

        let result = resolve_attack(&mut ScriptedDice::new([3, 12, 2]), &request);
        assert_eq!(result.roll_natural, 12);
        assert!(result.hit);

        request.advantage = false;
        request.disadvantage = true;
        let result = resolve_attack(&mut ScriptedDice::new([18, 1, 2]), &request);
        assert!(result.fumble && !result.hit);

        request.advantage = true;
        let mut dice = ScriptedDice::new([3, 18]);
        let result = resolve_attack(&mut dice, &request);
        assert_eq!(result.roll_natural, 3);
    }

    #[test]
    fn test_auto_crit_needs_a_hit() {
        let damage = spec("1d6+2");
        let defenses = DamageProfile::new();
        let mut request = attack(&damage, &defenses);
        request.auto_crit = true;
        request.target_hp = 30;

        let result = resolve_attack(&mut ScriptedDice::new([11, 6, 6]), &request);
        assert!(result.critical);
        assert_eq!(result.damage_total, 14);

        let result = resolve_attack(&mut ScriptedDice::new([2]), &request);
        assert!(!result.hit && !result.critical);
    }

    #[test]
    fn test_immunity_precedence_and_death() {
        let damage = spec("2d6+3");
        let defenses = DamageProfile::new()
            .with_resistance("Slashing")
            .with_immunity("slashing");
        let result = resolve_attack(
            &mut ScriptedDice::new([20, 6, 6, 6, 6]),
            &attack(&damage, &defenses),
        );
        assert!(result.hit);
        assert_eq!(result.damage_total, 0);
        assert_eq!(result.target_remaining_hp, 12);

        let defenses = DamageProfile::new().with_resistance("SLASHING");
        let result = resolve_attack(
            &mut ScriptedDice::new([15, 6, 6]),
            &attack(&damage, &defenses),
        );
        assert_eq!(result.damage_total, 7);

        let defenses = DamageProfile::new();
        let mut request = attack(&damage, &defenses);
        request.target_hp = 5;
        let result = resolve_attack(&mut ScriptedDice::new([15, 6, 6]), &request);
        assert_eq!(result.target_remaining_hp, 0);
        assert!(result.is_dead());
    }

    #[test]
    fn test_negative_damage_clamps() {
        let damage = spec("1d4-5");
        let defenses = DamageProfile::new();
        let result = resolve_attack(&mut ScriptedDice::new([15, 2]), &attack(&damage, &defenses));
        assert!(result.hit);
        assert_eq!(result.damage_total, 0);
    }

    #[test]
    fn test_spell_attack_tag() {
        let damage = spec("1d10");
        let defenses = DamageProfile::new();
        let mut request = attack(&damage, &defenses);
        request.damage_type = "fire";
        let result = resolve_spell_attack(&mut ScriptedDice::new([15, 7]), &request);
        assert_eq!(result.action_type, ActionKind::SpellAttack);
        assert_eq!(result.damage_total, 7);
        assert_eq!(result.damage_type, "fire");
    }

    fn save<'a>(damage: &'a DiceSpec, defenses: &'a DamageProfile) -> SaveRequest<'a> {
        SaveRequest {
            attacker_id: "wizard",
            target_id: "orc",
            save_dc: 13,
            save_stat: Ability::Dex,
            save_bonus: 2,
            damage,
            damage_type: "fire",
            target_hp: 30,
            defenses,
            advantage: false,
            disadvantage: false,
            half_on_success: true,
            auto_fail: false,
        }
    }

    #[test]
    fn test_failed_save_full_damage() {
        let damage = spec("3d6");
        let defenses = DamageProfile::new();
        let result = resolve_saving_throw(
            &mut ScriptedDice::new([5, 4, 4, 3]),
            &save(&damage, &defenses),
        );
        assert_eq!(result.roll_total, 7);
        assert_eq!(result.save_success, Some(false));
        assert!(result.hit);
        assert_eq!(result.damage_total, 11);
        assert_eq!(result.target_remaining_hp, 19);
        assert_eq!(result.save_dc, Some(13));
        assert_eq!(result.save_stat, Some(Ability::Dex));
        assert_eq!(result.target_ac, 0);
    }

    #[test]
    fn test_successful_save_halves_floor() {
        let damage = spec("3d6");
        let defenses = DamageProfile::new();
        let result = resolve_saving_throw(
            &mut ScriptedDice::new([15, 4, 4, 3]),
            &save(&damage, &defenses),
        );
        assert_eq!(result.save_success, Some(true));
        assert!(!result.hit);
        assert_eq!(result.damage_total, 5);

        let mut request = save(&damage, &defenses);
        request.half_on_success = false;
        let result = resolve_saving_throw(&mut ScriptedDice::new([15, 4, 4, 3]), &request);
        assert_eq!(result.damage_total, 0);
    }

    #[test]
    fn test_half_then_resistance() {
        let damage = spec("3d6");
        let defenses = DamageProfile::new().with_resistance("fire");
        // raw 11 -> half 5 -> resisted 2
        let result = resolve_saving_throw(
            &mut ScriptedDice::new([15, 4, 4, 3]),
            &save(&damage, &defenses),
        );
        assert_eq!(result.damage_total, 2);
    }

    #[test]
    fn test_auto_fail_ignores_die() {
        let damage = spec("2d6");
        let defenses = DamageProfile::new();
        let mut request = save(&damage, &defenses);
        request.auto_fail = true;
        let result = resolve_saving_throw(&mut ScriptedDice::new([20, 3, 3]), &request);
        assert_eq!(result.roll_natural, 20);
        assert_eq!(result.save_success, Some(false));
        assert!(result.hit);
        assert_eq!(result.damage_total, 6);
    }

    #[test]
    fn test_aoe_shares_one_damage_roll() {
        let damage = spec("8d6");
        let plain = DamageProfile::new();
        let resistant = DamageProfile::new().with_resistance("fire");
        let immune = DamageProfile::new().with_immunity("fire");
        let targets = [
            AoeTarget {
                target_id: "a",
                current_hp: 40,
                save_bonus: 0,
                defenses: &plain,
                advantage: false,
                disadvantage: false,
                auto_fail: false,
            },
            AoeTarget {
                target_id: "b",
                current_hp: 40,
                save_bonus: 0,
                defenses: &resistant,
                advantage: false,
                disadvantage: false,
                auto_fail: false,
            },
            AoeTarget {
                target_id: "c",
                current_hp: 40,
                save_bonus: 5,
                defenses: &plain,
                advantage: false,
                disadvantage: false,
                auto_fail: false,
            },
            AoeTarget {
                target_id: "d",
                current_hp: 10,
                save_bonus: 0,
                defenses: &immune,
                advantage: false,
                disadvantage: false,
                auto_fail: false,
            },
        ];
        let request = AoeRequest {
            attacker_id: "wizard",
            save_dc: 15,
            save_stat: Ability::Dex,
            damage: &damage,
            damage_type: "fire",
            targets: &targets,
        };

        // 8d6 all threes = 24, then saves 4, 4, 12 (17 succeeds), 2
        let mut dice = ScriptedDice::new([3, 3, 3, 3, 3, 3, 3, 3, 4, 4, 12, 2]);
        let results = resolve_aoe_spell(&mut dice, &request);
        assert_eq!(dice.drawn(), 12);

        let ids: Vec<_> = results.iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
        let damage: Vec<_> = results.iter().map(|r| r.damage_total).collect();
        assert_eq!(damage, [24, 12, 12, 0]);
        assert!(results.iter().all(|r| r.action_type == ActionKind::AreaSave));
        assert_eq!(results[2].save_success, Some(true));
        assert_eq!(results[0].target_remaining_hp, 16);
        assert_eq!(results[3].target_status, TargetStatus::Alive);
    }

    #[test]
    fn test_condition_check() {
        let check = ConditionCheck {
            target_id: "orc",
            condition_id: "Frightened",
            save_dc: 14,
            save_stat: Ability::Wis,
            save_bonus: 1,
            advantage: false,
            disadvantage: false,
            auto_fail: false,
        };

        let outcome = resolve_condition(&mut ScriptedDice::new([6]), &check);
        assert!(outcome.active && !outcome.save_success);
        assert_eq!(outcome.condition_id, "frightened");
        assert!(outcome.effect_description.starts_with("orc is frightened"));

        let outcome = resolve_condition(&mut ScriptedDice::new([13]), &check);
        assert!(!outcome.active && outcome.save_success);
        assert_eq!(outcome.roll_total, 14);
    }

    #[test]
    fn test_packet_builders_and_serde() {
        let damage = spec("1d6");
        let defenses = DamageProfile::new();
        let result = resolve_attack(&mut ScriptedDice::new([15, 6]), &attack(&damage, &defenses))
            .with_conditions(vec!["prone".to_string()])
            .with_environment(vec!["dim_light".to_string()])
            .with_narrative_hint("a glancing blow");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["action_type"], "attack");
        assert_eq!(json["target_status"], "alive");
        assert_eq!(json["conditions_applied"][0], "prone");
        assert_eq!(json["narrative_hint"], "a glancing blow");
        assert_eq!(json["save_stat"], serde_json::Value::Null);
    }
}
