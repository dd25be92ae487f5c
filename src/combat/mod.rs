//! Combat system module
//!
//! Implements tabletop combat with:
//! - Dice rolling (e.g., "2d6+3") from a cryptographically strong source
//! - Attack, saving throw, area and condition resolution into fact packets
//! - Damage resistance and immunity
//! - The standard status conditions and their rule effects
//! - Initiative order and NPC auto-play

mod conditions;
mod damage;
mod dice;
mod effects;
mod encounter;
mod initiative;
mod orchestrator;
mod resolver;
mod rules;

pub use conditions::{
    auto_fails_save, can_act, disabling_condition, grants_crit, resists_all_damage, roll_mode,
    speed_is_zero, AttackRange, ConditionDefinition, ConditionEffect, ConditionRegistry,
    EffectContext, EffectKind, RollContext,
};
pub use damage::{DamageModifier, DamageProfile};
pub use dice::{
    d20, d20_with_mode, damage, is_critical, is_fumble, parse_dice, roll, DiceError, DiceResult,
    DiceSpec, DieSource, RollMode, ScriptedDice, SecureDice,
};
pub use effects::{ActiveCondition, ConditionState, INDEFINITE};
pub use encounter::{AttackProfile, CombatantSnapshot, Encounter, EncounterSnapshot, SaveEffect};
pub use initiative::{Combatant, InitiativeTracker, ScriptedAction, TrackerError, UNROLLED};
pub use orchestrator::{
    run_auto_play, AutoPlayOutcome, AutoPlayStart, CombatEvent, EncounterOutcome,
    DEFAULT_MAX_STEPS,
};
pub use resolver::{
    resolve_aoe_spell, resolve_attack, resolve_condition, resolve_saving_throw,
    resolve_spell_attack, ActionKind, AoeRequest, AoeTarget, AttackRequest, CombatResult,
    ConditionCheck, ConditionOutcome, SaveRequest, TargetStatus,
};
pub use rules::{
    ability_modifier, calculate_ac, proficiency_bonus, spell_attack_bonus, spell_save_dc, Ability,
    AbilityModifiers, ArmorClassInputs, ArmorType,
};
