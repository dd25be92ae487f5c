//! Condition catalog and the rules it implies
//!
//! The registry is the single source of truth for what a status condition
//! does. It is built once, never mutated, and every rule question about
//! conditions (can this creature act? does this attack roll with advantage?)
//! is answered from its declared effects.

use once_cell::sync::Lazy;
use serde::Serialize;

use super::dice::RollMode;
use super::effects::ActiveCondition;
use super::rules::Ability;

/// What an effect does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    GrantAdvantage,
    ImposeDisadvantage,
    AutoFailSave,
    AutoFailCheck,
    DisableAction,
    SpeedZero,
    /// Hits against the holder are critical hits
    GrantCrit,
    ResistAllDamage,
}

/// When an effect applies, from the holder's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectContext {
    Always,
    /// Attack rolls made by the holder
    Attack,
    /// Attack rolls made against the holder
    AttackedBy,
    /// Melee attack rolls against the holder (within 5 feet)
    AttackedInMelee,
    /// Ranged attack rolls against the holder
    AttackedAtRange,
    /// Ability checks made by the holder
    AbilityCheck,
    /// Saving throws of one ability made by the holder
    Save(Ability),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConditionEffect {
    pub kind: EffectKind,
    pub context: EffectContext,
}

impl ConditionEffect {
    const fn new(kind: EffectKind, context: EffectContext) -> Self {
        Self { kind, context }
    }
}

/// A status condition and its declared effects
#[derive(Debug, Clone, Serialize)]
pub struct ConditionDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub effects: Vec<ConditionEffect>,
}

static STANDARD: Lazy<ConditionRegistry> = Lazy::new(ConditionRegistry::standard);

/// Read-only catalog of condition definitions, ids unique
#[derive(Debug)]
pub struct ConditionRegistry {
    definitions: Vec<ConditionDefinition>,
}

impl ConditionRegistry {
    /// The process-wide standard catalog
    pub fn global() -> &'static ConditionRegistry {
        &STANDARD
    }

    /// Look up a condition by id (case-insensitive)
    pub fn get(&self, id: &str) -> Option<&ConditionDefinition> {
        let id = id.trim();
        self.definitions
            .iter()
            .find(|d| d.id.eq_ignore_ascii_case(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All definitions, in catalog order
    pub fn all(&self) -> &[ConditionDefinition] {
        &self.definitions
    }

    /// Every effect declared by the given active conditions. Unknown ids
    /// contribute nothing.
    pub fn effects_of<'a>(
        &'a self,
        conditions: &'a [ActiveCondition],
    ) -> impl Iterator<Item = &'a ConditionEffect> + 'a {
        conditions
            .iter()
            .filter_map(move |c| self.get(&c.condition_id))
            .flat_map(|d| d.effects.iter())
    }

    fn standard() -> Self {
        use EffectContext::*;
        use EffectKind::*;

        let e = ConditionEffect::new;
        let incapacitated = [
            e(DisableAction, Always),
            e(SpeedZero, Always),
            e(AutoFailSave, Save(Ability::Str)),
            e(AutoFailSave, Save(Ability::Dex)),
            e(GrantAdvantage, AttackedBy),
        ];

        let definitions = vec![
            ConditionDefinition {
                id: "blinded",
                name: "Blinded",
                description: "Can't see. Attacks have disadvantage. Attacks against you have advantage.",
                effects: vec![e(ImposeDisadvantage, Attack), e(GrantAdvantage, AttackedBy)],
            },
            ConditionDefinition {
                id: "charmed",
                name: "Charmed",
                description: "Can't attack the charmer. The charmer has advantage on social checks.",
                effects: vec![],
            },
            ConditionDefinition {
                id: "deafened",
                name: "Deafened",
                description: "Can't hear.",
                effects: vec![],
            },
            ConditionDefinition {
                id: "frightened",
                name: "Frightened",
                description: "Disadvantage on checks and attacks while the source is visible. Can't move closer.",
                effects: vec![e(ImposeDisadvantage, Attack), e(ImposeDisadvantage, AbilityCheck)],
            },
            ConditionDefinition {
                id: "grappled",
                name: "Grappled",
                description: "Speed 0.",
                effects: vec![e(SpeedZero, Always)],
            },
            ConditionDefinition {
                id: "incapacitated",
                name: "Incapacitated",
                description: "Can't take actions or reactions.",
                effects: vec![e(DisableAction, Always)],
            },
            ConditionDefinition {
                id: "invisible",
                name: "Invisible",
                description: "Impossible to see. Attacks have advantage. Attacks against you have disadvantage.",
                effects: vec![e(GrantAdvantage, Attack), e(ImposeDisadvantage, AttackedBy)],
            },
            ConditionDefinition {
                id: "paralyzed",
                name: "Paralyzed",
                description: "Incapacitated. Can't move or speak. Auto-fail STR/DEX saves. Attacks against have advantage; hits within 5 ft are critical.",
                effects: incapacitated
                    .iter()
                    .copied()
                    .chain([e(GrantCrit, AttackedInMelee)])
                    .collect(),
            },
            ConditionDefinition {
                id: "petrified",
                name: "Petrified",
                description: "Turned to stone. Incapacitated. Auto-fail STR/DEX saves. Resistance to all damage.",
                effects: incapacitated
                    .iter()
                    .copied()
                    .chain([e(ResistAllDamage, Always)])
                    .collect(),
            },
            ConditionDefinition {
                id: "poisoned",
                name: "Poisoned",
                description: "Disadvantage on attacks and ability checks.",
                effects: vec![e(ImposeDisadvantage, Attack), e(ImposeDisadvantage, AbilityCheck)],
            },
            ConditionDefinition {
                id: "prone",
                name: "Prone",
                description: "Crawl only. Your attacks have disadvantage. Melee attacks against you have advantage; ranged attacks against you have disadvantage.",
                effects: vec![
                    e(ImposeDisadvantage, Attack),
                    e(GrantAdvantage, AttackedInMelee),
                    e(ImposeDisadvantage, AttackedAtRange),
                ],
            },
            ConditionDefinition {
                id: "restrained",
                name: "Restrained",
                description: "Speed 0. Attacks against you have advantage. Your attacks have disadvantage. Disadvantage on DEX saves.",
                effects: vec![
                    e(SpeedZero, Always),
                    e(GrantAdvantage, AttackedBy),
                    e(ImposeDisadvantage, Attack),
                    e(ImposeDisadvantage, Save(Ability::Dex)),
                ],
            },
            ConditionDefinition {
                id: "stunned",
                name: "Stunned",
                description: "Incapacitated. Can't move. Auto-fail STR/DEX saves. Attacks against you have advantage.",
                effects: incapacitated.to_vec(),
            },
            ConditionDefinition {
                id: "unconscious",
                name: "Unconscious",
                description: "Incapacitated and prone. Auto-fail STR/DEX saves. Attacks against you have advantage; hits within 5 ft are critical.",
                effects: incapacitated
                    .iter()
                    .copied()
                    .chain([e(GrantCrit, AttackedInMelee)])
                    .collect(),
            },
        ];

        Self { definitions }
    }
}

/// Melee or ranged, for effects that care about distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackRange {
    #[default]
    Melee,
    Ranged,
}

/// The kind of d20 roll being made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollContext {
    Attack(AttackRange),
    AbilityCheck,
    Save(Ability),
}

/// How `actor` rolls in `context` against `opponent`, decided purely by the
/// registry's declared effects on both sides.
pub fn roll_mode(
    actor: &[ActiveCondition],
    context: RollContext,
    opponent: &[ActiveCondition],
) -> RollMode {
    let registry = ConditionRegistry::global();

    let own = registry
        .effects_of(actor)
        .filter(|effect| match (context, effect.context) {
            (RollContext::Attack(_), EffectContext::Attack) => true,
            (RollContext::AbilityCheck, EffectContext::AbilityCheck) => true,
            (RollContext::Save(stat), EffectContext::Save(s)) => stat == s,
            _ => false,
        });

    let theirs = registry
        .effects_of(opponent)
        .filter(|effect| match (context, effect.context) {
            (RollContext::Attack(_), EffectContext::AttackedBy) => true,
            (RollContext::Attack(AttackRange::Melee), EffectContext::AttackedInMelee) => true,
            (RollContext::Attack(AttackRange::Ranged), EffectContext::AttackedAtRange) => true,
            _ => false,
        });

    let (mut advantage, mut disadvantage) = (false, false);
    for effect in own.chain(theirs) {
        match effect.kind {
            EffectKind::GrantAdvantage => advantage = true,
            EffectKind::ImposeDisadvantage => disadvantage = true,
            _ => {}
        }
    }

    RollMode::from_flags(advantage, disadvantage)
}

fn has_effect(
    conditions: &[ActiveCondition],
    kind: EffectKind,
    context: EffectContext,
) -> bool {
    ConditionRegistry::global()
        .effects_of(conditions)
        .any(|e| e.kind == kind && e.context == context)
}

/// First active condition that stops its holder from taking actions
pub fn disabling_condition(conditions: &[ActiveCondition]) -> Option<&ActiveCondition> {
    let registry = ConditionRegistry::global();
    conditions.iter().find(|c| {
        registry
            .get(&c.condition_id)
            .is_some_and(|d| d.effects.iter().any(|e| e.kind == EffectKind::DisableAction))
    })
}

/// Whether the holder may take actions
pub fn can_act(conditions: &[ActiveCondition]) -> bool {
    disabling_condition(conditions).is_none()
}

pub fn speed_is_zero(conditions: &[ActiveCondition]) -> bool {
    has_effect(conditions, EffectKind::SpeedZero, EffectContext::Always)
}

/// Whether saves of `stat` fail without a roll
pub fn auto_fails_save(conditions: &[ActiveCondition], stat: Ability) -> bool {
    has_effect(conditions, EffectKind::AutoFailSave, EffectContext::Save(stat))
}

/// Whether a hit against the holder from `range` is automatically critical
pub fn grants_crit(conditions: &[ActiveCondition], range: AttackRange) -> bool {
    range == AttackRange::Melee
        && has_effect(conditions, EffectKind::GrantCrit, EffectContext::AttackedInMelee)
}

pub fn resists_all_damage(conditions: &[ActiveCondition]) -> bool {
    has_effect(conditions, EffectKind::ResistAllDamage, EffectContext::Always)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(ids: &[&str]) -> Vec<ActiveCondition> {
        ids.iter().map(|id| ActiveCondition::new(*id, -1)).collect()
    }

    #[test]
    fn test_standard_catalog() {
        let registry = ConditionRegistry::global();
        assert_eq!(registry.all().len(), 14);
        for id in [
            "blinded",
            "charmed",
            "deafened",
            "frightened",
            "grappled",
            "incapacitated",
            "invisible",
            "paralyzed",
            "petrified",
            "poisoned",
            "prone",
            "restrained",
            "stunned",
            "unconscious",
        ] {
            assert!(registry.contains(id), "missing {}", id);
        }

        let blinded = registry.get("Blinded").unwrap();
        assert_eq!(blinded.name, "Blinded");
        assert_eq!(blinded.effects.len(), 2);
        assert!(registry.get("exhausted").is_none());
    }

    #[test]
    fn test_ids_unique() {
        let registry = ConditionRegistry::global();
        let mut ids: Vec<_> = registry.all().iter().map(|d| d.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), registry.all().len());
    }

    #[test]
    fn test_attacker_conditions() {
        let melee = RollContext::Attack(AttackRange::Melee);
        assert_eq!(roll_mode(&active(&["poisoned"]), melee, &[]), RollMode::Disadvantage);
        assert_eq!(roll_mode(&active(&["invisible"]), melee, &[]), RollMode::Advantage);
        assert_eq!(roll_mode(&[], melee, &[]), RollMode::Normal);
    }

    #[test]
    fn test_defender_conditions() {
        let melee = RollContext::Attack(AttackRange::Melee);
        let ranged = RollContext::Attack(AttackRange::Ranged);

        assert_eq!(roll_mode(&[], melee, &active(&["stunned"])), RollMode::Advantage);
        assert_eq!(roll_mode(&[], melee, &active(&["invisible"])), RollMode::Disadvantage);

        // Prone depends on distance
        assert_eq!(roll_mode(&[], melee, &active(&["prone"])), RollMode::Advantage);
        assert_eq!(roll_mode(&[], ranged, &active(&["prone"])), RollMode::Disadvantage);
    }

    #[test]
    fn test_advantage_and_disadvantage_cancel() {
        // Poisoned attacker against a restrained target
        let mode = roll_mode(
            &active(&["poisoned"]),
            RollContext::Attack(AttackRange::Melee),
            &active(&["restrained"]),
        );
        assert_eq!(mode, RollMode::Normal);
    }

    #[test]
    fn test_save_and_check_contexts() {
        let restrained = active(&["restrained"]);
        assert_eq!(
            roll_mode(&restrained, RollContext::Save(Ability::Dex), &[]),
            RollMode::Disadvantage
        );
        assert_eq!(
            roll_mode(&restrained, RollContext::Save(Ability::Wis), &[]),
            RollMode::Normal
        );
        assert_eq!(
            roll_mode(&active(&["frightened"]), RollContext::AbilityCheck, &[]),
            RollMode::Disadvantage
        );
        // Attack effects don't leak into saves
        assert_eq!(
            roll_mode(&active(&["blinded"]), RollContext::Save(Ability::Dex), &[]),
            RollMode::Normal
        );
    }

    #[test]
    fn test_structural_effects() {
        let paralyzed = active(&["paralyzed"]);
        assert!(!can_act(&paralyzed));
        assert!(speed_is_zero(&paralyzed));
        assert!(auto_fails_save(&paralyzed, Ability::Dex));
        assert!(auto_fails_save(&paralyzed, Ability::Str));
        assert!(!auto_fails_save(&paralyzed, Ability::Wis));
        assert!(grants_crit(&paralyzed, AttackRange::Melee));
        assert!(!grants_crit(&paralyzed, AttackRange::Ranged));

        let grappled = active(&["grappled"]);
        assert!(can_act(&grappled));
        assert!(speed_is_zero(&grappled));

        assert!(resists_all_damage(&active(&["petrified"])));
        assert!(!resists_all_damage(&grappled));

        let mixed = active(&["poisoned", "stunned"]);
        assert_eq!(disabling_condition(&mixed).unwrap().condition_id, "stunned");
    }

    #[test]
    fn test_unknown_conditions_are_inert() {
        let odd = active(&["bewildered"]);
        assert!(can_act(&odd));
        assert_eq!(
            roll_mode(&odd, RollContext::Attack(AttackRange::Melee), &odd),
            RollMode::Normal
        );
    }
}
