//! Game sessions
//!
//! A session owns one encounter behind its own lock. Inbound actions are
//! validated against the roster and the reference data, resolved under the
//! lock, and their events published once it is released. Actions that can
//! end the player's turn hand over to NPC auto-play.

use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::combat::{
    calculate_ac, disabling_condition, run_auto_play, spell_attack_bonus, spell_save_dc,
    AbilityModifiers, ActiveCondition, ArmorClassInputs, AttackProfile, AttackRange,
    AutoPlayOutcome, AutoPlayStart, CombatEvent, CombatResult, Combatant, ConditionRegistry,
    DamageProfile, DiceSpec, DieSource, Encounter, EncounterSnapshot, SaveEffect,
    ScriptedAction, TrackerError, INDEFINITE,
};
use crate::reference::{weapon_or_fallback, MonsterStats, ReferenceData, WeaponStats};

/// Rejected inbound actions
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown combatant: {0}")]
    UnknownCombatant(String),

    #[error("unknown spell: {0}")]
    UnknownSpell(String),

    #[error("unknown condition: {0}")]
    UnknownCondition(String),

    #[error("{combatant} cannot act while {condition}")]
    Incapacitated { combatant: String, condition: String },

    #[error("{0} is down")]
    Down(String),

    #[error("combat has not started")]
    NotStarted,

    #[error("combat already started")]
    AlreadyStarted,

    #[error("no caster: name one or add a player")]
    NoCaster,

    #[error("{0} needs a target")]
    MissingTarget(String),

    #[error("spell {0} cannot be resolved")]
    InvalidSpell(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

pub const MAX_HP: i32 = 10_000;
pub const MAX_AC: i32 = 50;
pub const MAX_CR: f32 = 30.0;
pub const MAX_LEVEL: u32 = 20;
pub const MAX_ABILITY_MODIFIER: i32 = 10;
pub const MAX_ABILITY_SCORE: i32 = 30;
pub const MAX_ATTACK_BONUS: i32 = 30;

/// A combatant joining the encounter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewCombatant {
    pub id: String,
    pub name: String,
    /// Monster stat block to take stats from
    pub template_id: Option<String>,
    pub is_player: bool,
    pub hp_max: Option<i32>,
    /// Explicit armor class; otherwise computed from `armor` and DEX
    pub ac: Option<i32>,
    pub armor: Option<ArmorClassInputs>,
    pub cr: Option<f32>,
    pub level: Option<u32>,
    pub creature_type: Option<String>,
    pub abilities: AbilityModifiers,
    /// Raw str/dex/con/int/wis/cha scores; replace `abilities` when given
    pub ability_scores: Option<[i32; 6]>,
    pub actions: Vec<ScriptedAction>,
    pub resistances: Vec<String>,
    pub immunities: Vec<String>,
    pub position: Option<String>,
}

impl NewCombatant {
    fn validate(&self) -> Result<(), SessionError> {
        if let Some(hp_max) = self.hp_max {
            within("hp_max", hp_max, 1..=MAX_HP)?;
        }
        if let Some(ac) = self.ac {
            within("ac", ac, 0..=MAX_AC)?;
        }
        if let Some(cr) = self.cr {
            within("cr", cr, 0.0..=MAX_CR)?;
        }
        if let Some(level) = self.level {
            within("level", level, 1..=MAX_LEVEL)?;
        }

        let modifiers = -MAX_ABILITY_MODIFIER..=MAX_ABILITY_MODIFIER;
        let a = &self.abilities;
        for (field, value) in [
            ("str", a.str),
            ("dex", a.dex),
            ("con", a.con),
            ("int", a.int),
            ("wis", a.wis),
            ("cha", a.cha),
        ] {
            within(field, value, modifiers.clone())?;
        }
        for score in self.ability_scores.iter().flatten() {
            within("ability score", *score, 1..=MAX_ABILITY_SCORE)?;
        }

        if let Some(armor) = &self.armor {
            within("base_ac", armor.base_ac, 0..=MAX_AC)?;
            within("shield_bonus", armor.shield_bonus, 0..=MAX_AC)?;
            within("magical_bonus", armor.magical_bonus, 0..=MAX_AC)?;
            for feature in &armor.class_features {
                within("class feature AC", *feature, 0..=MAX_AC)?;
            }
        }

        for action in &self.actions {
            within(
                "attack_bonus",
                action.attack_bonus,
                -MAX_ATTACK_BONUS..=MAX_ATTACK_BONUS,
            )?;
        }
        Ok(())
    }
}

/// Scene context a narrator reads alongside the fact packet
#[derive(Debug, Clone, Default)]
struct SceneNotes {
    environment_tags: Vec<String>,
    narrative_hint: Option<String>,
}

impl SceneNotes {
    fn annotate(&self, result: CombatResult) -> CombatResult {
        let result = result.with_environment(self.environment_tags.clone());
        match &self.narrative_hint {
            Some(hint) => result.with_narrative_hint(hint.clone()),
            None => result,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellCast {
    /// Defaults to the player
    #[serde(default)]
    pub caster_id: Option<String>,
    pub spell_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
    /// Several targets make an area effect
    #[serde(default)]
    pub target_ids: Vec<String>,
    /// Overrides the spell's own condition
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub environment_tags: Vec<String>,
    #[serde(default)]
    pub narrative_hint: Option<String>,
}

fn indefinite() -> i32 {
    INDEFINITE
}

/// Inbound actions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    AddCombatant(NewCombatant),
    RollInitiative {
        combatant_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        dex_modifier: i32,
        #[serde(default)]
        is_player: bool,
    },
    StartCombat,
    NextTurn,
    Attack {
        attacker_id: String,
        target_id: String,
        /// Scripted action name or weapon id
        #[serde(default)]
        weapon: Option<String>,
        /// Copied into the fact packet
        #[serde(default)]
        environment_tags: Vec<String>,
        #[serde(default)]
        narrative_hint: Option<String>,
    },
    CastSpell(SpellCast),
    ApplyCondition {
        combatant_id: String,
        condition_id: String,
        #[serde(default = "indefinite")]
        duration_rounds: i32,
        #[serde(default)]
        source_id: Option<String>,
    },
    RemoveCondition {
        combatant_id: String,
        condition_id: String,
    },
}

/// What an attack is made with
struct Armament {
    name: String,
    attack_bonus: i32,
    damage: DiceSpec,
    damage_type: String,
    range: AttackRange,
}

impl From<&ScriptedAction> for Armament {
    fn from(action: &ScriptedAction) -> Self {
        Self {
            name: action.name.clone(),
            attack_bonus: action.attack_bonus,
            damage: action.damage.clone(),
            damage_type: action.damage_type.clone(),
            range: if action.ranged {
                AttackRange::Ranged
            } else {
                AttackRange::Melee
            },
        }
    }
}

impl Armament {
    /// Weapon wielded with DEX (finesse, ranged) or STR for to-hit and damage
    fn wielded(weapon: &WeaponStats, abilities: &AbilityModifiers) -> Self {
        let modifier = if weapon.uses_dex() {
            abilities.dex
        } else {
            abilities.str
        };
        Self {
            name: weapon.name.clone(),
            attack_bonus: modifier,
            damage: weapon.damage.plus(modifier),
            damage_type: weapon.damage_type.clone(),
            range: if weapon.is_ranged() {
                AttackRange::Ranged
            } else {
                AttackRange::Melee
            },
        }
    }

    fn profile(&self) -> AttackProfile<'_> {
        AttackProfile {
            attack_bonus: self.attack_bonus,
            damage: &self.damage,
            damage_type: &self.damage_type,
            range: self.range,
            spell: false,
        }
    }
}

/// Events produced under the lock, and whether auto-play follows
type Resolved = (Vec<CombatEvent>, Option<AutoPlayStart>);

/// One game session and its encounter
pub struct Session {
    id: String,
    encounter: Mutex<Encounter>,
    reference: Arc<dyn ReferenceData>,
    max_steps: usize,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, reference: Arc<dyn ReferenceData>, max_steps: usize) -> Self {
        Self {
            id: id.into(),
            encounter: Mutex::new(Encounter::new()),
            reference,
            max_steps,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub async fn snapshot(&self) -> EncounterSnapshot {
        self.encounter.lock().await.snapshot()
    }

    /// Apply one inbound action, publishing its events on `events`.
    ///
    /// Returns how auto-play ended when the action triggered it.
    pub async fn apply<D: DieSource + Send + ?Sized>(
        &self,
        action: Action,
        dice: &mut D,
        events: &mpsc::Sender<CombatEvent>,
    ) -> Result<Option<AutoPlayOutcome>, SessionError> {
        let (out, auto_play) = {
            let mut encounter = self.encounter.lock().await;
            self.resolve(&mut encounter, action, dice)?
        };

        publish(events, out).await;

        match auto_play {
            Some(start) => Ok(Some(
                run_auto_play(&self.encounter, dice, events, start, self.max_steps).await,
            )),
            None => Ok(None),
        }
    }

    fn resolve<D: DieSource + ?Sized>(
        &self,
        encounter: &mut Encounter,
        action: Action,
        dice: &mut D,
    ) -> Result<Resolved, SessionError> {
        match action {
            Action::AddCombatant(spec) => {
                self.add_combatant(encounter, spec)?;
                Ok((vec![CombatEvent::TurnOrder(encounter.snapshot())], None))
            }
            Action::RollInitiative {
                combatant_id,
                name,
                dex_modifier,
                is_player,
            } => {
                within(
                    "dex_modifier",
                    dex_modifier,
                    -MAX_ABILITY_MODIFIER..=MAX_ABILITY_MODIFIER,
                )?;
                if encounter.tracker.get(&combatant_id).is_none() {
                    let name = name.unwrap_or_else(|| combatant_id.clone());
                    let mut combatant = Combatant::new(&combatant_id, name).with_dex(dex_modifier);
                    if is_player {
                        combatant = combatant.player();
                    }
                    encounter.tracker.add_combatant(combatant)?;
                }
                let total = encounter.tracker.roll_initiative(&combatant_id, dice)?;
                let name = encounter
                    .tracker
                    .get(&combatant_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                debug!("{} rolled {} for initiative", name, total);
                Ok((
                    vec![
                        CombatEvent::InitiativeRolled {
                            combatant_id,
                            name,
                            total,
                        },
                        CombatEvent::TurnOrder(encounter.snapshot()),
                    ],
                    None,
                ))
            }
            Action::StartCombat => {
                if encounter.tracker.is_started() {
                    return Err(SessionError::AlreadyStarted);
                }
                encounter.tracker.start_encounter(dice)?;
                info!(
                    "Session {}: combat started with {} combatants",
                    self.id,
                    encounter.tracker.len()
                );
                Ok((Vec::new(), Some(AutoPlayStart::InspectCurrent)))
            }
            Action::NextTurn => {
                if !encounter.tracker.is_started() {
                    return Err(SessionError::NotStarted);
                }
                encounter.tracker.next_turn()?;
                Ok((Vec::new(), Some(AutoPlayStart::InspectCurrent)))
            }
            Action::Attack {
                attacker_id,
                target_id,
                weapon,
                environment_tags,
                narrative_hint,
            } => {
                let scene = SceneNotes {
                    environment_tags,
                    narrative_hint,
                };
                let out = self.attack(
                    encounter,
                    dice,
                    &attacker_id,
                    &target_id,
                    weapon.as_deref(),
                    &scene,
                )?;
                Ok((out, Some(AutoPlayStart::AfterPlayerAction)))
            }
            Action::CastSpell(cast) => {
                let out = self.cast_spell(encounter, dice, cast)?;
                Ok((out, Some(AutoPlayStart::AfterPlayerAction)))
            }
            Action::ApplyCondition {
                combatant_id,
                condition_id,
                duration_rounds,
                source_id,
            } => {
                require_condition(&condition_id)?;
                let mut condition = ActiveCondition::new(&condition_id, duration_rounds);
                if let Some(source) = source_id {
                    condition = condition.with_source(source);
                }
                encounter.tracker.add_condition(&combatant_id, condition)?;
                debug!("{} is now {}", combatant_id, condition_id);
                Ok((vec![CombatEvent::TurnOrder(encounter.snapshot())], None))
            }
            Action::RemoveCondition {
                combatant_id,
                condition_id,
            } => {
                require_condition(&condition_id)?;
                if encounter
                    .tracker
                    .remove_condition(&combatant_id, &condition_id)?
                {
                    debug!("{} is no longer {}", combatant_id, condition_id);
                }
                Ok((vec![CombatEvent::TurnOrder(encounter.snapshot())], None))
            }
        }
    }

    fn add_combatant(
        &self,
        encounter: &mut Encounter,
        spec: NewCombatant,
    ) -> Result<(), SessionError> {
        let id = spec.id.trim();
        if id.is_empty() {
            return Err(SessionError::InvalidAction(
                "combatant id is empty".to_string(),
            ));
        }
        spec.validate()?;

        let template = spec.template_id.as_deref().and_then(|template_id| {
            let found = self.reference.monster(template_id);
            if found.is_none() {
                warn!("Unknown monster template {}, using given stats", template_id);
            }
            found
        });

        let name = match (spec.name.trim(), template) {
            ("", Some(monster)) => monster.name.clone(),
            ("", None) => id.to_string(),
            (name, _) => name.to_string(),
        };

        let mut combatant = match template {
            Some(monster) => from_template(id, name, monster),
            None => {
                let abilities = spec
                    .ability_scores
                    .map(AbilityModifiers::from_scores)
                    .unwrap_or(spec.abilities);
                let ac = match spec.ac {
                    Some(ac) => ac,
                    None => {
                        let armor = ArmorClassInputs {
                            dex_modifier: abilities.dex,
                            ..spec.armor.unwrap_or_default()
                        };
                        let ac = calculate_ac(&armor);
                        within("ac", ac, 0..=MAX_AC)?;
                        ac
                    }
                };
                let mut combatant = Combatant::new(id, name)
                    .with_abilities(abilities)
                    .with_hp(spec.hp_max.unwrap_or(10))
                    .with_ac(ac)
                    .with_cr(spec.cr.unwrap_or(0.0))
                    .with_creature_type(spec.creature_type.unwrap_or_default())
                    .with_defenses(DamageProfile {
                        resistances: spec.resistances,
                        immunities: spec.immunities,
                    });
                combatant.actions = spec.actions;
                combatant
            }
        };
        if spec.is_player {
            combatant = combatant.player();
        }
        if let Some(level) = spec.level {
            combatant = combatant.with_level(level);
        }

        encounter.tracker.add_combatant(combatant)?;
        if let Some(position) = spec.position {
            encounter.set_position(id, position);
        }
        info!("Session {}: {} joined", self.id, id);
        Ok(())
    }

    fn attack<D: DieSource + ?Sized>(
        &self,
        encounter: &mut Encounter,
        dice: &mut D,
        attacker_id: &str,
        target_id: &str,
        weapon: Option<&str>,
        scene: &SceneNotes,
    ) -> Result<Vec<CombatEvent>, SessionError> {
        let attacker = ready_combatant(encounter, attacker_id)?;
        if encounter.tracker.get(target_id).is_none() {
            return Err(SessionError::UnknownCombatant(target_id.to_string()));
        }

        let armament = self.armament(attacker, weapon);
        let attacker_name = attacker.name.clone();
        let is_player = attacker.is_player;

        let result = encounter.attack(dice, attacker_id, target_id, &armament.profile())?;
        let result = scene.annotate(result);
        debug!(
            "{} attacks {} with {}: hit={} damage={}",
            attacker_name, target_id, armament.name, result.hit, result.damage_total
        );

        Ok(vec![
            CombatEvent::ActionResolved {
                attacker_name,
                action_name: armament.name,
                is_player,
                result,
            },
            CombatEvent::TurnOrder(encounter.snapshot()),
        ])
    }

    /// Scripted action by name, then a reference weapon, then the fallback.
    /// NPCs attacking without naming anything use their first action.
    fn armament(&self, attacker: &Combatant, weapon: Option<&str>) -> Armament {
        let scripted = match weapon {
            Some(name) => attacker.action(name),
            None if !attacker.is_player => attacker.actions.first(),
            None => None,
        };
        if let Some(action) = scripted {
            return Armament::from(action);
        }

        let stats = match weapon {
            Some(id) => weapon_or_fallback(self.reference.as_ref(), id),
            None => WeaponStats::fallback(),
        };
        Armament::wielded(&stats, &attacker.abilities)
    }

    fn cast_spell<D: DieSource + ?Sized>(
        &self,
        encounter: &mut Encounter,
        dice: &mut D,
        cast: SpellCast,
    ) -> Result<Vec<CombatEvent>, SessionError> {
        let caster_id = match cast.caster_id {
            Some(id) => id,
            None => encounter
                .player()
                .map(|p| p.id.clone())
                .ok_or(SessionError::NoCaster)?,
        };
        let caster = ready_combatant(encounter, &caster_id)?;
        let caster_name = caster.name.clone();
        let is_player = caster.is_player;
        let save_dc = spell_save_dc(caster.level, caster.abilities.int);
        let attack_bonus = spell_attack_bonus(caster.level, caster.abilities.int);
        let scene = SceneNotes {
            environment_tags: cast.environment_tags,
            narrative_hint: cast.narrative_hint,
        };

        let spell = self
            .reference
            .spell(&cast.spell_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSpell(cast.spell_id.clone()))?;

        let condition = cast.condition.or_else(|| spell.condition.clone());
        if let Some(condition) = &condition {
            require_condition(condition)?;
        }

        let mut targets = cast.target_ids;
        if targets.is_empty() {
            targets.extend(cast.target_id);
        }
        if targets.is_empty() {
            return Err(SessionError::MissingTarget(spell.name));
        }
        if let Some(missing) = targets.iter().find(|t| encounter.tracker.get(t).is_none()) {
            return Err(SessionError::UnknownCombatant(missing.clone()));
        }

        let resolved = |result: CombatResult| CombatEvent::ActionResolved {
            attacker_name: caster_name.clone(),
            action_name: spell.name.clone(),
            is_player,
            result: scene.annotate(result),
        };
        let mut out = Vec::new();

        match (&spell.damage, spell.save_stat) {
            (Some(damage), _) if spell.requires_attack_roll => {
                let profile = AttackProfile {
                    attack_bonus,
                    damage,
                    damage_type: &spell.damage_type,
                    range: AttackRange::Ranged,
                    spell: true,
                };
                for target in &targets {
                    let result = encounter.attack(dice, &caster_id, target, &profile)?;
                    out.push(resolved(result));
                }
            }
            (Some(damage), Some(save_stat)) => {
                let effect = SaveEffect {
                    save_dc,
                    save_stat,
                    damage,
                    damage_type: &spell.damage_type,
                    half_on_success: spell.half_on_success,
                };
                let results = if targets.len() > 1 {
                    encounter.area_save(dice, &caster_id, &targets, &effect)?
                } else {
                    vec![encounter.saving_throw(dice, &caster_id, &targets[0], &effect)?]
                };

                for result in results {
                    let failed = result.save_success == Some(false) && !result.is_dead();
                    let result = match &condition {
                        Some(condition) if failed => {
                            let applied = ActiveCondition::new(condition, spell.condition_rounds)
                                .with_source(&caster_id);
                            let applied_id = applied.condition_id.clone();
                            encounter.tracker.add_condition(&result.target_id, applied)?;
                            result.with_conditions(vec![applied_id])
                        }
                        _ => result,
                    };
                    out.push(resolved(result));
                }
            }
            (None, Some(save_stat)) => {
                let Some(condition) = &condition else {
                    return Err(SessionError::InvalidSpell(cast.spell_id));
                };
                for target in &targets {
                    let outcome = encounter.condition_check(
                        dice,
                        &caster_id,
                        target,
                        condition,
                        save_dc,
                        save_stat,
                        spell.condition_rounds,
                    )?;
                    out.push(CombatEvent::ConditionCheck(outcome));
                }
            }
            _ => return Err(SessionError::InvalidSpell(cast.spell_id)),
        }

        debug!("{} cast {} on {:?}", caster_name, spell.name, targets);
        out.push(CombatEvent::TurnOrder(encounter.snapshot()));
        Ok(out)
    }
}

fn from_template(id: &str, name: String, monster: &MonsterStats) -> Combatant {
    let mut combatant = Combatant::new(id, name)
        .with_hp(monster.hp_max)
        .with_ac(monster.ac)
        .with_cr(monster.cr)
        .with_creature_type(&monster.creature_type)
        .with_dex(monster.dex_modifier)
        .with_defenses(DamageProfile {
            resistances: monster.resistances.clone(),
            immunities: monster.immunities.clone(),
        });
    combatant.actions = monster.actions.clone();
    combatant
}

/// A living roster member whose conditions let it act
fn ready_combatant<'a>(
    encounter: &'a Encounter,
    id: &str,
) -> Result<&'a Combatant, SessionError> {
    let combatant = encounter
        .tracker
        .get(id)
        .ok_or_else(|| SessionError::UnknownCombatant(id.to_string()))?;
    if !combatant.is_alive() {
        return Err(SessionError::Down(combatant.name.clone()));
    }
    if let Some(condition) = disabling_condition(combatant.conditions.as_slice()) {
        return Err(SessionError::Incapacitated {
            combatant: combatant.name.clone(),
            condition: condition.condition_id.clone(),
        });
    }
    Ok(combatant)
}

fn within<T>(field: &str, value: T, range: RangeInclusive<T>) -> Result<(), SessionError>
where
    T: PartialOrd + fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SessionError::InvalidAction(format!(
            "{} {} outside {}..={}",
            field,
            value,
            range.start(),
            range.end()
        )))
    }
}

fn require_condition(id: &str) -> Result<(), SessionError> {
    if ConditionRegistry::global().contains(id) {
        Ok(())
    } else {
        Err(SessionError::UnknownCondition(id.to_string()))
    }
}

async fn publish(events: &mpsc::Sender<CombatEvent>, out: Vec<CombatEvent>) {
    for event in out {
        if events.send(event).await.is_err() {
            debug!("event receiver gone");
            return;
        }
    }
}

/// All live sessions, by id
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    reference: Arc<dyn ReferenceData>,
    max_steps: usize,
}

impl SessionManager {
    pub fn new(reference: Arc<dyn ReferenceData>, max_steps: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            reference,
            max_steps,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.get(id).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                info!("Created session {}", id);
                Arc::new(Session::new(id, self.reference.clone(), self.max_steps))
            })
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
