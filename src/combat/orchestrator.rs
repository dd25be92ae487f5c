//! NPC auto-play
//!
//! After a player action (or at encounter start) the orchestrator plays out
//! every NPC turn until the player is up again, then hands control back.
//! Each step locks the encounter, advances and resolves synchronously,
//! releases the lock and only then publishes its events, so a slow or
//! vanished consumer can never hold up the session's state.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::conditions::{disabling_condition, AttackRange};
use super::dice::DieSource;
use super::encounter::{AttackProfile, Encounter, EncounterSnapshot};
use super::resolver::{CombatResult, ConditionOutcome};

/// Step cap for one auto-play run
pub const DEFAULT_MAX_STEPS: usize = 20;

/// Events published as combat progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CombatEvent {
    /// Current turn order and combatant state
    TurnOrder(EncounterSnapshot),
    InitiativeRolled {
        combatant_id: String,
        name: String,
        total: i32,
    },
    ActionResolved {
        attacker_name: String,
        action_name: String,
        is_player: bool,
        result: CombatResult,
    },
    ConditionCheck(ConditionOutcome),
    TurnSkipped {
        combatant_id: String,
        name: String,
        reason: String,
    },
    EncounterEnded {
        outcome: EncounterOutcome,
        defeated: Vec<String>,
    },
    ActionRejected {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterOutcome {
    Victory,
    Defeat,
}

/// Where auto-play begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPlayStart {
    /// The current actor just acted; end its turn first
    AfterPlayerAction,
    /// Look at the current actor without advancing (encounter start)
    InspectCurrent,
}

/// Why auto-play stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoPlayOutcome {
    /// The player is up
    PlayerTurn,
    /// No enemies left; the defeated combatants' names, for rewards
    Victory { defeated: Vec<String> },
    PlayerDefeated,
    /// No player in the roster
    NoPlayer,
    NotStarted,
    StepCapReached,
}

/// What one locked step decided
enum Step {
    Finished(AutoPlayOutcome, Vec<CombatEvent>),
    Continue(Vec<CombatEvent>),
}

/// Play NPC turns until the player is up, the encounter ends or
/// `max_steps` steps have run.
pub async fn run_auto_play<D: DieSource + Send + ?Sized>(
    encounter: &Mutex<Encounter>,
    dice: &mut D,
    events: &mpsc::Sender<CombatEvent>,
    start: AutoPlayStart,
    max_steps: usize,
) -> AutoPlayOutcome {
    for step in 0..max_steps {
        let advance = step > 0 || start == AutoPlayStart::AfterPlayerAction;

        let decided = {
            let mut encounter = encounter.lock().await;
            play_step(&mut encounter, dice, advance)
        };

        match decided {
            Step::Finished(outcome, out) => {
                publish(events, out).await;
                return outcome;
            }
            Step::Continue(out) => publish(events, out).await,
        }
    }

    warn!("auto-play stopped after {} steps", max_steps);
    AutoPlayOutcome::StepCapReached
}

fn play_step<D: DieSource + ?Sized>(
    encounter: &mut Encounter,
    dice: &mut D,
    advance: bool,
) -> Step {
    if !encounter.tracker.is_started() {
        return Step::Finished(AutoPlayOutcome::NotStarted, Vec::new());
    }

    let (player_id, player_alive) = match encounter.player() {
        Some(player) => (player.id.clone(), player.is_alive()),
        None => return Step::Finished(AutoPlayOutcome::NoPlayer, Vec::new()),
    };
    if !player_alive {
        info!("player {} defeated", player_id);
        let ended = CombatEvent::EncounterEnded {
            outcome: EncounterOutcome::Defeat,
            defeated: vec![player_id],
        };
        return Step::Finished(AutoPlayOutcome::PlayerDefeated, vec![ended]);
    }

    if encounter.living_enemies().next().is_none() {
        let defeated: Vec<String> = encounter
            .end_encounter()
            .into_iter()
            .map(|c| c.name)
            .collect();
        info!("encounter won, {} enemies defeated", defeated.len());
        let out = vec![
            CombatEvent::EncounterEnded {
                outcome: EncounterOutcome::Victory,
                defeated: defeated.clone(),
            },
            CombatEvent::TurnOrder(encounter.snapshot()),
        ];
        return Step::Finished(AutoPlayOutcome::Victory { defeated }, out);
    }

    if advance {
        if let Err(e) = encounter.tracker.next_turn() {
            warn!("cannot advance turn: {}", e);
            return Step::Finished(AutoPlayOutcome::NotStarted, Vec::new());
        }
    }

    let mut out = vec![CombatEvent::TurnOrder(encounter.snapshot())];

    let Some(actor) = encounter.tracker.get_current_actor().cloned() else {
        return Step::Finished(AutoPlayOutcome::NotStarted, out);
    };
    if actor.is_player {
        return Step::Finished(AutoPlayOutcome::PlayerTurn, out);
    }

    let skip_reason = if !actor.is_active {
        Some("inactive".to_string())
    } else if let Some(condition) = disabling_condition(actor.conditions.as_slice()) {
        Some(condition.condition_id.clone())
    } else if actor.actions.is_empty() {
        Some("no actions".to_string())
    } else {
        None
    };
    if let Some(reason) = skip_reason {
        debug!("{} skips its turn ({})", actor.name, reason);
        out.push(CombatEvent::TurnSkipped {
            combatant_id: actor.id,
            name: actor.name,
            reason,
        });
        return Step::Continue(out);
    }

    let action = &actor.actions[0];
    let profile = AttackProfile {
        attack_bonus: action.attack_bonus,
        damage: &action.damage,
        damage_type: &action.damage_type,
        range: if action.ranged {
            AttackRange::Ranged
        } else {
            AttackRange::Melee
        },
        spell: false,
    };

    match encounter.attack(dice, &actor.id, &player_id, &profile) {
        Ok(result) => {
            debug!(
                "{} uses {} on {}: hit={} damage={}",
                actor.name, action.name, player_id, result.hit, result.damage_total
            );
            out.push(CombatEvent::ActionResolved {
                attacker_name: actor.name.clone(),
                action_name: action.name.clone(),
                is_player: false,
                result,
            });
            out.push(CombatEvent::TurnOrder(encounter.snapshot()));
        }
        Err(e) => {
            warn!("skipping {}'s turn: {}", actor.name, e);
            out.push(CombatEvent::TurnSkipped {
                combatant_id: actor.id.clone(),
                name: actor.name.clone(),
                reason: e.to_string(),
            });
        }
    }
    Step::Continue(out)
}

async fn publish(events: &mpsc::Sender<CombatEvent>, out: Vec<CombatEvent>) {
    for event in out {
        if events.send(event).await.is_err() {
            debug!("event receiver gone");
            return;
        }
    }
}
