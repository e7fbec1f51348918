//! Death moves
//!
//! A player character whose last HP is marked picks one of three moves:
//! - Blaze of Glory: one last act, then death
//! - Avoid Death: fall unconscious, maybe gaining a scar
//! - Risk It All: roll the duality dice and let them decide

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::ledger::ResourceLedger;
use crate::error::{EngineError, EngineResult};

/// What matching dice do on Risk It All
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskItAllPolicy {
    /// Clear every marked HP and Stress
    #[default]
    ClearAll,
    /// Survive unconscious, nothing cleared
    NoRecovery,
    /// Clear this many HP
    Minimal(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathMove {
    BlazeOfGlory,
    AvoidDeath,
    RiskItAll,
}

impl fmt::Display for DeathMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathMove::BlazeOfGlory => write!(f, "Blaze of Glory"),
            DeathMove::AvoidDeath => write!(f, "Avoid Death"),
            DeathMove::RiskItAll => write!(f, "Risk It All"),
        }
    }
}

/// Dice already rolled for the move. Avoid Death reads only `hope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeathDice {
    pub hope: u32,
    pub fear: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeathOutcome {
    pub entity_id: String,
    #[serde(rename = "move")]
    pub death_move: DeathMove,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hope_die: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fear_die: Option<u32>,
    pub died: bool,
    pub unconscious: bool,
    /// Avoid Death cost a Hope slot
    pub scarred: bool,
    pub hp_cleared: u32,
    pub stress_cleared: u32,
}

/// Resolve a death move for a defeated player character.
///
/// `level` is the character level Avoid Death compares the Hope die against.
pub fn resolve_death_move(
    ledger: &mut ResourceLedger,
    entity_id: &str,
    death_move: DeathMove,
    dice: DeathDice,
    level: u8,
    sides: u32,
    policy: RiskItAllPolicy,
) -> EngineResult<DeathOutcome> {
    let entity = ledger.entity(entity_id)?;
    if !entity.is_player() {
        return Err(EngineError::invalid("only player characters make death moves"));
    }
    if entity.dead || entity.unconscious {
        return Err(EngineError::AlreadyResolved(format!(
            "'{}' already made a death move",
            entity_id
        )));
    }
    if !entity.defeated {
        return Err(EngineError::sequence(format!(
            "'{}' is still standing; death moves follow the last HP",
            entity_id
        )));
    }
    for die in [dice.hope, dice.fear] {
        if !(1..=sides).contains(&die) {
            return Err(EngineError::invalid(format!("die value {} outside 1..={}", die, sides)));
        }
    }

    let mut outcome = DeathOutcome {
        entity_id: entity_id.to_string(),
        death_move,
        hope_die: None,
        fear_die: None,
        died: false,
        unconscious: false,
        scarred: false,
        hp_cleared: 0,
        stress_cleared: 0,
    };

    match death_move {
        DeathMove::BlazeOfGlory => {
            ledger.entity_mut(entity_id)?.dead = true;
            outcome.died = true;
        }
        DeathMove::AvoidDeath => {
            ledger.entity_mut(entity_id)?.unconscious = true;
            outcome.unconscious = true;
            outcome.hope_die = Some(dice.hope);
            if dice.hope <= u32::from(level) {
                let hope = ledger.hope();
                let fear = ledger.fear();
                ledger.set_pool_limits(hope.max.saturating_sub(1), fear.max);
                outcome.scarred = true;
            }
        }
        DeathMove::RiskItAll => {
            outcome.hope_die = Some(dice.hope);
            outcome.fear_die = Some(dice.fear);
            if dice.hope == dice.fear {
                let (hp, stress) = match policy {
                    RiskItAllPolicy::ClearAll => (i32::MAX, i32::MAX),
                    RiskItAllPolicy::NoRecovery => (0, 0),
                    RiskItAllPolicy::Minimal(n) => (i32::from(n), 0),
                };
                outcome.hp_cleared = ledger.clear_hp(entity_id, hp)?.cleared;
                outcome.stress_cleared = ledger.clear_stress(entity_id, stress)?.cleared;
                let entity = ledger.entity_mut(entity_id)?;
                if entity.defeated {
                    entity.unconscious = true;
                    outcome.unconscious = true;
                }
            } else if dice.hope > dice.fear {
                // Split the Hope die across HP first, then Stress
                let budget = dice.hope as i32;
                outcome.hp_cleared = ledger.clear_hp(entity_id, budget)?.cleared;
                let rest = budget - outcome.hp_cleared as i32;
                outcome.stress_cleared = ledger.clear_stress(entity_id, rest)?.cleared;
            } else {
                ledger.entity_mut(entity_id)?.dead = true;
                outcome.died = true;
            }
        }
    }

    info!(
        "Death move: '{}' chose {} (died: {})",
        entity_id, death_move, outcome.died
    );
    Ok(outcome)
}
