//! Encounter sequencing
//!
//! The orchestrator enforces roll-then-resolve ordering:
//!
//! ```text
//! Setup -> AwaitingSpotlight -> ResolvingRoll -> ResolvingOutcome -+
//!               ^                                                  |
//!               +---------------- narrate_outcome -----------------+
//! ```
//!
//! Any phase moves to `Concluded` once every placed adversary is defeated,
//! a concluding countdown resolves, or the GM ends the encounter. Outside
//! combat the session runs a free-form scene with the same sequencing and
//! no conclusion checks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::countdown::CountdownTracker;
use super::dice::RollClass;
use super::ledger::ResourceLedger;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterPhase {
    Setup,
    AwaitingSpotlight,
    ResolvingRoll,
    ResolvingOutcome,
    Concluded,
}

impl fmt::Display for EncounterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EncounterPhase::Setup => "setup",
            EncounterPhase::AwaitingSpotlight => "awaiting spotlight",
            EncounterPhase::ResolvingRoll => "resolving roll",
            EncounterPhase::ResolvingOutcome => "resolving outcome",
            EncounterPhase::Concluded => "concluded",
        };
        write!(f, "{}", s)
    }
}

/// How the spotlight moves after an action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotlightPolicy {
    /// Rolls with Fear and failures hand the spotlight to the GM
    #[default]
    GmTriggered,
    /// Each player character gets `tokens` turns before anyone repeats
    FairRotation { tokens: u32 },
}

/// Who holds the spotlight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "holder", content = "id", rename_all = "snake_case")]
pub enum Spotlight {
    Gm,
    /// Players decide who acts next
    Players,
    Entity(String),
}

impl fmt::Display for Spotlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spotlight::Gm => write!(f, "the GM"),
            Spotlight::Players => write!(f, "the players"),
            Spotlight::Entity(id) => write!(f, "{}", id),
        }
    }
}

/// Choose the next spotlight holder.
///
/// `tokens` holds remaining turns per player under fair rotation; a player
/// missing from the map has a full budget.
pub fn next_spotlight(
    policy: SpotlightPolicy,
    last_actor: Option<&str>,
    outcome: Option<RollClass>,
    roster: &[String],
    tokens: &BTreeMap<String, u32>,
) -> Spotlight {
    match policy {
        SpotlightPolicy::GmTriggered => match outcome {
            Some(class) if class.with_fear() || !class.is_success() => Spotlight::Gm,
            _ => Spotlight::Players,
        },
        SpotlightPolicy::FairRotation { tokens: budget } => {
            let remaining = |id: &String| tokens.get(id).copied().unwrap_or(budget);
            let exhausted = roster.iter().all(|id| remaining(id) == 0);
            let mut best: Option<(&String, u32)> = None;
            for id in roster {
                if roster.len() > 1 && Some(id.as_str()) == last_actor {
                    continue;
                }
                let left = if exhausted { budget } else { remaining(id) };
                if left > best.map_or(0, |(_, n)| n) {
                    best = Some((id, left));
                }
            }
            match best {
                Some((id, _)) => Spotlight::Entity(id.clone()),
                None => Spotlight::Gm,
            }
        }
    }
}

/// Why an encounter ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Conclusion {
    AdversariesDefeated,
    CountdownResolved,
    EndedByGm,
}

/// A roll the narrative layer asked for that has not been resolved yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRoll {
    pub action_id: String,
    pub actor: String,
    pub difficulty: i32,
    pub modifier: i32,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterKind {
    /// Free-form play between encounters
    Scene,
    Combat,
}

/// State machine for one encounter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: String,
    pub name: String,
    pub kind: EncounterKind,
    pub phase: EncounterPhase,
    pub players: Vec<String>,
    pub adversaries: Vec<String>,
    pub spotlight: Spotlight,
    pub policy: SpotlightPolicy,
    pub last_actor: Option<String>,
    pub pending: Option<PendingRoll>,
    /// Action and class of the roll awaiting narration
    pub awaiting_narration: Option<(String, RollClass)>,
    pub conclusion: Option<Conclusion>,
    tokens: BTreeMap<String, u32>,
}

impl Encounter {
    /// Free-form scene; sequencing without combat bookkeeping
    pub fn scene(policy: SpotlightPolicy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "scene".to_string(),
            kind: EncounterKind::Scene,
            phase: EncounterPhase::AwaitingSpotlight,
            players: Vec::new(),
            adversaries: Vec::new(),
            spotlight: Spotlight::Players,
            policy,
            last_actor: None,
            pending: None,
            awaiting_narration: None,
            conclusion: None,
            tokens: BTreeMap::new(),
        }
    }

    /// A new combat encounter in `Setup`
    pub fn combat(name: &str, policy: SpotlightPolicy) -> Self {
        Self {
            name: name.to_string(),
            kind: EncounterKind::Combat,
            phase: EncounterPhase::Setup,
            ..Self::scene(policy)
        }
    }

    pub fn is_active_combat(&self) -> bool {
        self.kind == EncounterKind::Combat && self.phase != EncounterPhase::Concluded
    }

    /// Place entities on the field; leaves `Setup` on the first placement
    pub fn place(&mut self, ledger: &ResourceLedger, ids: &[String]) -> EngineResult<()> {
        match self.phase {
            EncounterPhase::Setup | EncounterPhase::AwaitingSpotlight => {}
            phase => {
                return Err(EngineError::sequence(format!(
                    "cannot place entities while {}",
                    phase
                )))
            }
        }
        if ids.is_empty() {
            return Err(EngineError::invalid("an encounter needs at least one entity"));
        }
        for id in ids {
            let entity = ledger.entity(id)?;
            let list = if entity.is_adversary() {
                &mut self.adversaries
            } else {
                &mut self.players
            };
            if !list.contains(id) {
                list.push(id.clone());
            }
        }

        if self.phase == EncounterPhase::Setup {
            self.phase = EncounterPhase::AwaitingSpotlight;
            self.spotlight = match self.policy {
                SpotlightPolicy::GmTriggered => Spotlight::Players,
                policy => next_spotlight(policy, None, None, &self.players, &self.tokens),
            };
            info!(
                "Encounter '{}': {} players vs {} adversaries",
                self.name,
                self.players.len(),
                self.adversaries.len()
            );
        }
        Ok(())
    }

    /// Ask for a roll. Moves to `ResolvingRoll`.
    pub fn request_roll(&mut self, pending: PendingRoll) -> EngineResult<()> {
        match self.phase {
            EncounterPhase::AwaitingSpotlight => {}
            EncounterPhase::ResolvingRoll => {
                let waiting = self.pending.as_ref().map_or("", |p| p.action_id.as_str());
                return Err(EngineError::sequence(format!(
                    "roll '{}' is still waiting for dice",
                    waiting
                )));
            }
            EncounterPhase::ResolvingOutcome => {
                return Err(EngineError::sequence(
                    "narrate the previous outcome before requesting another roll",
                ))
            }
            phase => return Err(EngineError::sequence(format!("cannot roll while {}", phase))),
        }
        debug!("Encounter '{}': roll {} requested", self.name, pending.action_id);
        self.pending = Some(pending);
        self.phase = EncounterPhase::ResolvingRoll;
        Ok(())
    }

    /// Pending roll a `roll` call should resolve, if any
    pub fn pending_for(&self, action_id: Option<&str>) -> EngineResult<Option<&PendingRoll>> {
        match (&self.pending, action_id) {
            (Some(pending), Some(id)) if pending.action_id != id => Err(EngineError::sequence(format!(
                "roll '{}' is pending, not '{}'",
                pending.action_id, id
            ))),
            (pending, _) => Ok(pending.as_ref()),
        }
    }

    /// Record resolved dice. Moves to `ResolvingOutcome`.
    pub fn resolve_roll(&mut self, action_id: &str, actor: &str, class: RollClass) -> EngineResult<()> {
        match self.phase {
            EncounterPhase::AwaitingSpotlight | EncounterPhase::ResolvingRoll => {}
            EncounterPhase::ResolvingOutcome => {
                return Err(EngineError::sequence(
                    "narrate the previous outcome before rolling again",
                ))
            }
            phase => return Err(EngineError::sequence(format!("cannot roll while {}", phase))),
        }
        self.pending = None;
        self.last_actor = Some(actor.to_string());
        self.awaiting_narration = Some((action_id.to_string(), class));
        if let SpotlightPolicy::FairRotation { tokens } = self.policy {
            let left = self.tokens.entry(actor.to_string()).or_insert(tokens);
            *left = left.saturating_sub(1);
            if self.players.iter().all(|id| self.tokens.get(id) == Some(&0)) {
                self.tokens.clear();
            }
        }
        self.phase = EncounterPhase::ResolvingOutcome;
        Ok(())
    }

    /// Close out the resolved roll and pass the spotlight
    pub fn narrate(&mut self) -> EngineResult<&Spotlight> {
        match self.phase {
            EncounterPhase::ResolvingOutcome => {}
            EncounterPhase::ResolvingRoll => {
                return Err(EngineError::sequence(
                    "the roll has not been resolved yet; roll before narrating",
                ))
            }
            phase => {
                return Err(EngineError::sequence(format!(
                    "nothing to narrate while {}",
                    phase
                )))
            }
        }
        let class = self.awaiting_narration.take().map(|(_, class)| class);
        self.spotlight = next_spotlight(
            self.policy,
            self.last_actor.as_deref(),
            class,
            &self.players,
            &self.tokens,
        );
        self.phase = EncounterPhase::AwaitingSpotlight;
        debug!("Encounter '{}': spotlight to {}", self.name, self.spotlight);
        Ok(&self.spotlight)
    }

    /// An adversary acted on a GM move; the spotlight returns to the players
    pub fn gm_acted(&mut self, adversary: &str) -> EngineResult<()> {
        match self.phase {
            EncounterPhase::AwaitingSpotlight => {}
            EncounterPhase::ResolvingOutcome | EncounterPhase::ResolvingRoll => {
                return Err(EngineError::sequence(
                    "resolve the current player roll before the GM acts",
                ))
            }
            phase => return Err(EngineError::sequence(format!("cannot act while {}", phase))),
        }
        self.last_actor = Some(adversary.to_string());
        self.spotlight = next_spotlight(self.policy, Some(adversary), None, &self.players, &self.tokens);
        Ok(())
    }

    /// Conclude when every adversary is down or a concluding countdown fired
    pub fn check_conclusion(
        &mut self,
        ledger: &ResourceLedger,
        countdowns: &CountdownTracker,
    ) -> Option<&Conclusion> {
        if !self.is_active_combat() {
            return None;
        }
        let all_down = !self.adversaries.is_empty()
            && self
                .adversaries
                .iter()
                .all(|id| ledger.entity(id).map_or(true, |e| e.defeated));
        let conclusion = if all_down {
            Conclusion::AdversariesDefeated
        } else if countdowns.any_concluding_resolved() {
            Conclusion::CountdownResolved
        } else {
            return None;
        };
        self.conclude(conclusion);
        self.conclusion.as_ref()
    }

    /// GM ends the encounter
    pub fn end(&mut self) -> EngineResult<Conclusion> {
        if !self.is_active_combat() {
            return Err(EngineError::AlreadyResolved("no encounter in progress".to_string()));
        }
        self.conclude(Conclusion::EndedByGm);
        Ok(Conclusion::EndedByGm)
    }

    fn conclude(&mut self, conclusion: Conclusion) {
        info!("Encounter '{}' concluded: {:?}", self.name, conclusion);
        self.phase = EncounterPhase::Concluded;
        self.pending = None;
        self.awaiting_narration = None;
        self.conclusion = Some(conclusion);
    }

    /// Forget an entity that left the session
    pub fn remove_entity(&mut self, id: &str) {
        self.players.retain(|p| p != id);
        self.adversaries.retain(|a| a != id);
        self.tokens.remove(id);
    }
}
