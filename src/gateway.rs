//! Tool gateway
//!
//! The single entry point for the narrative layer. A call names a tool and a
//! session, the gateway validates the arguments and delegates to the rules
//! components, and the reply carries a structured result plus a terse
//! narration hint.
//!
//! Every call runs against a copy of the session and is committed only when
//! it succeeds, so a rejected call leaves no trace. `handle` never fails:
//! errors come back inside the response.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RulesConfig;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::rules::conditions::{ClearTrigger, Condition, ConditionKind};
use crate::rules::countdown::{Countdown, CountdownSpec, TickOutcome, TickReport, Trigger};
use crate::rules::damage::{apply_damage, DamageOutcome, DamageRequest, DamageType, Severity};
use crate::rules::death::{resolve_death_move, DeathDice, DeathMove};
use crate::rules::dice::{
    parse_dice, resolve, resolve_attack, DiceResult, Entropy, NetAdvantage, RollClass, RollModifiers, RollOutcome,
};
use crate::rules::encounter::{Conclusion, Encounter, EncounterPhase, PendingRoll};
use crate::rules::features::{use_feature, EffectResult};
use crate::rules::ledger::{Entity, EntitySpec, Pool};
use crate::rules::rest::RestRequest;
use crate::session::{validate_session_id, Event, RollResources, Session, SessionManager, StoredRoll};

fn default_session() -> String {
    "default".to_string()
}

/// A tool invocation from the narrative layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(alias = "tool")]
    pub tool_name: String,
    #[serde(default = "default_session")]
    pub session_id: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(tool_name: &str, session_id: &str, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            session_id: session_id.to_string(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Reply to a [`ToolCall`]
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub status: Status,
    pub tool: String,
    pub session_id: String,
    pub result: Value,
    pub narration_hint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ToolResponse {
    fn ok(call: &ToolCall, reply: Reply) -> Self {
        let mut result = reply.result;
        if let Value::Object(map) = &mut result {
            map.insert("noop".to_string(), Value::Bool(reply.noop));
        }
        Self {
            status: Status::Ok,
            tool: call.tool_name.clone(),
            session_id: call.session_id.clone(),
            result,
            narration_hint: reply.hint,
            error: None,
        }
    }

    fn failed(call: &ToolCall, err: &EngineError) -> Self {
        // Repeating a one-shot event is a safe no-op, not a failure
        let (status, result) = if err.is_noop() {
            (Status::Ok, json!({ "noop": true }))
        } else {
            (Status::Error, Value::Null)
        };
        Self {
            status,
            tool: call.tool_name.clone(),
            session_id: call.session_id.clone(),
            result,
            narration_hint: err.to_string(),
            error: Some(ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

fn default_one() -> i32 {
    1
}

fn default_level() -> u8 {
    1
}

/// Arguments of the `roll` tool
#[derive(Debug, Clone, Deserialize)]
struct RollArgs {
    actor: String,
    #[serde(default)]
    action_id: Option<String>,
    #[serde(default)]
    difficulty: Option<i32>,
    #[serde(default)]
    modifier: Option<i32>,
    #[serde(default)]
    hope_die: Option<u32>,
    #[serde(default)]
    fear_die: Option<u32>,
    /// Face of the advantage/disadvantage die, when rolled physically
    #[serde(default)]
    advantage_die: Option<u32>,
    /// Who the roll acts against; their conditions add signals
    #[serde(default)]
    target: Option<String>,
    /// Extra signals from the fiction (help from an ally, a bad position)
    #[serde(default)]
    advantage: u32,
    #[serde(default)]
    disadvantage: u32,
}

/// Arguments of the `adversary_attack` tool
#[derive(Debug, Clone, Deserialize)]
struct AttackArgs {
    attacker: String,
    target: String,
    #[serde(default)]
    die: Option<u32>,
    /// Added to the adversary's own attack modifier
    #[serde(default)]
    modifier: i32,
    /// Damage dice rolled on a hit, e.g. "1d8+2"
    #[serde(default)]
    damage: Option<String>,
    #[serde(default)]
    damage_faces: Option<Vec<u32>>,
    #[serde(default = "default_damage_type")]
    damage_type: DamageType,
    #[serde(default)]
    armor_slot_spent: bool,
}

fn default_damage_type() -> DamageType {
    DamageType::Physical
}

/// Every tool the gateway understands
#[derive(Debug, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
enum Tool {
    CreateEntity(EntitySpec),
    RemoveEntity {
        entity_id: String,
    },
    StartEncounter {
        #[serde(default)]
        name: Option<String>,
        entities: Vec<String>,
    },
    EndEncounter,
    RequestRoll {
        actor: String,
        difficulty: i32,
        #[serde(default)]
        modifier: i32,
        #[serde(default)]
        action_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    Roll(RollArgs),
    NarrateOutcome {
        #[serde(default)]
        action_id: Option<String>,
        /// Entities whose narrative-cleared conditions end here
        #[serde(default)]
        resolve_conditions_for: Vec<String>,
    },
    AdversaryAttack(AttackArgs),
    RollDamage {
        dice: String,
        #[serde(default)]
        faces: Option<Vec<u32>>,
        #[serde(default)]
        critical: bool,
    },
    ApplyDamage(DamageRequest),
    MarkHp {
        entity_id: String,
        amount: i32,
    },
    ClearHp {
        entity_id: String,
        amount: i32,
    },
    MarkStress {
        entity_id: String,
        amount: i32,
    },
    ClearStress {
        entity_id: String,
        amount: i32,
    },
    MarkArmor {
        entity_id: String,
    },
    ClearArmor {
        entity_id: String,
        amount: i32,
    },
    ApplyCondition {
        entity_id: String,
        condition: Condition,
    },
    ClearCondition {
        entity_id: String,
        kind: ConditionKind,
    },
    CreateCountdown(CountdownSpec),
    TickCountdown {
        name: String,
        #[serde(default = "default_one")]
        steps: i32,
    },
    ResetCountdown {
        name: String,
        value: i32,
    },
    FireTrigger {
        trigger: Trigger,
    },
    Rest(RestRequest),
    AdjustHope {
        delta: i32,
    },
    AdjustFear {
        delta: i32,
    },
    UseFeature {
        adversary: String,
        feature: String,
        #[serde(default)]
        targets: Vec<String>,
    },
    DeathMove {
        entity_id: String,
        #[serde(rename = "move")]
        choice: DeathMove,
        #[serde(default)]
        hope_die: Option<u32>,
        #[serde(default)]
        fear_die: Option<u32>,
        #[serde(default = "default_level")]
        level: u8,
    },
    GetState,
    SaveSession,
    LoadSession {
        session: Box<Session>,
    },
}

impl Tool {
    fn parse(call: &ToolCall) -> EngineResult<Self> {
        let mut args = match &call.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => return Err(EngineError::invalid("arguments must be a JSON object")),
        };
        args.insert("tool".to_string(), Value::String(call.tool_name.clone()));
        serde_json::from_value(Value::Object(args))
            .map_err(|e| EngineError::invalid(format!("bad call to '{}': {}", call.tool_name, e)))
    }
}

/// Successful outcome of one tool
struct Reply {
    result: Value,
    hint: String,
    noop: bool,
    /// Append the hint to the session's event log
    record: bool,
}

impl Reply {
    fn new<T: Serialize>(result: &T, hint: impl Into<String>) -> Self {
        Self {
            result: to_json(result),
            hint: hint.into(),
            noop: false,
            record: true,
        }
    }

    fn read_only(mut self) -> Self {
        self.record = false;
        self
    }

    fn noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "serialization_error": e.to_string() }))
}

/// Routes tool calls to sessions
pub struct ToolGateway {
    sessions: Arc<SessionManager>,
}

impl ToolGateway {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Create a shared gateway over a fresh session manager
    pub fn shared(rules: RulesConfig) -> Arc<Self> {
        Arc::new(Self::new(SessionManager::shared(rules)))
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Execute one tool call
    pub async fn handle(&self, call: ToolCall) -> ToolResponse {
        match self.dispatch(&call).await {
            Ok(reply) => {
                info!(
                    "Tool {} [{}]: {}",
                    call.tool_name, call.session_id, reply.hint
                );
                ToolResponse::ok(&call, reply)
            }
            Err(e) if e.is_noop() => {
                debug!("Tool {} [{}]: no-op, {}", call.tool_name, call.session_id, e);
                ToolResponse::failed(&call, &e)
            }
            Err(e) => {
                warn!("Tool {} [{}] rejected: {}", call.tool_name, call.session_id, e);
                ToolResponse::failed(&call, &e)
            }
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> EngineResult<Reply> {
        validate_session_id(&call.session_id)?;
        let tool = Tool::parse(call)?;

        if let Tool::LoadSession { session } = tool {
            let entities = session.ledger.entities().count();
            self.sessions.load(&call.session_id, *session).await?;
            return Ok(Reply::new(
                &json!({ "loaded": true, "entities": entities }),
                format!("Session restored with {} entities", entities),
            ));
        }

        let slot = self.sessions.get_or_create(&call.session_id).await?;
        let mut guard = slot.lock().await;
        let slot = &mut *guard;

        let mut working = slot.session.clone();
        let rules = self.sessions.rules();
        let reply = Turn {
            session: &mut working,
            dice: slot.dice.as_mut(),
            rules,
        }
        .run(tool)?;

        if reply.record {
            working.record(&call.tool_name, reply.hint.clone(), rules.event_log_limit);
        }
        slot.session = working;
        Ok(reply)
    }
}

/// Snapshot returned by `get_state`
#[derive(Serialize)]
struct StateView<'a> {
    session_id: &'a str,
    hope: Pool,
    fear: Pool,
    entities: Vec<EntityView<'a>>,
    countdowns: Vec<&'a Countdown>,
    encounter: &'a Encounter,
    consecutive_short_rests: u32,
    recent_events: Vec<&'a Event>,
}

#[derive(Serialize)]
struct EntityView<'a> {
    #[serde(flatten)]
    entity: &'a Entity,
    conditions: &'a [Condition],
}

/// One tool call against a working copy of a session
struct Turn<'a> {
    session: &'a mut Session,
    dice: &'a mut dyn Entropy,
    rules: &'a RulesConfig,
}

impl Turn<'_> {
    fn run(mut self, tool: Tool) -> EngineResult<Reply> {
        match tool {
            Tool::CreateEntity(spec) => self.create_entity(spec),
            Tool::RemoveEntity { entity_id } => self.remove_entity(&entity_id),
            Tool::StartEncounter { name, entities } => self.start_encounter(name, &entities),
            Tool::EndEncounter => {
                let conclusion = self.session.encounter.end()?;
                Ok(Reply::new(
                    &json!({ "conclusion": conclusion }),
                    format!("Encounter '{}' ends", self.session.encounter.name),
                ))
            }
            Tool::RequestRoll {
                actor,
                difficulty,
                modifier,
                action_id,
                reason,
            } => self.request_roll(actor, difficulty, modifier, action_id, reason),
            Tool::Roll(args) => self.roll(args),
            Tool::NarrateOutcome {
                action_id,
                resolve_conditions_for,
            } => self.narrate_outcome(action_id, &resolve_conditions_for),
            Tool::AdversaryAttack(args) => self.adversary_attack(args),
            Tool::RollDamage {
                dice,
                faces,
                critical,
            } => self.roll_damage(&dice, faces, critical),
            Tool::ApplyDamage(request) => self.apply_damage(&request),
            Tool::MarkHp { entity_id, amount } => {
                let mark = self.session.ledger.mark_hp(&entity_id, amount)?;
                let countdowns = if mark.newly_defeated {
                    self.on_defeat(&entity_id)
                } else {
                    Vec::new()
                };
                let conclusion = self.conclusion();
                let hint = format!(
                    "{} marks {} HP{}",
                    entity_id,
                    mark.marked,
                    if mark.defeated { " and is defeated" } else { "" }
                );
                Ok(Reply::new(
                    &json!({ "mark": mark, "countdowns": countdowns, "conclusion": conclusion }),
                    hint,
                ))
            }
            Tool::ClearHp { entity_id, amount } => {
                let cleared = self.session.ledger.clear_hp(&entity_id, amount)?;
                let hint = format!("{} clears {} HP", entity_id, cleared.cleared);
                Ok(Reply::new(&cleared, hint))
            }
            Tool::MarkStress { entity_id, amount } => {
                let mark = self.session.ledger.mark_stress(&entity_id, amount)?;
                let countdowns = if mark.newly_defeated {
                    self.on_defeat(&entity_id)
                } else {
                    Vec::new()
                };
                let conclusion = self.conclusion();
                let hint = if mark.redirected {
                    format!(
                        "{} marks {} Stress; no room for more, {} HP marked instead",
                        entity_id, mark.stress_marked, mark.hp_marked
                    )
                } else {
                    format!("{} marks {} Stress", entity_id, mark.stress_marked)
                };
                Ok(Reply::new(
                    &json!({ "mark": mark, "countdowns": countdowns, "conclusion": conclusion }),
                    hint,
                ))
            }
            Tool::ClearStress { entity_id, amount } => {
                let cleared = self.session.ledger.clear_stress(&entity_id, amount)?;
                let hint = format!("{} clears {} Stress", entity_id, cleared.cleared);
                Ok(Reply::new(&cleared, hint))
            }
            Tool::MarkArmor { entity_id } => {
                let free = self.session.ledger.mark_armor_slot(&entity_id)?;
                Ok(Reply::new(
                    &json!({ "free_slots": free }),
                    format!("{} marks an armor slot, {} left", entity_id, free),
                ))
            }
            Tool::ClearArmor { entity_id, amount } => {
                let cleared = self.session.ledger.clear_armor_slots(&entity_id, amount)?;
                let hint = format!("{} repairs {} armor slots", entity_id, cleared.cleared);
                Ok(Reply::new(&cleared, hint))
            }
            Tool::ApplyCondition {
                entity_id,
                condition,
            } => {
                self.session.ledger.entity(&entity_id)?;
                let kind = condition.kind.clone();
                let applied = self.session.conditions.apply(&entity_id, condition);
                let hint = if applied {
                    format!("{} is now {}", entity_id, kind)
                } else {
                    format!("{} is already {}", entity_id, kind)
                };
                Ok(Reply::new(&json!({ "applied": applied, "kind": kind }), hint).noop(!applied))
            }
            Tool::ClearCondition { entity_id, kind } => {
                self.session.ledger.entity(&entity_id)?;
                let cleared = self.session.conditions.clear(&entity_id, &kind);
                let hint = if cleared {
                    format!("{} is no longer {}", entity_id, kind)
                } else {
                    format!("{} was not {}", entity_id, kind)
                };
                Ok(Reply::new(&json!({ "cleared": cleared, "kind": kind }), hint).noop(!cleared))
            }
            Tool::CreateCountdown(spec) => {
                let countdown = self.session.countdowns.create(spec)?;
                let hint = format!(
                    "Countdown '{}' starts at {}",
                    countdown.spec.name, countdown.value
                );
                Ok(Reply::new(countdown, hint))
            }
            Tool::TickCountdown { name, steps } => {
                let report = self.session.countdowns.tick(&name, steps)?;
                let noop = matches!(report.outcome, TickOutcome::AlreadyResolved { .. });
                let conclusion = self.conclusion();
                let hint = tick_hint(&report);
                Ok(Reply::new(&json!({ "tick": report, "conclusion": conclusion }), hint).noop(noop))
            }
            Tool::ResetCountdown { name, value } => {
                let countdown = self.session.countdowns.reset(&name, value)?;
                let hint = format!("Countdown '{}' reset to {}", name, countdown.value);
                Ok(Reply::new(countdown, hint))
            }
            Tool::FireTrigger { trigger } => {
                let reports = self.session.countdowns.fire(&trigger);
                let conclusion = self.conclusion();
                let hint = if reports.is_empty() {
                    format!("No countdown reacts to {}", trigger)
                } else {
                    reports.iter().map(tick_hint).collect::<Vec<_>>().join("; ")
                };
                Ok(Reply::new(
                    &json!({ "countdowns": reports, "conclusion": conclusion }),
                    hint,
                ))
            }
            Tool::Rest(request) => self.rest(&request),
            Tool::AdjustHope { delta } => {
                let change = self.session.ledger.adjust_hope(delta);
                Ok(Reply::new(&change, format!("Hope {} -> {}", change.before, change.after)))
            }
            Tool::AdjustFear { delta } => {
                let change = self.session.ledger.adjust_fear(delta);
                Ok(Reply::new(&change, format!("Fear {} -> {}", change.before, change.after)))
            }
            Tool::UseFeature {
                adversary,
                feature,
                targets,
            } => self.use_feature(&adversary, &feature, &targets),
            Tool::DeathMove {
                entity_id,
                choice,
                hope_die,
                fear_die,
                level,
            } => {
                let sides = self.rules.action_die_sides;
                let dice = DeathDice {
                    hope: hope_die.unwrap_or_else(|| self.dice.roll(sides)),
                    fear: fear_die.unwrap_or_else(|| self.dice.roll(sides)),
                };
                let outcome = resolve_death_move(
                    &mut self.session.ledger,
                    &entity_id,
                    choice,
                    dice,
                    level,
                    sides,
                    self.rules.risk_it_all,
                )?;
                let hint = if outcome.died {
                    format!("{} chooses {} and dies", entity_id, choice)
                } else if outcome.unconscious {
                    format!(
                        "{} chooses {} and falls unconscious{}",
                        entity_id,
                        choice,
                        if outcome.scarred { ", gaining a scar" } else { "" }
                    )
                } else {
                    format!(
                        "{} risks it all and survives, clearing {} HP and {} Stress",
                        entity_id, outcome.hp_cleared, outcome.stress_cleared
                    )
                };
                Ok(Reply::new(&outcome, hint))
            }
            Tool::GetState => Ok(self.state().read_only()),
            Tool::SaveSession => Ok(Reply::new(
                &json!({ "session": self.session }),
                format!("Session '{}' exported", self.session.id),
            )
            .read_only()),
            // Handled before a session is locked
            Tool::LoadSession { .. } => Err(EngineError::sequence("load_session cannot run inside a session")),
        }
    }

    /// A concluded encounter gives way to a fresh scene once play resumes
    fn resume_play(&mut self) {
        if self.session.encounter.phase == EncounterPhase::Concluded {
            debug!("Encounter '{}' is over, back to the scene", self.session.encounter.name);
            self.session.encounter = Encounter::scene(self.rules.spotlight);
        }
    }

    fn create_entity(&mut self, spec: EntitySpec) -> EngineResult<Reply> {
        let entity = Entity::from_spec(spec)?;
        let hint = format!(
            "{} '{}' enters (HP {}, thresholds {}/{})",
            entity.kind, entity.id, entity.hp.capacity, entity.thresholds.major, entity.thresholds.severe
        );
        let result = to_json(&entity);
        self.session.ledger.insert(entity)?;
        Ok(Reply {
            result,
            hint,
            noop: false,
            record: true,
        })
    }

    fn remove_entity(&mut self, id: &str) -> EngineResult<Reply> {
        let entity = self.session.ledger.remove(id)?;
        self.session.conditions.remove_entity(id);
        self.session.encounter.remove_entity(id);
        Ok(Reply::new(&json!({ "removed": entity.id }), format!("'{}' leaves the scene", id)))
    }

    fn start_encounter(&mut self, name: Option<String>, entities: &[String]) -> EngineResult<Reply> {
        if self.session.encounter.is_active_combat() {
            return Err(EngineError::sequence(format!(
                "encounter '{}' is still running",
                self.session.encounter.name
            )));
        }
        let mut encounter = Encounter::combat(name.as_deref().unwrap_or("encounter"), self.rules.spotlight);
        encounter.place(&self.session.ledger, entities)?;
        let hint = format!(
            "Encounter '{}' begins, spotlight on {}",
            encounter.name, encounter.spotlight
        );
        self.session.encounter = encounter;
        Ok(Reply::new(&self.session.encounter, hint))
    }

    fn request_roll(
        &mut self,
        actor: String,
        difficulty: i32,
        modifier: i32,
        action_id: Option<String>,
        reason: Option<String>,
    ) -> EngineResult<Reply> {
        self.session.ledger.entity(&actor)?;
        if difficulty < 0 {
            return Err(EngineError::invalid("difficulty must be non-negative"));
        }
        self.resume_play();
        let action_id = action_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.session.rolls.contains_key(&action_id) {
            return Err(EngineError::AlreadyResolved(format!(
                "action '{}' was already rolled",
                action_id
            )));
        }
        let pending = PendingRoll {
            action_id,
            actor,
            difficulty,
            modifier,
            reason,
        };
        let hint = format!(
            "{} rolls against Difficulty {} (action {})",
            pending.actor, pending.difficulty, pending.action_id
        );
        let result = to_json(&pending);
        self.session.encounter.request_roll(pending)?;
        Ok(Reply {
            result,
            hint,
            noop: false,
            record: true,
        })
    }

    fn roll(&mut self, args: RollArgs) -> EngineResult<Reply> {
        if let Some(stored) = args.action_id.as_ref().and_then(|id| self.session.rolls.get(id)) {
            let hint = format!(
                "Action {} already resolved: {}",
                stored.action_id, stored.outcome.class
            );
            return Ok(Reply::new(&json!({ "roll": stored, "replayed": true }), hint).read_only());
        }
        self.resume_play();

        let pending = self
            .session
            .encounter
            .pending_for(args.action_id.as_deref())?
            .cloned();
        if let Some(pending) = &pending {
            if pending.actor != args.actor {
                return Err(EngineError::invalid(format!(
                    "roll '{}' belongs to '{}', not '{}'",
                    pending.action_id, pending.actor, args.actor
                )));
            }
        }

        let actor = self.session.ledger.entity(&args.actor)?;
        if actor.defeated {
            return Err(EngineError::sequence(format!("'{}' is defeated and cannot act", actor.id)));
        }
        let is_player = actor.is_player();

        let difficulty = args
            .difficulty
            .or(pending.as_ref().map(|p| p.difficulty))
            .ok_or_else(|| EngineError::invalid("a roll needs a difficulty"))?;
        let mut modifier = args
            .modifier
            .or(pending.as_ref().map(|p| p.modifier))
            .unwrap_or(0);
        let action_id = args
            .action_id
            .clone()
            .or(pending.map(|p| p.action_id))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut signals = self.session.conditions.roll_modifiers_for(&args.actor);
        if let Some(target) = &args.target {
            self.session.ledger.entity(target)?;
            signals = signals.merge(self.session.conditions.roll_modifiers_against(target));
        }
        signals = signals.merge(RollModifiers {
            advantage: args.advantage,
            disadvantage: args.disadvantage,
        });

        let advantage_die = match signals.net() {
            NetAdvantage::Neutral => None,
            net => {
                let sides = self.rules.advantage_die_sides;
                let face = match args.advantage_die {
                    Some(face) if (1..=sides).contains(&face) => face,
                    Some(face) => {
                        return Err(EngineError::invalid(format!(
                            "advantage die must be in 1..={}, got {}",
                            sides, face
                        )))
                    }
                    None => self.dice.roll(sides),
                } as i32;
                Some(if net == NetAdvantage::Advantage { face } else { -face })
            }
        };
        modifier = modifier
            .checked_add(advantage_die.unwrap_or(0))
            .ok_or_else(|| EngineError::invalid(format!("modifier {} is out of range", modifier)))?;

        let sides = self.rules.action_die_sides;
        let (hope_die, fear_die) = match (args.hope_die, args.fear_die) {
            (Some(hope), Some(fear)) => (hope, fear),
            (None, None) => (self.dice.roll(sides), self.dice.roll(sides)),
            _ => return Err(EngineError::invalid("supply both duality dice or neither")),
        };
        let outcome = resolve(hope_die, fear_die, modifier, difficulty, sides)?;
        self.session
            .encounter
            .resolve_roll(&action_id, &args.actor, outcome.class)?;

        let mut resources = RollResources::default();
        let mut countdowns = Vec::new();
        if is_player {
            if self.rules.duality_resources {
                if outcome.class.with_fear() {
                    resources.fear_change(self.session.ledger.adjust_fear(1));
                } else {
                    resources.hope_change(self.session.ledger.adjust_hope(1));
                }
                if outcome.class == RollClass::CriticalSuccess {
                    resources.stress_cleared = self.session.ledger.clear_stress(&args.actor, 1)?.cleared;
                }
            }
            if outcome.class.with_fear() {
                countdowns = self.session.countdowns.fire(&Trigger::RollWithFear);
            }
        }
        let conclusion = self.conclusion();

        let hint = roll_hint(&args.actor, &outcome, advantage_die, &resources);
        let stored = StoredRoll {
            action_id: action_id.clone(),
            actor: args.actor,
            outcome,
            advantage_die,
            resources,
            at: chrono::Utc::now(),
        };
        let result = json!({
            "roll": stored,
            "replayed": false,
            "countdowns": countdowns,
            "conclusion": conclusion,
        });
        self.session.remember_roll(stored, self.rules.roll_history_limit);
        Ok(Reply {
            result,
            hint,
            noop: false,
            record: true,
        })
    }

    fn narrate_outcome(&mut self, action_id: Option<String>, resolve_for: &[String]) -> EngineResult<Reply> {
        if let Some(id) = &action_id {
            match &self.session.encounter.awaiting_narration {
                Some((awaiting, _)) if awaiting == id => {}
                _ if self.session.rolls.contains_key(id) => {
                    return Err(EngineError::AlreadyResolved(format!(
                        "outcome of '{}' was already narrated",
                        id
                    )))
                }
                Some((awaiting, _)) => {
                    return Err(EngineError::sequence(format!(
                        "roll '{}' awaits narration, not '{}'",
                        awaiting, id
                    )))
                }
                None => {}
            }
        }
        for id in resolve_for {
            self.session.ledger.entity(id)?;
        }

        let spotlight = self.session.encounter.narrate()?.clone();
        let mut cleared = Vec::new();
        for id in resolve_for {
            for kind in self.session.conditions.clear_triggered(id, ClearTrigger::Narrative) {
                cleared.push((id.clone(), kind));
            }
        }
        Ok(Reply::new(
            &json!({ "spotlight": spotlight, "conditions_cleared": cleared }),
            format!("Spotlight passes to {}", spotlight),
        ))
    }

    fn adversary_attack(&mut self, args: AttackArgs) -> EngineResult<Reply> {
        let attacker = self.session.ledger.entity(&args.attacker)?;
        if !attacker.is_adversary() {
            return Err(EngineError::invalid(format!("'{}' is not an adversary", attacker.id)));
        }
        if attacker.defeated {
            return Err(EngineError::sequence(format!("'{}' is defeated and cannot act", attacker.id)));
        }
        let modifier = attacker
            .attack_modifier
            .checked_add(args.modifier)
            .ok_or_else(|| EngineError::invalid(format!("attack modifier {} is out of range", args.modifier)))?;
        let target = self.session.ledger.entity(&args.target)?;
        if target.defeated {
            return Err(EngineError::AlreadyResolved(format!("'{}' is already defeated", target.id)));
        }
        let evasion = target.evasion;
        self.resume_play();
        self.session.encounter.gm_acted(&args.attacker)?;

        let sides = self.rules.attack_die_sides;
        let die = match args.die {
            Some(die) => die,
            None => {
                let signals = self
                    .session
                    .conditions
                    .roll_modifiers_for(&args.attacker)
                    .merge(self.session.conditions.roll_modifiers_against(&args.target));
                // Adversaries roll two d20s and keep one
                match signals.net() {
                    NetAdvantage::Neutral => self.dice.roll(sides),
                    NetAdvantage::Advantage => self.dice.roll(sides).max(self.dice.roll(sides)),
                    NetAdvantage::Disadvantage => self.dice.roll(sides).min(self.dice.roll(sides)),
                }
            }
        };
        let attack = resolve_attack(die, modifier, evasion, sides)?;

        let mut damage_roll = None;
        let mut damage = None;
        let mut countdowns = Vec::new();
        if let (true, Some(notation)) = (attack.hit, &args.damage) {
            let rolled = self.roll_dice(notation, args.damage_faces.clone())?;
            let request = DamageRequest {
                target: args.target.clone(),
                amount: rolled.total.max(0),
                damage_type: args.damage_type,
                armor_slot_spent: args.armor_slot_spent,
                critical_bonus: attack.critical.then_some(rolled.max_dice),
            };
            let outcome = apply_damage(&mut self.session.ledger, &request, self.rules.massive_damage)?;
            countdowns = self.after_damage(&outcome);
            damage_roll = Some(rolled);
            damage = Some(outcome);
        }
        let conclusion = self.conclusion();

        let mut hint = format!(
            "{} {} {} ({} vs Evasion {})",
            args.attacker,
            match (attack.hit, attack.critical) {
                (true, true) => "critically hits",
                (true, false) => "hits",
                _ => "misses",
            },
            args.target,
            attack.total,
            evasion
        );
        if let Some(outcome) = &damage {
            hint.push_str(": ");
            hint.push_str(&damage_hint(outcome));
        }
        Ok(Reply::new(
            &json!({
                "attack": attack,
                "damage_roll": damage_roll,
                "damage": damage,
                "countdowns": countdowns,
                "conclusion": conclusion,
            }),
            hint,
        ))
    }

    fn roll_dice(&mut self, notation: &str, faces: Option<Vec<u32>>) -> EngineResult<DiceResult> {
        let roll = parse_dice(notation)?;
        match faces {
            Some(faces) => roll.with_faces(faces),
            None => Ok(roll.roll_with(self.dice)),
        }
    }

    fn roll_damage(&mut self, notation: &str, faces: Option<Vec<u32>>, critical: bool) -> EngineResult<Reply> {
        let rolled = self.roll_dice(notation, faces)?;
        let total = rolled.total.max(0).saturating_add(if critical { rolled.max_dice } else { 0 });
        let hint = if critical {
            format!("{} rolls {} plus {} critical: {}", rolled.notation, rolled.total, rolled.max_dice, total)
        } else {
            format!("{} rolls {}", rolled.notation, total)
        };
        Ok(Reply::new(
            &json!({ "roll": rolled, "critical": critical, "total": total }),
            hint,
        )
        .read_only())
    }

    fn apply_damage(&mut self, request: &DamageRequest) -> EngineResult<Reply> {
        let outcome = apply_damage(&mut self.session.ledger, request, self.rules.massive_damage)?;
        let countdowns = self.after_damage(&outcome);
        let conclusion = self.conclusion();
        let hint = damage_hint(&outcome);
        Ok(Reply::new(
            &json!({ "damage": outcome, "countdowns": countdowns, "conclusion": conclusion }),
            hint,
        ))
    }

    fn rest(&mut self, request: &RestRequest) -> EngineResult<Reply> {
        if self.session.encounter.is_active_combat() {
            return Err(EngineError::sequence("cannot rest during an encounter"));
        }
        let session = &mut *self.session;
        let outcome = session.rest.apply(
            &mut session.ledger,
            &mut session.conditions,
            &mut session.countdowns,
            request,
            self.rules,
        )?;
        let conclusion = self.conclusion();
        let hint = format!(
            "The party takes a {}; Fear {} -> {}",
            outcome.kind, outcome.fear.before, outcome.fear.after
        );
        Ok(Reply::new(&json!({ "rest": outcome, "conclusion": conclusion }), hint))
    }

    fn use_feature(&mut self, adversary: &str, feature: &str, targets: &[String]) -> EngineResult<Reply> {
        self.resume_play();
        self.session.encounter.gm_acted(adversary)?;
        let session = &mut *self.session;
        let outcome = use_feature(
            &mut session.ledger,
            &mut session.conditions,
            &mut session.countdowns,
            adversary,
            feature,
            targets,
            self.rules.massive_damage,
        )?;

        let mut countdowns = Vec::new();
        for effect in &outcome.effects {
            match effect {
                EffectResult::Damage(damage) => countdowns.extend(self.after_damage(damage)),
                EffectResult::Stress { target, mark } if mark.newly_defeated => {
                    countdowns.extend(self.on_defeat(target))
                }
                _ => {}
            }
        }
        let conclusion = self.conclusion();
        let hint = format!(
            "{} uses {}{}",
            adversary,
            outcome.feature,
            match &outcome.fear_spent {
                Some(change) => format!(" (Fear {} -> {})", change.before, change.after),
                None => String::new(),
            }
        );
        Ok(Reply::new(
            &json!({ "feature": outcome, "countdowns": countdowns, "conclusion": conclusion }),
            hint,
        ))
    }

    fn state(&self) -> Reply {
        let session = &*self.session;
        let view = StateView {
            session_id: &session.id,
            hope: session.ledger.hope(),
            fear: session.ledger.fear(),
            entities: session
                .ledger
                .entities()
                .map(|entity| EntityView {
                    entity,
                    conditions: session.conditions.active(&entity.id),
                })
                .collect(),
            countdowns: session.countdowns.iter().collect(),
            encounter: &session.encounter,
            consecutive_short_rests: session.rest.consecutive_short_rests(),
            recent_events: session.recent_events(10).collect(),
        };
        let hint = format!(
            "Hope {}, Fear {}, {} entities, encounter {}",
            view.hope.value,
            view.fear.value,
            view.entities.len(),
            session.encounter.phase
        );
        Reply::new(&view, hint)
    }

    /// Countdown reactions to a hit
    fn after_damage(&mut self, outcome: &DamageOutcome) -> Vec<TickReport> {
        let mut reports = Vec::new();
        if outcome.narrative_only || outcome.severity > Severity::None {
            reports.extend(
                self.session
                    .countdowns
                    .fire(&Trigger::EntityHit(outcome.target.clone())),
            );
        }
        if outcome.newly_defeated {
            reports.extend(self.on_defeat(&outcome.target));
        }
        reports
    }

    /// Countdown reactions to a defeat
    fn on_defeat(&mut self, id: &str) -> Vec<TickReport> {
        let mut reports = self
            .session
            .countdowns
            .fire(&Trigger::EntityDefeated(id.to_string()));
        if self.session.ledger.entity(id).is_ok_and(|e| e.is_adversary()) {
            reports.extend(self.session.countdowns.fire(&Trigger::AdversaryDefeated));
        }
        reports
    }

    fn conclusion(&mut self) -> Option<Conclusion> {
        let session = &mut *self.session;
        session
            .encounter
            .check_conclusion(&session.ledger, &session.countdowns)
            .cloned()
    }
}

fn roll_hint(
    actor: &str,
    outcome: &RollOutcome,
    advantage_die: Option<i32>,
    resources: &RollResources,
) -> String {
    let mut hint = format!(
        "{}: Hope {} + Fear {} {:+} = {} vs {}, {}",
        actor, outcome.hope_die, outcome.fear_die, outcome.modifier, outcome.total, outcome.difficulty, outcome.class
    );
    if let Some(die) = advantage_die {
        hint.push_str(&format!(
            " ({} die {})",
            if die > 0 { "advantage" } else { "disadvantage" },
            die.abs()
        ));
    }
    if let Some((before, after)) = resources.hope {
        hint.push_str(&format!("; Hope {} -> {}", before, after));
    }
    if let Some((before, after)) = resources.fear {
        hint.push_str(&format!("; Fear {} -> {}", before, after));
    }
    if resources.stress_cleared > 0 {
        hint.push_str("; 1 Stress cleared");
    }
    hint
}

fn damage_hint(outcome: &DamageOutcome) -> String {
    if outcome.narrative_only {
        return format!("{} takes the hit in the story; no HP marked", outcome.target);
    }
    let mut hint = format!(
        "{} takes {} {} damage, {}, marks {} HP",
        outcome.target, outcome.effective_amount, outcome.damage_type, outcome.severity, outcome.hp_marked
    );
    if outcome.armor_consumed {
        hint.push_str(" after armor");
    }
    if outcome.defeated {
        hint.push_str(" and is defeated");
    }
    hint
}

fn tick_hint(report: &TickReport) -> String {
    match &report.outcome {
        TickOutcome::Advanced { value, milestones } if !milestones.is_empty() => format!(
            "Countdown '{}' at {}, milestone {:?} reached",
            report.name, value, milestones
        ),
        TickOutcome::Advanced { value, .. } => format!("Countdown '{}' at {}", report.name, value),
        TickOutcome::Resolved { .. } => format!("Countdown '{}' resolves!", report.name),
        TickOutcome::AlreadyResolved { .. } => {
            format!("Countdown '{}' has already resolved", report.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::dice::ScriptedDice;

    fn gateway(faces: Vec<u32>) -> ToolGateway {
        let manager = SessionManager::with_dice(
            RulesConfig::default(),
            Arc::new(move || Box::new(ScriptedDice::new(faces.clone())) as Box<dyn Entropy>),
        );
        ToolGateway::new(Arc::new(manager))
    }

    async fn call(gateway: &ToolGateway, tool: &str, arguments: Value) -> ToolResponse {
        gateway.handle(ToolCall::new(tool, "table", arguments)).await
    }

    async fn state(gateway: &ToolGateway) -> Session {
        gateway.sessions().snapshot("table").await.unwrap()
    }

    async fn add_player(gateway: &ToolGateway, id: &str) {
        let resp = call(
            gateway,
            "create_entity",
            json!({
                "id": id,
                "kind": "player_character",
                "hp": 6,
                "stress": 6,
                "armor": 3,
                "evasion": 10,
                "thresholds": { "major": 7, "severe": 14 }
            }),
        )
        .await;
        assert!(resp.is_ok(), "{:?}", resp);
    }

    async fn add_adversary(gateway: &ToolGateway, id: &str, hp: u32, major: i32, severe: i32) {
        let resp = call(
            gateway,
            "create_entity",
            json!({
                "id": id,
                "kind": "adversary",
                "hp": hp,
                "evasion": 12,
                "attack_modifier": 2,
                "thresholds": { "major": major, "severe": severe }
            }),
        )
        .await;
        assert!(resp.is_ok(), "{:?}", resp);
    }

    #[tokio::test]
    async fn test_strixwolf_takes_two_hits() {
        let gw = gateway(vec![]);
        add_adversary(&gw, "Strixwolf", 3, 4, 8).await;

        let hit = json!({ "target": "Strixwolf", "amount": 6, "damage_type": "physical" });
        let first = call(&gw, "apply_damage", hit.clone()).await;
        assert!(first.is_ok());
        assert_eq!(first.result["damage"]["severity"], "major");
        assert_eq!(first.result["damage"]["hp_marked"], 2);
        assert_eq!(first.result["damage"]["defeated"], false);

        let second = call(&gw, "apply_damage", hit.clone()).await;
        assert_eq!(second.result["damage"]["hp_marked"], 1);
        assert_eq!(second.result["damage"]["defeated"], true);

        let third = call(&gw, "apply_damage", hit).await;
        assert!(third.is_ok());
        assert_eq!(third.result["noop"], true);
        assert_eq!(third.error_kind(), Some(ErrorKind::AlreadyResolved));

        let wolf = state(&gw).await.ledger.entity("Strixwolf").unwrap().clone();
        assert_eq!(wolf.hp.marked, 3);
    }

    #[tokio::test]
    async fn test_roll_then_narrate_sequencing() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;

        let early = call(&gw, "narrate_outcome", json!({})).await;
        assert_eq!(early.error_kind(), Some(ErrorKind::IllegalSequence));

        let request = call(
            &gw,
            "request_roll",
            json!({ "actor": "marlowe", "difficulty": 10, "modifier": 2, "action_id": "pick-lock" }),
        )
        .await;
        assert!(request.is_ok());

        let still_early = call(&gw, "narrate_outcome", json!({ "action_id": "pick-lock" })).await;
        assert_eq!(still_early.error_kind(), Some(ErrorKind::IllegalSequence));

        let roll = call(
            &gw,
            "roll",
            json!({ "actor": "marlowe", "action_id": "pick-lock", "hope_die": 8, "fear_die": 5 }),
        )
        .await;
        assert!(roll.is_ok(), "{:?}", roll);
        assert_eq!(roll.result["roll"]["outcome"]["class"], "success_with_hope");
        assert_eq!(roll.result["roll"]["outcome"]["total"], 15);
        assert_eq!(state(&gw).await.ledger.hope().value, 1);

        let narrated = call(&gw, "narrate_outcome", json!({ "action_id": "pick-lock" })).await;
        assert!(narrated.is_ok());
        assert_eq!(narrated.result["spotlight"]["holder"], "players");

        // Retrying the same action replays without touching Hope
        let retry = call(
            &gw,
            "roll",
            json!({ "actor": "marlowe", "action_id": "pick-lock", "hope_die": 2, "fear_die": 9 }),
        )
        .await;
        assert_eq!(retry.result["replayed"], true);
        assert_eq!(retry.result["roll"]["outcome"]["hope_die"], 8);
        assert_eq!(state(&gw).await.ledger.hope().value, 1);

        let renarrate = call(&gw, "narrate_outcome", json!({ "action_id": "pick-lock" })).await;
        assert_eq!(renarrate.result["noop"], true);
    }

    #[tokio::test]
    async fn test_roll_with_fear_feeds_the_gm() {
        let gw = gateway(vec![3, 9]);
        add_player(&gw, "marlowe").await;

        let roll = call(&gw, "roll", json!({ "actor": "marlowe", "difficulty": 10 })).await;
        assert!(roll.is_ok(), "{:?}", roll);
        assert_eq!(roll.result["roll"]["outcome"]["class"], "success_with_fear");
        assert_eq!(state(&gw).await.ledger.fear().value, 1);

        let narrated = call(&gw, "narrate_outcome", json!({})).await;
        assert_eq!(narrated.result["spotlight"]["holder"], "gm");
    }

    #[tokio::test]
    async fn test_vulnerable_target_gives_advantage() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        add_adversary(&gw, "bandit", 4, 5, 9).await;
        call(
            &gw,
            "apply_condition",
            json!({ "entity_id": "bandit", "condition": { "kind": "vulnerable" } }),
        )
        .await;

        let roll = call(
            &gw,
            "roll",
            json!({
                "actor": "marlowe",
                "target": "bandit",
                "difficulty": 12,
                "hope_die": 6,
                "fear_die": 4,
                "advantage_die": 3
            }),
        )
        .await;
        assert!(roll.is_ok(), "{:?}", roll);
        assert_eq!(roll.result["roll"]["advantage_die"], 3);
        assert_eq!(roll.result["roll"]["outcome"]["total"], 13);
    }

    #[tokio::test]
    async fn test_ritual_countdown_with_narrative_arcanist() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        let resp = call(
            &gw,
            "create_entity",
            json!({
                "id": "arcanist",
                "kind": "adversary",
                "hp": 5,
                "thresholds": { "major": 6, "severe": 12 },
                "narrative_only": true
            }),
        )
        .await;
        assert!(resp.is_ok());
        call(
            &gw,
            "create_countdown",
            json!({
                "name": "break the ritual",
                "start": 2,
                "concludes_encounter": true,
                "rules": [{ "on": { "entity_hit": "arcanist" }, "steps": 1 }]
            }),
        )
        .await;
        let start = call(
            &gw,
            "start_encounter",
            json!({ "name": "Ritual", "entities": ["marlowe", "arcanist"] }),
        )
        .await;
        assert!(start.is_ok(), "{:?}", start);

        let hit = json!({ "target": "arcanist", "amount": 9, "damage_type": "magic" });
        let first = call(&gw, "apply_damage", hit.clone()).await;
        assert_eq!(first.result["damage"]["narrative_only"], true);
        assert_eq!(first.result["damage"]["hp_marked"], 0);
        assert_eq!(first.result["countdowns"][0]["value"], 1);
        assert!(first.result["conclusion"].is_null());

        let second = call(&gw, "apply_damage", hit).await;
        assert_eq!(second.result["countdowns"][0]["outcome"], "resolved");
        assert_eq!(second.result["conclusion"]["reason"], "countdown_resolved");

        let session = state(&gw).await;
        assert_eq!(session.ledger.entity("arcanist").unwrap().hp.marked, 0);
        assert!(!session.encounter.is_active_combat());

        let tick = call(&gw, "tick_countdown", json!({ "name": "break the ritual" })).await;
        assert!(tick.is_ok());
        assert_eq!(tick.result["noop"], true);
    }

    #[tokio::test]
    async fn test_defeating_last_adversary_concludes() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        add_adversary(&gw, "Strixwolf", 3, 4, 8).await;
        call(
            &gw,
            "create_countdown",
            json!({
                "name": "reinforcements",
                "start": 3,
                "rules": [{ "on": "adversary_defeated" }]
            }),
        )
        .await;
        call(
            &gw,
            "start_encounter",
            json!({ "entities": ["marlowe", "Strixwolf"] }),
        )
        .await;

        let resp = call(&gw, "mark_hp", json!({ "entity_id": "Strixwolf", "amount": 3 })).await;
        assert!(resp.is_ok());
        assert_eq!(resp.result["countdowns"][0]["value"], 2);
        assert_eq!(resp.result["conclusion"]["reason"], "adversaries_defeated");

        let again = call(&gw, "end_encounter", json!({})).await;
        assert_eq!(again.result["noop"], true);

        // Play resumes in a fresh scene
        let roll = call(
            &gw,
            "roll",
            json!({ "actor": "marlowe", "difficulty": 5, "hope_die": 6, "fear_die": 2 }),
        )
        .await;
        assert!(roll.is_ok(), "{:?}", roll);
        assert!(!state(&gw).await.encounter.is_active_combat());
    }

    #[tokio::test]
    async fn test_adversary_attack_with_damage() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        add_adversary(&gw, "Strixwolf", 3, 4, 8).await;

        let resp = call(
            &gw,
            "adversary_attack",
            json!({
                "attacker": "Strixwolf",
                "target": "marlowe",
                "die": 20,
                "damage": "1d8+2",
                "damage_faces": [6],
                "armor_slot_spent": true
            }),
        )
        .await;
        assert!(resp.is_ok(), "{:?}", resp);
        assert_eq!(resp.result["attack"]["critical"], true);
        // 8 rolled + 8 critical = 16, severe, armor drops it to major
        assert_eq!(resp.result["damage"]["effective_amount"], 16);
        assert_eq!(resp.result["damage"]["severity"], "major");
        assert_eq!(resp.result["damage"]["hp_marked"], 2);

        let marlowe = state(&gw).await.ledger.entity("marlowe").unwrap().clone();
        assert_eq!(marlowe.hp.marked, 2);
        assert_eq!(marlowe.armor.marked, 1);
    }

    #[tokio::test]
    async fn test_rest_move_count() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;

        let too_many = call(
            &gw,
            "rest",
            json!({
                "kind": "short",
                "fear_gain": 1,
                "plans": [{
                    "entity_id": "marlowe",
                    "moves": [
                        { "move": "prepare" },
                        { "move": "clear_stress", "amount": 2 },
                        { "move": "tend_to_wounds", "amount": 2 }
                    ]
                }]
            }),
        )
        .await;
        assert_eq!(too_many.error_kind(), Some(ErrorKind::IllegalSequence));
        assert_eq!(state(&gw).await.ledger.fear().value, 0);

        let ok = call(
            &gw,
            "rest",
            json!({
                "kind": "short",
                "fear_gain": 1,
                "plans": [{
                    "entity_id": "marlowe",
                    "moves": [{ "move": "prepare" }, { "move": "clear_stress", "amount": 2 }]
                }]
            }),
        )
        .await;
        assert!(ok.is_ok(), "{:?}", ok);
        let session = state(&gw).await;
        assert_eq!(session.ledger.fear().value, 1);
        assert_eq!(session.ledger.hope().value, 1);
    }

    #[tokio::test]
    async fn test_feature_failure_leaves_no_trace() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        let resp = call(
            &gw,
            "create_entity",
            json!({
                "id": "Dire Wolf",
                "kind": "adversary",
                "hp": 4,
                "thresholds": { "major": 5, "severe": 9 },
                "features": [{
                    "name": "Howl",
                    "cost": { "fear": 2 },
                    "effects": [{ "effect": "mark_stress", "amount": 1 }]
                }]
            }),
        )
        .await;
        assert!(resp.is_ok(), "{:?}", resp);
        call(&gw, "adjust_fear", json!({ "delta": 1 })).await;

        let before = state(&gw).await;
        let denied = call(
            &gw,
            "use_feature",
            json!({ "adversary": "Dire Wolf", "feature": "Howl", "targets": ["marlowe"] }),
        )
        .await;
        assert_eq!(denied.error_kind(), Some(ErrorKind::InvalidInput));
        assert_eq!(state(&gw).await, before);

        call(&gw, "adjust_fear", json!({ "delta": 1 })).await;
        let used = call(
            &gw,
            "use_feature",
            json!({ "adversary": "Dire Wolf", "feature": "Howl", "targets": ["marlowe"] }),
        )
        .await;
        assert!(used.is_ok(), "{:?}", used);
        let session = state(&gw).await;
        assert_eq!(session.ledger.fear().value, 0);
        assert_eq!(session.ledger.entity("marlowe").unwrap().stress.marked, 1);
    }

    #[tokio::test]
    async fn test_bad_calls() {
        let gw = gateway(vec![]);
        let unknown = call(&gw, "summon_dragon", json!({})).await;
        assert_eq!(unknown.error_kind(), Some(ErrorKind::InvalidInput));
        assert_eq!(unknown.status, Status::Error);

        let bad_session = gw
            .handle(ToolCall::new("get_state", "../../etc", json!({})))
            .await;
        assert_eq!(bad_session.error_kind(), Some(ErrorKind::InvalidInput));

        let missing = call(&gw, "mark_hp", json!({ "entity_id": "ghost", "amount": 1 })).await;
        assert_eq!(missing.error_kind(), Some(ErrorKind::UnknownEntity));

        let not_object = call(&gw, "get_state", json!([1, 2])).await;
        assert_eq!(not_object.error_kind(), Some(ErrorKind::InvalidInput));

        let countdown = call(&gw, "tick_countdown", json!({ "name": "nothing" })).await;
        assert_eq!(countdown.error_kind(), Some(ErrorKind::UnknownEntity));
    }

    #[tokio::test]
    async fn test_save_and_load_session() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        call(&gw, "adjust_hope", json!({ "delta": 3 })).await;

        let saved = call(&gw, "save_session", json!({})).await;
        assert!(saved.is_ok());
        let snapshot = saved.result["session"].clone();

        let loaded = gw
            .handle(ToolCall::new("load_session", "other", json!({ "session": snapshot })))
            .await;
        assert!(loaded.is_ok(), "{:?}", loaded);
        assert_eq!(loaded.result["entities"], 1);

        let other = gw.sessions().snapshot("other").await.unwrap();
        assert_eq!(other.id, "other");
        assert_eq!(other.ledger.hope().value, 3);
    }

    #[tokio::test]
    async fn test_get_state_lists_conditions() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        call(
            &gw,
            "apply_condition",
            json!({ "entity_id": "marlowe", "condition": { "kind": "restrained" } }),
        )
        .await;
        let again = call(
            &gw,
            "apply_condition",
            json!({ "entity_id": "marlowe", "condition": { "kind": "restrained" } }),
        )
        .await;
        assert_eq!(again.result["applied"], false);

        let resp = call(&gw, "get_state", json!({})).await;
        assert!(resp.is_ok());
        assert_eq!(resp.result["entities"][0]["id"], "marlowe");
        assert_eq!(resp.result["entities"][0]["conditions"][0]["kind"], "restrained");
        assert_eq!(resp.result["recent_events"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_extreme_numbers_are_contained() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        add_adversary(&gw, "wolf", 4, 5, 9).await;

        let fear = call(&gw, "adjust_fear", json!({ "delta": 2147483647 })).await;
        assert!(fear.is_ok(), "{:?}", fear);
        assert_eq!(state(&gw).await.ledger.fear().value, 12);

        let huge_dice = call(&gw, "roll_damage", json!({ "dice": "2d4294967295", "critical": true })).await;
        assert_eq!(huge_dice.error_kind(), Some(ErrorKind::InvalidInput));

        let roll = call(
            &gw,
            "roll",
            json!({ "actor": "marlowe", "difficulty": 10, "modifier": 2147483647, "hope_die": 8, "fear_die": 5 }),
        )
        .await;
        assert_eq!(roll.error_kind(), Some(ErrorKind::InvalidInput));

        let with_advantage = call(
            &gw,
            "roll",
            json!({
                "actor": "marlowe",
                "difficulty": 10,
                "modifier": 2147483647,
                "advantage": 1,
                "advantage_die": 3,
                "hope_die": 8,
                "fear_die": 5
            }),
        )
        .await;
        assert_eq!(with_advantage.error_kind(), Some(ErrorKind::InvalidInput));

        let attack = call(
            &gw,
            "adversary_attack",
            json!({ "attacker": "wolf", "target": "marlowe", "modifier": 2147483647, "die": 10 }),
        )
        .await;
        assert_eq!(attack.error_kind(), Some(ErrorKind::InvalidInput));

        let session = state(&gw).await;
        assert!(session.rolls.is_empty());
        assert_eq!(session.ledger.fear().value, 12);
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_rejected() {
        let gw = gateway(vec![]);
        add_player(&gw, "marlowe").await;
        add_adversary(&gw, "wolf", 4, 5, 9).await;
        call(&gw, "adjust_hope", json!({ "delta": 2 })).await;

        let saved = call(&gw, "save_session", json!({})).await;
        let snapshot = saved.result["session"].clone();

        let mut overmarked = snapshot.clone();
        overmarked["ledger"]["entities"]["wolf"]["hp"]["marked"] = json!(5);
        let mut flooded = snapshot.clone();
        flooded["ledger"]["fear"]["value"] = json!(200);
        let mut dangling = snapshot;
        dangling["encounter"]["adversaries"] = json!(["ghost"]);

        for bad in [overmarked, flooded, dangling] {
            let loaded = call(&gw, "load_session", json!({ "session": bad })).await;
            assert_eq!(loaded.error_kind(), Some(ErrorKind::InvalidInput), "{:?}", loaded);
        }

        let live = state(&gw).await;
        assert_eq!(live.ledger.entity("wolf").unwrap().hp.marked, 0);
        assert_eq!(live.ledger.hope().value, 2);
        assert_eq!(live.ledger.fear().value, 0);
    }

    #[tokio::test]
    async fn test_roll_history_is_capped() {
        let rules = RulesConfig {
            roll_history_limit: 2,
            ..RulesConfig::default()
        };
        let manager = SessionManager::with_dice(
            rules,
            Arc::new(|| Box::new(ScriptedDice::new(Vec::new())) as Box<dyn Entropy>),
        );
        let gw = ToolGateway::new(Arc::new(manager));
        add_player(&gw, "marlowe").await;

        for id in ["a1", "a2", "a3"] {
            let roll = call(
                &gw,
                "roll",
                json!({ "actor": "marlowe", "action_id": id, "difficulty": 10, "hope_die": 8, "fear_die": 5 }),
            )
            .await;
            assert!(roll.is_ok(), "{:?}", roll);
            call(&gw, "narrate_outcome", json!({ "action_id": id })).await;
        }

        let rolls = state(&gw).await.rolls;
        assert_eq!(rolls.len(), 2);
        assert!(rolls.contains_key("a3"));
    }
}
