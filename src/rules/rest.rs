//! Rest processing
//!
//! Every resting entity picks exactly two downtime moves. Short-rest amounts
//! come from the caller's 1d4+Tier roll; long-rest moves clear the whole
//! track. After three short rests in a row the next rest must be long.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::conditions::{ClearTrigger, ConditionKind, ConditionRegistry};
use super::countdown::{CountdownTracker, TickReport, Trigger};
use super::ledger::{PoolChange, ResourceLedger};
use crate::config::RulesConfig;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestKind {
    Short,
    Long,
}

impl fmt::Display for RestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestKind::Short => write!(f, "short rest"),
            RestKind::Long => write!(f, "long rest"),
        }
    }
}

/// A downtime move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "move", rename_all = "snake_case")]
pub enum RestMove {
    /// Clear HP on yourself or an ally
    TendToWounds {
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        amount: Option<i32>,
    },
    ClearStress {
        #[serde(default)]
        amount: Option<i32>,
    },
    /// Repair armor slots on yourself or an ally
    RepairArmor {
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        amount: Option<i32>,
    },
    /// Gain Hope
    Prepare,
    /// Long rest only: advance a project countdown
    WorkOnProject {
        countdown: String,
        #[serde(default = "default_project_steps")]
        steps: i32,
    },
}

fn default_project_steps() -> i32 {
    1
}

impl RestMove {
    fn name(&self) -> &'static str {
        match self {
            RestMove::TendToWounds { .. } => "tend_to_wounds",
            RestMove::ClearStress { .. } => "clear_stress",
            RestMove::RepairArmor { .. } => "repair_armor",
            RestMove::Prepare => "prepare",
            RestMove::WorkOnProject { .. } => "work_on_project",
        }
    }
}

/// One entity's chosen moves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestPlan {
    pub entity_id: String,
    pub moves: Vec<RestMove>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestRequest {
    pub kind: RestKind,
    pub plans: Vec<RestPlan>,
    /// Fear the GM gains for this rest
    #[serde(default)]
    pub fear_gain: i32,
}

/// What one move did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveResult {
    pub entity_id: String,
    #[serde(rename = "move")]
    pub move_name: &'static str,
    pub target: String,
    pub cleared: u32,
    pub hope_gained: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<TickReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestOutcome {
    pub kind: RestKind,
    pub moves: Vec<MoveResult>,
    pub fear: PoolChange,
    pub conditions_cleared: Vec<(String, ConditionKind)>,
    pub countdowns: Vec<TickReport>,
    pub consecutive_short_rests: u32,
}

/// Applies rests and remembers how many short rests happened in a row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestProcessor {
    consecutive_short: u32,
}

impl RestProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_short_rests(&self) -> u32 {
        self.consecutive_short
    }

    /// Validate the whole request, then apply it
    pub fn apply(
        &mut self,
        ledger: &mut ResourceLedger,
        conditions: &mut ConditionRegistry,
        countdowns: &mut CountdownTracker,
        request: &RestRequest,
        rules: &RulesConfig,
    ) -> EngineResult<RestOutcome> {
        self.validate(ledger, countdowns, request, rules)?;

        let mut moves = Vec::new();
        for plan in &request.plans {
            for rest_move in &plan.moves {
                moves.push(apply_move(ledger, countdowns, &plan.entity_id, rest_move, request.kind, rules)?);
            }
        }

        let mut conditions_cleared = Vec::new();
        for plan in &request.plans {
            for kind in conditions.clear_triggered(&plan.entity_id, ClearTrigger::Rest) {
                conditions_cleared.push((plan.entity_id.clone(), kind));
            }
        }

        let fear = ledger.adjust_fear(request.fear_gain);
        let countdown_reports = countdowns.fire(&Trigger::Rest);

        self.consecutive_short = match request.kind {
            RestKind::Short => self.consecutive_short + 1,
            RestKind::Long => 0,
        };
        info!(
            "Rest: {} for {} entities, Fear {} -> {}",
            request.kind,
            request.plans.len(),
            fear.before,
            fear.after
        );

        Ok(RestOutcome {
            kind: request.kind,
            moves,
            fear,
            conditions_cleared,
            countdowns: countdown_reports,
            consecutive_short_rests: self.consecutive_short,
        })
    }

    fn validate(
        &self,
        ledger: &ResourceLedger,
        countdowns: &CountdownTracker,
        request: &RestRequest,
        rules: &RulesConfig,
    ) -> EngineResult<()> {
        if request.kind == RestKind::Short && self.consecutive_short >= rules.max_consecutive_short_rests {
            return Err(EngineError::sequence(format!(
                "{} short rests in a row; the next rest must be long",
                self.consecutive_short
            )));
        }
        if request.plans.is_empty() {
            return Err(EngineError::invalid("a rest needs at least one resting entity"));
        }
        if request.fear_gain < 0 {
            return Err(EngineError::invalid("fear gain must be non-negative"));
        }

        let mut seen = HashSet::new();
        for plan in &request.plans {
            if !seen.insert(plan.entity_id.as_str()) {
                return Err(EngineError::invalid(format!(
                    "'{}' appears twice in one rest",
                    plan.entity_id
                )));
            }
            if plan.moves.len() != rules.moves_per_rest {
                return Err(EngineError::sequence(format!(
                    "'{}' chose {} rest moves, exactly {} required",
                    plan.entity_id,
                    plan.moves.len(),
                    rules.moves_per_rest
                )));
            }
            check_alive(ledger, &plan.entity_id)?;

            for rest_move in &plan.moves {
                match rest_move {
                    RestMove::TendToWounds { target, amount } | RestMove::RepairArmor { target, amount } => {
                        if let Some(target) = target {
                            check_alive(ledger, target)?;
                        }
                        check_amount(request.kind, *amount, rest_move.name())?;
                    }
                    RestMove::ClearStress { amount } => check_amount(request.kind, *amount, rest_move.name())?,
                    RestMove::Prepare => {}
                    RestMove::WorkOnProject { countdown, steps } => {
                        if request.kind == RestKind::Short {
                            return Err(EngineError::invalid("work on a project needs a long rest"));
                        }
                        if *steps < 0 {
                            return Err(EngineError::invalid("project steps must be non-negative"));
                        }
                        countdowns.get(countdown)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_alive(ledger: &ResourceLedger, id: &str) -> EngineResult<()> {
    if ledger.entity(id)?.dead {
        return Err(EngineError::invalid(format!("'{}' is dead and cannot rest", id)));
    }
    Ok(())
}

fn check_amount(kind: RestKind, amount: Option<i32>, move_name: &str) -> EngineResult<()> {
    match (kind, amount) {
        (RestKind::Short, None) => Err(EngineError::invalid(format!(
            "short-rest {} needs the rolled amount",
            move_name
        ))),
        (_, Some(n)) if n < 0 => Err(EngineError::invalid(format!(
            "{} amount must be non-negative",
            move_name
        ))),
        _ => Ok(()),
    }
}

/// Long rests clear the whole track regardless of the rolled amount
fn rest_amount(kind: RestKind, amount: Option<i32>) -> i32 {
    match kind {
        RestKind::Long => i32::MAX,
        RestKind::Short => amount.unwrap_or(0),
    }
}

fn apply_move(
    ledger: &mut ResourceLedger,
    countdowns: &mut CountdownTracker,
    entity_id: &str,
    rest_move: &RestMove,
    kind: RestKind,
    rules: &RulesConfig,
) -> EngineResult<MoveResult> {
    let mut result = MoveResult {
        entity_id: entity_id.to_string(),
        move_name: rest_move.name(),
        target: entity_id.to_string(),
        cleared: 0,
        hope_gained: 0,
        project: None,
    };

    match rest_move {
        RestMove::TendToWounds { target, amount } => {
            let target = target.as_deref().unwrap_or(entity_id);
            result.cleared = ledger.clear_hp(target, rest_amount(kind, *amount))?.cleared;
            result.target = target.to_string();
        }
        RestMove::ClearStress { amount } => {
            result.cleared = ledger.clear_stress(entity_id, rest_amount(kind, *amount))?.cleared;
        }
        RestMove::RepairArmor { target, amount } => {
            let target = target.as_deref().unwrap_or(entity_id);
            result.cleared = ledger
                .clear_armor_slots(target, rest_amount(kind, *amount))?
                .cleared;
            result.target = target.to_string();
        }
        RestMove::Prepare => {
            let change = ledger.adjust_hope(i32::from(rules.prepare_hope));
            result.hope_gained = change.after - change.before;
        }
        RestMove::WorkOnProject { countdown, steps } => {
            result.target = countdown.clone();
            result.project = Some(countdowns.tick(countdown, *steps)?);
        }
    }
    Ok(result)
}
