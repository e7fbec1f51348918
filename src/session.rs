//! Sessions
//!
//! A session owns every piece of rules state for one table: the ledger,
//! conditions, countdowns, rest history, the current encounter, resolved
//! rolls and a bounded event log. Sessions serialize whole, which is how
//! they cross session boundaries (`save_session` / `load_session`).
//!
//! The manager keeps one async mutex per session: calls to the same session
//! serialize, different sessions proceed in parallel.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::RulesConfig;
use crate::error::{EngineError, EngineResult};
use crate::rules::conditions::ConditionRegistry;
use crate::rules::countdown::CountdownTracker;
use crate::rules::dice::{Entropy, RollOutcome, SeededDice};
use crate::rules::encounter::Encounter;
use crate::rules::ledger::{PoolChange, ResourceLedger};
use crate::rules::rest::RestProcessor;

static SESSION_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid regex"));

/// Reject session ids that could not have come from a well-behaved caller
pub fn validate_session_id(id: &str) -> EngineResult<()> {
    if SESSION_ID_REGEX.is_match(id) {
        Ok(())
    } else {
        Err(EngineError::invalid(format!("malformed session id '{}'", id)))
    }
}

/// One line of the narration log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub tool: String,
    pub summary: String,
}

/// Pool movement caused by a duality roll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hope: Option<(u8, u8)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fear: Option<(u8, u8)>,
    #[serde(default)]
    pub stress_cleared: u32,
}

impl RollResources {
    pub fn hope_change(&mut self, change: PoolChange) {
        self.hope = Some((change.before, change.after));
    }

    pub fn fear_change(&mut self, change: PoolChange) {
        self.fear = Some((change.before, change.after));
    }
}

/// A resolved roll, kept so a retried action id replays instead of re-rolling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRoll {
    pub action_id: String,
    pub actor: String,
    pub outcome: RollOutcome,
    /// Signed advantage (+) or disadvantage (-) die, when one applied
    #[serde(default)]
    pub advantage_die: Option<i32>,
    #[serde(default)]
    pub resources: RollResources,
    pub at: DateTime<Utc>,
}

/// All rules state for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub ledger: ResourceLedger,
    #[serde(default)]
    pub conditions: ConditionRegistry,
    #[serde(default)]
    pub countdowns: CountdownTracker,
    #[serde(default)]
    pub rest: RestProcessor,
    pub encounter: Encounter,
    #[serde(default)]
    pub rolls: BTreeMap<String, StoredRoll>,
    #[serde(default)]
    pub events: VecDeque<Event>,
}

impl Session {
    /// Create an empty session with pools sized from the rules
    pub fn new(id: &str, rules: &RulesConfig) -> Self {
        Self {
            id: id.to_string(),
            created_at: Utc::now(),
            ledger: ResourceLedger::new(rules.hope_max, rules.fear_max),
            conditions: ConditionRegistry::new(),
            countdowns: CountdownTracker::new(),
            rest: RestProcessor::new(),
            encounter: Encounter::scene(rules.spotlight),
            rolls: BTreeMap::new(),
            events: VecDeque::new(),
        }
    }

    /// Append to the event log, dropping the oldest entries past `limit`
    pub fn record(&mut self, tool: &str, summary: impl Into<String>, limit: usize) {
        self.events.push_back(Event {
            at: Utc::now(),
            tool: tool.to_string(),
            summary: summary.into(),
        });
        while self.events.len() > limit {
            self.events.pop_front();
        }
    }

    /// Keep a resolved roll for replay, evicting the oldest past `limit`
    pub fn remember_roll(&mut self, stored: StoredRoll, limit: usize) {
        self.rolls.insert(stored.action_id.clone(), stored);
        self.trim_rolls(limit);
    }

    fn trim_rolls(&mut self, limit: usize) {
        while self.rolls.len() > limit {
            let oldest = self
                .rolls
                .values()
                .min_by_key(|roll| roll.at)
                .map(|roll| roll.action_id.clone());
            match oldest {
                Some(id) => {
                    self.rolls.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Check a session that arrived from outside before it replaces live state
    pub fn validate(&self, rules: &RulesConfig) -> EngineResult<()> {
        self.ledger.validate(rules.hope_max, rules.fear_max)?;
        self.countdowns.validate()?;

        let known = |id: &str| self.ledger.entity(id).is_ok();
        let encounter = &self.encounter;
        if let Some(missing) = encounter
            .players
            .iter()
            .chain(&encounter.adversaries)
            .map(String::as_str)
            .chain(encounter.pending.as_ref().map(|p| p.actor.as_str()))
            .chain(self.conditions.entity_ids())
            .find(|id| !known(*id))
        {
            return Err(EngineError::invalid(format!(
                "snapshot refers to unknown entity '{}'",
                missing
            )));
        }

        for (id, roll) in &self.rolls {
            if id != &roll.action_id {
                return Err(EngineError::invalid(format!(
                    "roll stored under '{}' has action id '{}'",
                    id, roll.action_id
                )));
            }
        }
        Ok(())
    }

    /// Most recent events, oldest first
    pub fn recent_events(&self, n: usize) -> impl Iterator<Item = &Event> {
        self.events.iter().skip(self.events.len().saturating_sub(n))
    }
}

/// A session plus the dice it rolls with
pub struct SessionSlot {
    pub session: Session,
    pub dice: Box<dyn Entropy>,
}

/// Builds the entropy source for each new session
pub type DiceFactory = Arc<dyn Fn() -> Box<dyn Entropy> + Send + Sync>;

/// Live sessions keyed by id
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionSlot>>>>,
    rules: RulesConfig,
    dice: DiceFactory,
}

impl SessionManager {
    /// Create a manager whose sessions roll `SeededDice`
    pub fn new(rules: RulesConfig) -> Self {
        let seed = rules.dice_seed;
        Self::with_dice(rules, Arc::new(move || Box::new(SeededDice::new(seed)) as Box<dyn Entropy>))
    }

    /// Create a manager with a custom entropy source
    pub fn with_dice(rules: RulesConfig, dice: DiceFactory) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            rules,
            dice,
        }
    }

    /// Create a shared manager
    pub fn shared(rules: RulesConfig) -> Arc<Self> {
        Arc::new(Self::new(rules))
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    /// Get a session, creating it on first use
    pub async fn get_or_create(&self, id: &str) -> EngineResult<Arc<Mutex<SessionSlot>>> {
        validate_session_id(id)?;
        if let Some(slot) = self.sessions.read().await.get(id) {
            return Ok(slot.clone());
        }

        let mut sessions = self.sessions.write().await;
        let slot = sessions.entry(id.to_string()).or_insert_with(|| {
            info!("Session '{}' created", id);
            Arc::new(Mutex::new(SessionSlot {
                session: Session::new(id, &self.rules),
                dice: (self.dice)(),
            }))
        });
        Ok(slot.clone())
    }

    /// Get an existing session
    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<SessionSlot>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Copy of a session's current state
    pub async fn snapshot(&self, id: &str) -> Option<Session> {
        let slot = self.get(id).await?;
        let guard = slot.lock().await;
        Some(guard.session.clone())
    }

    /// Replace (or create) a session from a snapshot; a snapshot that fails
    /// validation leaves any live session untouched
    pub async fn load(&self, id: &str, mut session: Session) -> EngineResult<()> {
        validate_session_id(id)?;
        session.validate(&self.rules)?;
        session.id = id.to_string();
        session.trim_rolls(self.rules.roll_history_limit);
        while session.events.len() > self.rules.event_log_limit {
            session.events.pop_front();
        }
        let slot = self.get_or_create(id).await?;
        let mut guard = slot.lock().await;
        debug!(
            "Session '{}' loaded with {} entities",
            id,
            session.ledger.entities().count()
        );
        guard.session = session;
        Ok(())
    }

    /// Drop a session entirely
    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Ids of all live sessions
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
