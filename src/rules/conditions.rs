//! Condition registry
//!
//! Conditions never tick down on their own. They leave through an explicit
//! clear, a rest, or a narrative resolution, whichever their clear trigger
//! names. Applying a condition that is already active changes nothing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dice::RollModifiers;

/// Which condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Rolls against the entity have advantage
    Vulnerable,
    /// Cannot move until freed
    Restrained,
    /// Rolls against the entity have disadvantage
    Hidden,
    Custom(String),
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionKind::Vulnerable => write!(f, "Vulnerable"),
            ConditionKind::Restrained => write!(f, "Restrained"),
            ConditionKind::Hidden => write!(f, "Hidden"),
            ConditionKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Roll effect of a custom condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollEffect {
    #[default]
    None,
    /// The entity's own rolls have advantage
    Advantage,
    /// The entity's own rolls have disadvantage
    Disadvantage,
    /// Rolls against the entity have advantage
    AdvantageAgainst,
    /// Rolls against the entity have disadvantage
    DisadvantageAgainst,
}

/// What ends a condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearTrigger {
    #[default]
    Explicit,
    Rest,
    Narrative,
}

/// An active condition on one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    #[serde(default)]
    pub roll_effect: RollEffect,
    #[serde(default)]
    pub clear_on: ClearTrigger,
    #[serde(default)]
    pub source: Option<String>,
}

impl Condition {
    pub fn new(kind: ConditionKind) -> Self {
        Self {
            kind,
            roll_effect: RollEffect::None,
            clear_on: ClearTrigger::Explicit,
            source: None,
        }
    }

    pub fn custom(name: &str, roll_effect: RollEffect) -> Self {
        Self {
            roll_effect,
            ..Self::new(ConditionKind::Custom(name.to_string()))
        }
    }

    pub fn clear_on(mut self, trigger: ClearTrigger) -> Self {
        self.clear_on = trigger;
        self
    }

    /// Effect on rolls the entity makes
    fn own_roll(&self) -> RollModifiers {
        match self.roll_effect {
            RollEffect::Advantage => RollModifiers::advantage(),
            RollEffect::Disadvantage => RollModifiers::disadvantage(),
            _ => RollModifiers::default(),
        }
    }

    /// Effect on rolls made against the entity
    fn against(&self) -> RollModifiers {
        match (&self.kind, self.roll_effect) {
            (ConditionKind::Vulnerable, _) | (_, RollEffect::AdvantageAgainst) => RollModifiers::advantage(),
            (ConditionKind::Hidden, _) | (_, RollEffect::DisadvantageAgainst) => {
                RollModifiers::disadvantage()
            }
            _ => RollModifiers::default(),
        }
    }
}

/// Active conditions per entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionRegistry {
    entities: BTreeMap<String, Vec<Condition>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a condition. Returns false when that kind was already active.
    pub fn apply(&mut self, entity_id: &str, condition: Condition) -> bool {
        let active = self.entities.entry(entity_id.to_string()).or_default();
        if active.iter().any(|c| c.kind == condition.kind) {
            debug!("Conditions: '{}' already {}", entity_id, condition.kind);
            return false;
        }
        debug!("Conditions: '{}' is now {}", entity_id, condition.kind);
        active.push(condition);
        true
    }

    /// Clear one kind. Returns false when it was not active.
    pub fn clear(&mut self, entity_id: &str, kind: &ConditionKind) -> bool {
        let Some(active) = self.entities.get_mut(entity_id) else {
            return false;
        };
        let before = active.len();
        active.retain(|c| &c.kind != kind);
        before != active.len()
    }

    /// Clear every condition on the entity that ends with `trigger`
    pub fn clear_triggered(&mut self, entity_id: &str, trigger: ClearTrigger) -> Vec<ConditionKind> {
        let Some(active) = self.entities.get_mut(entity_id) else {
            return Vec::new();
        };
        let (cleared, kept): (Vec<_>, Vec<_>) = active.drain(..).partition(|c| c.clear_on == trigger);
        *active = kept;
        cleared.into_iter().map(|c| c.kind).collect()
    }

    /// Entities carrying at least one condition
    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Drop everything tracked for an entity
    pub fn remove_entity(&mut self, entity_id: &str) {
        self.entities.remove(entity_id);
    }

    pub fn is_active(&self, entity_id: &str, kind: &ConditionKind) -> bool {
        self.entities
            .get(entity_id)
            .is_some_and(|active| active.iter().any(|c| &c.kind == kind))
    }

    pub fn active(&self, entity_id: &str) -> &[Condition] {
        self.entities.get(entity_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Raw signals on rolls the entity makes
    pub fn roll_modifiers_for(&self, entity_id: &str) -> RollModifiers {
        self.active(entity_id)
            .iter()
            .fold(RollModifiers::default(), |acc, c| acc.merge(c.own_roll()))
    }

    /// Raw signals on rolls made against the entity
    pub fn roll_modifiers_against(&self, entity_id: &str) -> RollModifiers {
        self.active(entity_id)
            .iter()
            .fold(RollModifiers::default(), |acc, c| acc.merge(c.against()))
    }
}
