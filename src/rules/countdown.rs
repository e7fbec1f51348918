//! Countdown tracker
//!
//! A countdown moves toward its resolve threshold in its own direction.
//! Resolution is a one-shot event: the tick that reaches or passes the
//! threshold clamps onto it and reports `Resolved`, every later tick reports
//! `AlreadyResolved` until the countdown is reset.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ledger::validate_entity_id;
use crate::error::{EngineError, EngineResult};

/// Which way a countdown travels toward its threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Down,
    Up,
}

impl Direction {
    fn sign(&self) -> i32 {
        match self {
            Direction::Down => -1,
            Direction::Up => 1,
        }
    }
}

/// Game events that can advance countdowns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Any adversary was defeated
    AdversaryDefeated,
    EntityDefeated(String),
    /// The entity took a hit (including narrative-only entities)
    EntityHit(String),
    /// A player rolled with Fear
    RollWithFear,
    Rest,
    Custom(String),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::AdversaryDefeated => write!(f, "adversary defeated"),
            Trigger::EntityDefeated(id) => write!(f, "{} defeated", id),
            Trigger::EntityHit(id) => write!(f, "{} hit", id),
            Trigger::RollWithFear => write!(f, "roll with Fear"),
            Trigger::Rest => write!(f, "rest"),
            Trigger::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Advance by `steps` whenever `on` happens; negative steps move away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub on: Trigger,
    #[serde(default = "default_steps")]
    pub steps: i32,
}

fn default_steps() -> i32 {
    1
}

/// Parameters for a new countdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownSpec {
    pub name: String,
    pub start: i32,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub threshold: i32,
    /// Intermediate values reported once when crossed
    #[serde(default)]
    pub milestones: Vec<i32>,
    #[serde(default)]
    pub allow_negative: bool,
    /// Resolving this countdown ends the encounter
    #[serde(default)]
    pub concludes_encounter: bool,
    #[serde(default)]
    pub rules: Vec<TriggerRule>,
}

/// A live countdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    pub spec: CountdownSpec,
    pub value: i32,
    pub resolved: bool,
    pub milestones_hit: Vec<i32>,
}

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Advanced { value: i32, milestones: Vec<i32> },
    Resolved { value: i32, milestones: Vec<i32> },
    AlreadyResolved { value: i32 },
}

impl TickOutcome {
    pub fn value(&self) -> i32 {
        match self {
            TickOutcome::Advanced { value, .. }
            | TickOutcome::Resolved { value, .. }
            | TickOutcome::AlreadyResolved { value } => *value,
        }
    }

    pub fn just_resolved(&self) -> bool {
        matches!(self, TickOutcome::Resolved { .. })
    }
}

/// One countdown's reaction to a tick or trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub name: String,
    pub steps: i32,
    #[serde(flatten)]
    pub outcome: TickOutcome,
    pub concludes_encounter: bool,
}

impl Countdown {
    fn new(spec: CountdownSpec) -> EngineResult<Self> {
        validate_entity_id(&spec.name)
            .map_err(|_| EngineError::invalid(format!("malformed countdown name '{}'", spec.name)))?;
        let countdown = Self {
            value: spec.start,
            spec,
            resolved: false,
            milestones_hit: Vec::new(),
        };
        countdown.check_start(countdown.value)?;
        Ok(countdown)
    }

    fn check_start(&self, value: i32) -> EngineResult<()> {
        if value < 0 && !self.spec.allow_negative {
            return Err(EngineError::invalid(format!(
                "countdown '{}' cannot hold a negative value",
                self.spec.name
            )));
        }
        if self.reached(value) {
            return Err(EngineError::invalid(format!(
                "countdown '{}' would start at or past its threshold {}",
                self.spec.name, self.spec.threshold
            )));
        }
        Ok(())
    }

    fn reached(&self, value: i32) -> bool {
        match self.spec.direction {
            Direction::Down => value <= self.spec.threshold,
            Direction::Up => value >= self.spec.threshold,
        }
    }

    fn tick(&mut self, steps: i32) -> TickOutcome {
        if self.resolved {
            return TickOutcome::AlreadyResolved { value: self.value };
        }

        let old = self.value;
        let mut new = old.saturating_add(steps.saturating_mul(self.spec.direction.sign()));
        let resolved = self.reached(new);
        if resolved {
            new = self.spec.threshold;
        } else if !self.spec.allow_negative {
            new = new.max(0);
        }

        // Milestones only count on the way toward the threshold
        let mut crossed: Vec<i32> = if steps > 0 {
            let (lo, hi) = (old.min(new), old.max(new));
            self.spec
                .milestones
                .iter()
                .copied()
                .filter(|m| *m != old && (lo..=hi).contains(m) && !self.milestones_hit.contains(m))
                .collect()
        } else {
            Vec::new()
        };
        crossed.sort_unstable();
        self.milestones_hit.extend(crossed.iter().copied());
        self.value = new;

        if resolved {
            self.resolved = true;
            info!("Countdown '{}' resolved at {}", self.spec.name, new);
            TickOutcome::Resolved {
                value: new,
                milestones: crossed,
            }
        } else {
            debug!("Countdown '{}' {} -> {}", self.spec.name, old, new);
            TickOutcome::Advanced {
                value: new,
                milestones: crossed,
            }
        }
    }
}

/// Named countdowns for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownTracker {
    countdowns: BTreeMap<String, Countdown>,
}

impl CountdownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, spec: CountdownSpec) -> EngineResult<&Countdown> {
        if self.countdowns.contains_key(&spec.name) {
            return Err(EngineError::invalid(format!(
                "countdown '{}' already exists",
                spec.name
            )));
        }
        let countdown = Countdown::new(spec)?;
        info!(
            "Countdown '{}' created at {} ({:?} to {})",
            countdown.spec.name, countdown.value, countdown.spec.direction, countdown.spec.threshold
        );
        let name = countdown.spec.name.clone();
        Ok(self.countdowns.entry(name).or_insert(countdown))
    }

    /// Advance by `steps` toward the threshold
    pub fn tick(&mut self, name: &str, steps: i32) -> EngineResult<TickReport> {
        let countdown = self.get_mut(name)?;
        let outcome = countdown.tick(steps);
        Ok(TickReport {
            name: name.to_string(),
            steps,
            outcome,
            concludes_encounter: countdown.spec.concludes_encounter,
        })
    }

    pub fn value(&self, name: &str) -> EngineResult<i32> {
        Ok(self.get(name)?.value)
    }

    pub fn is_resolved(&self, name: &str) -> EngineResult<bool> {
        Ok(self.get(name)?.resolved)
    }

    /// Re-arm a countdown at a new value
    pub fn reset(&mut self, name: &str, value: i32) -> EngineResult<&Countdown> {
        let countdown = self.get_mut(name)?;
        countdown.check_start(value)?;
        countdown.value = value;
        countdown.resolved = false;
        countdown.milestones_hit.clear();
        Ok(countdown)
    }

    pub fn remove(&mut self, name: &str) -> EngineResult<Countdown> {
        self.countdowns
            .remove(name)
            .ok_or_else(|| EngineError::UnknownCountdown(name.to_string()))
    }

    /// Apply every rule listening for `trigger` on unresolved countdowns
    pub fn fire(&mut self, trigger: &Trigger) -> Vec<TickReport> {
        let mut reports = Vec::new();
        for (name, countdown) in self.countdowns.iter_mut() {
            if countdown.resolved {
                continue;
            }
            let matching: Vec<i32> = countdown
                .spec
                .rules
                .iter()
                .filter(|rule| &rule.on == trigger)
                .map(|rule| rule.steps)
                .collect();
            if matching.is_empty() {
                continue;
            }
            let steps = matching.iter().sum();
            debug!("Countdown '{}' triggered by {}", name, trigger);
            reports.push(TickReport {
                name: name.clone(),
                steps,
                outcome: countdown.tick(steps),
                concludes_encounter: countdown.spec.concludes_encounter,
            });
        }
        reports
    }

    pub fn get(&self, name: &str) -> EngineResult<&Countdown> {
        self.countdowns
            .get(name)
            .ok_or_else(|| EngineError::UnknownCountdown(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> EngineResult<&mut Countdown> {
        self.countdowns
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownCountdown(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Countdown> {
        self.countdowns.values()
    }

    /// Check countdowns restored from a snapshot
    pub fn validate(&self) -> EngineResult<()> {
        for (name, countdown) in &self.countdowns {
            if name != &countdown.spec.name {
                return Err(EngineError::invalid(format!(
                    "countdown stored under '{}' is named '{}'",
                    name, countdown.spec.name
                )));
            }
            validate_entity_id(name)
                .map_err(|_| EngineError::invalid(format!("malformed countdown name '{}'", name)))?;
            let value = countdown.value;
            if countdown.resolved != countdown.reached(value)
                || (!countdown.resolved && value < 0 && !countdown.spec.allow_negative)
            {
                return Err(EngineError::invalid(format!(
                    "countdown '{}' value {} disagrees with its state",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Resolved countdowns that end the encounter
    pub fn any_concluding_resolved(&self) -> bool {
        self.countdowns
            .values()
            .any(|c| c.resolved && c.spec.concludes_encounter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, start: i32, direction: Direction, threshold: i32) -> CountdownSpec {
        CountdownSpec {
            name: name.to_string(),
            start,
            direction,
            threshold,
            milestones: Vec::new(),
            allow_negative: false,
            concludes_encounter: false,
            rules: Vec::new(),
        }
    }

    #[test]
    fn test_tick_past_threshold_resolves_once() {
        let mut tracker = CountdownTracker::new();
        tracker.create(spec("ritual", 1, Direction::Down, 0)).unwrap();

        let report = tracker.tick("ritual", 2).unwrap();
        assert_eq!(
            report.outcome,
            TickOutcome::Resolved {
                value: 0,
                milestones: vec![]
            }
        );
        assert!(tracker.is_resolved("ritual").unwrap());

        let again = tracker.tick("ritual", 1).unwrap();
        assert_eq!(again.outcome, TickOutcome::AlreadyResolved { value: 0 });
        assert_eq!(tracker.value("ritual").unwrap(), 0);
    }

    #[test]
    fn test_up_countdown() {
        let mut tracker = CountdownTracker::new();
        tracker.create(spec("alarm", 0, Direction::Up, 3)).unwrap();
        assert_eq!(tracker.tick("alarm", 2).unwrap().outcome.value(), 2);
        assert!(tracker.tick("alarm", 5).unwrap().outcome.just_resolved());
        assert_eq!(tracker.value("alarm").unwrap(), 3);
    }

    #[test]
    fn test_negative_steps_move_away_and_floor_at_zero() {
        let mut tracker = CountdownTracker::new();
        tracker.create(spec("alarm", 1, Direction::Up, 4)).unwrap();
        assert_eq!(tracker.tick("alarm", -3).unwrap().outcome.value(), 0);

        let mut negative = spec("debt", 1, Direction::Up, 4);
        negative.allow_negative = true;
        tracker.create(negative).unwrap();
        assert_eq!(tracker.tick("debt", -3).unwrap().outcome.value(), -2);
    }

    #[test]
    fn test_trigger_rules_in_both_directions() {
        let mut tracker = CountdownTracker::new();
        let mut ritual = spec("ritual", 6, Direction::Down, 0);
        ritual.rules = vec![
            TriggerRule {
                on: Trigger::AdversaryDefeated,
                steps: 1,
            },
            TriggerRule {
                on: Trigger::EntityHit("arcanist".into()),
                steps: -1,
            },
        ];
        tracker.create(ritual).unwrap();

        let reports = tracker.fire(&Trigger::AdversaryDefeated);
        assert_eq!(reports.len(), 1);
        assert_eq!(tracker.value("ritual").unwrap(), 5);

        tracker.fire(&Trigger::EntityHit("arcanist".into()));
        assert_eq!(tracker.value("ritual").unwrap(), 6);

        assert!(tracker.fire(&Trigger::Rest).is_empty());
    }

    #[test]
    fn test_milestones_report_once() {
        let mut tracker = CountdownTracker::new();
        let mut ritual = spec("ritual", 6, Direction::Down, 0);
        ritual.milestones = vec![3];
        tracker.create(ritual).unwrap();

        let report = tracker.tick("ritual", 3).unwrap();
        assert_eq!(
            report.outcome,
            TickOutcome::Advanced {
                value: 3,
                milestones: vec![3]
            }
        );
        tracker.tick("ritual", -1).unwrap();
        let report = tracker.tick("ritual", 1).unwrap();
        assert_eq!(
            report.outcome,
            TickOutcome::Advanced {
                value: 3,
                milestones: vec![]
            }
        );
    }

    #[test]
    fn test_reset_rearms() {
        let mut tracker = CountdownTracker::new();
        tracker.create(spec("ritual", 1, Direction::Down, 0)).unwrap();
        tracker.tick("ritual", 1).unwrap();
        tracker.reset("ritual", 4).unwrap();
        assert!(!tracker.is_resolved("ritual").unwrap());
        assert_eq!(tracker.value("ritual").unwrap(), 4);
        assert!(tracker.reset("ritual", 0).is_err());
    }

    #[test]
    fn test_create_validation() {
        let mut tracker = CountdownTracker::new();
        tracker.create(spec("ritual", 3, Direction::Down, 0)).unwrap();
        assert!(tracker.create(spec("ritual", 3, Direction::Down, 0)).is_err());
        assert!(tracker.create(spec("done", 0, Direction::Down, 0)).is_err());
        assert!(tracker.create(spec("neg", -1, Direction::Up, 3)).is_err());
        assert!(matches!(
            tracker.tick("missing", 1),
            Err(EngineError::UnknownCountdown(_))
        ));
    }

    #[test]
    fn test_validate_restored_countdowns() {
        let mut tracker = CountdownTracker::new();
        tracker.create(spec("ritual", 3, Direction::Down, 0)).unwrap();
        tracker.tick("ritual", 1).unwrap();
        assert!(tracker.validate().is_ok());

        let mut tampered = tracker.clone();
        tampered.get_mut("ritual").unwrap().value = -4;
        assert!(tampered.validate().is_err());

        let mut tampered = tracker.clone();
        tampered.get_mut("ritual").unwrap().resolved = true;
        assert!(tampered.validate().is_err());

        let mut tampered = tracker.clone();
        let ritual = tampered.countdowns.remove("ritual").unwrap();
        tampered.countdowns.insert("other".into(), ritual);
        assert!(tampered.validate().is_err());
    }
}
