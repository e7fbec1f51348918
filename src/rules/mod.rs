//! Rules engine
//!
//! Deterministic, synchronous components for a Daggerheart-style ruleset:
//! - Duality rolls, adversary attacks and damage dice
//! - HP, Stress, Armor and the Hope/Fear pools
//! - Damage thresholds, resistance and armor
//! - Conditions and countdowns
//! - Rests, death moves and adversary features
//! - Encounter sequencing and the spotlight

pub mod conditions;
pub mod countdown;
pub mod damage;
pub mod death;
pub mod dice;
pub mod encounter;
pub mod features;
pub mod ledger;
pub mod rest;

pub use conditions::{ClearTrigger, Condition, ConditionKind, ConditionRegistry, RollEffect};
pub use countdown::{CountdownSpec, CountdownTracker, Direction, TickOutcome, TickReport, Trigger, TriggerRule};
pub use damage::{apply_damage, DamageOutcome, DamageRequest, DamageType, Severity};
pub use death::{resolve_death_move, DeathDice, DeathMove, DeathOutcome, RiskItAllPolicy};
pub use dice::{parse_dice, resolve, resolve_attack, DiceRoll, Entropy, RollClass, RollOutcome, ScriptedDice, SeededDice};
pub use encounter::{Encounter, EncounterPhase, Spotlight, SpotlightPolicy};
pub use features::{use_feature, AdversaryFeature, FeatureCost, FeatureEffect};
pub use ledger::{Entity, EntityKind, EntitySpec, ResourceLedger, Thresholds};
pub use rest::{RestKind, RestMove, RestPlan, RestProcessor, RestRequest};
