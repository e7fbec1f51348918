//! Adversary features
//!
//! Features are data attached to an adversary: a Fear cost plus a list of
//! effects. Using one spends the cost first, then runs each effect against
//! the chosen targets.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::conditions::{Condition, ConditionKind, ConditionRegistry};
use super::countdown::{CountdownTracker, TickReport};
use super::damage::{apply_damage, DamageOutcome, DamageRequest, DamageType};
use super::ledger::{PoolChange, ResourceLedger, StressMark};
use crate::error::{EngineError, EngineResult};

/// What a feature costs to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCost {
    #[default]
    None,
    Fear(u8),
}

/// One thing a feature does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum FeatureEffect {
    /// Damage every target
    Damage {
        amount: i32,
        damage_type: DamageType,
        /// Armor cannot reduce it
        #[serde(default)]
        direct: bool,
    },
    MarkStress { amount: i32 },
    ApplyCondition { condition: Condition },
    TickCountdown {
        name: String,
        #[serde(default = "default_steps")]
        steps: i32,
    },
    GainFear { amount: i32 },
}

fn default_steps() -> i32 {
    1
}

impl FeatureEffect {
    fn needs_targets(&self) -> bool {
        matches!(
            self,
            FeatureEffect::Damage { .. } | FeatureEffect::MarkStress { .. } | FeatureEffect::ApplyCondition { .. }
        )
    }
}

/// A named adversary ability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdversaryFeature {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cost: FeatureCost,
    #[serde(default)]
    pub effects: Vec<FeatureEffect>,
}

/// Result of one effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EffectResult {
    Damage(DamageOutcome),
    Stress { target: String, mark: StressMark },
    Condition { target: String, kind: ConditionKind, applied: bool },
    Countdown(TickReport),
    Fear(PoolChange),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureOutcome {
    pub adversary: String,
    pub feature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fear_spent: Option<PoolChange>,
    pub effects: Vec<EffectResult>,
}

impl FeatureOutcome {
    /// Damage outcomes, for trigger bookkeeping
    pub fn damage(&self) -> impl Iterator<Item = &DamageOutcome> {
        self.effects.iter().filter_map(|e| match e {
            EffectResult::Damage(outcome) => Some(outcome),
            _ => None,
        })
    }
}

/// Use a feature of `adversary_id` against `targets`
pub fn use_feature(
    ledger: &mut ResourceLedger,
    conditions: &mut ConditionRegistry,
    countdowns: &mut CountdownTracker,
    adversary_id: &str,
    feature_name: &str,
    targets: &[String],
    massive_rule: bool,
) -> EngineResult<FeatureOutcome> {
    let adversary = ledger.entity(adversary_id)?;
    if !adversary.is_adversary() {
        return Err(EngineError::invalid(format!("'{}' is not an adversary", adversary_id)));
    }
    if adversary.defeated {
        return Err(EngineError::sequence(format!(
            "'{}' is defeated and cannot act",
            adversary_id
        )));
    }
    let feature = adversary
        .features
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(feature_name))
        .cloned()
        .ok_or_else(|| {
            EngineError::invalid(format!("'{}' has no feature '{}'", adversary_id, feature_name))
        })?;

    if feature.effects.iter().any(FeatureEffect::needs_targets) && targets.is_empty() {
        return Err(EngineError::invalid(format!("feature '{}' needs targets", feature.name)));
    }
    for target in targets {
        ledger.entity(target)?;
    }
    for effect in &feature.effects {
        if let FeatureEffect::TickCountdown { name, .. } = effect {
            countdowns.get(name)?;
        }
    }

    let fear_spent = match feature.cost {
        FeatureCost::None => None,
        FeatureCost::Fear(n) => Some(ledger.spend_fear(n)?),
    };

    let mut effects = Vec::new();
    for effect in &feature.effects {
        match effect {
            FeatureEffect::Damage {
                amount,
                damage_type,
                direct,
            } => {
                for target in targets {
                    let request = DamageRequest {
                        target: target.clone(),
                        amount: *amount,
                        damage_type: if *direct { DamageType::Direct } else { *damage_type },
                        armor_slot_spent: false,
                        critical_bonus: None,
                    };
                    effects.push(EffectResult::Damage(apply_damage(ledger, &request, massive_rule)?));
                }
            }
            FeatureEffect::MarkStress { amount } => {
                for target in targets {
                    let mark = ledger.mark_stress(target, *amount)?;
                    effects.push(EffectResult::Stress {
                        target: target.clone(),
                        mark,
                    });
                }
            }
            FeatureEffect::ApplyCondition { condition } => {
                for target in targets {
                    let mut condition = condition.clone();
                    condition.source.get_or_insert_with(|| adversary_id.to_string());
                    let kind = condition.kind.clone();
                    let applied = conditions.apply(target, condition);
                    effects.push(EffectResult::Condition {
                        target: target.clone(),
                        kind,
                        applied,
                    });
                }
            }
            FeatureEffect::TickCountdown { name, steps } => {
                effects.push(EffectResult::Countdown(countdowns.tick(name, *steps)?));
            }
            FeatureEffect::GainFear { amount } => {
                effects.push(EffectResult::Fear(ledger.adjust_fear(*amount)));
            }
        }
    }

    info!(
        "Feature: '{}' used {} on {} targets",
        adversary_id,
        feature.name,
        targets.len()
    );
    Ok(FeatureOutcome {
        adversary: adversary_id.to_string(),
        feature: feature.name,
        fear_spent,
        effects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::countdown::{CountdownSpec, Direction};
    use crate::rules::ledger::tests::{adversary, player};

    fn howl() -> AdversaryFeature {
        AdversaryFeature {
            name: "Terrifying Howl".into(),
            description: None,
            cost: FeatureCost::Fear(1),
            effects: vec![
                FeatureEffect::MarkStress { amount: 1 },
                FeatureEffect::ApplyCondition {
                    condition: Condition::new(ConditionKind::Vulnerable),
                },
            ],
        }
    }

    fn setup() -> (ResourceLedger, ConditionRegistry, CountdownTracker) {
        let mut ledger = ResourceLedger::new(6, 12);
        let mut wolf = adversary("Dire Wolf", 4, 5, 9);
        wolf.features.push(howl());
        wolf.features.push(AdversaryFeature {
            name: "Pounce".into(),
            description: None,
            cost: FeatureCost::None,
            effects: vec![FeatureEffect::Damage {
                amount: 10,
                damage_type: DamageType::Physical,
                direct: true,
            }],
        });
        ledger.insert(wolf).unwrap();
        ledger.insert(player("marlowe")).unwrap();
        (ledger, ConditionRegistry::new(), CountdownTracker::new())
    }

    #[test]
    fn test_feature_spends_fear_and_applies_effects() {
        let (mut ledger, mut conditions, mut countdowns) = setup();
        ledger.adjust_fear(2);
        let targets = vec!["marlowe".to_string()];

        let outcome = use_feature(
            &mut ledger,
            &mut conditions,
            &mut countdowns,
            "Dire Wolf",
            "terrifying howl",
            &targets,
            false,
        )
        .unwrap();
        assert_eq!(outcome.fear_spent.unwrap().after, 1);
        assert_eq!(outcome.effects.len(), 2);
        assert_eq!(ledger.entity("marlowe").unwrap().stress.marked, 1);
        assert!(conditions.is_active("marlowe", &ConditionKind::Vulnerable));
        assert_eq!(conditions.active("marlowe")[0].source.as_deref(), Some("Dire Wolf"));
    }

    #[test]
    fn test_insufficient_fear_changes_nothing() {
        let (mut ledger, mut conditions, mut countdowns) = setup();
        let targets = vec!["marlowe".to_string()];
        let result = use_feature(
            &mut ledger,
            &mut conditions,
            &mut countdowns,
            "Dire Wolf",
            "Terrifying Howl",
            &targets,
            false,
        );
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        assert_eq!(ledger.entity("marlowe").unwrap().stress.marked, 0);
        assert!(conditions.active("marlowe").is_empty());
    }

    #[test]
    fn test_direct_damage_effect() {
        let (mut ledger, mut conditions, mut countdowns) = setup();
        let targets = vec!["marlowe".to_string()];
        let outcome = use_feature(
            &mut ledger,
            &mut conditions,
            &mut countdowns,
            "Dire Wolf",
            "Pounce",
            &targets,
            false,
        )
        .unwrap();
        let damage: Vec<_> = outcome.damage().collect();
        assert_eq!(damage[0].damage_type, DamageType::Direct);
        assert_eq!(damage[0].hp_marked, 2);
    }

    #[test]
    fn test_unknown_feature_and_missing_targets() {
        let (mut ledger, mut conditions, mut countdowns) = setup();
        assert!(use_feature(
            &mut ledger,
            &mut conditions,
            &mut countdowns,
            "Dire Wolf",
            "Fly",
            &[],
            false
        )
        .is_err());
        assert!(matches!(
            use_feature(
                &mut ledger,
                &mut conditions,
                &mut countdowns,
                "Dire Wolf",
                "Pounce",
                &[],
                false
            ),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_countdown_effect() {
        let (mut ledger, mut conditions, mut countdowns) = setup();
        countdowns
            .create(CountdownSpec {
                name: "pack gathers".into(),
                start: 3,
                direction: Direction::Down,
                threshold: 0,
                milestones: vec![],
                allow_negative: false,
                concludes_encounter: false,
                rules: vec![],
            })
            .unwrap();
        let mut wolf = ledger.entity("Dire Wolf").unwrap().clone();
        wolf.id = "Alpha".into();
        wolf.features = vec![AdversaryFeature {
            name: "Call the Pack".into(),
            description: None,
            cost: FeatureCost::None,
            effects: vec![FeatureEffect::TickCountdown {
                name: "pack gathers".into(),
                steps: 2,
            }],
        }];
        ledger.insert(wolf).unwrap();

        use_feature(
            &mut ledger,
            &mut conditions,
            &mut countdowns,
            "Alpha",
            "Call the Pack",
            &[],
            false,
        )
        .unwrap();
        assert_eq!(countdowns.value("pack gathers").unwrap(), 1);
    }
}
