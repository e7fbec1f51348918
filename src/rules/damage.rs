//! Damage types, resistances and threshold math
//!
//! Turns a raw damage number into HP marks:
//! - Immunity (zero) and Resistance (half, rounded up)
//! - Critical bonus (maximum of the damage dice, supplied by the caller)
//! - Optional armor slot downgrading severity by one tier
//! - Threshold comparison, then a clamped mark through the ledger

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ledger::ResourceLedger;
use crate::error::{EngineError, EngineResult};

/// Types of damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    /// Weapons, claws, falling rocks
    Physical,
    /// Spells and supernatural sources
    Magic,
    /// Cannot be reduced by marking armor
    Direct,
}

impl DamageType {
    pub fn bypasses_armor(&self) -> bool {
        matches!(self, DamageType::Direct)
    }
}

impl FromStr for DamageType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "physical" | "phy" => Ok(DamageType::Physical),
            "magic" | "magical" | "mag" => Ok(DamageType::Magic),
            "direct" => Ok(DamageType::Direct),
            _ => Err(EngineError::invalid(format!("unknown damage type '{}'", s))),
        }
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DamageType::Physical => "physical",
            DamageType::Magic => "magic",
            DamageType::Direct => "direct",
        };
        write!(f, "{}", s)
    }
}

/// How an entity reacts to a damage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageModifier {
    /// Takes no damage
    Immune,
    /// Takes half damage, rounded up
    Resistant,
    Normal,
}

impl DamageModifier {
    pub fn apply(&self, damage: i32) -> i32 {
        match self {
            DamageModifier::Immune => 0,
            DamageModifier::Resistant => (damage + 1).div_euclid(2),
            DamageModifier::Normal => damage,
        }
    }
}

/// Per-entity resistances and immunities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DamageProfile {
    modifiers: BTreeMap<DamageType, DamageModifier>,
}

impl DamageProfile {
    pub fn set(&mut self, dtype: DamageType, modifier: DamageModifier) {
        if modifier == DamageModifier::Normal {
            self.modifiers.remove(&dtype);
        } else {
            self.modifiers.insert(dtype, modifier);
        }
    }

    pub fn get(&self, dtype: DamageType) -> DamageModifier {
        self.modifiers
            .get(&dtype)
            .copied()
            .unwrap_or(DamageModifier::Normal)
    }

    pub fn add_immunity(&mut self, dtype: DamageType) {
        self.set(dtype, DamageModifier::Immune);
    }

    pub fn add_resistance(&mut self, dtype: DamageType) {
        self.set(dtype, DamageModifier::Resistant);
    }
}

/// How bad a hit is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Minor,
    Major,
    Severe,
    /// Optional rule: at least twice the Severe threshold
    Massive,
}

impl Severity {
    pub fn hp_marks(&self) -> u32 {
        match self {
            Severity::None => 0,
            Severity::Minor => 1,
            Severity::Major => 2,
            Severity::Severe => 3,
            Severity::Massive => 4,
        }
    }

    /// One tier lower, never below None
    pub fn downgrade(&self) -> Severity {
        match self {
            Severity::Massive => Severity::Severe,
            Severity::Severe => Severity::Major,
            Severity::Major => Severity::Minor,
            Severity::Minor | Severity::None => Severity::None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::None => "no",
            Severity::Minor => "Minor",
            Severity::Major => "Major",
            Severity::Severe => "Severe",
            Severity::Massive => "Massive",
        };
        write!(f, "{}", s)
    }
}

/// A request to damage one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageRequest {
    pub target: String,
    pub amount: i32,
    pub damage_type: DamageType,
    #[serde(default)]
    pub armor_slot_spent: bool,
    /// Maximum of the damage dice when the attack was critical
    #[serde(default)]
    pub critical_bonus: Option<i32>,
}

/// What a hit did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DamageOutcome {
    pub target: String,
    pub raw_amount: i32,
    pub effective_amount: i32,
    pub damage_type: DamageType,
    pub modifier: DamageModifier,
    pub severity: Severity,
    pub hp_marked: u32,
    pub armor_consumed: bool,
    pub defeated: bool,
    pub newly_defeated: bool,
    /// Target's HP lives in the story; nothing was written
    pub narrative_only: bool,
}

/// Compare a final amount against thresholds; any positive hit below Major
/// is Minor
pub fn severity_for(amount: i32, major: i32, severe: i32, massive_rule: bool) -> Severity {
    if amount <= 0 {
        Severity::None
    } else if massive_rule && amount >= severe.saturating_mul(2) {
        Severity::Massive
    } else if amount >= severe {
        Severity::Severe
    } else if amount >= major {
        Severity::Major
    } else {
        Severity::Minor
    }
}

/// Apply one hit to a target in the ledger.
///
/// Validation finishes before the first write, so a rejected request
/// leaves the ledger untouched.
pub fn apply_damage(
    ledger: &mut ResourceLedger,
    request: &DamageRequest,
    massive_rule: bool,
) -> EngineResult<DamageOutcome> {
    if request.amount < 0 {
        return Err(EngineError::invalid("damage amount must be non-negative"));
    }
    if request.critical_bonus.is_some_and(|bonus| bonus < 0) {
        return Err(EngineError::invalid("critical bonus must be non-negative"));
    }

    let target = ledger.entity(&request.target)?;
    if target.defeated && !target.narrative_only {
        return Err(EngineError::AlreadyResolved(format!(
            "'{}' is already defeated",
            target.id
        )));
    }

    let modifier = target.damage_profile.get(request.damage_type);
    let mut effective = modifier.apply(request.amount);
    if modifier != DamageModifier::Immune {
        effective = effective.saturating_add(request.critical_bonus.unwrap_or(0));
    }

    let t = target.thresholds;
    let mut severity = severity_for(effective, t.major, t.severe, massive_rule);

    let wants_armor = request.armor_slot_spent
        && !request.damage_type.bypasses_armor()
        && severity > Severity::None
        && !target.narrative_only;
    if wants_armor && target.armor.free() == 0 {
        return Err(EngineError::invalid(format!(
            "'{}' has no free armor slot to spend",
            target.id
        )));
    }

    if target.narrative_only {
        debug!("Damage: '{}' is narrative-only, no HP written", target.id);
        return Ok(DamageOutcome {
            target: target.id.clone(),
            raw_amount: request.amount,
            effective_amount: effective,
            damage_type: request.damage_type,
            modifier,
            severity,
            hp_marked: 0,
            armor_consumed: false,
            defeated: target.defeated,
            newly_defeated: false,
            narrative_only: true,
        });
    }

    if wants_armor {
        ledger.mark_armor_slot(&request.target)?;
        severity = severity.downgrade();
    }

    let (hp_marked, defeated, newly_defeated) = if severity.hp_marks() > 0 {
        let mark = ledger.mark_hp(&request.target, severity.hp_marks() as i32)?;
        (mark.marked, mark.defeated, mark.newly_defeated)
    } else {
        (0, false, false)
    };

    debug!(
        "Damage: '{}' took {} {} ({} -> {}), {} HP",
        request.target, effective, request.damage_type, request.amount, severity, hp_marked
    );

    Ok(DamageOutcome {
        target: request.target.clone(),
        raw_amount: request.amount,
        effective_amount: effective,
        damage_type: request.damage_type,
        modifier,
        severity,
        hp_marked,
        armor_consumed: wants_armor,
        defeated,
        newly_defeated,
        narrative_only: false,
    })
}
