//! Dice resolution
//!
//! Classifies duality rolls (Hope die vs Fear die) and single-die adversary
//! attacks, and parses damage notation like "2d8+3". The resolver never
//! generates randomness itself: values come from the caller or from an
//! injected [`Entropy`] source.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Classification of a duality roll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollClass {
    SuccessWithHope,
    SuccessWithFear,
    FailureWithHope,
    FailureWithFear,
    CriticalSuccess,
}

impl RollClass {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RollClass::SuccessWithHope | RollClass::SuccessWithFear | RollClass::CriticalSuccess
        )
    }

    /// Rolled with Fear (GM gains a Fear token)
    pub fn with_fear(&self) -> bool {
        matches!(self, RollClass::SuccessWithFear | RollClass::FailureWithFear)
    }

    /// Rolled with Hope, criticals included
    pub fn with_hope(&self) -> bool {
        !self.with_fear()
    }
}

impl fmt::Display for RollClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RollClass::SuccessWithHope => "success with Hope",
            RollClass::SuccessWithFear => "success with Fear",
            RollClass::FailureWithHope => "failure with Hope",
            RollClass::FailureWithFear => "failure with Fear",
            RollClass::CriticalSuccess => "critical success",
        };
        write!(f, "{}", s)
    }
}

/// A resolved duality roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollOutcome {
    pub hope_die: u32,
    pub fear_die: u32,
    pub modifier: i32,
    pub total: i32,
    pub difficulty: i32,
    pub success: bool,
    pub class: RollClass,
}

/// Classify a duality roll.
///
/// Matching dice are a critical success whatever the total; otherwise the
/// roll succeeds when `total >= difficulty` and takes the color of the
/// higher die.
pub fn resolve(
    hope_die: u32,
    fear_die: u32,
    modifier: i32,
    difficulty: i32,
    sides: u32,
) -> EngineResult<RollOutcome> {
    check_die("hope die", hope_die, sides)?;
    check_die("fear die", fear_die, sides)?;
    if difficulty < 0 {
        return Err(EngineError::invalid(format!(
            "difficulty must be non-negative, got {}",
            difficulty
        )));
    }

    let total = add_modifier(hope_die.saturating_add(fear_die), modifier)?;
    let class = if hope_die == fear_die {
        RollClass::CriticalSuccess
    } else {
        match (total >= difficulty, hope_die > fear_die) {
            (true, true) => RollClass::SuccessWithHope,
            (true, false) => RollClass::SuccessWithFear,
            (false, true) => RollClass::FailureWithHope,
            (false, false) => RollClass::FailureWithFear,
        }
    };

    Ok(RollOutcome {
        hope_die,
        fear_die,
        modifier,
        total,
        difficulty,
        success: class.is_success(),
        class,
    })
}

/// Result of an adversary attack roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub die: u32,
    pub modifier: i32,
    pub total: i32,
    pub evasion: i32,
    pub hit: bool,
    pub critical: bool,
}

/// Resolve a single-die adversary attack against a target's Evasion.
/// A natural maximum always hits and is critical.
pub fn resolve_attack(die: u32, modifier: i32, evasion: i32, sides: u32) -> EngineResult<AttackOutcome> {
    check_die("attack die", die, sides)?;
    if evasion < 0 {
        return Err(EngineError::invalid("evasion must be non-negative"));
    }
    let critical = die == sides;
    let total = add_modifier(die, modifier)?;
    Ok(AttackOutcome {
        die,
        modifier,
        total,
        evasion,
        hit: critical || total >= evasion,
        critical,
    })
}

/// Dice sum plus modifier, refusing totals that leave the i32 range
pub(crate) fn add_modifier(dice: u32, modifier: i32) -> EngineResult<i32> {
    i32::try_from(dice)
        .ok()
        .and_then(|sum| sum.checked_add(modifier))
        .ok_or_else(|| EngineError::invalid(format!("modifier {} puts the total out of range", modifier)))
}

fn check_die(label: &str, value: u32, sides: u32) -> EngineResult<()> {
    if value == 0 || value > sides {
        return Err(EngineError::invalid(format!(
            "{} must be in 1..={}, got {}",
            label, sides, value
        )));
    }
    Ok(())
}

/// Net effect of advantage and disadvantage after pairwise cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetAdvantage {
    Advantage,
    Disadvantage,
    Neutral,
}

/// Raw advantage/disadvantage signals from every source touching a roll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollModifiers {
    pub advantage: u32,
    pub disadvantage: u32,
}

impl RollModifiers {
    pub fn advantage() -> Self {
        Self { advantage: 1, disadvantage: 0 }
    }

    pub fn disadvantage() -> Self {
        Self { advantage: 0, disadvantage: 1 }
    }

    pub fn has_advantage(&self) -> bool {
        self.advantage > 0
    }

    pub fn has_disadvantage(&self) -> bool {
        self.disadvantage > 0
    }

    /// Combine signals from another source
    pub fn merge(self, other: RollModifiers) -> Self {
        Self {
            advantage: self.advantage.saturating_add(other.advantage),
            disadvantage: self.disadvantage.saturating_add(other.disadvantage),
        }
    }

    /// Cancel one-for-one and report what remains
    pub fn net(&self) -> NetAdvantage {
        match self.advantage.cmp(&self.disadvantage) {
            std::cmp::Ordering::Greater => NetAdvantage::Advantage,
            std::cmp::Ordering::Less => NetAdvantage::Disadvantage,
            std::cmp::Ordering::Equal => NetAdvantage::Neutral,
        }
    }
}

/// Source of die faces
pub trait Entropy: Send {
    /// Roll one die with the given number of sides, in `1..=sides`
    fn roll(&mut self, sides: u32) -> u32;
}

/// Pseudo-random dice backed by `StdRng`
#[derive(Debug)]
pub struct SeededDice {
    rng: StdRng,
}

impl SeededDice {
    /// Seeded from the OS, or from `seed` for reproducible sessions
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng }
    }
}

impl Entropy for SeededDice {
    fn roll(&mut self, sides: u32) -> u32 {
        self.rng.random_range(1..=sides.max(1))
    }
}

/// Replays a fixed list of faces; falls back to 1 when exhausted
#[derive(Debug, Default, Clone)]
pub struct ScriptedDice {
    faces: VecDeque<u32>,
}

impl ScriptedDice {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
        }
    }
}

impl Entropy for ScriptedDice {
    fn roll(&mut self, sides: u32) -> u32 {
        self.faces.pop_front().unwrap_or(1).clamp(1, sides.max(1))
    }
}

/// A parsed dice roll specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Flat modifier
    pub modifier: i32,
}

/// Individual faces and total of a rolled [`DiceRoll`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceResult {
    pub notation: String,
    pub dice: Vec<u32>,
    pub total: i32,
    /// Highest possible sum of the dice alone (the critical damage bonus)
    pub max_dice: i32,
}

impl DiceRoll {
    pub fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self { count, sides, modifier }
    }

    /// Roll using the given entropy source
    pub fn roll_with(&self, entropy: &mut dyn Entropy) -> DiceResult {
        let dice: Vec<u32> = (0..self.count).map(|_| entropy.roll(self.sides)).collect();
        self.tally(dice)
    }

    /// Total caller-supplied faces, validating count and range
    pub fn with_faces(&self, faces: Vec<u32>) -> EngineResult<DiceResult> {
        if faces.len() != self.count as usize {
            return Err(EngineError::invalid(format!(
                "{} needs {} dice, got {}",
                self,
                self.count,
                faces.len()
            )));
        }
        for face in &faces {
            check_die("die", *face, self.sides)?;
        }
        Ok(self.tally(faces))
    }

    fn tally(&self, dice: Vec<u32>) -> DiceResult {
        let sum: i64 = dice.iter().map(|&d| i64::from(d)).sum();
        DiceResult {
            notation: self.to_string(),
            total: saturate(sum + i64::from(self.modifier)),
            max_dice: self.max_dice(),
            dice,
        }
    }

    /// Maximum of the dice without the modifier
    pub fn max_dice(&self) -> i32 {
        saturate(i64::from(self.count) * i64::from(self.sides))
    }
}

fn saturate(n: i64) -> i32 {
    n.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl FromStr for DiceRoll {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifier > 0 {
            write!(f, "{}d{}+{}", self.count, self.sides, self.modifier)
        } else if self.modifier < 0 {
            write!(f, "{}d{}{}", self.count, self.sides, self.modifier)
        } else {
            write!(f, "{}d{}", self.count, self.sides)
        }
    }
}

pub const MAX_DICE_COUNT: u32 = 100;
pub const MAX_DIE_SIDES: u32 = 1000;
pub const MAX_DICE_MODIFIER: i32 = 1000;

/// Parse dice notation like "2d8+3", "d20" or "1d4-1"
pub fn parse_dice(notation: &str) -> EngineResult<DiceRoll> {
    let notation = notation.trim().to_lowercase();
    let bad = |what: &str| EngineError::invalid(format!("{} in dice notation '{}'", what, notation));

    let d_pos = notation.find('d').ok_or_else(|| bad("missing 'd'"))?;

    let count_str = &notation[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1
    } else {
        count_str.parse().map_err(|_| bad("invalid dice count"))?
    };
    if count == 0 || count > MAX_DICE_COUNT {
        return Err(bad("dice count must be 1-100"));
    }

    let rest = &notation[d_pos + 1..];
    let (sides_str, modifier) = match rest.find(['+', '-']) {
        Some(pos) => {
            let modifier: i32 = rest[pos..]
                .trim_start_matches('+')
                .parse()
                .map_err(|_| bad("invalid modifier"))?;
            if modifier.abs() > MAX_DICE_MODIFIER {
                return Err(bad("modifier must be within +/-1000"));
            }
            (&rest[..pos], modifier)
        }
        None => (rest, 0),
    };

    let sides: u32 = sides_str.parse().map_err(|_| bad("invalid die sides"))?;
    if !(2..=MAX_DIE_SIDES).contains(&sides) {
        return Err(bad("die sides must be 2-1000"));
    }

    Ok(DiceRoll { count, sides, modifier })
}
