//! Resource ledger
//!
//! Single owner of every numeric track in a session: HP, Stress and Armor
//! slots per entity, plus the Hope and Fear pools. All mutations clamp and
//! report instead of failing, and the defeated flag moves in the same call
//! that fills or empties the HP track.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::damage::DamageProfile;
use super::features::AdversaryFeature;
use crate::error::{EngineError, EngineResult};

static ENTITY_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _'-]{0,63}$").expect("valid regex"));

/// Reject ids the ledger would never have issued
pub fn validate_entity_id(id: &str) -> EngineResult<()> {
    if ENTITY_ID_REGEX.is_match(id) {
        Ok(())
    } else {
        Err(EngineError::invalid(format!("malformed entity id '{}'", id)))
    }
}

/// Player character or adversary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    PlayerCharacter,
    Adversary,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::PlayerCharacter => write!(f, "player character"),
            EntityKind::Adversary => write!(f, "adversary"),
        }
    }
}

/// A row of slots that can be marked and cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub capacity: u32,
    pub marked: u32,
}

impl Track {
    pub fn new(capacity: u32) -> Self {
        Self { capacity, marked: 0 }
    }

    pub fn free(&self) -> u32 {
        self.capacity.saturating_sub(self.marked)
    }

    pub fn is_full(&self) -> bool {
        self.marked == self.capacity
    }

    /// Mark up to `n` slots, returning how many were actually marked
    fn mark(&mut self, n: u32) -> u32 {
        let applied = n.min(self.free());
        self.marked += applied;
        applied
    }

    /// Clear up to `n` slots, returning how many were actually cleared
    fn clear(&mut self, n: u32) -> u32 {
        let applied = n.min(self.marked);
        self.marked -= applied;
        applied
    }
}

/// Damage breakpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_minor")]
    pub minor: i32,
    pub major: i32,
    pub severe: i32,
}

fn default_minor() -> i32 {
    1
}

impl Thresholds {
    pub fn new(major: i32, severe: i32) -> Self {
        Self { minor: 1, major, severe }
    }

    fn validate(&self) -> EngineResult<()> {
        if self.minor < 1 || self.minor > self.major || self.major > self.severe {
            return Err(EngineError::invalid(format!(
                "thresholds must satisfy 1 <= minor <= major <= severe, got {}/{}/{}",
                self.minor, self.major, self.severe
            )));
        }
        Ok(())
    }
}

/// Everything the narrative layer supplies to create an entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: EntityKind,
    #[serde(default = "default_tier")]
    pub tier: u8,
    pub hp: u32,
    #[serde(default)]
    pub stress: u32,
    pub thresholds: Thresholds,
    /// Number of armor slots
    #[serde(default)]
    pub armor: u32,
    /// Evasion for player characters, Difficulty for adversaries
    #[serde(default = "default_evasion")]
    pub evasion: i32,
    #[serde(default)]
    pub attack_modifier: i32,
    #[serde(default)]
    pub damage_profile: DamageProfile,
    #[serde(default)]
    pub features: Vec<AdversaryFeature>,
    /// HP is tracked narratively; hits advance countdowns instead
    #[serde(default)]
    pub narrative_only: bool,
}

fn default_tier() -> u8 {
    1
}

fn default_evasion() -> i32 {
    10
}

/// A player character or adversary owned by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    pub tier: u8,
    pub hp: Track,
    pub stress: Track,
    pub armor: Track,
    pub thresholds: Thresholds,
    pub evasion: i32,
    pub attack_modifier: i32,
    pub damage_profile: DamageProfile,
    pub features: Vec<AdversaryFeature>,
    pub narrative_only: bool,
    pub defeated: bool,
    /// Set by death moves; a dead entity cannot recover
    pub dead: bool,
    pub unconscious: bool,
}

impl Entity {
    /// Build and validate an entity from its spec
    pub fn from_spec(spec: EntitySpec) -> EngineResult<Self> {
        let entity = Self {
            name: spec.name.unwrap_or_else(|| spec.id.clone()),
            id: spec.id,
            kind: spec.kind,
            tier: spec.tier,
            hp: Track::new(spec.hp),
            stress: Track::new(spec.stress),
            armor: Track::new(spec.armor),
            thresholds: spec.thresholds,
            evasion: spec.evasion,
            attack_modifier: spec.attack_modifier,
            damage_profile: spec.damage_profile,
            features: spec.features,
            narrative_only: spec.narrative_only,
            defeated: false,
            dead: false,
            unconscious: false,
        };
        entity.validate()?;
        Ok(entity)
    }

    /// Structural checks shared by new and restored entities
    pub fn validate(&self) -> EngineResult<()> {
        validate_entity_id(&self.id)?;
        if !(1..=4).contains(&self.tier) {
            return Err(EngineError::invalid(format!("tier must be 1-4, got {}", self.tier)));
        }
        if self.hp.capacity == 0 {
            return Err(EngineError::invalid("HP capacity must be at least 1"));
        }
        if self.evasion < 0 {
            return Err(EngineError::invalid("evasion/difficulty must be non-negative"));
        }
        self.thresholds.validate()?;
        if self.is_player() && !self.features.is_empty() {
            return Err(EngineError::invalid("only adversaries carry features"));
        }
        for (label, track) in [("HP", self.hp), ("Stress", self.stress), ("armor", self.armor)] {
            if track.marked > track.capacity {
                return Err(EngineError::invalid(format!(
                    "'{}' has {} of {} {} marked",
                    self.id, track.marked, track.capacity, label
                )));
            }
        }
        if self.defeated != self.hp.is_full() {
            return Err(EngineError::invalid(format!(
                "'{}' defeated flag disagrees with its HP track",
                self.id
            )));
        }
        if (self.dead || self.unconscious) && !self.defeated {
            return Err(EngineError::invalid(format!(
                "'{}' is dead or unconscious without being defeated",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_adversary(&self) -> bool {
        self.kind == EntityKind::Adversary
    }

    pub fn is_player(&self) -> bool {
        self.kind == EntityKind::PlayerCharacter
    }

    fn sync_defeated(&mut self) -> bool {
        let was = self.defeated;
        self.defeated = self.hp.is_full();
        if !self.defeated {
            self.unconscious = false;
        }
        !was && self.defeated
    }
}

/// Result of marking HP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HpMark {
    pub requested: u32,
    pub marked: u32,
    pub clamped: bool,
    pub defeated: bool,
    /// This call is the one that filled the track
    pub newly_defeated: bool,
}

/// Result of marking Stress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StressMark {
    pub requested: u32,
    pub stress_marked: u32,
    /// Marks that overflowed into HP
    pub hp_marked: u32,
    pub redirected: bool,
    pub clamped: bool,
    pub defeated: bool,
    pub newly_defeated: bool,
}

/// Result of clearing any track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cleared {
    pub requested: u32,
    pub cleared: u32,
    pub remaining_marked: u32,
    pub clamped: bool,
}

/// A bounded counter such as Hope or Fear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub value: u8,
    pub max: u8,
}

/// Result of adjusting a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolChange {
    pub before: u8,
    pub after: u8,
    pub requested: i32,
    pub clamped: bool,
}

impl Pool {
    pub fn new(max: u8) -> Self {
        Self { value: 0, max }
    }

    fn adjust(&mut self, delta: i32) -> PoolChange {
        let before = self.value;
        let target = i32::from(before).saturating_add(delta);
        let after = target.clamp(0, i32::from(self.max));
        self.value = after as u8;
        PoolChange {
            before,
            after: self.value,
            requested: delta,
            clamped: after != target,
        }
    }
}

/// Owner of all entities and pools in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLedger {
    entities: BTreeMap<String, Entity>,
    hope: Pool,
    fear: Pool,
}

fn amount(n: i32, what: &str) -> EngineResult<u32> {
    u32::try_from(n).map_err(|_| EngineError::invalid(format!("{} must be non-negative, got {}", what, n)))
}

impl ResourceLedger {
    pub fn new(hope_max: u8, fear_max: u8) -> Self {
        Self {
            entities: BTreeMap::new(),
            hope: Pool::new(hope_max),
            fear: Pool::new(fear_max),
        }
    }

    /// Add a new entity; ids are unique within the session
    pub fn insert(&mut self, entity: Entity) -> EngineResult<()> {
        if self.entities.contains_key(&entity.id) {
            return Err(EngineError::invalid(format!("entity '{}' already exists", entity.id)));
        }
        info!("Ledger: added {} '{}'", entity.kind, entity.id);
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Retire an entity
    pub fn remove(&mut self, id: &str) -> EngineResult<Entity> {
        validate_entity_id(id)?;
        self.entities
            .remove(id)
            .ok_or_else(|| EngineError::UnknownEntity(id.to_string()))
    }

    pub fn entity(&self, id: &str) -> EngineResult<&Entity> {
        validate_entity_id(id)?;
        self.entities
            .get(id)
            .ok_or_else(|| EngineError::UnknownEntity(id.to_string()))
    }

    pub(crate) fn entity_mut(&mut self, id: &str) -> EngineResult<&mut Entity> {
        validate_entity_id(id)?;
        self.entities
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownEntity(id.to_string()))
    }

    /// All entities in id order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn hope(&self) -> Pool {
        self.hope
    }

    pub fn fear(&self) -> Pool {
        self.fear
    }

    /// Mark HP, clamping at capacity. Defeat is set in the same call.
    pub fn mark_hp(&mut self, id: &str, n: i32) -> EngineResult<HpMark> {
        let requested = amount(n, "HP marks")?;
        let entity = self.entity_mut(id)?;
        if entity.defeated && requested > 0 {
            return Err(EngineError::AlreadyResolved(format!("'{}' is already defeated", id)));
        }

        let marked = entity.hp.mark(requested);
        let newly_defeated = entity.sync_defeated();
        if newly_defeated {
            info!("Ledger: '{}' defeated", id);
        }
        debug!("Ledger: '{}' marked {}/{} HP", id, marked, requested);

        Ok(HpMark {
            requested,
            marked,
            clamped: marked < requested,
            defeated: entity.defeated,
            newly_defeated,
        })
    }

    /// Clear HP, clamping at zero
    pub fn clear_hp(&mut self, id: &str, n: i32) -> EngineResult<Cleared> {
        let requested = amount(n, "HP clears")?;
        let entity = self.entity_mut(id)?;
        if entity.dead {
            return Err(EngineError::AlreadyResolved(format!("'{}' is dead", id)));
        }
        let cleared = entity.hp.clear(requested);
        entity.sync_defeated();
        Ok(Cleared {
            requested,
            cleared,
            remaining_marked: entity.hp.marked,
            clamped: cleared < requested,
        })
    }

    /// Mark Stress; marks with no free slot go to HP one-for-one
    pub fn mark_stress(&mut self, id: &str, n: i32) -> EngineResult<StressMark> {
        let requested = amount(n, "Stress marks")?;
        let entity = self.entity_mut(id)?;

        let stress_marked = entity.stress.mark(requested);
        let overflow = requested - stress_marked;
        if overflow > 0 && entity.defeated && stress_marked == 0 {
            return Err(EngineError::AlreadyResolved(format!("'{}' is already defeated", id)));
        }

        let hp_marked = entity.hp.mark(overflow);
        let newly_defeated = entity.sync_defeated();
        if overflow > 0 {
            debug!("Ledger: '{}' stress overflow, {} marked as HP", id, hp_marked);
        }

        Ok(StressMark {
            requested,
            stress_marked,
            hp_marked,
            redirected: overflow > 0,
            clamped: hp_marked < overflow,
            defeated: entity.defeated,
            newly_defeated,
        })
    }

    /// Clear Stress, clamping at zero
    pub fn clear_stress(&mut self, id: &str, n: i32) -> EngineResult<Cleared> {
        let requested = amount(n, "Stress clears")?;
        let entity = self.entity_mut(id)?;
        let cleared = entity.stress.clear(requested);
        Ok(Cleared {
            requested,
            cleared,
            remaining_marked: entity.stress.marked,
            clamped: cleared < requested,
        })
    }

    /// Mark one armor slot; fails when none is free
    pub fn mark_armor_slot(&mut self, id: &str) -> EngineResult<u32> {
        let entity = self.entity_mut(id)?;
        if entity.armor.free() == 0 {
            return Err(EngineError::invalid(format!("'{}' has no free armor slot", id)));
        }
        entity.armor.mark(1);
        Ok(entity.armor.free())
    }

    /// Repair armor slots, clamping at zero marked
    pub fn clear_armor_slots(&mut self, id: &str, n: i32) -> EngineResult<Cleared> {
        let requested = amount(n, "armor repairs")?;
        let entity = self.entity_mut(id)?;
        let cleared = entity.armor.clear(requested);
        Ok(Cleared {
            requested,
            cleared,
            remaining_marked: entity.armor.marked,
            clamped: cleared < requested,
        })
    }

    pub fn adjust_hope(&mut self, delta: i32) -> PoolChange {
        let change = self.hope.adjust(delta);
        debug!("Ledger: Hope {} -> {}", change.before, change.after);
        change
    }

    pub fn adjust_fear(&mut self, delta: i32) -> PoolChange {
        let change = self.fear.adjust(delta);
        debug!("Ledger: Fear {} -> {}", change.before, change.after);
        change
    }

    /// Spend Fear; unlike `adjust_fear` this refuses to go below zero
    pub fn spend_fear(&mut self, n: u8) -> EngineResult<PoolChange> {
        if self.fear.value < n {
            return Err(EngineError::invalid(format!(
                "not enough Fear: need {}, have {}",
                n, self.fear.value
            )));
        }
        Ok(self.adjust_fear(-i32::from(n)))
    }

    /// Check a ledger that arrived from outside, e.g. a restored snapshot
    pub fn validate(&self, hope_cap: u8, fear_cap: u8) -> EngineResult<()> {
        for (key, entity) in &self.entities {
            if key != &entity.id {
                return Err(EngineError::invalid(format!(
                    "entity stored under '{}' has id '{}'",
                    key, entity.id
                )));
            }
            entity.validate()?;
        }
        for (label, pool, cap) in [("Hope", self.hope, hope_cap), ("Fear", self.fear, fear_cap)] {
            if pool.max > cap || pool.value > pool.max {
                return Err(EngineError::invalid(format!(
                    "{} {}/{} exceeds the limit of {}",
                    label, pool.value, pool.max, cap
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn set_pool_limits(&mut self, hope_max: u8, fear_max: u8) {
        self.hope.max = hope_max;
        self.hope.value = self.hope.value.min(hope_max);
        self.fear.max = fear_max;
        self.fear.value = self.fear.value.min(fear_max);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn adversary(id: &str, hp: u32, major: i32, severe: i32) -> Entity {
        Entity::from_spec(EntitySpec {
            id: id.to_string(),
            name: None,
            kind: EntityKind::Adversary,
            tier: 1,
            hp,
            stress: 2,
            thresholds: Thresholds::new(major, severe),
            armor: 0,
            evasion: 12,
            attack_modifier: 1,
            damage_profile: DamageProfile::default(),
            features: Vec::new(),
            narrative_only: false,
        })
        .unwrap()
    }

    pub(crate) fn player(id: &str) -> Entity {
        Entity::from_spec(EntitySpec {
            id: id.to_string(),
            name: None,
            kind: EntityKind::PlayerCharacter,
            tier: 1,
            hp: 6,
            stress: 6,
            thresholds: Thresholds::new(7, 14),
            armor: 3,
            evasion: 10,
            attack_modifier: 0,
            damage_profile: DamageProfile::default(),
            features: Vec::new(),
            narrative_only: false,
        })
        .unwrap()
    }

    fn ledger_with(entities: Vec<Entity>) -> ResourceLedger {
        let mut ledger = ResourceLedger::new(6, 12);
        for e in entities {
            ledger.insert(e).unwrap();
        }
        ledger
    }

    #[test]
    fn test_mark_hp_clamps_and_defeats() {
        let mut ledger = ledger_with(vec![adversary("Strixwolf", 3, 4, 8)]);

        let first = ledger.mark_hp("Strixwolf", 2).unwrap();
        assert_eq!(first.marked, 2);
        assert!(!first.defeated);

        let second = ledger.mark_hp("Strixwolf", 2).unwrap();
        assert_eq!(second.marked, 1);
        assert!(second.clamped);
        assert!(second.defeated && second.newly_defeated);

        // Further marks never exceed capacity
        assert!(matches!(
            ledger.mark_hp("Strixwolf", 5),
            Err(EngineError::AlreadyResolved(_))
        ));
        let e = ledger.entity("Strixwolf").unwrap();
        assert_eq!(e.hp.marked, 3);
        assert!(e.defeated);
    }

    #[test]
    fn test_defeated_iff_full() {
        let mut ledger = ledger_with(vec![adversary("bandit", 4, 5, 10)]);
        for _ in 0..4 {
            let mark = ledger.mark_hp("bandit", 1).unwrap();
            let e = ledger.entity("bandit").unwrap();
            assert_eq!(mark.defeated, e.hp.marked == e.hp.capacity);
        }
        ledger.clear_hp("bandit", 1).unwrap();
        assert!(!ledger.entity("bandit").unwrap().defeated);
    }

    #[test]
    fn test_clear_clamps_at_zero() {
        let mut ledger = ledger_with(vec![player("marlowe")]);
        ledger.mark_hp("marlowe", 2).unwrap();
        let cleared = ledger.clear_hp("marlowe", 5).unwrap();
        assert_eq!(cleared.cleared, 2);
        assert!(cleared.clamped);
        assert_eq!(cleared.remaining_marked, 0);
    }

    #[test]
    fn test_stress_overflow_redirects_to_hp() {
        let mut ledger = ledger_with(vec![player("marlowe")]);
        ledger.mark_stress("marlowe", 6).unwrap();

        let mark = ledger.mark_stress("marlowe", 1).unwrap();
        assert!(mark.redirected);
        assert_eq!(mark.stress_marked, 0);
        assert_eq!(mark.hp_marked, 1);
        assert_eq!(ledger.entity("marlowe").unwrap().hp.marked, 1);
    }

    #[test]
    fn test_partial_stress_overflow() {
        let mut ledger = ledger_with(vec![player("marlowe")]);
        ledger.mark_stress("marlowe", 5).unwrap();
        let mark = ledger.mark_stress("marlowe", 3).unwrap();
        assert_eq!(mark.stress_marked, 1);
        assert_eq!(mark.hp_marked, 2);
        assert!(mark.redirected);
    }

    #[test]
    fn test_negative_amounts_rejected() {
        let mut ledger = ledger_with(vec![player("marlowe")]);
        assert!(matches!(
            ledger.mark_hp("marlowe", -1),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(ledger.clear_stress("marlowe", -3).is_err());
    }

    #[test]
    fn test_unknown_and_malformed_ids() {
        let mut ledger = ledger_with(vec![]);
        assert!(matches!(
            ledger.mark_hp("ghost", 1),
            Err(EngineError::UnknownEntity(_))
        ));
        assert!(matches!(
            ledger.mark_hp("", 1),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            ledger.mark_hp("<script>", 1),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut ledger = ledger_with(vec![player("marlowe")]);
        assert!(ledger.insert(player("marlowe")).is_err());
    }

    #[test]
    fn test_pools_clamp_and_report() {
        let mut ledger = ledger_with(vec![]);
        let change = ledger.adjust_hope(8);
        assert_eq!(change.after, 6);
        assert!(change.clamped);

        let change = ledger.adjust_fear(-2);
        assert_eq!(change.after, 0);
        assert!(change.clamped);

        let change = ledger.adjust_fear(12);
        assert_eq!(change.after, 12);
        assert!(!change.clamped);
    }

    #[test]
    fn test_spend_fear_requires_balance() {
        let mut ledger = ledger_with(vec![]);
        ledger.adjust_fear(1);
        assert!(ledger.spend_fear(2).is_err());
        assert_eq!(ledger.fear().value, 1);
        assert_eq!(ledger.spend_fear(1).unwrap().after, 0);
    }

    #[test]
    fn test_armor_slots() {
        let mut ledger = ledger_with(vec![player("marlowe")]);
        assert_eq!(ledger.mark_armor_slot("marlowe").unwrap(), 2);
        ledger.mark_armor_slot("marlowe").unwrap();
        ledger.mark_armor_slot("marlowe").unwrap();
        assert!(ledger.mark_armor_slot("marlowe").is_err());
        assert_eq!(ledger.clear_armor_slots("marlowe", 10).unwrap().cleared, 3);
    }

    #[test]
    fn test_invalid_specs() {
        let mut spec = EntitySpec {
            id: "x".into(),
            name: None,
            kind: EntityKind::Adversary,
            tier: 5,
            hp: 3,
            stress: 0,
            thresholds: Thresholds::new(4, 8),
            armor: 0,
            evasion: 10,
            attack_modifier: 0,
            damage_profile: DamageProfile::default(),
            features: Vec::new(),
            narrative_only: false,
        };
        assert!(Entity::from_spec(spec.clone()).is_err());
        spec.tier = 1;
        spec.thresholds = Thresholds::new(9, 8);
        assert!(Entity::from_spec(spec.clone()).is_err());
        spec.thresholds = Thresholds::new(4, 8);
        spec.hp = 0;
        assert!(Entity::from_spec(spec).is_err());
    }

    #[test]
    fn test_extreme_pool_deltas_clamp() {
        let mut ledger = ResourceLedger::new(6, 12);
        ledger.adjust_fear(1);
        let change = ledger.adjust_fear(i32::MAX);
        assert_eq!(change.after, 12);
        assert!(change.clamped);
        let change = ledger.adjust_hope(i32::MIN);
        assert_eq!(change.after, 0);
    }

    #[test]
    fn test_validate_restored_ledger() {
        let mut ledger = ledger_with(vec![adversary("wolf", 4, 5, 9), player("marlowe")]);
        assert!(ledger.validate(6, 12).is_ok());

        let mut tampered = ledger.clone();
        tampered.entities.get_mut("wolf").unwrap().hp.marked = 5;
        assert!(tampered.validate(6, 12).is_err());

        let mut tampered = ledger.clone();
        tampered.entities.get_mut("wolf").unwrap().defeated = true;
        assert!(tampered.validate(6, 12).is_err());

        let mut tampered = ledger.clone();
        let wolf = tampered.entities.remove("wolf").unwrap();
        tampered.entities.insert("fox".into(), wolf);
        assert!(tampered.validate(6, 12).is_err());

        ledger.fear.value = 200;
        assert!(ledger.validate(6, 12).is_err());
        ledger.fear = Pool { value: 3, max: 20 };
        assert!(ledger.validate(6, 12).is_err());
    }
}
