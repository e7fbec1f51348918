//! Daemon and ruleset configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file,
//! then `GMD_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `GMD_RULES__FEAR_MAX=10`).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::rules::death::RiskItAllPolicy;
use crate::rules::dice::MAX_DIE_SIDES;
use crate::rules::encounter::SpotlightPolicy;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub rules: RulesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            rules: RulesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment.merge(Env::prefixed("GMD_").split("__")).extract()?;
        config.rules.validate().map_err(figment::Error::from)?;
        Ok(config)
    }
}

/// Tunable numbers of the ruleset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Upper bound of the player's Hope pool
    pub hope_max: u8,
    /// Upper bound of the GM's Fear pool
    pub fear_max: u8,
    /// Faces on each duality die
    pub action_die_sides: u32,
    /// Faces on the adversary attack die
    pub attack_die_sides: u32,
    /// Faces on the advantage/disadvantage die
    pub advantage_die_sides: u32,
    /// Moves every resting entity must choose
    pub moves_per_rest: usize,
    /// Short rests allowed in a row before a long rest is required
    pub max_consecutive_short_rests: u32,
    /// Hope granted by the Prepare rest move
    pub prepare_hope: u8,
    /// Gain Hope/Fear (and clear Stress on a critical) from player duality rolls
    pub duality_resources: bool,
    /// Damage of at least twice the Severe threshold marks 4 HP
    pub massive_damage: bool,
    /// Entries kept in each session's event log
    pub event_log_limit: usize,
    /// Resolved rolls kept per session for action-id replay
    pub roll_history_limit: usize,
    pub spotlight: SpotlightPolicy,
    pub risk_it_all: RiskItAllPolicy,
    /// Fixed seed for server-side dice; random when absent
    pub dice_seed: Option<u64>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            hope_max: 6,
            fear_max: 12,
            action_die_sides: 12,
            attack_die_sides: 20,
            advantage_die_sides: 6,
            moves_per_rest: 2,
            max_consecutive_short_rests: 3,
            prepare_hope: 1,
            duality_resources: true,
            massive_damage: false,
            event_log_limit: 200,
            roll_history_limit: 500,
            spotlight: SpotlightPolicy::default(),
            risk_it_all: RiskItAllPolicy::default(),
            dice_seed: None,
        }
    }
}

impl RulesConfig {
    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> Result<(), String> {
        let sides = [self.action_die_sides, self.attack_die_sides, self.advantage_die_sides];
        if sides.iter().any(|s| !(2..=MAX_DIE_SIDES).contains(s)) {
            return Err(format!("die sides must be 2-{}", MAX_DIE_SIDES));
        }
        if self.roll_history_limit == 0 {
            return Err("roll_history_limit must be at least 1".to_string());
        }
        if self.moves_per_rest == 0 {
            return Err("moves_per_rest must be at least 1".to_string());
        }
        if let SpotlightPolicy::FairRotation { tokens } = self.spotlight {
            if tokens == 0 {
                return Err("fair rotation needs at least one token per entity".to_string());
            }
        }
        Ok(())
    }
}
