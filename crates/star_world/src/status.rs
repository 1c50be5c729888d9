//! Health, stats and timed status effects for actors

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use star_asset::Assets;
use star_core::{DataReader, DataWriter, Json};
use star_net::{
    NetCompatibilityRules, NetElement, NetElementFloat, NetElementHashMap, NetElementVersion, NetResult,
};
use star_physics::ActorMovementModifiers;

use crate::damage::{DamageRequest, DamageType};
use crate::error::{Result, WorldError};

/// A `.statuseffect` definition
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusEffectConfig {
    pub name: String,
    /// Seconds; effects without a duration last until removed
    pub default_duration: Option<f32>,
    pub movement_modifiers: ActorMovementModifiers,
    /// Added to the owner's base stats while active
    pub stats: HashMap<String, f32>,
    /// Health change per second, negative for damage over time
    pub health_per_second: f32,
}

#[derive(Debug, Clone, Default)]
pub struct StatusEffectDatabase {
    effects: HashMap<String, StatusEffectConfig>,
}

impl StatusEffectDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(assets: &Assets) -> Result<Self> {
        let mut db = Self::new();
        for path in assets.scan_extension("statuseffect") {
            let json = assets.json(&path)?;
            let config = StatusEffectConfig::deserialize(&*json).map_err(|e| WorldError::InvalidConfig {
                kind: "status effect",
                name: path.clone(),
                reason: e.to_string(),
            })?;
            if config.name.is_empty() {
                return Err(WorldError::InvalidConfig {
                    kind: "status effect",
                    name: path,
                    reason: "missing name".into(),
                });
            }
            db.insert(config);
        }
        Ok(db)
    }

    pub fn insert(&mut self, config: StatusEffectConfig) {
        self.effects.insert(config.name.clone(), config);
    }

    pub fn get(&self, name: &str) -> Option<&StatusEffectConfig> {
        self.effects.get(name)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// The `statusSettings` block of an actor config
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusSettings {
    pub stats: HashMap<String, f32>,
    /// Starting health as a fraction of max
    pub initial_health: f32,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            stats: HashMap::from([("maxHealth".to_string(), 100.0)]),
            initial_health: 1.0,
        }
    }
}

impl StatusSettings {
    pub fn from_json(json: &Json) -> Result<Self> {
        if json.is_null() {
            return Ok(Self::default());
        }
        let mut settings: Self = serde_json::from_value(json.clone())?;
        settings.stats.entry("maxHealth".to_string()).or_insert(100.0);
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default)]
struct StatusNetState {
    health: NetElementFloat,
    max_health: NetElementFloat,
    /// Effect name to seconds remaining, infinite for unlimited effects
    effects: NetElementHashMap<String, f32>,
}
star_net::net_element_group!(StatusNetState {
    health,
    max_health,
    effects
});

/// What one damage request did
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DamageOutcome {
    pub damage_dealt: f32,
    pub health_lost: f32,
    pub killed: bool,
}

/// Replicates health and active effect names. Stats and effect configs are
/// master-side only.
#[derive(Debug, Clone)]
pub struct StatusController {
    net: StatusNetState,
    base_stats: HashMap<String, f32>,
    effect_configs: BTreeMap<String, StatusEffectConfig>,
}

impl Default for StatusController {
    fn default() -> Self {
        Self::new(&StatusSettings::default())
    }
}

impl StatusController {
    pub fn new(settings: &StatusSettings) -> Self {
        let max_health = settings.stats.get("maxHealth").copied().unwrap_or(100.0).max(0.0);
        let net = StatusNetState {
            health: NetElementFloat::new(max_health * settings.initial_health.clamp(0.0, 1.0)),
            max_health: NetElementFloat::new(max_health),
            effects: NetElementHashMap::new(),
        };
        Self {
            net,
            base_stats: settings.stats.clone(),
            effect_configs: BTreeMap::new(),
        }
    }

    pub fn health(&self) -> f32 {
        self.net.health.get()
    }

    pub fn max_health(&self) -> f32 {
        self.net.max_health.get()
    }

    pub fn health_percentage(&self) -> f32 {
        let max = self.max_health();
        if max > 0.0 {
            self.health() / max
        } else {
            0.0
        }
    }

    pub fn set_health(&mut self, health: f32) {
        let clamped = health.clamp(0.0, self.max_health());
        self.net.health.set(clamped);
    }

    pub fn heal(&mut self, amount: f32) {
        self.set_health(self.health() + amount);
    }

    pub fn dead(&self) -> bool {
        self.health() <= 0.0
    }

    /// Base value plus every active effect's contribution
    pub fn stat(&self, name: &str) -> f32 {
        let base = self.base_stats.get(name).copied().unwrap_or(0.0);
        base + self
            .effect_configs
            .values()
            .filter_map(|c| c.stats.get(name))
            .sum::<f32>()
    }

    pub fn set_base_stat(&mut self, name: &str, value: f32) {
        self.base_stats.insert(name.to_string(), value);
        self.refresh_max_health();
    }

    /// Add or extend an effect; the longer of the old and new remaining
    /// time wins
    pub fn add_effect(&mut self, config: &StatusEffectConfig, duration: Option<f32>) {
        let duration = duration.or(config.default_duration).unwrap_or(f32::INFINITY);
        let remaining = self
            .net
            .effects
            .get(&config.name)
            .copied()
            .map_or(duration, |old| old.max(duration));
        self.net.effects.set(config.name.clone(), remaining);
        self.effect_configs.insert(config.name.clone(), config.clone());
        self.refresh_max_health();
    }

    pub fn remove_effect(&mut self, name: &str) -> bool {
        self.effect_configs.remove(name);
        let removed = self.net.effects.remove(&name.to_string()).is_some();
        self.refresh_max_health();
        removed
    }

    /// Active effects with seconds remaining, sorted by name
    pub fn active_effects(&self) -> Vec<(String, f32)> {
        self.net
            .effects
            .sorted()
            .into_iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn has_effect(&self, name: &str) -> bool {
        self.net.effects.contains_key(&name.to_string())
    }

    pub fn movement_modifiers(&self) -> ActorMovementModifiers {
        self.effect_configs
            .values()
            .fold(ActorMovementModifiers::default(), |acc, c| acc.combine(&c.movement_modifiers))
    }

    fn refresh_max_health(&mut self) {
        let max = self.stat("maxHealth").max(0.0);
        if max != self.max_health() {
            self.net.max_health.set(max);
            if self.health() > max {
                self.net.health.set(max);
            }
        }
    }

    pub fn apply_damage(&mut self, request: &DamageRequest) -> DamageOutcome {
        if self.dead() || self.stat("invulnerable") > 0.0 {
            return DamageOutcome::default();
        }
        let damage_dealt = match request.damage_type {
            DamageType::NoDamage | DamageType::Knockback => 0.0,
            DamageType::IgnoresDef => request.damage,
            DamageType::Damage | DamageType::Environment => {
                let protection = (self.stat("protection") / 100.0).clamp(0.0, 1.0);
                request.damage * (1.0 - protection)
            }
        }
        .max(0.0);
        let health_lost = damage_dealt.min(self.health());
        self.set_health(self.health() - health_lost);
        DamageOutcome {
            damage_dealt,
            health_lost,
            killed: health_lost > 0.0 && self.dead(),
        }
    }

    /// Age effects and apply health over time
    pub fn tick_master(&mut self, dt: f32) {
        let mut expired = Vec::new();
        let mut health_rate = 0.0;
        for (name, remaining) in self.active_effects() {
            if let Some(config) = self.effect_configs.get(&name) {
                health_rate += config.health_per_second;
            }
            if remaining.is_finite() {
                let left = remaining - dt;
                if left <= 0.0 {
                    expired.push(name);
                } else {
                    self.net.effects.set(name, left);
                }
            }
        }
        for name in expired {
            self.remove_effect(&name);
        }
        if health_rate != 0.0 && !self.dead() {
            self.heal(health_rate * dt);
        }
    }

    /// Drop master-side effect configs for names no longer replicated
    pub fn tick_slave(&mut self, _dt: f32) {
        let live: Vec<String> = self.net.effects.iter().map(|(k, _)| k.clone()).collect();
        self.effect_configs.retain(|name, _| live.contains(name));
    }
}

impl NetElement for StatusController {
    fn init_net_version(&mut self, version: Option<NetElementVersion>) {
        self.net.init_net_version(version);
    }

    fn net_store(&self, out: &mut DataWriter, rules: NetCompatibilityRules) {
        self.net.net_store(out, rules);
    }

    fn net_load(&mut self, input: &mut DataReader<'_>, rules: NetCompatibilityRules) -> NetResult<()> {
        self.net.net_load(input, rules)
    }

    fn write_net_delta(&self, out: &mut DataWriter, from_version: u64, rules: NetCompatibilityRules) -> bool {
        self.net.write_net_delta(out, from_version, rules)
    }

    fn read_net_delta(
        &mut self,
        input: &mut DataReader<'_>,
        interpolation_time: f32,
        rules: NetCompatibilityRules,
    ) -> NetResult<()> {
        self.net.read_net_delta(input, interpolation_time, rules)
    }

    fn blank_net_delta(&mut self, interpolation_time: f32) {
        self.net.blank_net_delta(interpolation_time);
    }

    fn enable_net_interpolation(&mut self, extrapolation_hint: f32) {
        self.net.enable_net_interpolation(extrapolation_hint);
    }

    fn disable_net_interpolation(&mut self) {
        self.net.disable_net_interpolation();
    }

    fn tick_net_interpolation(&mut self, dt: f32) {
        self.net.tick_net_interpolation(dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_math::Vec2F;

    fn request(damage: f32, damage_type: DamageType) -> DamageRequest {
        DamageRequest {
            hit_type: crate::damage::HitType::Hit,
            damage_type,
            damage,
            knockback_momentum: Vec2F::ZERO,
            source_entity_id: 1,
            damage_source_kind: String::new(),
            status_effects: Vec::new(),
        }
    }

    fn settings(max_health: f32, protection: f32) -> StatusSettings {
        StatusSettings {
            stats: HashMap::from([
                ("maxHealth".to_string(), max_health),
                ("protection".to_string(), protection),
            ]),
            initial_health: 1.0,
        }
    }

    #[test]
    fn test_protection_reduces_damage() {
        let mut status = StatusController::new(&settings(100.0, 50.0));
        let outcome = status.apply_damage(&request(40.0, DamageType::Damage));
        assert_eq!(outcome.damage_dealt, 20.0);
        assert_eq!(status.health(), 80.0);

        let outcome = status.apply_damage(&request(40.0, DamageType::IgnoresDef));
        assert_eq!(outcome.damage_dealt, 40.0);
        assert_eq!(status.health(), 40.0);

        let outcome = status.apply_damage(&request(500.0, DamageType::IgnoresDef));
        assert_eq!(outcome.health_lost, 40.0);
        assert!(outcome.killed);
        assert!(status.dead());
    }

    #[test]
    fn test_effects_expire_and_modify_stats() {
        let mut status = StatusController::new(&settings(100.0, 0.0));
        let config = StatusEffectConfig {
            name: "armored".into(),
            default_duration: Some(1.0),
            stats: HashMap::from([("protection".to_string(), 100.0)]),
            movement_modifiers: ActorMovementModifiers {
                speed_modifier: -0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        status.add_effect(&config, None);
        assert_eq!(status.stat("protection"), 100.0);
        assert_eq!(status.movement_modifiers().speed_modifier, -0.5);
        assert_eq!(status.apply_damage(&request(10.0, DamageType::Damage)).damage_dealt, 0.0);

        status.tick_master(0.6);
        assert!(status.has_effect("armored"));
        status.tick_master(0.6);
        assert!(!status.has_effect("armored"));
        assert_eq!(status.stat("protection"), 0.0);
    }

    #[test]
    fn test_damage_over_time() {
        let mut status = StatusController::new(&settings(100.0, 0.0));
        let burning = StatusEffectConfig {
            name: "burning".into(),
            health_per_second: -10.0,
            ..Default::default()
        };
        status.add_effect(&burning, None);
        status.tick_master(0.5);
        assert!((status.health() - 95.0).abs() < 1e-4);
        assert!(status.active_effects()[0].1.is_infinite());
    }

    #[test]
    fn test_max_health_effect_clamps_health() {
        let mut status = StatusController::new(&settings(100.0, 0.0));
        let weakened = StatusEffectConfig {
            name: "weakened".into(),
            stats: HashMap::from([("maxHealth".to_string(), -50.0)]),
            ..Default::default()
        };
        status.add_effect(&weakened, Some(2.0));
        assert_eq!(status.max_health(), 50.0);
        assert_eq!(status.health(), 50.0);
        status.remove_effect("weakened");
        assert_eq!(status.max_health(), 100.0);
        assert_eq!(status.health(), 50.0);
    }
}
