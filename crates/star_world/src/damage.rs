//! Teams, damage sources and hit resolution
//!
//! Every tick the world pairs damage sources with damage targets whose
//! hit polys they touch. Team rules decide who can hurt whom, and a repeat
//! timeout keeps one source from hitting the same target every tick.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use star_math::{PolyF, Vec2F};
use star_net::net_enum;

use crate::entity::EntityId;

/// How long a source waits before hitting the same target again
pub const DEFAULT_DAMAGE_REPEAT_TIMEOUT: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamType {
    #[default]
    Null,
    /// Players and their allies
    Friendly,
    /// Hostile monsters and NPCs
    Enemy,
    Pvp,
    /// Critters, never deal damage
    Passive,
    /// Cannot damage or be damaged
    Ghostly,
    /// Hazards such as lava or falling blocks
    Environment,
    /// Hurts everything, itself included
    Indiscriminate,
    /// Allies of players that fight on their side
    Assistant,
}
net_enum!(TeamType {
    Null,
    Friendly,
    Enemy,
    Pvp,
    Passive,
    Ghostly,
    Environment,
    Indiscriminate,
    Assistant,
});

impl TeamType {
    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_lowercase())).ok()
    }
}

/// Team kind plus a team number; numbers split PVP players and rival
/// enemy factions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EntityDamageTeam {
    #[serde(rename = "type")]
    pub kind: TeamType,
    #[serde(default)]
    pub team: u16,
}

impl EntityDamageTeam {
    pub const fn new(kind: TeamType, team: u16) -> Self {
        Self { kind, team }
    }

    pub fn can_damage(&self, victim: EntityDamageTeam, victim_is_self: bool) -> bool {
        use TeamType::*;
        if victim_is_self {
            return self.kind == Indiscriminate;
        }
        match self.kind {
            Friendly | Assistant => matches!(victim.kind, Enemy | Passive | Environment | Indiscriminate),
            Enemy => {
                matches!(victim.kind, Friendly | Pvp | Indiscriminate)
                    || (victim.kind == Enemy && self.team != victim.team)
            }
            Pvp => {
                matches!(victim.kind, Enemy | Passive | Environment | Indiscriminate)
                    || (victim.kind == Pvp && (self.team == 0 || self.team != victim.team))
            }
            Environment => matches!(victim.kind, Friendly | Pvp | Indiscriminate),
            Indiscriminate => victim.kind != Ghostly,
            Null | Passive | Ghostly => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DamageType {
    NoDamage,
    #[default]
    Damage,
    /// Skips protection
    IgnoresDef,
    /// Knockback only
    Knockback,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HitType {
    Hit,
    StrongHit,
    WeakHit,
    ShieldHit,
    Kill,
}

/// A damaging area exported by an entity for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct DamageSource {
    pub damage_type: DamageType,
    pub damage: f32,
    /// World-space area
    pub poly: PolyF,
    pub source_entity_id: EntityId,
    pub team: EntityDamageTeam,
    /// Sources sharing a group share repeat timeouts
    pub repeat_group: Option<String>,
    pub repeat_timeout: Option<f32>,
    pub damage_source_kind: String,
    pub status_effects: Vec<String>,
    pub knockback: f32,
}

impl DamageSource {
    pub fn repeat_key(&self) -> String {
        self.repeat_group
            .clone()
            .unwrap_or_else(|| format!("entity:{}", self.source_entity_id))
    }

    pub fn request_for(&self, hit_type: HitType, target_center: Vec2F) -> DamageRequest {
        let away = target_center - self.poly.center();
        let knockback_momentum = if away.length() > 0.0 && self.knockback != 0.0 {
            away.normalize() * self.knockback
        } else {
            Vec2F::ZERO
        };
        DamageRequest {
            hit_type,
            damage_type: self.damage_type,
            damage: self.damage,
            knockback_momentum,
            source_entity_id: self.source_entity_id,
            damage_source_kind: self.damage_source_kind.clone(),
            status_effects: self.status_effects.clone(),
        }
    }
}

/// Damage an entity's own config declares, such as monster touch damage.
/// The poly is relative to the entity position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DamageSourceConfig {
    pub poly: PolyF,
    pub damage: f32,
    pub damage_type: DamageType,
    pub knockback: f32,
    pub damage_source_kind: String,
    pub damage_repeat_timeout: Option<f32>,
    pub status_effects: Vec<String>,
}

impl Default for DamageSourceConfig {
    fn default() -> Self {
        Self {
            poly: PolyF::from_rect(&star_math::RectF::from_coords(-0.5, -0.5, 0.5, 0.5)),
            damage: 0.0,
            damage_type: DamageType::Damage,
            knockback: 0.0,
            damage_source_kind: String::new(),
            damage_repeat_timeout: None,
            status_effects: Vec::new(),
        }
    }
}

impl DamageSourceConfig {
    pub fn at(&self, position: Vec2F, source_entity_id: EntityId, team: EntityDamageTeam) -> DamageSource {
        DamageSource {
            damage_type: self.damage_type,
            damage: self.damage,
            poly: self.poly.translated(position),
            source_entity_id,
            team,
            repeat_group: None,
            repeat_timeout: self.damage_repeat_timeout,
            damage_source_kind: self.damage_source_kind.clone(),
            status_effects: self.status_effects.clone(),
            knockback: self.knockback,
        }
    }
}

/// What a target is asked to apply
#[derive(Debug, Clone, PartialEq)]
pub struct DamageRequest {
    pub hit_type: HitType,
    pub damage_type: DamageType,
    pub damage: f32,
    pub knockback_momentum: Vec2F,
    pub source_entity_id: EntityId,
    pub damage_source_kind: String,
    pub status_effects: Vec<String>,
}

/// What a target reports back after applying damage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageNotification {
    pub source_entity_id: EntityId,
    pub target_entity_id: EntityId,
    pub position: Vec2F,
    pub damage_dealt: f32,
    pub health_lost: f32,
    pub hit_type: HitType,
    pub damage_source_kind: String,
}

/// Repeat timeouts per (source group, target)
#[derive(Debug, Clone, Default)]
pub struct RecentHits {
    timers: HashMap<(String, EntityId), f32>,
}

impl RecentHits {
    pub fn can_hit(&self, group: &str, target: EntityId) -> bool {
        !self.timers.contains_key(&(group.to_string(), target))
    }

    pub fn record(&mut self, group: String, target: EntityId, timeout: f32) {
        self.timers.insert((group, target), timeout);
    }

    pub fn tick(&mut self, dt: f32) {
        self.timers.retain(|_, remaining| {
            *remaining -= dt;
            *remaining > 0.0
        });
    }

    /// Forget every timer involving `entity` as target
    pub fn forget_target(&mut self, entity: EntityId) {
        self.timers.retain(|(_, target), _| *target != entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TeamType::*;

    fn team(kind: TeamType, team: u16) -> EntityDamageTeam {
        EntityDamageTeam::new(kind, team)
    }

    #[test]
    fn test_team_rules() {
        assert!(team(Friendly, 0).can_damage(team(Enemy, 0), false));
        assert!(!team(Friendly, 0).can_damage(team(Friendly, 0), false));
        assert!(team(Enemy, 1).can_damage(team(Enemy, 2), false));
        assert!(!team(Enemy, 1).can_damage(team(Enemy, 1), false));
        assert!(team(Pvp, 0).can_damage(team(Pvp, 0), false));
        assert!(!team(Pvp, 3).can_damage(team(Pvp, 3), false));
        assert!(!team(Passive, 0).can_damage(team(Enemy, 0), false));
        assert!(team(Indiscriminate, 0).can_damage(team(Friendly, 0), false));
        assert!(!team(Indiscriminate, 0).can_damage(team(Ghostly, 0), false));
        assert!(team(Environment, 0).can_damage(team(Friendly, 0), false));
        assert!(!team(Environment, 0).can_damage(team(Enemy, 0), false));
    }

    #[test]
    fn test_self_damage_only_indiscriminate() {
        assert!(!team(Enemy, 0).can_damage(team(Enemy, 0), true));
        assert!(!team(Friendly, 0).can_damage(team(Enemy, 0), true));
        assert!(team(Indiscriminate, 0).can_damage(team(Indiscriminate, 0), true));
    }

    #[test]
    fn test_recent_hits_expire() {
        let mut hits = RecentHits::default();
        hits.record("entity:1".into(), 2, 0.5);
        assert!(!hits.can_hit("entity:1", 2));
        assert!(hits.can_hit("entity:1", 3));
        hits.tick(0.3);
        assert!(!hits.can_hit("entity:1", 2));
        hits.tick(0.3);
        assert!(hits.can_hit("entity:1", 2));
    }

    #[test]
    fn test_knockback_points_away() {
        let source = DamageSourceConfig {
            damage: 5.0,
            knockback: 10.0,
            ..Default::default()
        }
        .at(Vec2F::ZERO, 1, team(Enemy, 0));
        let request = source.request_for(HitType::Hit, Vec2F::new(3.0, 0.0));
        assert_eq!(request.knockback_momentum, Vec2F::new(10.0, 0.0));
        assert_eq!(request.damage, 5.0);
    }

    #[test]
    fn test_team_from_name() {
        assert_eq!(TeamType::from_name("PVP"), Some(Pvp));
        assert_eq!(TeamType::from_name("enemy"), Some(Enemy));
        assert_eq!(TeamType::from_name("bogus"), None);
    }
}
