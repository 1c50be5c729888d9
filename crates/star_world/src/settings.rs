//! World configuration and the world clock

use serde::{Deserialize, Serialize};
use star_math::Vec2I;

use crate::entity::EntityType;

/// Static world settings, usually read from the server config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldSettings {
    /// Width and height in tiles. The world does not wrap.
    pub size: Vec2I,
    /// Downward gravity in tiles/s²
    pub gravity: f32,
    /// Seconds per world step before the timescale
    pub timestep: f32,
    /// Entity kinds in update order; kinds left out update last in
    /// declaration order
    pub update_order: Vec<EntityType>,
    /// Steps between liquid simulation passes, 0 disables liquids
    pub liquid_update_delta: u32,
    /// Interpolation window slaves apply to incoming deltas
    pub interpolation_time: f32,
    /// How far past the last delta slaves extrapolate
    pub extrapolation_hint: f32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            size: Vec2I::new(1000, 1000),
            gravity: 80.0,
            timestep: 1.0 / 60.0,
            update_order: EntityType::ALL.to_vec(),
            liquid_update_delta: 2,
            interpolation_time: 0.0,
            extrapolation_hint: 0.0,
        }
    }
}

impl WorldSettings {
    /// Every entity kind once, in update order
    pub fn resolved_update_order(&self) -> Vec<EntityType> {
        let mut order: Vec<EntityType> = Vec::with_capacity(EntityType::ALL.len());
        for kind in self.update_order.iter().chain(EntityType::ALL.iter()) {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }
        order
    }
}

/// Step counter plus the timescale and timestep that admin commands and
/// scripts may change at runtime
#[derive(Debug, Clone, PartialEq)]
pub struct WorldClock {
    timescale: f32,
    timestep: f32,
    step: u64,
    time: f64,
}

impl WorldClock {
    pub fn new(timestep: f32) -> Self {
        Self {
            timescale: 1.0,
            timestep,
            step: 0,
            time: 0.0,
        }
    }

    #[inline]
    pub fn timescale(&self) -> f32 {
        self.timescale
    }

    /// Negative or non-finite values are clamped to 0, which pauses
    /// simulation time while steps keep counting
    pub fn set_timescale(&mut self, timescale: f32) {
        self.timescale = if timescale.is_finite() { timescale.max(0.0) } else { 0.0 };
    }

    #[inline]
    pub fn timestep(&self) -> f32 {
        self.timestep
    }

    pub fn set_timestep(&mut self, timestep: f32) {
        if timestep.is_finite() && timestep > 0.0 {
            self.timestep = timestep;
        }
    }

    #[inline]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Simulation seconds elapsed
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Scaled seconds one step covers
    pub fn dt(&self) -> f32 {
        self.timestep * self.timescale
    }

    /// Advance by one step, returning its dt
    pub fn advance(&mut self) -> f32 {
        let dt = self.dt();
        self.step += 1;
        self.time += dt as f64;
        dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_scaling() {
        let mut clock = WorldClock::new(0.1);
        clock.set_timescale(0.5);
        assert!((clock.advance() - 0.05).abs() < 1e-6);
        assert_eq!(clock.step(), 1);

        clock.set_timescale(-3.0);
        assert_eq!(clock.advance(), 0.0);
        assert_eq!(clock.step(), 2);

        clock.set_timestep(0.0);
        assert_eq!(clock.timestep(), 0.1);
    }

    #[test]
    fn test_settings_from_json() {
        let settings: WorldSettings = serde_json::from_value(serde_json::json!({
            "size": [64, 32],
            "gravity": 10.0,
            "updateOrder": ["monster", "object"]
        }))
        .unwrap();
        assert_eq!(settings.size, Vec2I::new(64, 32));
        let order = settings.resolved_update_order();
        assert_eq!(order[0], EntityType::Monster);
        assert_eq!(order[1], EntityType::Object);
        assert_eq!(order.len(), EntityType::ALL.len());
        assert_eq!(settings.timestep, 1.0 / 60.0);
    }
}
