//! Dropped item stacks
//!
//! Falls under gravity and expires after its lifetime. Any peer may own a
//! drop; whoever picks it up sends it a `take` message.

use std::any::Any;

use serde_json::json;
use star_core::Json;
use star_math::{PolyF, RectF, Vec2F};
use star_net::{NetCompatibilityRules, NetElementBool, NetElementData, NetElementString, NetElementTop, NetResult};
use star_physics::{MovementController, MovementParameters};

use crate::entity::{ClientEntityMode, ConnectionId, Entity, EntityHandle, EntityId, EntityMode, EntityType};
use crate::error::{Result, WorldError};
use crate::world::World;

/// Seconds before an untouched drop disappears
pub const DEFAULT_ITEM_DROP_LIFETIME: f32 = 600.0;

struct ItemDropNetState {
    movement: MovementController,
    item: NetElementString,
    count: NetElementData<u64>,
    taken: NetElementBool,
}
star_net::net_element_group!(ItemDropNetState {
    movement,
    item,
    count,
    taken
});

pub struct ItemDrop {
    handle: EntityHandle,
    parameters: Json,
    net: NetElementTop<ItemDropNetState>,
    age: f32,
    lifetime: f32,
}

impl ItemDrop {
    pub fn new(item: &str, count: u64, position: Vec2F, parameters: Json) -> Result<Self> {
        if item.is_empty() || count == 0 {
            return Err(WorldError::InvalidSpawn(format!("empty item drop '{}' x{}", item, count)));
        }
        let lifetime = parameters
            .get("lifetime")
            .and_then(Json::as_f64)
            .map_or(DEFAULT_ITEM_DROP_LIFETIME, |l| l as f32);
        let mut movement = MovementController::new(MovementParameters {
            collision_poly: Some(PolyF::from_rect(&RectF::from_coords(-0.5, -0.5, 0.5, 0.5))),
            ground_friction: Some(20.0),
            ..Default::default()
        });
        movement.set_position(position);
        Ok(Self {
            handle: EntityHandle::default(),
            parameters,
            net: NetElementTop::new(ItemDropNetState {
                movement,
                item: NetElementString::new(item.to_string()),
                count: NetElementData::new(count),
                taken: NetElementBool::new(false),
            }),
            age: 0.0,
            lifetime,
        })
    }

    pub fn item(&self) -> &str {
        self.net.item.get()
    }

    pub fn count(&self) -> u64 {
        *self.net.count.get()
    }

    pub fn is_taken(&self) -> bool {
        *self.net.taken.get()
    }

    /// Claim the stack; `None` once someone else has
    pub fn take(&mut self) -> Option<(String, u64)> {
        if self.is_taken() {
            return None;
        }
        self.net.taken.set(true);
        Some((self.item().to_string(), self.count()))
    }
}

impl Entity for ItemDrop {
    fn entity_type(&self) -> EntityType {
        EntityType::ItemDrop
    }

    fn client_entity_mode(&self) -> ClientEntityMode {
        ClientEntityMode::ClientMasterAllowed
    }

    fn init(&mut self, _world: &mut World, id: EntityId, mode: EntityMode) -> Result<()> {
        self.handle.bind(id, mode);
        Ok(())
    }

    fn uninit(&mut self, _world: &mut World) {
        self.handle.unbind();
    }

    fn entity_id(&self) -> EntityId {
        self.handle.id
    }

    fn entity_mode(&self) -> Option<EntityMode> {
        self.handle.mode
    }

    fn position(&self) -> Vec2F {
        self.net.movement.position()
    }

    fn meta_bound_box(&self) -> RectF {
        self.net.movement.collision_poly().bound_box()
    }

    fn persistent(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        self.item().to_string()
    }

    fn update(&mut self, world: &mut World, dt: f32, _step: u64) {
        if !self.handle.is_master() {
            self.net.tick_net_interpolation(dt);
            self.net.movement.tick_slave(dt);
            return;
        }
        self.age += dt;
        self.net.movement.tick_master(dt, world);
    }

    fn should_destroy(&self) -> bool {
        self.is_taken() || self.age >= self.lifetime
    }

    fn write_net_state(&mut self, from_version: u64, rules: NetCompatibilityRules) -> (Vec<u8>, u64) {
        self.net.write_net_state(from_version, rules)
    }

    fn read_net_state(&mut self, data: &[u8], interpolation_time: f32, rules: NetCompatibilityRules) -> NetResult<()> {
        self.net.read_net_state(data, interpolation_time, rules)
    }

    fn enable_interpolation(&mut self, extrapolation_hint: f32) {
        self.net.enable_net_interpolation(extrapolation_hint);
    }

    fn disable_interpolation(&mut self) {
        self.net.disable_net_interpolation();
    }

    fn store_spawn(&self) -> Json {
        json!({
            "name": self.item(),
            "count": self.count(),
            "position": self.position().to_array(),
            "parameters": self.parameters,
        })
    }

    fn receive_message(&mut self, _world: &mut World, from: ConnectionId, name: &str, _args: &[Json]) -> Option<Json> {
        match name {
            "take" => {
                let taken = self.take();
                log::debug!("item drop {} take from connection {}: {}", self.handle.id, from, taken.is_some());
                Some(taken.map_or(Json::Null, |(item, count)| json!({"name": item, "count": count})))
            }
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_once() {
        let mut drop = ItemDrop::new("copperbar", 3, Vec2F::new(2.0, 2.0), json!({})).unwrap();
        assert_eq!(drop.take(), Some(("copperbar".to_string(), 3)));
        assert_eq!(drop.take(), None);
        assert!(drop.should_destroy());
    }

    #[test]
    fn test_empty_drop_rejected() {
        assert!(matches!(ItemDrop::new("dirt", 0, Vec2F::ZERO, Json::Null), Err(WorldError::InvalidSpawn(_))));
        assert!(ItemDrop::new("", 1, Vec2F::ZERO, Json::Null).is_err());
    }

    #[test]
    fn test_lifetime_parameter() {
        let drop = ItemDrop::new("dirt", 1, Vec2F::ZERO, json!({"lifetime": 2.0})).unwrap();
        assert_eq!(drop.lifetime, 2.0);
        assert_eq!(drop.store_spawn()["count"], json!(1));
        assert_eq!(drop.client_entity_mode(), ClientEntityMode::ClientMasterAllowed);
    }
}
