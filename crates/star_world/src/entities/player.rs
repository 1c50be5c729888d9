//! Players
//!
//! A player is mastered by the client that owns it and relayed by the
//! server. It has no world scripts; the owning client drives its body
//! directly and may seat it in a vehicle, whose controls it then forwards.

use std::any::Any;

use serde_json::json;
use star_core::Json;
use star_math::{PolyF, RectF, Vec2F};
use star_net::{NetCompatibilityRules, NetElementData, NetElementString, NetElementTop, NetResult};

use super::actor::ActorBody;
use super::EntityConfig;
use crate::damage::{DamageNotification, DamageRequest, DamageSource, EntityDamageTeam, HitType, TeamType};
use crate::entity::{
    ClientEntityMode, ConnectionId, DamageTarget, Entity, EntityHandle, EntityId, EntityMode, EntityType,
    LoungeControl,
};
use crate::error::Result;
use crate::world::World;

struct PlayerNetState {
    body: ActorBody,
    name: NetElementString,
    /// Vehicle id and seat, replicated so peers can draw the rider seated
    lounging: NetElementData<Option<(i32, u32)>>,
}
star_net::net_element_group!(PlayerNetState { body, name, lounging });

pub struct Player {
    handle: EntityHandle,
    config: EntityConfig,
    net: NetElementTop<PlayerNetState>,
    controls: Vec<LoungeControl>,
    aim: Vec2F,
}

impl Player {
    pub fn new(config: EntityConfig, name: impl Into<String>, position: Vec2F) -> Result<Self> {
        let mut body = ActorBody::from_config(&config, position)?;
        if config.get("damageTeam").is_none() {
            body.set_team(EntityDamageTeam::new(TeamType::Friendly, 0));
        }
        Ok(Self {
            handle: EntityHandle::default(),
            config,
            net: NetElementTop::new(PlayerNetState {
                body,
                name: NetElementString::new(name.into()),
                lounging: NetElementData::new(None),
            }),
            controls: Vec::new(),
            aim: Vec2F::ZERO,
        })
    }

    pub fn player_name(&self) -> &str {
        self.net.name.get()
    }

    pub fn body(&self) -> &ActorBody {
        &self.net.body
    }

    pub fn body_mut(&mut self) -> &mut ActorBody {
        &mut self.net.body
    }

    /// Vehicle and seat this player occupies
    pub fn lounging(&self) -> Option<(EntityId, usize)> {
        self.net.lounging.get().map(|(id, anchor)| (id, anchor as usize))
    }

    pub fn lounge(&mut self, vehicle: EntityId, anchor: usize) {
        self.net.lounging.set(Some((vehicle, anchor as u32)));
    }

    pub fn stop_lounging(&mut self) {
        self.net.lounging.set(None);
        self.controls.clear();
    }

    /// Held controls and aim, forwarded to the vehicle while seated
    pub fn set_lounge_controls(&mut self, controls: Vec<LoungeControl>, aim: Vec2F) {
        self.controls = controls;
        self.aim = aim;
    }

    /// Restore full health at `position`
    pub fn revive(&mut self, position: Vec2F) {
        let body = &mut self.net.body;
        let max = body.status().max_health();
        body.status_mut().set_health(max);
        body.movement_mut().set_position(position);
        body.movement_mut().set_velocity(Vec2F::ZERO);
    }

    /// Move to `position`, leaving any seat
    pub fn warp(&mut self, position: Vec2F) {
        self.stop_lounging();
        let movement = self.net.body.movement_mut();
        movement.set_position(position);
        movement.set_velocity(Vec2F::ZERO);
    }

    /// Follow the seat and hand controls to the vehicle. A vehicle simulated
    /// elsewhere forwards them to its master itself.
    fn update_lounging(&mut self, world: &mut World, vehicle: EntityId, anchor: usize) {
        let seat = world
            .entity(vehicle)
            .and_then(|e| e.as_loungeable())
            .and_then(|l| l.lounge_anchor(anchor));
        let Some(seat) = seat else {
            log::debug!("player {} left vehicle {}", self.handle.id, vehicle);
            self.stop_lounging();
            return;
        };
        let movement = self.net.body.movement_mut();
        movement.set_position(seat);
        movement.set_velocity(Vec2F::ZERO);

        if let Some(loungeable) = world.entity_mut(vehicle).and_then(|e| e.as_loungeable_mut()) {
            loungeable.set_lounge_controls(anchor, &self.controls, self.aim, false);
        }
    }
}

impl Entity for Player {
    fn entity_type(&self) -> EntityType {
        EntityType::Player
    }

    fn client_entity_mode(&self) -> ClientEntityMode {
        ClientEntityMode::ClientPresenceMaster
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
        self.net.body.position()
    }

    fn meta_bound_box(&self) -> RectF {
        self.net.body.meta_bound_box()
    }

    fn team(&self) -> EntityDamageTeam {
        self.net.body.team()
    }

    fn keep_alive(&self) -> bool {
        true
    }

    fn unique_id(&self) -> Option<String> {
        self.config.unique_id()
    }

    fn name(&self) -> String {
        self.player_name().to_string()
    }

    fn update(&mut self, world: &mut World, dt: f32, _step: u64) {
        if !self.handle.is_master() {
            self.net.tick_net_interpolation(dt);
            self.net.body.tick_slave(dt);
            return;
        }
        match self.lounging() {
            Some((vehicle, anchor)) => {
                self.update_lounging(world, vehicle, anchor);
                self.net.body.movement_mut().clear_controls();
            }
            None => self.net.body.tick_master(world, dt),
        }
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
            "name": self.player_name(),
            "position": self.position().to_array(),
            "parameters": self.config.parameters(),
        })
    }

    fn receive_message(&mut self, _world: &mut World, from: ConnectionId, name: &str, args: &[Json]) -> Option<Json> {
        match name {
            "warp" => {
                let position = args.first().and_then(|p| serde_json::from_value::<[f32; 2]>(p.clone()).ok())?;
                log::info!("player {} warped to {:?} by connection {}", self.handle.id, position, from);
                self.warp(Vec2F::from(position));
                Some(Json::Bool(true))
            }
            _ => None,
        }
    }

    fn as_damage_target(&self) -> Option<&dyn DamageTarget> {
        Some(self)
    }

    fn as_damage_target_mut(&mut self) -> Option<&mut dyn DamageTarget> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl DamageTarget for Player {
    fn hit_poly(&self) -> Option<PolyF> {
        self.net.body.hit_poly()
    }

    fn query_hit(&self, source: &DamageSource) -> Option<HitType> {
        self.net.body.query_hit(source)
    }

    fn apply_damage(&mut self, _world: &mut World, request: &DamageRequest) -> Vec<DamageNotification> {
        self.net.body.apply_damage(self.handle.id, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn player() -> Player {
        let config = EntityConfig::new("player", "/player.config", Arc::new(json!({})), json!({"uniqueId": "abc123"}));
        Player::new(config, "Nova", Vec2F::new(1.0, 2.0)).unwrap()
    }

    #[test]
    fn test_players_default_to_friendly() {
        let p = player();
        assert_eq!(p.team(), EntityDamageTeam::new(TeamType::Friendly, 0));
        assert_eq!(p.client_entity_mode(), ClientEntityMode::ClientPresenceMaster);
        assert_eq!(p.unique_id().as_deref(), Some("abc123"));
        assert_eq!(p.store_spawn()["name"], json!("Nova"));
    }

    #[test]
    fn test_lounge_state() {
        let mut p = player();
        p.lounge(12, 1);
        p.set_lounge_controls(vec![LoungeControl::Jump], Vec2F::new(4.0, 0.0));
        assert_eq!(p.lounging(), Some((12, 1)));
        p.stop_lounging();
        assert_eq!(p.lounging(), None);
        assert!(p.controls.is_empty());
    }

    #[test]
    fn test_revive_restores_health() {
        let mut p = player();
        p.body_mut().status_mut().set_health(0.0);
        assert!(p.body().hit_poly().is_none());
        p.revive(Vec2F::new(50.0, 60.0));
        assert_eq!(p.body().status().health(), p.body().status().max_health());
        assert_eq!(p.position(), Vec2F::new(50.0, 60.0));
    }

    #[test]
    fn test_warp_leaves_seat() {
        let mut p = player();
        p.lounge(3, 0);
        p.warp(Vec2F::new(7.0, 8.0));
        assert_eq!(p.lounging(), None);
        assert_eq!(p.position(), Vec2F::new(7.0, 8.0));
    }
}
