//! Routes decoded client messages to their handlers
//!
//! Every handler checks the sender's [`PlayerState`] first. A message that
//! arrives in the wrong state, or names an actor the client does not own, is
//! logged and ignored; only unframeable streams close the connection.

use crate::connection_table::ClientHandle;
use crate::game::Game;
use crate::player::PlayerState;
use crate::world::ActorUid;
use log::{debug, info, warn};
use shared::protocol::{
    LoadMap, LoadingDone, RttPong, SvHello, SyncActionState, UpdatePosition, UpdateRotation,
};
use shared::{ClientMessage, LocalActorId, Message};

impl Game {
    pub fn handle_message(&mut self, handle: ClientHandle, message: &Message) {
        let decoded = match ClientMessage::decode(message) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                debug!(
                    "Ignoring message type {} from client {}",
                    message.type_id, handle
                );
                return;
            }
            Err(e) => {
                warn!(
                    "Malformed message type {} from client {}: {}",
                    message.type_id, handle, e
                );
                return;
            }
        };
        if self.dev_mode {
            debug!("Client {} -> {:?}", handle, decoded);
        }

        match decoded {
            ClientMessage::Hello(_) => self.on_hello(handle),
            ClientMessage::ReadyToLoad => self.on_ready_to_load(handle),
            ClientMessage::MapIsLoaded => self.on_map_loaded(handle),
            ClientMessage::LoadingComplete => self.on_loading_complete(handle),
            ClientMessage::UpdatePosition(update) => self.on_update_position(handle, update),
            ClientMessage::UpdateRotation(update) => self.on_update_rotation(handle, update),
            ClientMessage::SyncActionState(update) => self.on_action_state(handle, update),
            ClientMessage::RttPing(ping) => {
                let pong = RttPong {
                    client_time: ping.client_time,
                    server_time: self.uptime_ms(),
                };
                self.outbox.push(handle, &pong);
            }
        }
    }

    /// Current state of the sender, warning if it is not `required`
    fn require_state(&self, handle: ClientHandle, required: PlayerState, what: &str) -> bool {
        let Some(session) = self.players.get(handle) else {
            return false;
        };
        if session.state() != required {
            warn!(
                "Client {} sent {} while {:?}, expected {:?}",
                handle,
                what,
                session.state(),
                required
            );
            return false;
        }
        true
    }

    fn on_hello(&mut self, handle: ClientHandle) {
        if !self.require_state(handle, PlayerState::Connected, "Hello") {
            return;
        }
        if let Some(session) = self.players.get_mut(handle) {
            session.greeted = true;
        }
        self.outbox.push(handle, &SvHello::default());
    }

    fn on_ready_to_load(&mut self, handle: ClientHandle) {
        if !self.require_state(handle, PlayerState::Connected, "ReadyToLoad") {
            return;
        }
        let Some(session) = self.players.get_mut(handle) else {
            return;
        };
        if !session.greeted {
            warn!("Client {} is ready to load before saying hello", handle);
            return;
        }
        if let Err(e) = session.transition(PlayerState::InGame) {
            warn!("Client {}: {}", handle, e);
            return;
        }
        let map_id = self.world.map_id();
        self.outbox.push(handle, &LoadMap { map_id });
    }

    fn on_map_loaded(&mut self, handle: ClientHandle) {
        if !self.require_state(handle, PlayerState::InGame, "MapIsLoaded") {
            return;
        }
        let Some(session) = self.players.get(handle) else {
            return;
        };
        if session.master.is_some() {
            warn!("Client {} reported the map loaded twice", handle);
            return;
        }
        let (name, class_type) = (session.name.clone(), session.class_type);

        let spawn = self.world.random_spawn_point(&mut self.rng);
        match self.world.spawn_player_actor(handle, &name, class_type, spawn) {
            Ok(uid) => {
                if let Some(session) = self.players.get_mut(handle) {
                    session.master = Some(uid);
                }
                info!(
                    "Client {} entered map {} as {} at {:?}",
                    handle,
                    self.world.map_id(),
                    uid,
                    spawn.pos
                );
            }
            Err(e) => warn!("Could not spawn a master for client {}: {}", handle, e),
        }
    }

    fn on_loading_complete(&mut self, handle: ClientHandle) {
        if !self.require_state(handle, PlayerState::InGame, "LoadingComplete") {
            return;
        }
        if let Some(session) = self.players.get_mut(handle) {
            if let Err(e) = session.transition(PlayerState::Loaded) {
                warn!("Client {}: {}", handle, e);
                return;
            }
        }
        self.outbox.push(handle, &LoadingDone);
    }

    /// Resolves `local` and checks it names the sender's own master
    fn owned_master(&self, handle: ClientHandle, local: LocalActorId, what: &str) -> Option<ActorUid> {
        if !self.require_state(handle, PlayerState::Loaded, what) {
            return None;
        }
        let uid = self.replication.resolve_local(handle, local)?;
        let master = self.players.get(handle)?.master;
        if master != Some(uid) {
            warn!(
                "Client {} sent {} for {} which it does not control",
                handle, what, local
            );
            return None;
        }
        Some(uid)
    }

    fn on_update_position(&mut self, handle: ClientHandle, update: UpdatePosition) {
        let Some(uid) = self.owned_master(handle, update.local_id, "UpdatePosition") else {
            return;
        };
        if !(update.pos.is_finite() && update.move_dir.is_finite() && update.speed.is_finite()) {
            warn!("Client {} sent a non-finite move for {}", handle, update.local_id);
            return;
        }
        if let Err(e) = self
            .world
            .set_position(uid, update.pos, update.move_dir, update.speed)
        {
            warn!("Client {}: {}", handle, e);
        }
    }

    fn on_update_rotation(&mut self, handle: ClientHandle, update: UpdateRotation) {
        let Some(uid) = self.owned_master(handle, update.local_id, "UpdateRotation") else {
            return;
        };
        if !update.rotation.is_finite() {
            warn!("Client {} sent a non-finite rotation for {}", handle, update.local_id);
            return;
        }
        if let Err(e) = self.world.set_rotation(uid, update.rotation) {
            warn!("Client {}: {}", handle, e);
        }
    }

    fn on_action_state(&mut self, handle: ClientHandle, update: SyncActionState) {
        let Some(uid) = self.owned_master(handle, update.local_id, "SyncActionState") else {
            return;
        };
        if let Err(e) = self.world.set_action_state(uid, update.action_state) {
            warn!("Client {}: {}", handle, e);
        }
    }
}
