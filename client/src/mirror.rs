//! Client-side copy of the replicated world
//!
//! Keyed by the ids the server assigned to this client. Applying the
//! server's spawn/update/destroy stream in order reproduces the server's
//! view of every actor this client can see.

use shared::protocol::CreateActor;
use shared::{LocalActorId, LocalNamespace, Rotation, ServerMessage, SpawnKind, Vec3};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// A spawn named an id that is still in use
    #[error("Spawn for {local} while it is already in use")]
    AlreadySpawned { local: LocalActorId },

    #[error("Message for unknown actor {local}")]
    UnknownActor { local: LocalActorId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorActor {
    pub kind: SpawnKind,
    pub doc_id: i32,
    pub class_type: i32,
    pub faction: i32,
    pub name: String,
    pub pos: Vec3,
    pub dir: Vec3,
    pub move_dir: Vec3,
    pub speed: f32,
    pub rotation: Rotation,
    pub action_state: i32,
}

impl From<&CreateActor> for MirrorActor {
    fn from(create: &CreateActor) -> Self {
        Self {
            kind: create.kind,
            doc_id: create.doc_id,
            class_type: create.class_type,
            faction: create.faction,
            name: create.name.clone(),
            pos: create.pos,
            dir: create.dir,
            move_dir: create.move_dir,
            speed: create.speed,
            rotation: create.rotation,
            action_state: create.action_state,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Mirror {
    actors: BTreeMap<LocalActorId, MirrorActor>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one server message
    ///
    /// Returns `Ok(false)` for messages that are not replication traffic.
    pub fn apply(&mut self, message: &ServerMessage) -> Result<bool, MirrorError> {
        match message {
            ServerMessage::CreateActor(create) => {
                if self.actors.contains_key(&create.local_id) {
                    return Err(MirrorError::AlreadySpawned {
                        local: create.local_id,
                    });
                }
                self.actors.insert(create.local_id, MirrorActor::from(create));
            }
            ServerMessage::DestroyEntity(destroy) => {
                self.actors
                    .remove(&destroy.local_id)
                    .ok_or(MirrorError::UnknownActor {
                        local: destroy.local_id,
                    })?;
            }
            ServerMessage::SyncMove(sync) => {
                let actor = self.actor_mut(sync.local_id)?;
                actor.pos = sync.pos;
                actor.move_dir = sync.move_dir;
                actor.speed = sync.speed;
            }
            ServerMessage::SyncTurn(sync) => {
                self.actor_mut(sync.local_id)?.rotation = sync.rotation;
            }
            ServerMessage::SyncAction(sync) => {
                self.actor_mut(sync.local_id)?.action_state = sync.action_state;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn actor_mut(&mut self, local: LocalActorId) -> Result<&mut MirrorActor, MirrorError> {
        self.actors
            .get_mut(&local)
            .ok_or(MirrorError::UnknownActor { local })
    }

    pub fn get(&self, local: LocalActorId) -> Option<&MirrorActor> {
        self.actors.get(&local)
    }

    /// The client's own master, spawned under its forced self id
    pub fn own_master(&self) -> Option<(LocalActorId, &MirrorActor)> {
        self.actors
            .iter()
            .find(|(id, _)| id.namespace() == Some(LocalNamespace::SelfMaster))
            .map(|(id, actor)| (*id, actor))
    }

    /// Records a move this client made to its own master
    pub fn set_local_motion(&mut self, local: LocalActorId, pos: Vec3, move_dir: Vec3, speed: f32) {
        if let Some(actor) = self.actors.get_mut(&local) {
            actor.pos = pos;
            actor.move_dir = move_dir;
            actor.speed = speed;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LocalActorId, &MirrorActor)> {
        self.actors.iter()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}
