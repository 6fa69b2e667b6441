//! One tick's snapshot of replicable state

use crate::connection_table::ClientHandle;
use crate::player::{PlayerRegistry, PlayerState};
use crate::world::{ActorKind, ActorUid, Motion, World};
use shared::{LocalNamespace, SpawnKind};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FramePlayer {
    pub handle: ClientHandle,
    pub state: PlayerState,
    pub master: Option<ActorUid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameMaster {
    pub uid: ActorUid,
    pub owner: ClientHandle,
    pub name: String,
    pub class_type: i32,
    pub motion: Motion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameNpc {
    pub uid: ActorUid,
    pub doc_id: i32,
    pub faction: i32,
    pub monster: bool,
    pub motion: Motion,
}

/// Borrowed view of either actor kind in a frame
#[derive(Debug, Clone, Copy)]
pub enum FrameActor<'a> {
    Master(&'a FrameMaster),
    Npc(&'a FrameNpc),
}

impl<'a> FrameActor<'a> {
    pub fn uid(&self) -> ActorUid {
        match self {
            FrameActor::Master(m) => m.uid,
            FrameActor::Npc(n) => n.uid,
        }
    }

    pub fn motion(&self) -> &'a Motion {
        match self {
            FrameActor::Master(m) => &m.motion,
            FrameActor::Npc(n) => &n.motion,
        }
    }

    pub fn spawn_kind(&self) -> SpawnKind {
        match self {
            FrameActor::Master(_) => SpawnKind::Player,
            FrameActor::Npc(n) if n.monster => SpawnKind::Monster,
            FrameActor::Npc(_) => SpawnKind::Npc,
        }
    }

    /// Namespace a viewer allocates this actor's local id from
    pub fn namespace_for(&self, viewer: ClientHandle) -> LocalNamespace {
        match self {
            FrameActor::Master(m) if m.owner == viewer => LocalNamespace::SelfMaster,
            FrameActor::Master(_) => LocalNamespace::OtherPlayer,
            FrameActor::Npc(n) if n.monster => LocalNamespace::Monster,
            FrameActor::Npc(_) => LocalNamespace::Npc,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Frame {
    pub players: BTreeMap<ClientHandle, FramePlayer>,
    pub masters: BTreeMap<ActorUid, FrameMaster>,
    pub npcs: BTreeMap<ActorUid, FrameNpc>,
}

impl Frame {
    pub fn clear(&mut self) {
        self.players.clear();
        self.masters.clear();
        self.npcs.clear();
    }

    /// Refills the frame from the world and the connected players
    pub fn capture(&mut self, world: &World, players: &PlayerRegistry) {
        self.clear();
        for session in players.iter() {
            self.players.insert(
                session.handle,
                FramePlayer {
                    handle: session.handle,
                    state: session.state(),
                    master: session.master,
                },
            );
        }
        for actor in world.actors() {
            match &actor.kind {
                ActorKind::PlayerMaster(master) => {
                    self.masters.insert(
                        actor.uid,
                        FrameMaster {
                            uid: actor.uid,
                            owner: master.owner,
                            name: master.name.clone(),
                            class_type: master.class_type,
                            motion: actor.motion,
                        },
                    );
                }
                ActorKind::Npc(npc) => {
                    self.npcs.insert(
                        actor.uid,
                        FrameNpc {
                            uid: actor.uid,
                            doc_id: npc.doc_id,
                            faction: npc.faction,
                            monster: npc.monster,
                            motion: actor.motion,
                        },
                    );
                }
            }
        }
    }

    pub fn actor(&self, uid: ActorUid) -> Option<FrameActor<'_>> {
        self.masters
            .get(&uid)
            .map(FrameActor::Master)
            .or_else(|| self.npcs.get(&uid).map(FrameActor::Npc))
    }

    /// Masters first, then npcs, each in uid order
    pub fn actors(&self) -> impl Iterator<Item = FrameActor<'_>> {
        self.masters
            .values()
            .map(FrameActor::Master)
            .chain(self.npcs.values().map(FrameActor::Npc))
    }

    pub fn master_of(&self, owner: ClientHandle) -> Option<&FrameMaster> {
        let uid = self.players.get(&owner)?.master?;
        self.masters.get(&uid)
    }

    pub fn actor_count(&self) -> usize {
        self.masters.len() + self.npcs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerSession;
    use crate::world::{MapSpawnList, SpawnPoint};
    use shared::Vec3;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 11900)
    }

    #[test]
    fn test_capture_copies_world() {
        let mut world = World::new();
        world.load_map(&MapSpawnList::default()).unwrap();
        let owner = ClientHandle::new(0, 0);
        let uid = world
            .spawn_player_actor(
                owner,
                "me",
                35,
                SpawnPoint {
                    pos: Vec3::new(1.0, 2.0, 3.0),
                    dir: Vec3::ZERO,
                },
            )
            .unwrap();

        let mut players = PlayerRegistry::new();
        let mut session = PlayerSession::new(owner, test_addr(), 0, 35);
        session.master = Some(uid);
        players.insert(session);

        let mut frame = Frame::default();
        frame.capture(&world, &players);
        assert_eq!(frame.masters.len(), 1);
        assert_eq!(frame.npcs.len(), 2);
        assert_eq!(frame.actor_count(), 3);
        assert_eq!(frame.master_of(owner).map(|m| m.uid), Some(uid));

        let master = frame.actor(uid).unwrap();
        assert_eq!(master.namespace_for(owner), LocalNamespace::SelfMaster);
        assert_eq!(
            master.namespace_for(ClientHandle::new(1, 0)),
            LocalNamespace::OtherPlayer
        );

        let kinds: Vec<SpawnKind> = frame.actors().map(|a| a.spawn_kind()).collect();
        assert_eq!(kinds, vec![SpawnKind::Player, SpawnKind::Npc, SpawnKind::Monster]);
    }

    #[test]
    fn test_capture_clears_previous_contents() {
        let mut world = World::new();
        world.load_map(&MapSpawnList::default()).unwrap();
        let mut frame = Frame::default();
        frame.capture(&world, &PlayerRegistry::new());
        assert_eq!(frame.actor_count(), 2);

        frame.capture(&World::new(), &PlayerRegistry::new());
        assert_eq!(frame.actor_count(), 0);
    }
}
