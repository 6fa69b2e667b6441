//! Authoritative actor store
//!
//! Owned by the simulation loop and mutated only from it, so nothing here is
//! locked. Actors are keyed by [`ActorUid`], handed out monotonically and
//! never reused.

use crate::connection_table::ClientHandle;
use crate::error::WorldError;
use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::{Rotation, Vec3};
use std::collections::BTreeMap;
use std::fmt;

/// Server-wide identity of a simulated actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorUid(pub u32);

impl ActorUid {
    pub const INVALID: ActorUid = ActorUid(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for ActorUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor:{}", self.0)
    }
}

/// Fields every actor replicates
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Motion {
    pub pos: Vec3,
    /// Facing direction
    pub dir: Vec3,
    pub move_dir: Vec3,
    pub speed: f32,
    pub rotation: Rotation,
    pub action_state: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterData {
    pub owner: ClientHandle,
    pub name: String,
    pub class_type: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NpcData {
    pub doc_id: i32,
    pub faction: i32,
    /// Hostile NPCs use the client's monster id namespace
    pub monster: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActorKind {
    PlayerMaster(MasterData),
    Npc(NpcData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub uid: ActorUid,
    pub motion: Motion,
    pub kind: ActorKind,
}

impl Actor {
    pub fn as_master(&self) -> Option<&MasterData> {
        match &self.kind {
            ActorKind::PlayerMaster(master) => Some(master),
            ActorKind::Npc(_) => None,
        }
    }

    pub fn as_npc(&self) -> Option<&NpcData> {
        match &self.kind {
            ActorKind::Npc(npc) => Some(npc),
            ActorKind::PlayerMaster(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub pos: Vec3,
    #[serde(default)]
    pub dir: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcSpawn {
    pub doc_id: i32,
    #[serde(default)]
    pub faction: i32,
    #[serde(default)]
    pub monster: bool,
    pub pos: Vec3,
    #[serde(default)]
    pub dir: Vec3,
}

/// Content table describing one map, loaded outside the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSpawnList {
    pub map_id: i32,
    #[serde(default)]
    pub player_spawns: Vec<SpawnPoint>,
    #[serde(default)]
    pub npcs: Vec<NpcSpawn>,
}

impl MapSpawnList {
    /// A map with one spawn point at the origin and no NPCs
    pub fn empty(map_id: i32) -> Self {
        Self {
            map_id,
            player_spawns: vec![SpawnPoint {
                pos: Vec3::ZERO,
                dir: Vec3::new(1.0, 0.0, 0.0),
            }],
            npcs: Vec::new(),
        }
    }
}

impl Default for MapSpawnList {
    fn default() -> Self {
        let spawn = |x: f32, y: f32| SpawnPoint {
            pos: Vec3::new(x, y, 0.0),
            dir: Vec3::new(1.0, 0.0, 0.0),
        };
        Self {
            map_id: 160000042,
            player_spawns: vec![
                spawn(-1000.0, -1000.0),
                spawn(1000.0, -1000.0),
                spawn(-1000.0, 1000.0),
                spawn(1000.0, 1000.0),
            ],
            npcs: vec![
                NpcSpawn {
                    doc_id: 110041031,
                    faction: 0,
                    monster: false,
                    pos: Vec3::new(0.0, 0.0, 0.0),
                    dir: Vec3::new(0.0, 1.0, 0.0),
                },
                NpcSpawn {
                    doc_id: 110041032,
                    faction: 2,
                    monster: true,
                    pos: Vec3::new(500.0, 500.0, 0.0),
                    dir: Vec3::new(-1.0, 0.0, 0.0),
                },
            ],
        }
    }
}

/// Every actor in the simulation
#[derive(Debug)]
pub struct World {
    actors: BTreeMap<ActorUid, Actor>,
    next_uid: u32,
    map_id: i32,
    spawn_points: Vec<SpawnPoint>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            actors: BTreeMap::new(),
            next_uid: 1,
            map_id: 0,
            spawn_points: Vec::new(),
        }
    }

    /// Starts the next uid at `next`, for tests near the end of the id space
    pub fn with_next_uid(next: u32) -> Self {
        Self {
            next_uid: next.max(1),
            ..Self::new()
        }
    }

    fn allocate_uid(&mut self) -> Result<ActorUid, WorldError> {
        if self.next_uid == 0 {
            return Err(WorldError::UidSpaceExhausted);
        }
        let uid = ActorUid(self.next_uid);
        // Wraps to 0 after u32::MAX, which is never handed out
        self.next_uid = self.next_uid.wrapping_add(1);
        Ok(uid)
    }

    fn insert(&mut self, actor: Actor) -> ActorUid {
        let uid = actor.uid;
        let previous = self.actors.insert(uid, actor);
        debug_assert!(previous.is_none(), "duplicate actor uid {}", uid);
        uid
    }

    /// Replaces the map content: despawns current NPCs and spawns the list's
    pub fn load_map(&mut self, map: &MapSpawnList) -> Result<usize, WorldError> {
        if map.player_spawns.is_empty() {
            return Err(WorldError::NoSpawnPoints { map_id: map.map_id });
        }
        let stale: Vec<ActorUid> = self
            .actors
            .values()
            .filter(|actor| actor.as_npc().is_some())
            .map(|actor| actor.uid)
            .collect();
        for uid in stale {
            self.destroy_actor(uid);
        }

        self.map_id = map.map_id;
        self.spawn_points = map.player_spawns.clone();
        for spawn in &map.npcs {
            self.spawn_npc_actor(spawn)?;
        }
        info!(
            "Loaded map {} ({} spawn points, {} npcs)",
            map.map_id,
            self.spawn_points.len(),
            map.npcs.len()
        );
        Ok(map.npcs.len())
    }

    pub fn map_id(&self) -> i32 {
        self.map_id
    }

    pub fn spawn_points(&self) -> &[SpawnPoint] {
        &self.spawn_points
    }

    /// Picks one of the map's player spawn points
    pub fn random_spawn_point<R: Rng>(&self, rng: &mut R) -> SpawnPoint {
        if self.spawn_points.is_empty() {
            return SpawnPoint {
                pos: Vec3::ZERO,
                dir: Vec3::new(1.0, 0.0, 0.0),
            };
        }
        self.spawn_points[rng.gen_range(0..self.spawn_points.len())]
    }

    pub fn spawn_player_actor(
        &mut self,
        owner: ClientHandle,
        name: &str,
        class_type: i32,
        spawn: SpawnPoint,
    ) -> Result<ActorUid, WorldError> {
        let uid = self.allocate_uid()?;
        debug!("Spawning master {} for client {} as {}", name, owner, uid);
        Ok(self.insert(Actor {
            uid,
            motion: Motion {
                pos: spawn.pos,
                dir: spawn.dir,
                ..Motion::default()
            },
            kind: ActorKind::PlayerMaster(MasterData {
                owner,
                name: name.to_string(),
                class_type,
            }),
        }))
    }

    pub fn spawn_npc_actor(&mut self, spawn: &NpcSpawn) -> Result<ActorUid, WorldError> {
        let uid = self.allocate_uid()?;
        Ok(self.insert(Actor {
            uid,
            motion: Motion {
                pos: spawn.pos,
                dir: spawn.dir,
                ..Motion::default()
            },
            kind: ActorKind::Npc(NpcData {
                doc_id: spawn.doc_id,
                faction: spawn.faction,
                monster: spawn.monster,
            }),
        }))
    }

    /// Removes an actor; its uid is never handed out again
    pub fn destroy_actor(&mut self, uid: ActorUid) -> bool {
        self.actors.remove(&uid).is_some()
    }

    pub fn find_actor(&self, uid: ActorUid) -> Option<&Actor> {
        self.actors.get(&uid)
    }

    fn motion_mut(&mut self, uid: ActorUid) -> Result<&mut Motion, WorldError> {
        self.actors
            .get_mut(&uid)
            .map(|actor| &mut actor.motion)
            .ok_or(WorldError::UnknownActor { uid })
    }

    pub fn set_position(
        &mut self,
        uid: ActorUid,
        pos: Vec3,
        move_dir: Vec3,
        speed: f32,
    ) -> Result<(), WorldError> {
        let motion = self.motion_mut(uid)?;
        motion.pos = pos;
        motion.move_dir = move_dir;
        motion.speed = speed;
        Ok(())
    }

    pub fn set_rotation(&mut self, uid: ActorUid, rotation: Rotation) -> Result<(), WorldError> {
        self.motion_mut(uid)?.rotation = rotation;
        Ok(())
    }

    pub fn set_action_state(&mut self, uid: ActorUid, action_state: i32) -> Result<(), WorldError> {
        self.motion_mut(uid)?.action_state = action_state;
        Ok(())
    }

    /// The master actor owned by a client, if it has spawned one
    pub fn master_of(&self, owner: ClientHandle) -> Option<&Actor> {
        self.actors
            .values()
            .find(|actor| actor.as_master().map(|m| m.owner) == Some(owner))
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn owner() -> ClientHandle {
        ClientHandle::new(0, 0)
    }

    fn origin() -> SpawnPoint {
        SpawnPoint {
            pos: Vec3::ZERO,
            dir: Vec3::ZERO,
        }
    }

    #[test]
    fn test_uids_are_monotonic_and_never_reused() {
        let mut world = World::new();
        let a = world.spawn_player_actor(owner(), "a", 1, origin()).unwrap();
        let b = world.spawn_player_actor(owner(), "b", 1, origin()).unwrap();
        assert_eq!((a, b), (ActorUid(1), ActorUid(2)));

        assert!(world.destroy_actor(a));
        assert!(!world.destroy_actor(a));
        let c = world.spawn_player_actor(owner(), "c", 1, origin()).unwrap();
        assert_eq!(c, ActorUid(3));
        assert!(world.find_actor(a).is_none());
    }

    #[test]
    fn test_uid_space_exhaustion_is_an_error() {
        let mut world = World::with_next_uid(u32::MAX);
        let last = world.spawn_player_actor(owner(), "last", 1, origin()).unwrap();
        assert_eq!(last, ActorUid(u32::MAX));
        assert_eq!(
            world.spawn_player_actor(owner(), "one too many", 1, origin()),
            Err(WorldError::UidSpaceExhausted)
        );
        assert_eq!(world.len(), 1);
    }

    #[test]
    fn test_setters() {
        let mut world = World::new();
        let uid = world.spawn_player_actor(owner(), "mover", 3, origin()).unwrap();
        world
            .set_position(uid, Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 1.0, 0.0), 550.0)
            .unwrap();
        world
            .set_rotation(
                uid,
                Rotation {
                    upper_yaw: 1.25,
                    upper_pitch: 0.0,
                    bottom_yaw: 1.0,
                },
            )
            .unwrap();
        world.set_action_state(uid, 7).unwrap();

        let motion = world.find_actor(uid).unwrap().motion;
        assert_approx_eq!(motion.pos.y, 2.0);
        assert_approx_eq!(motion.move_dir.y, 1.0);
        assert_approx_eq!(motion.speed, 550.0);
        assert_approx_eq!(motion.rotation.upper_yaw, 1.25);
        assert_eq!(motion.action_state, 7);

        assert_eq!(
            world.set_action_state(ActorUid(99), 1),
            Err(WorldError::UnknownActor { uid: ActorUid(99) })
        );
    }

    #[test]
    fn test_load_map_replaces_npcs() {
        let mut world = World::new();
        assert_eq!(world.load_map(&MapSpawnList::default()).unwrap(), 2);
        let first_npcs: Vec<ActorUid> = world.actors().map(|a| a.uid).collect();

        world.load_map(&MapSpawnList::default()).unwrap();
        assert_eq!(world.len(), 2);
        assert!(first_npcs.iter().all(|uid| world.find_actor(*uid).is_none()));
        assert!(world.actors().any(|a| a.as_npc().map(|n| n.monster) == Some(true)));
    }

    #[test]
    fn test_load_map_requires_spawn_points() {
        let mut world = World::new();
        let map = MapSpawnList {
            map_id: 7,
            player_spawns: vec![],
            npcs: vec![],
        };
        assert_eq!(
            world.load_map(&map),
            Err(WorldError::NoSpawnPoints { map_id: 7 })
        );
    }

    #[test]
    fn test_master_lookup_and_spawn_points() {
        let mut world = World::new();
        world.load_map(&MapSpawnList::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let spawn = world.random_spawn_point(&mut rng);
        assert!(world.spawn_points().contains(&spawn));

        let uid = world.spawn_player_actor(owner(), "me", 2, spawn).unwrap();
        assert_eq!(world.master_of(owner()).map(|a| a.uid), Some(uid));
        assert!(world.master_of(ClientHandle::new(1, 0)).is_none());
    }
}
