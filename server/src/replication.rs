//! Replication engine
//!
//! Two [`Frame`]s alternate between "current" and "previous". Every tick:
//!
//! 1. [`ReplicationEngine::begin_frame`] copies the world into the current frame
//! 2. [`ReplicationEngine::replicate`] diffs each in-game viewer's visible set
//!    against what that viewer already tracks, queueing destroys, then spawns,
//!    then updates into the viewer's outgoing batch
//! 3. [`ReplicationEngine::frame_end`] commits the tracked sets, recycles
//!    quarantined local ids and swaps the frames
//!
//! Ids freed by a destroy stay quarantined until step 3, so a batch never
//! reuses a local id for a new actor while it still names the old one.

use crate::connection_table::ClientHandle;
use crate::frame::{Frame, FrameActor, FrameMaster};
use crate::local_ids::LocalIdMap;
use crate::mailbox::Outbox;
use crate::player::PlayerRegistry;
use crate::world::{ActorUid, World};
use log::{debug, error, warn};
use shared::protocol::{CreateActor, DestroyEntity, SyncAction, SyncMove, SyncTurn};
use shared::LocalActorId;
use std::collections::{BTreeSet, HashMap};

/// Decides which actors a viewer is told about
///
/// A viewer's own master is always visible and never passed here.
pub trait InterestFilter: Send {
    fn is_visible(&self, viewer: Option<&FrameMaster>, actor: FrameActor<'_>) -> bool;
}

/// Every actor in the frame is visible to every viewer
#[derive(Debug, Default, Clone, Copy)]
pub struct EverythingVisible;

impl InterestFilter for EverythingVisible {
    fn is_visible(&self, _viewer: Option<&FrameMaster>, _actor: FrameActor<'_>) -> bool {
        true
    }
}

/// Actors within a horizontal radius of the viewer's master
///
/// Viewers without a master see everything.
#[derive(Debug, Clone, Copy)]
pub struct RadiusFilter {
    pub radius: f32,
}

impl RadiusFilter {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }
}

impl InterestFilter for RadiusFilter {
    fn is_visible(&self, viewer: Option<&FrameMaster>, actor: FrameActor<'_>) -> bool {
        match viewer {
            Some(master) => master.motion.pos.planar_distance(&actor.motion().pos) <= self.radius,
            None => true,
        }
    }
}

/// Per-viewer replication state
#[derive(Debug, Default)]
struct ClientView {
    ids: LocalIdMap,
    /// Actors the client currently holds a spawn for
    tracked: BTreeSet<ActorUid>,
    /// Becomes `tracked` at frame end
    next_tracked: BTreeSet<ActorUid>,
}

/// Message counts produced by one [`ReplicationEngine::replicate`] pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationStats {
    pub viewers: usize,
    pub spawns: usize,
    pub updates: usize,
    pub destroys: usize,
    /// Spawns postponed to a later tick (quarantined or exhausted ids)
    pub deferred: usize,
}

pub struct ReplicationEngine {
    frames: [Frame; 2],
    current: usize,
    views: HashMap<ClientHandle, ClientView>,
    filter: Box<dyn InterestFilter>,
}

impl Default for ReplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationEngine {
    pub fn new() -> Self {
        Self::with_filter(Box::new(EverythingVisible))
    }

    pub fn with_filter(filter: Box<dyn InterestFilter>) -> Self {
        Self {
            frames: [Frame::default(), Frame::default()],
            current: 0,
            views: HashMap::new(),
            filter,
        }
    }

    pub fn current_frame(&self) -> &Frame {
        &self.frames[self.current]
    }

    pub fn previous_frame(&self) -> &Frame {
        &self.frames[1 - self.current]
    }

    /// Populates the current frame from the authoritative state
    pub fn begin_frame(&mut self, world: &World, players: &PlayerRegistry) {
        self.frames[self.current].capture(world, players);
    }

    /// Queues each in-game viewer's destroys, spawns and updates
    pub fn replicate(&mut self, outbox: &mut Outbox) -> ReplicationStats {
        let current = &self.frames[self.current];
        let previous = &self.frames[1 - self.current];
        let filter = self.filter.as_ref();
        let mut stats = ReplicationStats::default();

        for player in current.players.values() {
            if !player.state.is_in_game() {
                continue;
            }
            let handle = player.handle;
            let view = self.views.entry(handle).or_default();
            let viewer_master = current.master_of(handle);
            stats.viewers += 1;

            let visible: BTreeSet<ActorUid> = current
                .actors()
                .filter(|actor| match actor {
                    FrameActor::Master(m) if m.owner == handle => true,
                    _ => filter.is_visible(viewer_master, *actor),
                })
                .map(|actor| actor.uid())
                .collect();

            // Destroys go first so the client drops stale ids before any spawn
            for uid in view.tracked.difference(&visible) {
                match view.ids.unassign(*uid) {
                    Some(local_id) => {
                        outbox.push(handle, &DestroyEntity { local_id });
                        stats.destroys += 1;
                    }
                    None => error!("Client {} tracked {} without a local id", handle, uid),
                }
            }

            view.next_tracked.clear();
            for actor in current.actors() {
                let uid = actor.uid();
                if !visible.contains(&uid) {
                    continue;
                }
                if view.tracked.contains(&uid) {
                    view.next_tracked.insert(uid);
                    continue;
                }
                let class_type = match actor {
                    FrameActor::Master(m) => m.class_type,
                    FrameActor::Npc(_) => 0,
                };
                match view.ids.assign(uid, actor.namespace_for(handle), class_type) {
                    Ok(local_id) => {
                        outbox.push(handle, &create_message(local_id, actor));
                        view.next_tracked.insert(uid);
                        stats.spawns += 1;
                    }
                    Err(e) => {
                        debug!("Deferring spawn of {} for client {}: {}", uid, handle, e);
                        stats.deferred += 1;
                    }
                }
            }

            for uid in view.tracked.intersection(&visible) {
                let (Some(now), Some(before)) = (current.actor(*uid), previous.actor(*uid)) else {
                    continue;
                };
                let Some(local_id) = view.ids.local_of(*uid) else {
                    error!("Client {} tracked {} without a local id", handle, uid);
                    continue;
                };
                let own = matches!(now, FrameActor::Master(m) if m.owner == handle);
                stats.updates += queue_updates(outbox, handle, local_id, before, now, own);
            }
        }
        stats
    }

    /// Commits this tick's visible sets and swaps the frames
    pub fn frame_end(&mut self) {
        for view in self.views.values_mut() {
            std::mem::swap(&mut view.tracked, &mut view.next_tracked);
            view.next_tracked.clear();
            view.ids.recycle();
            debug_assert!(view.ids.is_bijective());
        }
        self.current = 1 - self.current;
    }

    /// Resolves a LocalActorId received from `handle` against that client's own map
    pub fn resolve_local(&self, handle: ClientHandle, local: LocalActorId) -> Option<ActorUid> {
        let uid = self.views.get(&handle)?.ids.resolve(local);
        if uid.is_none() {
            warn!("Client {} referenced unknown local id {}", handle, local);
        }
        uid
    }

    pub fn local_id_of(&self, handle: ClientHandle, uid: ActorUid) -> Option<LocalActorId> {
        self.views.get(&handle)?.ids.local_of(uid)
    }

    /// Actors the client holds a spawn for
    pub fn tracked_count(&self, handle: ClientHandle) -> usize {
        self.views.get(&handle).map(|v| v.tracked.len()).unwrap_or(0)
    }

    /// Forgets a departed client's ids and tracked set
    pub fn remove_client(&mut self, handle: ClientHandle) {
        self.views.remove(&handle);
    }

    pub fn viewer_count(&self) -> usize {
        self.views.len()
    }
}

fn create_message(local_id: LocalActorId, actor: FrameActor<'_>) -> CreateActor {
    let motion = actor.motion();
    let (doc_id, class_type, faction, name) = match actor {
        FrameActor::Master(m) => (0, m.class_type, 0, m.name.clone()),
        FrameActor::Npc(n) => (n.doc_id, 0, n.faction, String::new()),
    };
    CreateActor {
        local_id,
        kind: actor.spawn_kind(),
        doc_id,
        class_type,
        faction,
        pos: motion.pos,
        dir: motion.dir,
        move_dir: motion.move_dir,
        speed: motion.speed,
        rotation: motion.rotation,
        action_state: motion.action_state,
        name,
    }
}

/// Queues updates for the fields that changed; returns how many
fn queue_updates(
    outbox: &mut Outbox,
    handle: ClientHandle,
    local_id: LocalActorId,
    before: FrameActor<'_>,
    now: FrameActor<'_>,
    own_master: bool,
) -> usize {
    let (before, now) = (before.motion(), now.motion());
    let mut queued = 0;
    if !own_master {
        if before.pos != now.pos || before.move_dir != now.move_dir || before.speed != now.speed {
            outbox.push(
                handle,
                &SyncMove {
                    local_id,
                    pos: now.pos,
                    move_dir: now.move_dir,
                    speed: now.speed,
                },
            );
            queued += 1;
        }
        if before.rotation != now.rotation {
            outbox.push(
                handle,
                &SyncTurn {
                    local_id,
                    rotation: now.rotation,
                },
            );
            queued += 1;
        }
    }
    if before.action_state != now.action_state {
        outbox.push(
            handle,
            &SyncAction {
                local_id,
                action_state: now.action_state,
            },
        );
        queued += 1;
    }
    queued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{PlayerSession, PlayerState};
    use crate::world::{MapSpawnList, SpawnPoint};
    use shared::{decode, ServerMessage, Vec3};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 11900)
    }

    fn spawn_at(x: f32) -> SpawnPoint {
        SpawnPoint {
            pos: Vec3::new(x, 0.0, 0.0),
            dir: Vec3::new(1.0, 0.0, 0.0),
        }
    }

    fn join(players: &mut PlayerRegistry, handle: ClientHandle, state: PlayerState) {
        let mut session = PlayerSession::new(handle, test_addr(), 0, 35);
        if state >= PlayerState::InGame {
            session.transition(PlayerState::InGame).unwrap();
        }
        if state == PlayerState::Loaded {
            session.transition(PlayerState::Loaded).unwrap();
        }
        players.insert(session);
    }

    fn tick(engine: &mut ReplicationEngine, world: &World, players: &PlayerRegistry) -> Outbox {
        let mut outbox = Outbox::new();
        engine.begin_frame(world, players);
        engine.replicate(&mut outbox);
        engine.frame_end();
        outbox
    }

    fn messages(outbox: &Outbox, handle: ClientHandle) -> Vec<ServerMessage> {
        decode(outbox.bytes_for(handle), 1024)
            .unwrap()
            .messages
            .iter()
            .map(|m| ServerMessage::decode(m).unwrap().unwrap())
            .collect()
    }

    #[test]
    fn test_only_in_game_viewers_receive_spawns() {
        let mut world = World::new();
        world.load_map(&MapSpawnList::default()).unwrap();
        let mut players = PlayerRegistry::new();
        let waiting = ClientHandle::new(0, 0);
        let playing = ClientHandle::new(1, 0);
        join(&mut players, waiting, PlayerState::Connected);
        join(&mut players, playing, PlayerState::InGame);

        let mut engine = ReplicationEngine::new();
        let outbox = tick(&mut engine, &world, &players);
        assert!(outbox.bytes_for(waiting).is_empty());

        let spawned: Vec<LocalActorId> = messages(&outbox, playing)
            .into_iter()
            .map(|m| match m {
                ServerMessage::CreateActor(c) => c.local_id,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(spawned, vec![LocalActorId(5000), LocalActorId(10000)]);
        assert_eq!(engine.tracked_count(playing), 2);
    }

    #[test]
    fn test_own_master_uses_forced_id_and_is_not_echoed() {
        let mut world = World::new();
        let mut players = PlayerRegistry::new();
        let me = ClientHandle::new(0, 0);
        join(&mut players, me, PlayerState::Loaded);
        let uid = world.spawn_player_actor(me, "me", 35, spawn_at(0.0)).unwrap();
        players.get_mut(me).unwrap().master = Some(uid);

        let mut engine = ReplicationEngine::new();
        tick(&mut engine, &world, &players);
        assert_eq!(engine.local_id_of(me, uid), Some(LocalActorId(21035)));
        assert_eq!(engine.resolve_local(me, LocalActorId(21035)), Some(uid));

        world
            .set_position(uid, Vec3::new(4.0, 0.0, 0.0), Vec3::ZERO, 1.0)
            .unwrap();
        world.set_action_state(uid, 7).unwrap();
        let outbox = tick(&mut engine, &world, &players);
        assert_eq!(
            messages(&outbox, me),
            vec![ServerMessage::SyncAction(SyncAction {
                local_id: LocalActorId(21035),
                action_state: 7
            })]
        );
    }

    #[test]
    fn test_unchanged_actors_produce_no_updates() {
        let mut world = World::new();
        world.load_map(&MapSpawnList::default()).unwrap();
        let mut players = PlayerRegistry::new();
        let viewer = ClientHandle::new(0, 0);
        join(&mut players, viewer, PlayerState::InGame);

        let mut engine = ReplicationEngine::new();
        tick(&mut engine, &world, &players);
        let outbox = tick(&mut engine, &world, &players);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_destroy_precedes_reuse_of_local_id() {
        let mut world = World::new();
        let mut players = PlayerRegistry::new();
        let viewer = ClientHandle::new(0, 0);
        join(&mut players, viewer, PlayerState::InGame);
        let first = world
            .spawn_player_actor(ClientHandle::new(1, 0), "a", 1, spawn_at(0.0))
            .unwrap();

        let mut engine = ReplicationEngine::new();
        tick(&mut engine, &world, &players);
        assert_eq!(engine.local_id_of(viewer, first), Some(LocalActorId(21100)));

        world.destroy_actor(first);
        let second = world
            .spawn_player_actor(ClientHandle::new(2, 0), "b", 1, spawn_at(0.0))
            .unwrap();
        let outbox = tick(&mut engine, &world, &players);
        let batch = messages(&outbox, viewer);
        assert!(matches!(
            batch[0],
            ServerMessage::DestroyEntity(DestroyEntity { local_id: LocalActorId(21100) })
        ));
        match &batch[1] {
            ServerMessage::CreateActor(c) => assert_eq!(c.local_id, LocalActorId(21101)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.resolve_local(viewer, LocalActorId(21100)), None);
        assert_eq!(engine.resolve_local(viewer, LocalActorId(21101)), Some(second));
    }

    #[test]
    fn test_respawned_master_waits_one_tick_for_its_forced_id() {
        let mut world = World::new();
        let mut players = PlayerRegistry::new();
        let me = ClientHandle::new(0, 0);
        join(&mut players, me, PlayerState::Loaded);
        let old = world.spawn_player_actor(me, "me", 3, spawn_at(0.0)).unwrap();
        players.get_mut(me).unwrap().master = Some(old);

        let mut engine = ReplicationEngine::new();
        tick(&mut engine, &world, &players);

        world.destroy_actor(old);
        let new = world.spawn_player_actor(me, "me", 3, spawn_at(1.0)).unwrap();
        players.get_mut(me).unwrap().master = Some(new);
        let mut outbox = Outbox::new();
        engine.begin_frame(&world, &players);
        let stats = engine.replicate(&mut outbox);
        engine.frame_end();
        assert_eq!((stats.destroys, stats.spawns, stats.deferred), (1, 0, 1));

        let outbox = tick(&mut engine, &world, &players);
        match &messages(&outbox, me)[..] {
            [ServerMessage::CreateActor(c)] => assert_eq!(c.local_id, LocalActorId(21003)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_radius_filter_hides_distant_actors() {
        let mut world = World::new();
        let mut players = PlayerRegistry::new();
        let me = ClientHandle::new(0, 0);
        join(&mut players, me, PlayerState::Loaded);
        let mine = world.spawn_player_actor(me, "me", 0, spawn_at(0.0)).unwrap();
        players.get_mut(me).unwrap().master = Some(mine);
        let near = world
            .spawn_player_actor(ClientHandle::new(1, 0), "near", 0, spawn_at(10.0))
            .unwrap();
        let far = world
            .spawn_player_actor(ClientHandle::new(2, 0), "far", 0, spawn_at(500.0))
            .unwrap();

        let mut engine = ReplicationEngine::with_filter(Box::new(RadiusFilter::new(50.0)));
        tick(&mut engine, &world, &players);
        assert!(engine.local_id_of(me, mine).is_some());
        assert!(engine.local_id_of(me, near).is_some());
        assert!(engine.local_id_of(me, far).is_none());

        world.set_position(far, Vec3::new(20.0, 0.0, 0.0), Vec3::ZERO, 0.0).unwrap();
        world.set_position(near, Vec3::new(300.0, 0.0, 0.0), Vec3::ZERO, 0.0).unwrap();
        tick(&mut engine, &world, &players);
        assert!(engine.local_id_of(me, far).is_some());
        assert!(engine.local_id_of(me, near).is_none());
    }

    #[test]
    fn test_removed_client_forgets_ids() {
        let mut world = World::new();
        world.load_map(&MapSpawnList::default()).unwrap();
        let mut players = PlayerRegistry::new();
        let viewer = ClientHandle::new(0, 0);
        join(&mut players, viewer, PlayerState::InGame);

        let mut engine = ReplicationEngine::new();
        tick(&mut engine, &world, &players);
        assert_eq!(engine.viewer_count(), 1);
        engine.remove_client(viewer);
        assert_eq!(engine.viewer_count(), 0);
        assert_eq!(engine.resolve_local(viewer, LocalActorId(5000)), None);
    }
}
