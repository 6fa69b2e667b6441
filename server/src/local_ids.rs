//! Per-client LocalActorId allocation
//!
//! Each client names actors by small ids from disjoint namespaces. Within a
//! client, [`LocalIdMap`] keeps `ActorUid <-> LocalActorId` a bijection. Ids
//! given back by [`LocalIdMap::unassign`] sit in quarantine until
//! [`LocalIdMap::recycle`] runs at frame end, so an id whose Destroy is in
//! this tick's batch cannot name a different actor in the same batch.

use crate::error::ReplicationError;
use crate::world::ActorUid;
use shared::{LocalActorId, LocalNamespace};
use std::collections::{BTreeSet, HashMap};

/// Monotonic allocator over one namespace, recycling only after quarantine
#[derive(Debug, Clone)]
pub struct IdAllocator {
    namespace: LocalNamespace,
    next: u32,
    free: BTreeSet<u32>,
    quarantine: Vec<u32>,
}

impl IdAllocator {
    pub fn new(namespace: LocalNamespace) -> Self {
        Self {
            namespace,
            next: namespace.range().start,
            free: BTreeSet::new(),
            quarantine: Vec::new(),
        }
    }

    /// Hands out the next never-used id, then the lowest recycled one
    pub fn allocate(&mut self) -> Result<LocalActorId, ReplicationError> {
        if self.next < self.namespace.range().end {
            let id = self.next;
            self.next += 1;
            return Ok(LocalActorId(id));
        }
        self.free
            .pop_first()
            .map(LocalActorId)
            .ok_or(ReplicationError::NamespaceExhausted {
                namespace: self.namespace,
            })
    }

    pub fn release(&mut self, id: LocalActorId) {
        debug_assert!(self.namespace.range().contains(&id.0));
        self.quarantine.push(id.0);
    }

    /// Makes quarantined ids available again
    pub fn recycle(&mut self) {
        self.free.extend(self.quarantine.drain(..));
    }

    pub fn is_quarantined(&self, id: LocalActorId) -> bool {
        self.quarantine.contains(&id.0)
    }
}

/// A client's private actor id table
#[derive(Debug, Clone)]
pub struct LocalIdMap {
    by_uid: HashMap<ActorUid, LocalActorId>,
    by_local: HashMap<LocalActorId, ActorUid>,
    npc: IdAllocator,
    monster: IdAllocator,
    other_player: IdAllocator,
    /// Forced self-master ids released this frame
    self_quarantine: Vec<LocalActorId>,
}

impl Default for LocalIdMap {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalIdMap {
    pub fn new() -> Self {
        Self {
            by_uid: HashMap::new(),
            by_local: HashMap::new(),
            npc: IdAllocator::new(LocalNamespace::Npc),
            monster: IdAllocator::new(LocalNamespace::Monster),
            other_player: IdAllocator::new(LocalNamespace::OtherPlayer),
            self_quarantine: Vec::new(),
        }
    }

    fn allocator(&mut self, namespace: LocalNamespace) -> Option<&mut IdAllocator> {
        match namespace {
            LocalNamespace::Npc => Some(&mut self.npc),
            LocalNamespace::Monster => Some(&mut self.monster),
            LocalNamespace::OtherPlayer => Some(&mut self.other_player),
            LocalNamespace::SelfMaster => None,
        }
    }

    /// Gives `uid` a local id from `namespace`
    ///
    /// `SelfMaster` ids are forced (`base + class_type`) instead of
    /// allocated. Assigning an already mapped uid returns its existing id.
    pub fn assign(
        &mut self,
        uid: ActorUid,
        namespace: LocalNamespace,
        class_type: i32,
    ) -> Result<LocalActorId, ReplicationError> {
        if let Some(existing) = self.by_uid.get(&uid) {
            return Ok(*existing);
        }

        let local = match self.allocator(namespace) {
            Some(allocator) => allocator.allocate()?,
            None => self.forced_self_id(class_type)?,
        };

        if let Some(holder) = self.by_local.get(&local) {
            debug_assert!(false, "local id {} already held by {}", local, holder);
            return Err(ReplicationError::Collision {
                local: local.0,
                holder: *holder,
            });
        }
        self.by_uid.insert(uid, local);
        self.by_local.insert(local, uid);
        Ok(local)
    }

    fn forced_self_id(&self, class_type: i32) -> Result<LocalActorId, ReplicationError> {
        let range = LocalNamespace::SelfMaster.range();
        let local = u32::try_from(class_type)
            .ok()
            .and_then(|offset| range.start.checked_add(offset))
            .filter(|id| range.contains(id))
            .ok_or(ReplicationError::OutOfRange {
                local: range.start.wrapping_add(class_type as u32),
                namespace: LocalNamespace::SelfMaster,
            })?;
        let local = LocalActorId(local);
        if self.self_quarantine.contains(&local) {
            return Err(ReplicationError::Quarantined { local: local.0 });
        }
        Ok(local)
    }

    /// Drops `uid`'s mapping; its id is reusable after the next recycle
    pub fn unassign(&mut self, uid: ActorUid) -> Option<LocalActorId> {
        let local = self.by_uid.remove(&uid)?;
        self.by_local.remove(&local);
        match local.namespace() {
            Some(LocalNamespace::SelfMaster) => self.self_quarantine.push(local),
            Some(namespace) => {
                if let Some(allocator) = self.allocator(namespace) {
                    allocator.release(local);
                }
            }
            None => debug_assert!(false, "unassigned id {} has no namespace", local),
        }
        Some(local)
    }

    /// Called once the batch carrying this frame's destroys has been queued
    pub fn recycle(&mut self) {
        self.npc.recycle();
        self.monster.recycle();
        self.other_player.recycle();
        self.self_quarantine.clear();
    }

    /// Resolves a client-supplied id; `None` if this client never saw it
    pub fn resolve(&self, local: LocalActorId) -> Option<ActorUid> {
        self.by_local.get(&local).copied()
    }

    pub fn local_of(&self, uid: ActorUid) -> Option<LocalActorId> {
        self.by_uid.get(&uid).copied()
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }

    /// Both directions agree on every pair
    pub fn is_bijective(&self) -> bool {
        self.by_uid.len() == self.by_local.len()
            && self
                .by_uid
                .iter()
                .all(|(uid, local)| self.by_local.get(local) == Some(uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_ids_start_at_namespace_base() {
        let mut map = LocalIdMap::new();
        let player = map.assign(ActorUid(10), LocalNamespace::OtherPlayer, 0).unwrap();
        let npc = map.assign(ActorUid(11), LocalNamespace::Npc, 0).unwrap();
        let monster = map.assign(ActorUid(12), LocalNamespace::Monster, 0).unwrap();
        assert_eq!(player, LocalNamespace::OtherPlayer.base());
        assert_eq!(npc, LocalNamespace::Npc.base());
        assert_eq!(monster, LocalNamespace::Monster.base());

        let next = map.assign(ActorUid(13), LocalNamespace::OtherPlayer, 0).unwrap();
        assert_eq!(next, LocalActorId(21101));
    }

    #[test]
    fn test_self_master_id_is_forced_by_class() {
        let mut map = LocalIdMap::new();
        let local = map.assign(ActorUid(1), LocalNamespace::SelfMaster, 35).unwrap();
        assert_eq!(local, LocalActorId(21035));
        assert_eq!(map.resolve(local), Some(ActorUid(1)));

        assert!(matches!(
            map.assign(ActorUid(2), LocalNamespace::SelfMaster, 100),
            Err(ReplicationError::OutOfRange { .. })
        ));
        assert!(matches!(
            map.assign(ActorUid(3), LocalNamespace::SelfMaster, -1),
            Err(ReplicationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_released_id_waits_for_recycle() {
        let mut map = LocalIdMap::new();
        let mut allocator = IdAllocator::new(LocalNamespace::Npc);
        let first = allocator.allocate().unwrap();
        allocator.release(first);
        assert!(allocator.is_quarantined(first));
        allocator.recycle();
        assert!(!allocator.is_quarantined(first));

        let a = map.assign(ActorUid(1), LocalNamespace::SelfMaster, 4).unwrap();
        assert_eq!(map.unassign(ActorUid(1)), Some(a));
        assert_eq!(
            map.assign(ActorUid(2), LocalNamespace::SelfMaster, 4),
            Err(ReplicationError::Quarantined { local: a.0 })
        );
        map.recycle();
        assert_eq!(map.assign(ActorUid(2), LocalNamespace::SelfMaster, 4), Ok(a));
    }

    #[test]
    fn test_exhausted_namespace_reuses_recycled_ids() {
        let mut allocator = IdAllocator::new(LocalNamespace::SelfMaster);
        let ids: Vec<LocalActorId> = (0..100).map(|_| allocator.allocate().unwrap()).collect();
        assert_eq!(ids.last(), Some(&LocalActorId(21099)));
        assert!(matches!(
            allocator.allocate(),
            Err(ReplicationError::NamespaceExhausted { .. })
        ));

        allocator.release(ids[7]);
        allocator.release(ids[3]);
        assert!(allocator.allocate().is_err());
        allocator.recycle();
        assert_eq!(allocator.allocate(), Ok(ids[3]));
        assert_eq!(allocator.allocate(), Ok(ids[7]));
    }

    #[test]
    fn test_unknown_local_does_not_resolve() {
        let mut map = LocalIdMap::new();
        let local = map.assign(ActorUid(5), LocalNamespace::Npc, 0).unwrap();
        assert_eq!(map.resolve(LocalActorId(local.0 + 1)), None);
        map.unassign(ActorUid(5));
        assert_eq!(map.resolve(local), None);
        assert!(map.is_empty());
    }

    proptest! {
        /// Ids held at any moment are unique and never handed out while quarantined
        #[test]
        fn assigned_ids_stay_unique(ops in prop::collection::vec((any::<bool>(), 0u32..40, any::<bool>()), 0..400)) {
            let mut map = LocalIdMap::new();
            let mut quarantined: Vec<LocalActorId> = Vec::new();
            for (spawn, uid, end_frame) in ops {
                let uid = ActorUid(uid + 1);
                let namespace = if uid.0 % 3 == 0 { LocalNamespace::Npc } else { LocalNamespace::OtherPlayer };
                if spawn {
                    if map.local_of(uid).is_none() {
                        let local = map.assign(uid, namespace, 0).unwrap();
                        prop_assert!(!quarantined.contains(&local));
                    }
                } else if let Some(local) = map.unassign(uid) {
                    quarantined.push(local);
                }
                if end_frame {
                    map.recycle();
                    quarantined.clear();
                }
                prop_assert!(map.is_bijective());
            }
        }
    }
}
