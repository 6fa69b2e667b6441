//! Per-client session state and the player state machine
//!
//! ```text
//! Disconnected --accept--> Connected --ReadyToLoad--> InGame --LoadingComplete--> Loaded
//!       ^                                                                            |
//!       +---------------------------- disconnect (from any state) ------------------+
//! ```

use crate::connection_table::ClientHandle;
use crate::world::ActorUid;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlayerState {
    Disconnected,
    Connected,
    InGame,
    Loaded,
}

impl PlayerState {
    pub fn can_transition(self, to: PlayerState) -> bool {
        matches!(
            (self, to),
            (PlayerState::Disconnected, PlayerState::Connected)
                | (PlayerState::Connected, PlayerState::InGame)
                | (PlayerState::InGame, PlayerState::Loaded)
                | (_, PlayerState::Disconnected)
        )
    }

    /// In game or further along; these clients receive replication
    pub fn is_in_game(self) -> bool {
        self >= PlayerState::InGame
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid player state transition {from:?} -> {to:?}")]
pub struct StateError {
    pub from: PlayerState,
    pub to: PlayerState,
}

/// Everything the simulation knows about one connected client
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub handle: ClientHandle,
    pub addr: SocketAddr,
    state: PlayerState,
    /// Set once the client's `Hello` was answered
    pub greeted: bool,
    pub connected_tick: u64,
    pub name: String,
    pub class_type: i32,
    pub master: Option<ActorUid>,
}

impl PlayerSession {
    pub fn new(handle: ClientHandle, addr: SocketAddr, tick: u64, class_type: i32) -> Self {
        Self {
            handle,
            addr,
            state: PlayerState::Connected,
            greeted: false,
            connected_tick: tick,
            name: format!("Player{}", handle.index()),
            class_type,
            master: None,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn transition(&mut self, to: PlayerState) -> Result<(), StateError> {
        if !self.state.can_transition(to) {
            return Err(StateError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// Sessions of every connected client, ordered by handle
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    sessions: BTreeMap<ClientHandle, PlayerSession>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the handle already had a session
    pub fn insert(&mut self, session: PlayerSession) -> bool {
        let handle = session.handle;
        self.sessions.insert(handle, session).is_none()
    }

    pub fn remove(&mut self, handle: ClientHandle) -> Option<PlayerSession> {
        let mut session = self.sessions.remove(&handle)?;
        session.state = PlayerState::Disconnected;
        Some(session)
    }

    pub fn get(&self, handle: ClientHandle) -> Option<&PlayerSession> {
        self.sessions.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ClientHandle) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 11900)
    }

    #[test]
    fn test_forward_path() {
        let mut session = PlayerSession::new(ClientHandle::new(0, 0), test_addr(), 0, 35);
        assert_eq!(session.state(), PlayerState::Connected);
        session.transition(PlayerState::InGame).unwrap();
        session.transition(PlayerState::Loaded).unwrap();
        assert!(session.state().is_in_game());
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let mut session = PlayerSession::new(ClientHandle::new(0, 0), test_addr(), 0, 35);
        assert_eq!(
            session.transition(PlayerState::Loaded),
            Err(StateError {
                from: PlayerState::Connected,
                to: PlayerState::Loaded
            })
        );
        session.transition(PlayerState::InGame).unwrap();
        assert!(session.transition(PlayerState::InGame).is_err());
        assert!(session.transition(PlayerState::Connected).is_err());
    }

    #[test]
    fn test_disconnect_from_any_state() {
        for state in [
            PlayerState::Connected,
            PlayerState::InGame,
            PlayerState::Loaded,
        ] {
            assert!(state.can_transition(PlayerState::Disconnected));
        }
        assert!(!PlayerState::Connected.is_in_game());
    }

    #[test]
    fn test_registry_remove_marks_disconnected() {
        let mut registry = PlayerRegistry::new();
        let handle = ClientHandle::new(2, 5);
        assert!(registry.insert(PlayerSession::new(handle, test_addr(), 10, 1)));
        assert!(!registry.insert(PlayerSession::new(handle, test_addr(), 11, 1)));

        let removed = registry.remove(handle).unwrap();
        assert_eq!(removed.state(), PlayerState::Disconnected);
        assert!(registry.is_empty());
        assert!(registry.remove(handle).is_none());
    }
}
