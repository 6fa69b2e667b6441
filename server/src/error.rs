//! Error types for each server layer

use crate::connection_table::ClientHandle;
use crate::world::ActorUid;
use shared::LocalNamespace;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by the connection table and transport tasks
#[derive(Debug, Error)]
pub enum TransportError {
    /// Every slot is occupied; the connection is refused
    #[error("Connection table full ({capacity} slots)")]
    CapacityExhausted { capacity: usize },

    /// The handle refers to a connection that no longer exists
    #[error("Stale client handle {handle}")]
    StaleHandle { handle: ClientHandle },

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the world/actor store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// All 32-bit actor ids have been handed out
    #[error("Actor uid space exhausted")]
    UidSpaceExhausted,

    #[error("Unknown actor {uid}")]
    UnknownActor { uid: ActorUid },

    /// A map spawn list without any player spawn point
    #[error("Map {map_id} has no player spawn points")]
    NoSpawnPoints { map_id: i32 },
}

/// Failures while assigning per-client local actor ids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error("Local id namespace {namespace:?} exhausted")]
    NamespaceExhausted { namespace: LocalNamespace },

    /// The id is still waiting for the destroy of its previous holder to go out
    #[error("Local id {local} is quarantined until the next frame")]
    Quarantined { local: u32 },

    /// Two visible actors would share a local id
    #[error("Local id {local} already held by actor {holder}")]
    Collision { local: u32, holder: ActorUid },

    /// A forced id outside the namespace it was requested from
    #[error("Local id {local} outside namespace {namespace:?}")]
    OutOfRange {
        local: u32,
        namespace: LocalNamespace,
    },
}

/// Failures while loading configuration or content files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failures of the network trace recorder
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Trace file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trace record encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Trace record of {len} bytes exceeds the {max} byte limit")]
    RecordTooLarge { len: usize, max: usize },
}
