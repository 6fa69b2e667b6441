//! Wire identifiers and typed protocol messages
//!
//! Client and server messages share the framing in [`crate::codec`]; the
//! types here only define payload layouts. Decoding goes through
//! [`NetMessage::decode`], which rejects payloads that are short or carry
//! trailing bytes.

use crate::codec::{self, CodecError, Message};
use crate::cursor::{PacketReader, PacketWriter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Key the server answers every `Hello` with
pub const SERVER_HELLO_KEY: [u8; 16] = [
    0x99, 0x51, 0x84, 0x28, 0x2c, 0x9e, 0x89, 0x93, 0x00, 0xd7, 0xe9, 0x41, 0x57, 0x19, 0xc5, 0x01,
];

/// Length of the key carried by the client's `Hello`
pub const CLIENT_HELLO_KEY_LEN: usize = 13;

/// Message type identifiers
pub mod ids {
    // client -> server
    pub const HELLO: u16 = 60002;
    pub const READY_TO_LOAD: u16 = 60014;
    pub const UPDATE_POSITION: u16 = 60022;
    pub const UPDATE_ROTATION: u16 = 60023;
    pub const SYNC_ACTION_STATE: u16 = 60024;
    pub const MAP_IS_LOADED: u16 = 60034;
    pub const RTT_PING: u16 = 60041;
    pub const LOADING_COMPLETE: u16 = 60145;

    // server -> client
    pub const SV_HELLO: u16 = 62002;
    pub const SYNC_MOVE: u16 = 62012;
    pub const SYNC_TURN: u16 = 62013;
    pub const DESTROY_ENTITY: u16 = 62014;
    pub const SYNC_ACTION: u16 = 62015;
    pub const RTT_PONG: u16 = 62016;
    pub const LOAD_MAP: u16 = 62017;
    pub const LOADING_DONE: u16 = 62018;
    pub const CREATE_ACTOR: u16 = 62025;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Distance on the ground plane, ignoring height
    pub fn planar_distance(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub upper_yaw: f32,
    pub upper_pitch: f32,
    pub bottom_yaw: f32,
}

impl Rotation {
    pub fn is_finite(&self) -> bool {
        self.upper_yaw.is_finite() && self.upper_pitch.is_finite() && self.bottom_yaw.is_finite()
    }
}

/// Per-client identifier of a replicated actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalActorId(pub u32);

impl LocalActorId {
    pub const INVALID: LocalActorId = LocalActorId(0);

    pub fn namespace(self) -> Option<LocalNamespace> {
        LocalNamespace::ALL
            .into_iter()
            .find(|ns| ns.range().contains(&self.0))
    }
}

impl fmt::Display for LocalActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Disjoint LocalActorId ranges, one allocator each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalNamespace {
    Npc,
    Monster,
    /// The client's own masters; ids are `base + class_type`
    SelfMaster,
    OtherPlayer,
}

impl LocalNamespace {
    pub const ALL: [LocalNamespace; 4] = [
        LocalNamespace::Npc,
        LocalNamespace::Monster,
        LocalNamespace::SelfMaster,
        LocalNamespace::OtherPlayer,
    ];

    pub const fn range(self) -> Range<u32> {
        match self {
            LocalNamespace::Npc => 5000..10000,
            LocalNamespace::Monster => 10000..21000,
            LocalNamespace::SelfMaster => 21000..21100,
            LocalNamespace::OtherPlayer => 21100..30000,
        }
    }

    pub const fn base(self) -> LocalActorId {
        LocalActorId(self.range().start)
    }
}

/// Kind tag carried by `CreateActor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnKind {
    Player = 1,
    Npc = 2,
    Monster = 3,
}

impl SpawnKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SpawnKind::Player),
            2 => Some(SpawnKind::Npc),
            3 => Some(SpawnKind::Monster),
            _ => None,
        }
    }
}

/// A message with a fixed type id and payload layout
pub trait NetMessage: Sized {
    const TYPE_ID: u16;

    fn write_payload(&self, writer: &mut PacketWriter);

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError>;

    /// Frames the message and appends it to `out`
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let mut writer = PacketWriter::new();
        self.write_payload(&mut writer);
        codec::encode(Self::TYPE_ID, writer.as_slice(), out)
    }

    fn decode(message: &Message) -> Result<Self, CodecError> {
        if message.type_id != Self::TYPE_ID {
            return Err(CodecError::UnexpectedType {
                expected: Self::TYPE_ID,
                actual: message.type_id,
            });
        }
        let mut reader = PacketReader::new(&message.payload);
        let value = Self::read_payload(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

macro_rules! empty_message {
    ($(#[$meta:meta])* $name:ident, $id:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl NetMessage for $name {
            const TYPE_ID: u16 = $id;

            fn write_payload(&self, _writer: &mut PacketWriter) {}

            fn read_payload(_reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
                Ok($name)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub key: [u8; CLIENT_HELLO_KEY_LEN],
}

impl NetMessage for Hello {
    const TYPE_ID: u16 = ids::HELLO;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&self.key);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            key: reader.read_array()?,
        })
    }
}

empty_message!(
    /// Client is ready to receive the map it should load
    ReadyToLoad,
    ids::READY_TO_LOAD
);
empty_message!(MapIsLoaded, ids::MAP_IS_LOADED);
empty_message!(LoadingComplete, ids::LOADING_COMPLETE);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdatePosition {
    pub local_id: LocalActorId,
    pub pos: Vec3,
    pub move_dir: Vec3,
    pub speed: f32,
}

impl NetMessage for UpdatePosition {
    const TYPE_ID: u16 = ids::UPDATE_POSITION;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer
            .write_u32(self.local_id.0)
            .write_vec3(self.pos)
            .write_vec3(self.move_dir)
            .write_f32(self.speed);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: LocalActorId(reader.read_u32()?),
            pos: reader.read_vec3()?,
            move_dir: reader.read_vec3()?,
            speed: reader.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRotation {
    pub local_id: LocalActorId,
    pub rotation: Rotation,
}

impl NetMessage for UpdateRotation {
    const TYPE_ID: u16 = ids::UPDATE_ROTATION;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.local_id.0).write_rotation(self.rotation);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: LocalActorId(reader.read_u32()?),
            rotation: reader.read_rotation()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncActionState {
    pub local_id: LocalActorId,
    pub action_state: i32,
}

impl NetMessage for SyncActionState {
    const TYPE_ID: u16 = ids::SYNC_ACTION_STATE;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.local_id.0).write_i32(self.action_state);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: LocalActorId(reader.read_u32()?),
            action_state: reader.read_i32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttPing {
    pub client_time: u32,
}

impl NetMessage for RttPing {
    const TYPE_ID: u16 = ids::RTT_PING;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.client_time);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            client_time: reader.read_u32()?,
        })
    }
}

/// Every message a client may send
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Hello(Hello),
    ReadyToLoad,
    MapIsLoaded,
    LoadingComplete,
    UpdatePosition(UpdatePosition),
    UpdateRotation(UpdateRotation),
    SyncActionState(SyncActionState),
    RttPing(RttPing),
}

impl ClientMessage {
    /// Decodes a framed message; `Ok(None)` for type ids this server ignores
    pub fn decode(message: &Message) -> Result<Option<Self>, CodecError> {
        let decoded = match message.type_id {
            ids::HELLO => ClientMessage::Hello(Hello::decode(message)?),
            ids::READY_TO_LOAD => {
                ReadyToLoad::decode(message)?;
                ClientMessage::ReadyToLoad
            }
            ids::MAP_IS_LOADED => {
                MapIsLoaded::decode(message)?;
                ClientMessage::MapIsLoaded
            }
            ids::LOADING_COMPLETE => {
                LoadingComplete::decode(message)?;
                ClientMessage::LoadingComplete
            }
            ids::UPDATE_POSITION => ClientMessage::UpdatePosition(UpdatePosition::decode(message)?),
            ids::UPDATE_ROTATION => ClientMessage::UpdateRotation(UpdateRotation::decode(message)?),
            ids::SYNC_ACTION_STATE => {
                ClientMessage::SyncActionState(SyncActionState::decode(message)?)
            }
            ids::RTT_PING => ClientMessage::RttPing(RttPing::decode(message)?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            ClientMessage::Hello(m) => m.encode(out),
            ClientMessage::ReadyToLoad => ReadyToLoad.encode(out),
            ClientMessage::MapIsLoaded => MapIsLoaded.encode(out),
            ClientMessage::LoadingComplete => LoadingComplete.encode(out),
            ClientMessage::UpdatePosition(m) => m.encode(out),
            ClientMessage::UpdateRotation(m) => m.encode(out),
            ClientMessage::SyncActionState(m) => m.encode(out),
            ClientMessage::RttPing(m) => m.encode(out),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvHello {
    pub key: [u8; 16],
}

impl Default for SvHello {
    fn default() -> Self {
        Self {
            key: SERVER_HELLO_KEY,
        }
    }
}

impl NetMessage for SvHello {
    const TYPE_ID: u16 = ids::SV_HELLO;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&self.key);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            key: reader.read_array()?,
        })
    }
}

/// Introduces an actor to one client under that client's local id
#[derive(Debug, Clone, PartialEq)]
pub struct CreateActor {
    pub local_id: LocalActorId,
    pub kind: SpawnKind,
    pub doc_id: i32,
    pub class_type: i32,
    pub faction: i32,
    pub pos: Vec3,
    pub dir: Vec3,
    pub move_dir: Vec3,
    pub speed: f32,
    pub rotation: Rotation,
    pub action_state: i32,
    pub name: String,
}

impl NetMessage for CreateActor {
    const TYPE_ID: u16 = ids::CREATE_ACTOR;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer
            .write_u32(self.local_id.0)
            .write_u8(self.kind as u8)
            .write_i32(self.doc_id)
            .write_i32(self.class_type)
            .write_i32(self.faction)
            .write_vec3(self.pos)
            .write_vec3(self.dir)
            .write_vec3(self.move_dir)
            .write_f32(self.speed)
            .write_rotation(self.rotation)
            .write_i32(self.action_state)
            .write_wstr(&self.name);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        let local_id = LocalActorId(reader.read_u32()?);
        let kind_raw = reader.read_u8()?;
        let kind = SpawnKind::from_u8(kind_raw).ok_or(CodecError::InvalidValue {
            field: "kind",
            value: kind_raw as u32,
        })?;
        Ok(Self {
            local_id,
            kind,
            doc_id: reader.read_i32()?,
            class_type: reader.read_i32()?,
            faction: reader.read_i32()?,
            pos: reader.read_vec3()?,
            dir: reader.read_vec3()?,
            move_dir: reader.read_vec3()?,
            speed: reader.read_f32()?,
            rotation: reader.read_rotation()?,
            action_state: reader.read_i32()?,
            name: reader.read_wstr()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyEntity {
    pub local_id: LocalActorId,
}

impl NetMessage for DestroyEntity {
    const TYPE_ID: u16 = ids::DESTROY_ENTITY;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.local_id.0);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: LocalActorId(reader.read_u32()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncMove {
    pub local_id: LocalActorId,
    pub pos: Vec3,
    pub move_dir: Vec3,
    pub speed: f32,
}

impl NetMessage for SyncMove {
    const TYPE_ID: u16 = ids::SYNC_MOVE;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer
            .write_u32(self.local_id.0)
            .write_vec3(self.pos)
            .write_vec3(self.move_dir)
            .write_f32(self.speed);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: LocalActorId(reader.read_u32()?),
            pos: reader.read_vec3()?,
            move_dir: reader.read_vec3()?,
            speed: reader.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncTurn {
    pub local_id: LocalActorId,
    pub rotation: Rotation,
}

impl NetMessage for SyncTurn {
    const TYPE_ID: u16 = ids::SYNC_TURN;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.local_id.0).write_rotation(self.rotation);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: LocalActorId(reader.read_u32()?),
            rotation: reader.read_rotation()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncAction {
    pub local_id: LocalActorId,
    pub action_state: i32,
}

impl NetMessage for SyncAction {
    const TYPE_ID: u16 = ids::SYNC_ACTION;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.local_id.0).write_i32(self.action_state);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            local_id: LocalActorId(reader.read_u32()?),
            action_state: reader.read_i32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttPong {
    pub client_time: u32,
    /// Milliseconds since the server started
    pub server_time: u64,
}

impl NetMessage for RttPong {
    const TYPE_ID: u16 = ids::RTT_PONG;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.client_time).write_u64(self.server_time);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            client_time: reader.read_u32()?,
            server_time: reader.read_u64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadMap {
    pub map_id: i32,
}

impl NetMessage for LoadMap {
    const TYPE_ID: u16 = ids::LOAD_MAP;

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_i32(self.map_id);
    }

    fn read_payload(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            map_id: reader.read_i32()?,
        })
    }
}

empty_message!(LoadingDone, ids::LOADING_DONE);

/// Every message the server may send
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Hello(SvHello),
    CreateActor(CreateActor),
    DestroyEntity(DestroyEntity),
    SyncMove(SyncMove),
    SyncTurn(SyncTurn),
    SyncAction(SyncAction),
    RttPong(RttPong),
    LoadMap(LoadMap),
    LoadingDone,
}

impl ServerMessage {
    /// Decodes a framed message; `Ok(None)` for type ids the client ignores
    pub fn decode(message: &Message) -> Result<Option<Self>, CodecError> {
        let decoded = match message.type_id {
            ids::SV_HELLO => ServerMessage::Hello(SvHello::decode(message)?),
            ids::CREATE_ACTOR => ServerMessage::CreateActor(CreateActor::decode(message)?),
            ids::DESTROY_ENTITY => ServerMessage::DestroyEntity(DestroyEntity::decode(message)?),
            ids::SYNC_MOVE => ServerMessage::SyncMove(SyncMove::decode(message)?),
            ids::SYNC_TURN => ServerMessage::SyncTurn(SyncTurn::decode(message)?),
            ids::SYNC_ACTION => ServerMessage::SyncAction(SyncAction::decode(message)?),
            ids::RTT_PONG => ServerMessage::RttPong(RttPong::decode(message)?),
            ids::LOAD_MAP => ServerMessage::LoadMap(LoadMap::decode(message)?),
            ids::LOADING_DONE => {
                LoadingDone::decode(message)?;
                ServerMessage::LoadingDone
            }
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}
