//! Wire protocol shared by the arena server and its clients
//!
//! - [`codec`]: `{size, type}` framing over a byte stream, with carry-over of
//!   partial frames
//! - [`cursor`]: bounds-checked little-endian payload readers and writers
//! - [`protocol`]: message type ids, local actor id namespaces and typed
//!   messages for both directions

pub mod codec;
pub mod cursor;
pub mod protocol;

pub use codec::{decode, encode, CodecError, Decoded, FrameBuffer, Message, NetHeader};
pub use cursor::{PacketReader, PacketWriter};
pub use protocol::{
    ClientMessage, LocalActorId, LocalNamespace, NetMessage, Rotation, ServerMessage, SpawnKind,
    Vec3,
};

/// Default simulation rate of the play server
pub const DEFAULT_TICK_RATE: u32 = 120;

/// Default TCP port of the play server
pub const DEFAULT_PORT: u16 = 11900;
