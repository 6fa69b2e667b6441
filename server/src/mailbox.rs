//! Byte hand-off between the transport and the simulation tick
//!
//! Inbound, [`ReceiveBatch`] is one contiguous buffer of
//! `{index u32, generation u32, len u32}` headers (little-endian), each
//! followed by `len` bytes a client sent since the previous tick. The
//! connection table fills it under per-slot locks; the simulation walks it
//! after every lock has been released.
//!
//! [`Inbox`] keeps the tail of a message that was split across deliveries
//! until the rest arrives. [`Outbox`] collects each client's encoded replies
//! for one tick so they reach the connection table as one write per client.

use crate::connection_table::ClientHandle;
use log::{error, warn};
use shared::{CodecError, FrameBuffer, Message, NetMessage};
use std::collections::{BTreeMap, HashMap};

const CHUNK_HEADER_SIZE: usize = 12;

/// Received bytes of every client for one tick
#[derive(Debug, Default, Clone)]
pub struct ReceiveBatch {
    buf: Vec<u8>,
}

impl ReceiveBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one client's chunk
    pub fn push(&mut self, handle: ClientHandle, bytes: &[u8]) {
        self.buf.reserve(CHUNK_HEADER_SIZE + bytes.len());
        self.buf.extend_from_slice(&handle.index().to_le_bytes());
        self.buf.extend_from_slice(&handle.generation().to_le_bytes());
        self.buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(bytes);
    }

    /// Empties the batch, keeping its allocation for the next tick
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encoded size including chunk headers
    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            buf: &self.buf,
            pos: 0,
        }
    }
}

/// Walks the chunks of a [`ReceiveBatch`] in the order they were pushed
pub struct BatchIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = (ClientHandle, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.buf[self.pos..];
        if rest.len() < CHUNK_HEADER_SIZE {
            debug_assert!(rest.is_empty(), "truncated batch header");
            return None;
        }
        let handle = ClientHandle::new(read_u32(&rest[0..4]), read_u32(&rest[4..8]));
        let len = read_u32(&rest[8..12]) as usize;
        let body = &rest[CHUNK_HEADER_SIZE..];
        if body.len() < len {
            error!(
                "Receive batch chunk for {} claims {} bytes, {} left",
                handle,
                len,
                body.len()
            );
            self.pos = self.buf.len();
            return None;
        }
        self.pos += CHUNK_HEADER_SIZE + len;
        Some((handle, &body[..len]))
    }
}

/// Per-client reassembly of frames split across ticks
#[derive(Debug)]
pub struct Inbox {
    streams: HashMap<ClientHandle, FrameBuffer>,
    max_message_size: usize,
}

impl Inbox {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            streams: HashMap::new(),
            max_message_size,
        }
    }

    /// Feeds a client's new bytes and returns the messages they complete
    ///
    /// On error the client's partial data is dropped; the stream can no
    /// longer be trusted and the caller should disconnect it.
    pub fn push(&mut self, handle: ClientHandle, bytes: &[u8]) -> Result<Vec<Message>, CodecError> {
        let max = self.max_message_size;
        let stream = self
            .streams
            .entry(handle)
            .or_insert_with(|| FrameBuffer::new(max));
        let result = stream.push(bytes);
        if result.is_err() {
            self.streams.remove(&handle);
        }
        result
    }

    /// Bytes of incomplete frames held for the client
    pub fn pending(&self, handle: ClientHandle) -> usize {
        self.streams
            .get(&handle)
            .map(FrameBuffer::pending_len)
            .unwrap_or(0)
    }

    pub fn remove(&mut self, handle: ClientHandle) {
        self.streams.remove(&handle);
    }
}

/// Encoded replies for each client, flushed once per tick
#[derive(Debug, Default)]
pub struct Outbox {
    batches: BTreeMap<ClientHandle, Vec<u8>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `message` onto the client's batch
    pub fn push<M: NetMessage>(&mut self, handle: ClientHandle, message: &M) {
        let batch = self.batches.entry(handle).or_default();
        if let Err(e) = message.encode(batch) {
            warn!(
                "Dropping message {} for client {}: {}",
                M::TYPE_ID,
                handle,
                e
            );
        }
    }

    /// Appends already framed bytes
    pub fn push_raw(&mut self, handle: ClientHandle, bytes: &[u8]) {
        self.batches
            .entry(handle)
            .or_default()
            .extend_from_slice(bytes);
    }

    pub fn bytes_for(&self, handle: ClientHandle) -> &[u8] {
        self.batches.get(&handle).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Forgets anything queued for a client that is going away
    pub fn discard(&mut self, handle: ClientHandle) {
        self.batches.remove(&handle);
    }

    pub fn is_empty(&self) -> bool {
        self.batches.values().all(Vec::is_empty)
    }

    /// Takes every non-empty batch, ordered by handle
    pub fn take(&mut self) -> Vec<(ClientHandle, Vec<u8>)> {
        std::mem::take(&mut self.batches)
            .into_iter()
            .filter(|(_, bytes)| !bytes.is_empty())
            .collect()
    }
}
