//! Fixed-capacity connection slots shared by the transport tasks and the
//! simulation loop
//!
//! This module handles the server-side bookkeeping of connected sockets:
//! - Slot allocation on accept (first-fit) and capacity enforcement
//! - Generation-tagged [`ClientHandle`]s so a reused slot never aliases an
//!   old connection
//! - Per-slot receive accumulation and pending/in-flight send buffers, each
//!   behind that slot's own lock
//! - Idempotent disconnects that return a slot to `Free` only once its I/O
//!   tasks have let go of it
//!
//! The table never touches sockets. Reader and writer tasks in
//! [`crate::transport`] report completions through [`ConnectionTable::complete_read`],
//! [`ConnectionTable::begin_write`] and [`ConnectionTable::complete_write`],
//! and every one of those checks the handle's generation first, so results
//! that arrive for a slot that has since been freed are discarded.

use crate::error::TransportError;
use crate::mailbox::ReceiveBatch;
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch, Notify};

/// Default number of slots
pub const DEFAULT_CAPACITY: usize = 256;

/// Default cap on bytes buffered for one client between ticks
pub const DEFAULT_RECV_CAPACITY: usize = 32 * 1024 * 4;

/// Identity of one connection: slot index plus the slot's generation when
/// the connection was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientHandle {
    index: u32,
    generation: u32,
}

impl ClientHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Free,
    Accepting,
    Active,
    Disconnecting,
}

/// Why a connection was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed its side (zero-length read)
    PeerClosed,
    /// The receive buffer went over its cap
    ReceiveOverflow,
    /// A socket read or write failed
    SocketError,
    /// The client sent bytes that cannot be framed
    ProtocolViolation,
    /// The client never completed the handshake
    HandshakeTimeout,
    /// The server is shutting down
    Shutdown,
}

/// Lifecycle notifications for the simulation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEvent {
    Connected {
        handle: ClientHandle,
        addr: SocketAddr,
    },
    Disconnected {
        handle: ClientHandle,
        reason: DisconnectReason,
    },
}

/// Result of applying one read completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were buffered; `buffered` is the slot's total pending input
    Appended { buffered: usize },
    /// Zero-length read; the slot was disconnected
    Closed,
    /// The receive cap was exceeded; the slot was disconnected
    Overflow,
    /// The handle no longer names a live connection; bytes discarded
    Stale,
}

/// Counters since the table was created
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub accepted: u64,
    pub refused: u64,
    pub disconnected: u64,
    pub overflowed: u64,
}

#[derive(Default)]
struct StatCounters {
    accepted: AtomicU64,
    refused: AtomicU64,
    disconnected: AtomicU64,
    overflowed: AtomicU64,
}

struct SlotControl {
    status: SlotStatus,
    generation: u32,
    peer: Option<SocketAddr>,
    /// Reader/writer tasks still holding the slot
    attached_io: u8,
    shutdown: Option<watch::Sender<bool>>,
}

#[derive(Default)]
struct SendBuffers {
    pending: Vec<u8>,
    in_flight: Vec<u8>,
    /// Length of the buffer currently lent to the writer task
    in_flight_len: usize,
    writing: bool,
}

struct Slot {
    control: Mutex<SlotControl>,
    recv: Mutex<Vec<u8>>,
    send: Mutex<SendBuffers>,
    writer_wake: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            control: Mutex::new(SlotControl {
                status: SlotStatus::Free,
                generation: 0,
                peer: None,
                attached_io: 0,
                shutdown: None,
            }),
            recv: Mutex::new(Vec::new()),
            send: Mutex::new(SendBuffers::default()),
            writer_wake: Notify::new(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Slot arena for every connection the server holds
///
/// Shared as `Arc<ConnectionTable>` between the listener, the per-slot I/O
/// tasks and the simulation loop. No operation blocks on I/O; each one holds
/// at most one slot's locks, always in the order control, receive, send.
pub struct ConnectionTable {
    slots: Box<[Slot]>,
    recv_capacity: usize,
    events: mpsc::UnboundedSender<TableEvent>,
    stats: StatCounters,
}

impl ConnectionTable {
    /// Creates a table with `capacity` slots and returns the receiver of its
    /// lifecycle events
    pub fn new(
        capacity: usize,
        recv_capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<TableEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let slots = (0..capacity).map(|_| Slot::new()).collect();
        let table = Self {
            slots,
            recv_capacity,
            events,
            stats: StatCounters::default(),
        };
        (table, events_rx)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn recv_capacity(&self) -> usize {
        self.recv_capacity
    }

    fn slot(&self, handle: ClientHandle) -> Option<&Slot> {
        self.slots.get(handle.index as usize)
    }

    /// Locks the slot's control block if `handle` is its current connection
    fn control_for(&self, handle: ClientHandle) -> Option<(&Slot, MutexGuard<'_, SlotControl>)> {
        let slot = self.slot(handle)?;
        let control = lock(&slot.control);
        if control.generation != handle.generation || control.status == SlotStatus::Free {
            return None;
        }
        Some((slot, control))
    }

    fn emit(&self, event: TableEvent) {
        // Nobody listening is fine, e.g. in tools that only inspect the table
        let _ = self.events.send(event);
    }

    /// Claims the first free slot for a new connection
    ///
    /// The slot is left `Accepting` until [`ConnectionTable::activate`].
    pub fn reserve(&self, addr: SocketAddr) -> Result<ClientHandle, TransportError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut control = lock(&slot.control);
            if control.status != SlotStatus::Free {
                continue;
            }
            let (shutdown, _) = watch::channel(false);
            control.status = SlotStatus::Accepting;
            control.peer = Some(addr);
            control.attached_io = 0;
            control.shutdown = Some(shutdown);
            lock(&slot.recv).clear();
            let mut send = lock(&slot.send);
            send.pending.clear();
            send.in_flight.clear();
            send.in_flight_len = 0;
            send.writing = false;
            return Ok(ClientHandle::new(index as u32, control.generation));
        }

        self.stats.refused.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Refusing connection from {}: all {} slots in use",
            addr,
            self.capacity()
        );
        Err(TransportError::CapacityExhausted {
            capacity: self.capacity(),
        })
    }

    /// Registers one I/O task on the slot and returns its shutdown signal
    ///
    /// Returns `None` if the connection is already gone; the task must not
    /// start in that case.
    pub fn attach_io(&self, handle: ClientHandle) -> Option<watch::Receiver<bool>> {
        let (_, mut control) = self.control_for(handle)?;
        if !matches!(control.status, SlotStatus::Accepting | SlotStatus::Active) {
            return None;
        }
        let receiver = control.shutdown.as_ref()?.subscribe();
        control.attached_io += 1;
        Some(receiver)
    }

    /// Marks a reserved slot live and announces it to the simulation
    pub fn activate(&self, handle: ClientHandle) -> bool {
        let Some((_, mut control)) = self.control_for(handle) else {
            return false;
        };
        if control.status != SlotStatus::Accepting {
            return false;
        }
        control.status = SlotStatus::Active;
        let addr = control.peer;
        drop(control);

        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        if let Some(addr) = addr {
            info!("Client {} connected from {}", handle, addr);
            self.emit(TableEvent::Connected { handle, addr });
        }
        true
    }

    /// Reserves and activates a slot in one step, for callers without I/O tasks
    pub fn accept(&self, addr: SocketAddr) -> Result<ClientHandle, TransportError> {
        let handle = self.reserve(addr)?;
        self.activate(handle);
        Ok(handle)
    }

    /// Closes a connection
    ///
    /// No-op (returns false) for stale handles and slots already
    /// disconnecting. Buffers are cleared with their storage kept. The slot
    /// becomes `Free` once every attached I/O task has detached.
    pub fn disconnect(&self, handle: ClientHandle, reason: DisconnectReason) -> bool {
        let Some((slot, mut control)) = self.control_for(handle) else {
            return false;
        };
        if control.status == SlotStatus::Disconnecting {
            return false;
        }

        control.status = SlotStatus::Disconnecting;
        if let Some(shutdown) = control.shutdown.as_ref() {
            shutdown.send_replace(true);
        }
        lock(&slot.recv).clear();
        {
            let mut send = lock(&slot.send);
            send.pending.clear();
            send.in_flight.clear();
            send.in_flight_len = 0;
        }
        let peer = control.peer;
        if control.attached_io == 0 {
            Self::release(&mut control);
        }
        drop(control);
        slot.writer_wake.notify_one();

        self.stats.disconnected.fetch_add(1, Ordering::Relaxed);
        match peer {
            Some(addr) => info!("Client {} ({}) disconnected: {:?}", handle, addr, reason),
            None => info!("Client {} disconnected: {:?}", handle, reason),
        }
        self.emit(TableEvent::Disconnected { handle, reason });
        true
    }

    /// Called by an I/O task as it exits
    pub fn detach_io(&self, handle: ClientHandle) {
        let Some((_, mut control)) = self.control_for(handle) else {
            return;
        };
        control.attached_io = control.attached_io.saturating_sub(1);
        if control.attached_io == 0 && control.status == SlotStatus::Disconnecting {
            Self::release(&mut control);
        }
    }

    fn release(control: &mut SlotControl) {
        control.status = SlotStatus::Free;
        control.generation = control.generation.wrapping_add(1);
        control.peer = None;
        control.shutdown = None;
    }

    /// Applies a completed read to the slot's receive buffer
    pub fn complete_read(&self, handle: ClientHandle, bytes: &[u8]) -> ReadOutcome {
        let Some((slot, control)) = self.control_for(handle) else {
            return ReadOutcome::Stale;
        };
        if control.status != SlotStatus::Active {
            return ReadOutcome::Stale;
        }

        if bytes.is_empty() {
            drop(control);
            self.disconnect(handle, DisconnectReason::PeerClosed);
            return ReadOutcome::Closed;
        }

        let mut recv = lock(&slot.recv);
        if recv.len() + bytes.len() > self.recv_capacity {
            let buffered = recv.len();
            drop(recv);
            drop(control);
            warn!(
                "Client {} exceeded receive capacity ({} buffered + {} incoming > {})",
                handle,
                buffered,
                bytes.len(),
                self.recv_capacity
            );
            self.stats.overflowed.fetch_add(1, Ordering::Relaxed);
            self.disconnect(handle, DisconnectReason::ReceiveOverflow);
            return ReadOutcome::Overflow;
        }
        recv.extend_from_slice(bytes);
        ReadOutcome::Appended {
            buffered: recv.len(),
        }
    }

    /// Queues bytes for a client; never blocks
    ///
    /// Returns false if the handle is stale or the slot is not active.
    pub fn send(&self, handle: ClientHandle, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return self.status(handle) == Some(SlotStatus::Active);
        }
        let Some((slot, control)) = self.control_for(handle) else {
            return false;
        };
        if control.status != SlotStatus::Active {
            return false;
        }
        lock(&slot.send).pending.extend_from_slice(bytes);
        drop(control);
        slot.writer_wake.notify_one();
        true
    }

    /// Moves pending bytes in flight if no write is outstanding
    ///
    /// The returned buffer must come back through
    /// [`ConnectionTable::complete_write`] once written.
    pub fn begin_write(&self, handle: ClientHandle) -> Option<Vec<u8>> {
        let (slot, control) = self.control_for(handle)?;
        if control.status != SlotStatus::Active {
            return None;
        }
        let mut send = lock(&slot.send);
        if send.writing || send.pending.is_empty() {
            return None;
        }
        let buffers = &mut *send;
        std::mem::swap(&mut buffers.pending, &mut buffers.in_flight);
        buffers.writing = true;
        buffers.in_flight_len = buffers.in_flight.len();
        Some(std::mem::take(&mut buffers.in_flight))
    }

    /// Clears the in-flight buffer after its write finished
    pub fn complete_write(&self, handle: ClientHandle, mut written: Vec<u8>) {
        let Some((slot, _control)) = self.control_for(handle) else {
            return;
        };
        let mut send = lock(&slot.send);
        written.clear();
        send.in_flight = written;
        send.in_flight_len = 0;
        send.writing = false;
    }

    /// Takes every active slot's received bytes into `batch`
    ///
    /// Returns the number of clients that had data.
    pub fn drain_received(&self, batch: &mut ReceiveBatch) -> usize {
        let mut clients = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            let control = lock(&slot.control);
            if control.status != SlotStatus::Active {
                continue;
            }
            let mut recv = lock(&slot.recv);
            if recv.is_empty() {
                continue;
            }
            batch.push(ClientHandle::new(index as u32, control.generation), &recv);
            recv.clear();
            clients += 1;
        }
        clients
    }

    /// Wakes when the slot may have bytes to write
    pub(crate) fn writer_wake(&self, handle: ClientHandle) -> Option<&Notify> {
        self.slot(handle).map(|slot| &slot.writer_wake)
    }

    /// Current status of the handle's connection, `None` if stale
    pub fn status(&self, handle: ClientHandle) -> Option<SlotStatus> {
        self.control_for(handle).map(|(_, control)| control.status)
    }

    /// Status of a slot regardless of generation
    pub fn slot_status(&self, index: usize) -> Option<SlotStatus> {
        self.slots.get(index).map(|slot| lock(&slot.control).status)
    }

    pub fn peer_addr(&self, handle: ClientHandle) -> Option<SocketAddr> {
        self.control_for(handle).and_then(|(_, control)| control.peer)
    }

    /// Bytes waiting in the slot's receive buffer
    pub fn buffered(&self, handle: ClientHandle) -> usize {
        match self.control_for(handle) {
            Some((slot, _control)) => lock(&slot.recv).len(),
            None => 0,
        }
    }

    /// Bytes queued plus bytes lent to the writer and not yet completed
    pub fn pending_send(&self, handle: ClientHandle) -> usize {
        match self.control_for(handle) {
            Some((slot, _control)) => {
                let send = lock(&slot.send);
                send.pending.len() + send.in_flight_len
            }
            None => 0,
        }
    }

    /// Number of slots with a live connection
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| lock(&slot.control).status == SlotStatus::Active)
            .count()
    }

    /// Handles of every live connection
    pub fn active_handles(&self) -> Vec<ClientHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let control = lock(&slot.control);
                (control.status == SlotStatus::Active)
                    .then(|| ClientHandle::new(index as u32, control.generation))
            })
            .collect()
    }

    /// Disconnects every live connection
    pub fn disconnect_all(&self, reason: DisconnectReason) -> usize {
        let handles = self.active_handles();
        debug!("Disconnecting {} clients: {:?}", handles.len(), reason);
        handles
            .into_iter()
            .filter(|handle| self.disconnect(*handle, reason))
            .count()
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            refused: self.stats.refused.load(Ordering::Relaxed),
            disconnected: self.stats.disconnected.load(Ordering::Relaxed),
            overflowed: self.stats.overflowed.load(Ordering::Relaxed),
        }
    }
}
