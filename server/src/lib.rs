//! # Arena Play Server Library
//!
//! This library provides the authoritative server for the arena game. It
//! accepts TCP clients, decodes the length-prefixed binary protocol, applies
//! client messages to the world on a fixed tick and sends every client its
//! own delta view of the world, named with ids private to that client.
//!
//! ## Core Responsibilities
//!
//! ### Connection Handling
//! A fixed-capacity table of connection slots holds every client. Each slot
//! has its own locks for received and outgoing bytes, so one busy client never
//! stalls another. Handles carry a generation, so completions and messages
//! for a connection that has since gone away are recognised and dropped.
//!
//! ### Authoritative Simulation
//! The world store owns every actor (player masters and NPCs). It is mutated
//! only from the simulation loop, which owns it outright and takes no locks.
//!
//! ### Replication
//! Every tick the world is copied into a frame. The replication engine diffs
//! that frame against what each client already knows and queues spawn,
//! update and destroy messages. Each client gets its own local actor id
//! namespace, and an id freed by a destroy is only reused after the destroy
//! has gone out.
//!
//! ## Architecture Design
//!
//! ### Transport Tasks and a Single Simulation Loop
//! Per connection, one tokio task reads and one writes. They only touch that
//! slot's buffers. The simulation loop drains all received bytes once per
//! tick, parses and dispatches them without holding any transport lock, runs
//! replication and hands the encoded replies back to the slots.
//!
//! ### Tick Scheduling
//! Ticks follow deadlines on the monotonic clock. Drift is measured each tick,
//! and deadlines missed during a stall are skipped and reported.
//!
//! ## Module Organization
//!
//! ### Connection Table Module (`connection_table`)
//! - First-fit slot allocation with capacity enforcement
//! - Receive cap; a client that floods it is disconnected
//! - Idempotent disconnects and generation bumps on slot reuse
//!
//! ### Transport Module (`transport`)
//! - TCP listener and per-connection reader/writer tasks
//!
//! ### Mailbox Module (`mailbox`)
//! - Batched byte hand-off between transport and simulation
//! - Reassembly of messages split across deliveries
//!
//! ### World, Player and Frame Modules (`world`, `player`, `frame`)
//! - Actor store, per-client sessions with their state machine, tick snapshots
//!
//! ### Replication Modules (`replication`, `local_ids`)
//! - Double-buffered frame diffing and per-client local id allocation
//!
//! ### Game and Dispatch Modules (`game`, `dispatch`)
//! - Per-tick pipeline and message handlers
//!
//! ### Network Module (`network`)
//! - The `Server` that binds, runs the tick loop and shuts down cleanly
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::world::MapSpawnList;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         listen_address: "127.0.0.1:11900".into(),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::bind(config, MapSpawnList::default()).await?;
//!
//!     // Ticks until ctrl-c, then disconnects every client
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_table;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod game;
pub mod local_ids;
pub mod mailbox;
pub mod network;
pub mod player;
pub mod replication;
pub mod tick;
pub mod trace;
pub mod transport;
pub mod world;
