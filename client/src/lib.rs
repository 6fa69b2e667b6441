//! # Arena Client Library
//!
//! This library provides a headless client for the arena play server. It is
//! used by the load-testing bot binary and by the workspace integration tests
//! to drive the server over real TCP connections.
//!
//! ## Architecture Overview
//!
//! The server owns the world. A client only ever sees actors through the ids
//! the server assigned to it, so the client keeps a mirror keyed by those ids
//! and applies the server's replication stream to it in order.
//!
//! ### Framing
//! Messages arrive as a byte stream. The connection keeps a carry-over buffer
//! so that a message split across reads is reassembled before decoding, and
//! message types the client does not know are skipped.
//!
//! ### Mirroring
//! `CreateActor` inserts, `DestroyEntity` removes, and the sync messages
//! update position, rotation and action state. A spawn for an id still in use
//! or an update for an id never spawned is reported as an error, which makes
//! the mirror a direct check of the server's id bookkeeping.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! - TCP stream with message reassembly
//! - Batched sends and receive helpers with timeouts
//!
//! ### Mirror Module (`mirror`)
//! - Client-side actor table keyed by local actor id
//! - Lookup of the client's own master
//!
//! ### Bot Module (`bot`)
//! - Join sequence from hello to the first sight of the own master
//! - Random wandering, round-trip pings and periodic mirror reports
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::bot::{Bot, BotSettings};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bot = Bot::connect("127.0.0.1:11900", BotSettings::default()).await?;
//!     let master = bot.handshake(Duration::from_secs(5)).await?;
//!     println!("Playing as {}", master);
//!
//!     bot.run(Some(Duration::from_secs(30))).await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod connection;
pub mod mirror;
