use crate::config::ServerConfig;
use crate::connection_table::{ClientHandle, DisconnectReason, TableEvent};
use crate::mailbox::{Inbox, Outbox, ReceiveBatch};
use crate::player::{PlayerRegistry, PlayerSession};
use crate::replication::{RadiusFilter, ReplicationEngine, ReplicationStats};
use crate::trace::{Direction, NetworkTracer};
use crate::world::{MapSpawnList, World};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::codec::encode_message;
use std::net::SocketAddr;
use std::time::Instant;

/// The simulation: world, players and replication, owned by one loop
pub struct Game {
    pub(crate) world: World,
    pub(crate) players: PlayerRegistry,
    pub(crate) replication: ReplicationEngine,
    inbox: Inbox,
    pub(crate) outbox: Outbox,
    disconnects: Vec<(ClientHandle, DisconnectReason)>,
    tick: u64,
    started: Instant,
    handshake_timeout_ticks: Option<u64>,
    pub(crate) default_class_type: i32,
    pub(crate) dev_mode: bool,
    pub(crate) rng: StdRng,
    tracer: Option<NetworkTracer>,
}

impl Game {
    pub fn new(config: &ServerConfig, map: &MapSpawnList) -> Result<Self, Box<dyn std::error::Error>> {
        let mut world = World::new();
        world.load_map(map)?;

        let replication = match config.interest_radius {
            Some(radius) => ReplicationEngine::with_filter(Box::new(RadiusFilter::new(radius))),
            None => ReplicationEngine::new(),
        };
        let tracer = if config.trace_network {
            info!("Recording network trace to {}", config.trace_path.display());
            Some(NetworkTracer::create(&config.trace_path)?)
        } else {
            None
        };

        Ok(Self {
            world,
            players: PlayerRegistry::new(),
            replication,
            inbox: Inbox::new(config.max_message_size),
            outbox: Outbox::new(),
            disconnects: Vec::new(),
            tick: 0,
            started: Instant::now(),
            handshake_timeout_ticks: config
                .handshake_timeout()
                .map(|timeout| (timeout.as_secs_f64() * f64::from(config.tick_rate)).ceil() as u64),
            default_class_type: config.default_class_type,
            dev_mode: config.dev_mode,
            rng: StdRng::from_entropy(),
            tracer,
        })
    }

    /// Same as [`Game::new`] with a fixed spawn-point RNG
    pub fn with_seed(
        config: &ServerConfig,
        map: &MapSpawnList,
        seed: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut game = Self::new(config, map)?;
        game.rng = StdRng::seed_from_u64(seed);
        Ok(game)
    }

    /// Applies a connection table lifecycle event
    pub fn on_event(&mut self, event: TableEvent) {
        match event {
            TableEvent::Connected { handle, addr } => self.add_player(handle, addr),
            TableEvent::Disconnected { handle, reason } => {
                if self.remove_player(handle) {
                    debug!("Session for client {} ended ({:?})", handle, reason);
                }
            }
        }
    }

    pub fn add_player(&mut self, handle: ClientHandle, addr: SocketAddr) {
        let session = PlayerSession::new(handle, addr, self.tick, self.default_class_type);
        if self.players.insert(session) {
            debug!("Session for client {} from {} started", handle, addr);
        } else {
            error!("Client {} connected twice", handle);
        }
    }

    /// Drops a client's session, master actor and replication state
    pub fn remove_player(&mut self, handle: ClientHandle) -> bool {
        let Some(session) = self.players.remove(handle) else {
            return false;
        };
        if let Some(uid) = session.master {
            self.world.destroy_actor(uid);
        }
        self.replication.remove_client(handle);
        self.inbox.remove(handle);
        self.outbox.discard(handle);
        true
    }

    /// Asks the network loop to close a client; its session ends now
    pub fn request_disconnect(&mut self, handle: ClientHandle, reason: DisconnectReason) {
        if self.remove_player(handle) {
            warn!("Disconnecting client {} ({:?})", handle, reason);
            self.disconnects.push((handle, reason));
        }
    }

    /// Feeds one client's received bytes through framing and dispatch
    pub fn ingest(&mut self, handle: ClientHandle, bytes: &[u8]) {
        if self.players.get(handle).is_none() {
            debug!("Dropping {} bytes for departed client {}", bytes.len(), handle);
            return;
        }
        let messages = match self.inbox.push(handle, bytes) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Client {} sent an unframeable stream: {}", handle, e);
                self.request_disconnect(handle, DisconnectReason::ProtocolViolation);
                return;
            }
        };
        for message in messages {
            if self.tracer.is_some() {
                let mut framed = Vec::with_capacity(message.size());
                if encode_message(&message, &mut framed).is_ok() {
                    self.trace(handle, Direction::Inbound, &framed);
                }
            }
            self.handle_message(handle, &message);
            if self.players.get(handle).is_none() {
                break;
            }
        }
    }

    pub fn ingest_batch(&mut self, batch: &ReceiveBatch) {
        for (handle, bytes) in batch.iter() {
            self.ingest(handle, bytes);
        }
    }

    /// Runs one simulation tick after the inbound messages were applied
    pub fn update(&mut self) -> ReplicationStats {
        self.expire_handshakes();

        self.replication.begin_frame(&self.world, &self.players);
        let stats = self.replication.replicate(&mut self.outbox);
        self.replication.frame_end();

        self.tick += 1;
        stats
    }

    fn expire_handshakes(&mut self) {
        let Some(limit) = self.handshake_timeout_ticks else {
            return;
        };
        let expired: Vec<ClientHandle> = self
            .players
            .iter()
            .filter(|s| !s.greeted && self.tick.saturating_sub(s.connected_tick) >= limit)
            .map(|s| s.handle)
            .collect();
        for handle in expired {
            self.request_disconnect(handle, DisconnectReason::HandshakeTimeout);
        }
    }

    /// This tick's outgoing bytes, one batch per client
    pub fn take_outbox(&mut self) -> Vec<(ClientHandle, Vec<u8>)> {
        let batches = self.outbox.take();
        if self.tracer.is_some() {
            for (handle, bytes) in &batches {
                self.trace(*handle, Direction::Outbound, bytes);
            }
            if let Some(Err(e)) = self.tracer.as_mut().map(NetworkTracer::flush) {
                error!("Network trace flush failed, disabling it: {}", e);
                self.tracer = None;
            }
        }
        batches
    }

    fn trace(&mut self, handle: ClientHandle, direction: Direction, bytes: &[u8]) {
        let Some(tracer) = self.tracer.as_mut() else {
            return;
        };
        if let Err(e) = tracer.record(self.tick, handle, direction, bytes) {
            error!("Network trace failed, disabling it: {}", e);
            self.tracer = None;
        }
    }

    pub fn take_disconnects(&mut self) -> Vec<(ClientHandle, DisconnectReason)> {
        std::mem::take(&mut self.disconnects)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Milliseconds since the game was created
    pub fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    pub fn player(&self, handle: ClientHandle) -> Option<&PlayerSession> {
        self.players.get(handle)
    }

    pub fn replication(&self) -> &ReplicationEngine {
        &self.replication
    }
}
