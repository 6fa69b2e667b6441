//! Server loop tying the transport to the simulation tick

use crate::config::ServerConfig;
use crate::connection_table::{ConnectionTable, DisconnectReason, TableEvent};
use crate::game::Game;
use crate::mailbox::ReceiveBatch;
use crate::replication::ReplicationStats;
use crate::tick::TickScheduler;
use crate::transport::Transport;
use crate::world::MapSpawnList;
use log::{debug, error, info};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Seconds between periodic statistics lines
const STATS_INTERVAL_SECS: u64 = 5;

/// Main server coordinating networking and game simulation
pub struct Server {
    config: ServerConfig,
    table: Arc<ConnectionTable>,
    events: mpsc::UnboundedReceiver<TableEvent>,
    transport: Transport,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    game: Game,
    batch: ReceiveBatch,
}

impl Server {
    /// Validates the configuration, loads the map and binds the listener
    pub async fn bind(
        config: ServerConfig,
        map: MapSpawnList,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let (table, events) = ConnectionTable::new(config.max_clients, config.recv_buffer_capacity);
        let table = Arc::new(table);
        let listener = TcpListener::bind(config.socket_addr()?).await?;
        let local_addr = listener.local_addr()?;
        let game = Game::new(&config, &map)?;
        info!(
            "Server listening on {} ({} slots, {} Hz)",
            local_addr, config.max_clients, config.tick_rate
        );

        Ok(Self {
            transport: Transport::new(Arc::clone(&table)),
            table,
            events,
            listener: Some(listener),
            local_addr,
            game,
            batch: ReceiveBatch::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Runs until ctrl-c
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs ticks until `shutdown` completes, then closes every connection
    pub async fn run_until<F: Future>(
        &mut self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let listener = self.listener.take().ok_or("server is already running")?;
        let transport = self.transport.clone();
        let accept_task = tokio::spawn(async move {
            if let Err(e) = transport.run_listener(listener).await {
                error!("Listener stopped: {}", e);
            }
        });

        let mut scheduler = TickScheduler::new(self.config.tick_rate, Instant::now());
        let stats_every = u64::from(self.config.tick_rate) * STATS_INTERVAL_SECS;
        tokio::pin!(shutdown);
        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
                info = scheduler.wait() => {
                    let stats = self.step();
                    if info.tick % stats_every == 0 {
                        let table = self.table.stats();
                        debug!(
                            "Tick {}: {} clients, {} actors, {} viewers, max drift {:?}, {} skipped, {} accepted, {} refused",
                            self.game.tick(),
                            self.table.active_count(),
                            self.game.world().len(),
                            stats.viewers,
                            scheduler.take_max_drift(),
                            scheduler.skipped_total(),
                            table.accepted,
                            table.refused
                        );
                    }
                }
            }
        }

        accept_task.abort();
        let closed = self.table.disconnect_all(DisconnectReason::Shutdown);
        info!("Closed {} connection(s)", closed);
        Ok(())
    }

    /// One tick: mailbox in, dispatch, replication, mailbox out
    pub fn step(&mut self) -> ReplicationStats {
        // Drain bytes before events, so every chunk's Connected is already queued
        self.batch.clear();
        self.table.drain_received(&mut self.batch);
        while let Ok(event) = self.events.try_recv() {
            self.game.on_event(event);
        }
        self.game.ingest_batch(&self.batch);

        let stats = self.game.update();

        for (handle, bytes) in self.game.take_outbox() {
            if !self.table.send(handle, &bytes) {
                debug!("Dropped {} bytes for closed client {}", bytes.len(), handle);
            }
        }
        for (handle, reason) in self.game.take_disconnects() {
            self.table.disconnect(handle, reason);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{Hello, SvHello};
    use shared::{decode, ClientMessage, NetMessage};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen_address: "127.0.0.1:0".into(),
            max_clients: 4,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            tick_rate: 0,
            ..test_config()
        };
        assert!(Server::bind(config, MapSpawnList::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_hello_round_trip_over_tcp() {
        let mut server = Server::bind(test_config(), MapSpawnList::default())
            .await
            .unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(async move {
            let _ = server.run_until(stop_rx).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut bytes = Vec::new();
        ClientMessage::Hello(Hello { key: [3; 13] })
            .encode(&mut bytes)
            .unwrap();
        stream.write_all(&bytes).await.unwrap();

        let mut reply = [0u8; 20];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        let decoded = decode(&reply, 1024).unwrap();
        assert_eq!(
            SvHello::decode(&decoded.messages[0]).unwrap(),
            SvHello::default()
        );

        stop_tx.send(()).unwrap();
        running.await.unwrap();
        let mut rest = Vec::new();
        let closed = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await;
        assert!(matches!(closed, Ok(Ok(0))));
    }
}
