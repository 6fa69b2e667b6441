//! Headless player that joins, wanders and mirrors what it sees

use crate::connection::{Connection, ConnectionError};
use crate::mirror::{Mirror, MirrorError};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::{
    Hello, RttPing, UpdatePosition, UpdateRotation, CLIENT_HELLO_KEY_LEN,
};
use shared::{ClientMessage, LocalActorId, Rotation, ServerMessage, Vec3};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Replication stream is inconsistent: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

#[derive(Debug, Clone)]
pub struct BotSettings {
    /// How often a new position is sent
    pub move_interval: Duration,
    pub ping_interval: Duration,
    /// Units per second
    pub speed: f32,
    /// Mirror summary every this many moves, 0 to disable
    pub report_every: u32,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            move_interval: Duration::from_millis(100),
            ping_interval: Duration::from_secs(1),
            speed: 300.0,
            report_every: 50,
        }
    }
}

pub struct Bot {
    conn: Connection,
    mirror: Mirror,
    settings: BotSettings,
    rng: StdRng,
    started: Instant,
    map_id: Option<i32>,
    master: Option<LocalActorId>,
    heading: f32,
    last_rtt: Option<Duration>,
}

impl Bot {
    pub async fn connect(addr: &str, settings: BotSettings) -> Result<Self, BotError> {
        let conn = Connection::connect(addr).await?;
        info!("Connected to {}", addr);
        Ok(Self {
            conn,
            mirror: Mirror::new(),
            settings,
            rng: StdRng::from_entropy(),
            started: Instant::now(),
            map_id: None,
            master: None,
            heading: 0.0,
            last_rtt: None,
        })
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn map_id(&self) -> Option<i32> {
        self.map_id
    }

    pub fn master(&self) -> Option<LocalActorId> {
        self.master
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    /// Runs the join sequence up to the first sight of the bot's own master
    pub async fn handshake(&mut self, timeout: Duration) -> Result<LocalActorId, BotError> {
        self.conn
            .send(&ClientMessage::Hello(Hello {
                key: [0; CLIENT_HELLO_KEY_LEN],
            }))
            .await?;
        self.wait_for("server hello", timeout, |m| {
            matches!(m, ServerMessage::Hello(_))
        })
        .await?;

        self.conn.send(&ClientMessage::ReadyToLoad).await?;
        if let ServerMessage::LoadMap(load) = self
            .wait_for("map", timeout, |m| matches!(m, ServerMessage::LoadMap(_)))
            .await?
        {
            info!("Loading map {}", load.map_id);
            self.map_id = Some(load.map_id);
        }

        self.conn
            .send_all(&[ClientMessage::MapIsLoaded, ClientMessage::LoadingComplete])
            .await?;
        self.wait_for("loading done", timeout, |m| {
            matches!(m, ServerMessage::LoadingDone)
        })
        .await?;

        let deadline = Instant::now() + timeout;
        while self.mirror.own_master().is_none() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.conn.recv_timeout(left).await? {
                Some(message) => self.handle(&message)?,
                None => return Err(BotError::Timeout("own master")),
            }
        }

        let (id, actor) = self.mirror.own_master().ok_or(BotError::Timeout("own master"))?;
        info!("In game as {} at {:?}", id, actor.pos);
        self.master = Some(id);
        Ok(id)
    }

    async fn wait_for<P>(
        &mut self,
        what: &'static str,
        timeout: Duration,
        predicate: P,
    ) -> Result<ServerMessage, BotError>
    where
        P: FnMut(&ServerMessage) -> bool,
    {
        let mut seen = Vec::new();
        let found = self
            .conn
            .recv_until(timeout, predicate, |m| seen.push(m.clone()))
            .await?;
        for message in &seen {
            self.handle(message)?;
        }
        found.ok_or(BotError::Timeout(what))
    }

    fn handle(&mut self, message: &ServerMessage) -> Result<(), BotError> {
        if self.mirror.apply(message)? {
            return Ok(());
        }
        match message {
            ServerMessage::RttPong(pong) => {
                let now = self.elapsed_ms();
                let rtt = Duration::from_millis(u64::from(now.wrapping_sub(pong.client_time)));
                debug!("RTT {:?} (server time {}ms)", rtt, pong.server_time);
                self.last_rtt = Some(rtt);
            }
            other => debug!("Ignoring {:?}", other),
        }
        Ok(())
    }

    fn elapsed_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Wanders until `duration` elapses, or forever
    pub async fn run(&mut self, duration: Option<Duration>) -> Result<(), BotError> {
        let master = match self.master {
            Some(master) => master,
            None => return Err(BotError::Timeout("own master")),
        };
        let mut move_timer = tokio::time::interval(self.settings.move_interval);
        let mut ping_timer = tokio::time::interval(self.settings.ping_interval);
        let stop = tokio::time::sleep(duration.unwrap_or(Duration::MAX / 4));
        tokio::pin!(stop);
        let mut moves = 0u32;

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("Bot finished after {} moves", moves);
                    return Ok(());
                }
                message = self.conn.recv() => {
                    self.handle(&message?)?;
                }
                _ = move_timer.tick() => {
                    self.step(master).await?;
                    moves += 1;
                    if self.settings.report_every > 0 && moves % self.settings.report_every == 0 {
                        self.report();
                    }
                }
                _ = ping_timer.tick() => {
                    let client_time = self.elapsed_ms();
                    self.conn.send(&ClientMessage::RttPing(RttPing { client_time })).await?;
                }
            }
        }
    }

    async fn step(&mut self, master: LocalActorId) -> Result<(), BotError> {
        let Some(current) = self.mirror.get(master).map(|actor| actor.pos) else {
            warn!("Own master {} vanished from the mirror", master);
            return Ok(());
        };

        self.heading += self.rng.gen_range(-0.5..0.5);
        let move_dir = Vec3::new(self.heading.cos(), self.heading.sin(), 0.0);
        let step = self.settings.speed * self.settings.move_interval.as_secs_f32();
        let pos = Vec3::new(
            current.x + move_dir.x * step,
            current.y + move_dir.y * step,
            current.z,
        );
        self.mirror
            .set_local_motion(master, pos, move_dir, self.settings.speed);

        self.conn
            .send_all(&[
                ClientMessage::UpdatePosition(UpdatePosition {
                    local_id: master,
                    pos,
                    move_dir,
                    speed: self.settings.speed,
                }),
                ClientMessage::UpdateRotation(UpdateRotation {
                    local_id: master,
                    rotation: Rotation {
                        upper_yaw: self.heading,
                        upper_pitch: 0.0,
                        bottom_yaw: self.heading,
                    },
                }),
            ])
            .await?;
        Ok(())
    }

    fn report(&self) {
        info!(
            "Mirror holds {} actor(s), RTT {:?}",
            self.mirror.len(),
            self.last_rtt
        );
        for (id, actor) in self.mirror.iter() {
            debug!(
                "  {} {:?} '{}' at ({:.1}, {:.1}, {:.1})",
                id, actor.kind, actor.name, actor.pos.x, actor.pos.y, actor.pos.z
            );
        }
    }
}
