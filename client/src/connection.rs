//! TCP connection to the play server

use log::debug;
use shared::codec::MAX_FRAME_SIZE;
use shared::{ClientMessage, CodecError, FrameBuffer, ServerMessage};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Server closed the connection")]
    Closed,
}

pub struct Connection {
    stream: TcpStream,
    frames: FrameBuffer,
    pending: VecDeque<ServerMessage>,
    read_buf: Vec<u8>,
}

impl Connection {
    pub async fn connect(addr: &str) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            frames: FrameBuffer::new(MAX_FRAME_SIZE),
            pending: VecDeque::new(),
            read_buf: vec![0u8; 8192],
        }
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ConnectionError> {
        self.send_all(std::slice::from_ref(message)).await
    }

    /// Frames every message into one write
    pub async fn send_all(&mut self, messages: &[ClientMessage]) -> Result<(), ConnectionError> {
        let mut bytes = Vec::new();
        for message in messages {
            message.encode(&mut bytes)?;
        }
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Writes raw bytes, for exercising the server with malformed input
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Waits for the next message this client understands
    ///
    /// Cancel safe: messages already read stay queued for the next call.
    pub async fn recv(&mut self) -> Result<ServerMessage, ConnectionError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }
            let len = self.stream.read(&mut self.read_buf).await?;
            if len == 0 {
                return Err(ConnectionError::Closed);
            }
            for message in self.frames.push(&self.read_buf[..len])? {
                match ServerMessage::decode(&message)? {
                    Some(decoded) => self.pending.push_back(decoded),
                    None => debug!("Ignoring server message type {}", message.type_id),
                }
            }
        }
    }

    /// `Ok(None)` if nothing arrived within `timeout`
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ServerMessage>, ConnectionError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Receives until `predicate` matches, passing every message to `seen`
    pub async fn recv_until<P, F>(
        &mut self,
        timeout: Duration,
        mut predicate: P,
        mut seen: F,
    ) -> Result<Option<ServerMessage>, ConnectionError>
    where
        P: FnMut(&ServerMessage) -> bool,
        F: FnMut(&ServerMessage),
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(message) = self.recv_timeout(left).await? else {
                return Ok(None);
            };
            seen(&message);
            if predicate(&message) {
                return Ok(Some(message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{DestroyEntity, SvHello};
    use shared::{LocalActorId, NetMessage};
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, server) = tokio::join!(Connection::connect(&addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    #[tokio::test]
    async fn test_split_messages_are_reassembled() {
        let (mut conn, mut server) = pair().await;
        let mut bytes = Vec::new();
        SvHello::default().encode(&mut bytes).unwrap();
        DestroyEntity {
            local_id: LocalActorId(5000),
        }
        .encode(&mut bytes)
        .unwrap();

        server.write_all(&bytes[..11]).await.unwrap();
        server.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.write_all(&bytes[11..]).await.unwrap();

        assert_eq!(
            conn.recv().await.unwrap(),
            ServerMessage::Hello(SvHello::default())
        );
        assert!(matches!(
            conn.recv().await.unwrap(),
            ServerMessage::DestroyEntity(_)
        ));
    }

    #[tokio::test]
    async fn test_closed_and_timeout() {
        let (mut conn, server) = pair().await;
        assert!(conn
            .recv_timeout(Duration::from_millis(20))
            .await
            .unwrap()
            .is_none());
        drop(server);
        assert!(matches!(conn.recv().await, Err(ConnectionError::Closed)));
    }
}
