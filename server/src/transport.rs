//! Socket I/O tasks
//!
//! Each accepted connection gets one reader task and one writer task. They
//! are the only code that touches the socket, and they report every
//! completion through the [`ConnectionTable`], which discards results for
//! handles that are no longer current. Both tasks stop when the slot's
//! shutdown signal fires and detach from the slot on the way out, which is
//! what finally returns the slot to `Free`.

use crate::connection_table::{ClientHandle, ConnectionTable, DisconnectReason, ReadOutcome};
use crate::error::TransportError;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Bytes requested per socket read
pub const READ_CHUNK_SIZE: usize = 8192;

#[derive(Clone)]
pub struct Transport {
    table: Arc<ConnectionTable>,
    read_chunk: usize,
}

impl Transport {
    pub fn new(table: Arc<ConnectionTable>) -> Self {
        Self {
            table,
            read_chunk: READ_CHUNK_SIZE,
        }
    }

    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    /// Takes ownership of a connected stream and starts its I/O tasks
    pub fn accept<S>(&self, stream: S, addr: SocketAddr) -> Result<ClientHandle, TransportError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let handle = self.table.reserve(addr)?;
        let reader_shutdown = self.table.attach_io(handle);
        let writer_shutdown = self.table.attach_io(handle);
        let (Some(reader_shutdown), Some(writer_shutdown)) = (reader_shutdown, writer_shutdown)
        else {
            self.table.disconnect(handle, DisconnectReason::Shutdown);
            self.table.detach_io(handle);
            self.table.detach_io(handle);
            return Err(TransportError::StaleHandle { handle });
        };

        if !self.table.activate(handle) {
            return Err(TransportError::StaleHandle { handle });
        }

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(read_loop(
            Arc::clone(&self.table),
            handle,
            reader,
            reader_shutdown,
            self.read_chunk,
        ));
        tokio::spawn(write_loop(
            Arc::clone(&self.table),
            handle,
            writer,
            writer_shutdown,
        ));
        Ok(handle)
    }

    /// Accepts TCP connections until the listener fails
    pub async fn run_listener(&self, listener: TcpListener) -> Result<(), TransportError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
            }
            match self.accept(stream, addr) {
                Ok(handle) => debug!("Accepted {} as client {}", addr, handle),
                Err(TransportError::CapacityExhausted { .. }) => {
                    // Refusal is already logged; dropping the stream closes it
                }
                Err(e) => warn!("Failed to accept {}: {}", addr, e),
            }
        }
    }
}

fn is_shut_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

async fn read_loop<S: AsyncRead>(
    table: Arc<ConnectionTable>,
    handle: ClientHandle,
    mut reader: ReadHalf<S>,
    mut shutdown: watch::Receiver<bool>,
    chunk: usize,
) {
    let mut buf = vec![0u8; chunk];
    while !is_shut_down(&shutdown) {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            result = reader.read(&mut buf) => match result {
                Ok(len) => match table.complete_read(handle, &buf[..len]) {
                    ReadOutcome::Appended { .. } => {}
                    ReadOutcome::Closed | ReadOutcome::Overflow | ReadOutcome::Stale => break,
                },
                Err(e) => {
                    debug!("Read from client {} failed: {}", handle, e);
                    table.disconnect(handle, DisconnectReason::SocketError);
                    break;
                }
            },
        }
    }
    table.detach_io(handle);
}

async fn write_loop<S: AsyncWrite>(
    table: Arc<ConnectionTable>,
    handle: ClientHandle,
    mut writer: WriteHalf<S>,
    mut shutdown: watch::Receiver<bool>,
) {
    'outer: while !is_shut_down(&shutdown) {
        while let Some(bytes) = table.begin_write(handle) {
            let result = tokio::select! {
                result = writer.write_all(&bytes) => result,
                _ = shutdown.changed() => break 'outer,
            };
            table.complete_write(handle, bytes);
            if let Err(e) = result {
                debug!("Write to client {} failed: {}", handle, e);
                table.disconnect(handle, DisconnectReason::SocketError);
                break 'outer;
            }
        }

        let Some(wake) = table.writer_wake(handle) else {
            break;
        };
        tokio::select! {
            _ = wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of client {} socket failed: {}", handle, e);
    }
    table.detach_io(handle);
}

/// Binds `addr` and accepts connections in a background task
pub async fn spawn_listener(
    transport: Transport,
    addr: SocketAddr,
) -> Result<SocketAddr, TransportError> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!("Listening on {}", local);
    tokio::spawn(async move {
        if let Err(e) = transport.run_listener(listener).await {
            error!("Listener stopped: {}", e);
        }
    });
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_table::{SlotStatus, TableEvent};
    use crate::mailbox::ReceiveBatch;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 11900)
    }

    fn test_transport(capacity: usize, recv: usize) -> (Transport, mpsc::UnboundedReceiver<TableEvent>) {
        let (table, events) = ConnectionTable::new(capacity, recv);
        (Transport::new(Arc::new(table)), events)
    }

    async fn wait_for_free(table: &ConnectionTable, index: usize) {
        for _ in 0..200 {
            if table.slot_status(index) == Some(SlotStatus::Free) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("slot {} never became free", index);
    }

    #[tokio::test]
    async fn test_reads_reach_receive_buffer() {
        let (transport, mut events) = test_transport(4, 1024);
        let stream = tokio_test::io::Builder::new()
            .read(b"abc")
            .read(b"def")
            .wait(Duration::from_secs(5))
            .build();
        let handle = transport.accept(stream, test_addr()).unwrap();
        assert!(matches!(events.recv().await, Some(TableEvent::Connected { .. })));

        let mut batch = ReceiveBatch::new();
        for _ in 0..200 {
            if transport.table().buffered(handle) == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        transport.table().drain_received(&mut batch);
        assert_eq!(batch.iter().collect::<Vec<_>>(), vec![(handle, &b"abcdef"[..])]);
        transport.table().disconnect(handle, DisconnectReason::Shutdown);
    }

    #[tokio::test]
    async fn test_send_is_written_to_socket() {
        let (transport, _events) = test_transport(4, 1024);
        let (server_side, mut client_side) = tokio::io::duplex(256);
        let handle = transport.accept(server_side, test_addr()).unwrap();

        assert!(transport.table().send(handle, b"hello "));
        assert!(transport.table().send(handle, b"world"));
        let mut received = vec![0u8; 11];
        tokio::time::timeout(Duration::from_secs(5), client_side.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&received, b"hello world");
    }

    #[tokio::test]
    async fn test_peer_close_frees_slot() {
        let (transport, mut events) = test_transport(2, 1024);
        let (server_side, client_side) = tokio::io::duplex(64);
        let handle = transport.accept(server_side, test_addr()).unwrap();
        events.recv().await;
        drop(client_side);

        assert_eq!(
            events.recv().await,
            Some(TableEvent::Disconnected {
                handle,
                reason: DisconnectReason::PeerClosed
            })
        );
        wait_for_free(transport.table(), 0).await;
        assert!(!transport.table().send(handle, b"late"));
    }

    #[tokio::test]
    async fn test_flood_disconnects_once_and_frees_slot() {
        let (transport, mut events) = test_transport(2, 64);
        let (server_side, mut client_side) = tokio::io::duplex(1024);
        let handle = transport.accept(server_side, test_addr()).unwrap();
        events.recv().await;

        // The server never drains, so this overflows the 64 byte cap
        let _ = client_side.write_all(&[7u8; 200]).await;
        assert_eq!(
            events.recv().await,
            Some(TableEvent::Disconnected {
                handle,
                reason: DisconnectReason::ReceiveOverflow
            })
        );
        wait_for_free(transport.table(), 0).await;
        assert_eq!(transport.table().stats().overflowed, 1);
        assert_eq!(transport.table().stats().disconnected, 1);

        // Further disconnects of the old handle are no-ops
        assert!(!transport.table().disconnect(handle, DisconnectReason::Shutdown));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_disconnect_closes_socket() {
        let (transport, _events) = test_transport(1, 1024);
        let (server_side, mut client_side) = tokio::io::duplex(64);
        let handle = transport.accept(server_side, test_addr()).unwrap();

        transport.table().disconnect(handle, DisconnectReason::Shutdown);
        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(5), client_side.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
        wait_for_free(transport.table(), 0).await;

        let (again, _peer) = tokio::io::duplex(64);
        let next = transport.accept(again, test_addr()).unwrap();
        assert_eq!(next.index(), handle.index());
        assert_ne!(next, handle);
    }

    #[tokio::test]
    async fn test_capacity_refuses_extra_stream() {
        let (transport, _events) = test_transport(1, 1024);
        let (first, _keep) = tokio::io::duplex(64);
        transport.accept(first, test_addr()).unwrap();
        let (second, _keep2) = tokio::io::duplex(64);
        assert!(matches!(
            transport.accept(second, test_addr()),
            Err(TransportError::CapacityExhausted { capacity: 1 })
        ));
        assert_eq!(transport.table().active_count(), 1);
    }
}
