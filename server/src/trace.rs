//! Network trace recorder
//!
//! Records every decoded inbound message and every outbound batch so a
//! session can be inspected offline. The file is a sequence of
//! `u32 LE length` + bincode-encoded [`TraceRecord`].

use crate::connection_table::ClientHandle;
use crate::error::TraceError;
use serde::{Deserialize, Serialize};
use shared::codec::MAX_FRAME_SIZE;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Largest encoded record the tracer writes or the reader accepts
pub const MAX_RECORD_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub tick: u64,
    pub index: u32,
    pub generation: u32,
    pub direction: Direction,
    /// Framed bytes as they crossed the wire
    pub bytes: Vec<u8>,
}

impl TraceRecord {
    pub fn handle(&self) -> ClientHandle {
        ClientHandle::new(self.index, self.generation)
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick {} {} {:?} {} bytes",
            self.tick,
            self.handle(),
            self.direction,
            self.bytes.len()
        )?;
        match shared::decode(&self.bytes, MAX_FRAME_SIZE) {
            Ok(decoded) => {
                let types: Vec<String> = decoded
                    .messages
                    .iter()
                    .map(|m| m.type_id.to_string())
                    .collect();
                write!(f, " [{}]", types.join(", "))
            }
            Err(e) => write!(f, " (undecodable: {})", e),
        }
    }
}

pub struct NetworkTracer {
    writer: BufWriter<File>,
    records: u64,
}

impl NetworkTracer {
    pub fn create(path: &Path) -> Result<Self, TraceError> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            records: 0,
        })
    }

    pub fn record(
        &mut self,
        tick: u64,
        handle: ClientHandle,
        direction: Direction,
        bytes: &[u8],
    ) -> Result<(), TraceError> {
        let record = TraceRecord {
            tick,
            index: handle.index(),
            generation: handle.generation(),
            direction,
            bytes: bytes.to_vec(),
        };
        let encoded = bincode::serialize(&record)?;
        if encoded.len() > MAX_RECORD_LEN {
            return Err(TraceError::RecordTooLarge {
                len: encoded.len(),
                max: MAX_RECORD_LEN,
            });
        }
        self.writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
        self.writer.write_all(&encoded)?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> Result<(), TraceError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Loads every record of a trace file
pub fn read_trace(path: &Path) -> Result<Vec<TraceRecord>, TraceError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut len = [0u8; 4];
    loop {
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_RECORD_LEN {
            return Err(TraceError::RecordTooLarge {
                len,
                max: MAX_RECORD_LEN,
            });
        }
        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;
        records.push(bincode::deserialize(&encoded)?);
    }
    Ok(records)
}
