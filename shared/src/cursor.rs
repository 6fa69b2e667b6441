//! Bounds-checked readers and writers for message payloads
//!
//! Every field is decoded through [`PacketReader`], which validates the
//! remaining length before touching the buffer. Payloads are never
//! reinterpreted in place.

use crate::codec::CodecError;
use crate::protocol::{Rotation, Vec3};

/// Little-endian cursor over a received payload
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes the next `len` bytes or fails without advancing
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEnd {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, CodecError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_rotation(&mut self) -> Result<Rotation, CodecError> {
        Ok(Rotation {
            upper_yaw: self.read_f32()?,
            upper_pitch: self.read_f32()?,
            bottom_yaw: self.read_f32()?,
        })
    }

    /// Reads a `u16` unit count followed by that many UTF-16LE code units
    pub fn read_wstr(&mut self) -> Result<String, CodecError> {
        let count = self.read_u16()? as usize;
        let raw = self.read_bytes(count * 2)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| CodecError::InvalidString)
    }

    /// Fails if the payload carried bytes the message layout does not define
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                count: self.remaining(),
            })
        }
    }
}

/// Growable little-endian payload builder
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_vec3(&mut self, value: Vec3) -> &mut Self {
        self.write_f32(value.x).write_f32(value.y).write_f32(value.z)
    }

    pub fn write_rotation(&mut self, value: Rotation) -> &mut Self {
        self.write_f32(value.upper_yaw)
            .write_f32(value.upper_pitch)
            .write_f32(value.bottom_yaw)
    }

    /// Writes a UTF-16LE string, truncated to `u16::MAX` code units
    pub fn write_wstr(&mut self, value: &str) -> &mut Self {
        let units: Vec<u16> = value.encode_utf16().take(u16::MAX as usize).collect();
        self.write_u16(units.len() as u16);
        for unit in units {
            self.write_u16(unit);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_reader_rejects_short_reads() {
        let mut reader = PacketReader::new(&[1, 2, 3]);
        assert_eq!(
            reader.read_u32(),
            Err(CodecError::UnexpectedEnd {
                needed: 4,
                available: 3
            })
        );
        // A failed read leaves the cursor where it was
        assert_eq!(reader.read_u16(), Ok(0x0201));
        assert_eq!(reader.remaining(), 1);
    }

    #[test]
    fn test_scalar_layout_is_little_endian() {
        let mut writer = PacketWriter::new();
        writer.write_u16(0xEA62).write_u32(0xAEDF45).write_i32(-2);
        assert_eq!(
            writer.as_slice(),
            &[0x62, 0xEA, 0x45, 0xDF, 0xAE, 0x00, 0xFE, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_vec3_and_rotation() {
        let mut writer = PacketWriter::new();
        writer
            .write_vec3(Vec3::new(1.5, -2.25, 300.0))
            .write_rotation(Rotation {
                upper_yaw: 0.5,
                upper_pitch: -0.25,
                bottom_yaw: 3.0,
            });

        let bytes = writer.into_inner();
        let mut reader = PacketReader::new(&bytes);
        let pos = reader.read_vec3().unwrap();
        let rot = reader.read_rotation().unwrap();
        assert_approx_eq!(pos.x, 1.5);
        assert_approx_eq!(pos.y, -2.25);
        assert_approx_eq!(pos.z, 300.0);
        assert_approx_eq!(rot.upper_pitch, -0.25);
        assert_approx_eq!(rot.bottom_yaw, 3.0);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_wide_string() {
        let mut writer = PacketWriter::new();
        writer.write_wstr("Läufer");
        let bytes = writer.into_inner();
        assert_eq!(&bytes[..2], &[6, 0]);

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_wstr().unwrap(), "Läufer");
    }

    #[test]
    fn test_wide_string_count_exceeds_payload() {
        // Claims 10 code units but carries one
        let bytes = [10, 0, b'a', 0];
        let mut reader = PacketReader::new(&bytes);
        assert!(matches!(
            reader.read_wstr(),
            Err(CodecError::UnexpectedEnd { needed: 20, .. })
        ));
    }

    #[test]
    fn test_finish_reports_trailing_bytes() {
        let bytes = [0u8; 6];
        let mut reader = PacketReader::new(&bytes);
        reader.read_u32().unwrap();
        assert_eq!(reader.finish(), Err(CodecError::TrailingBytes { count: 2 }));
    }
}
