//! Telemetry frame decoder
//!
//! A frame as published by the gateway:
//!
//! ```text
//! offset 0      reserved
//! offset 1..5   session timestamp, u32 little-endian (ms)
//! offset 5..    N readings, 10 bytes each:
//!                 id    u16 little-endian
//!                 data  8 bytes, wire order
//! ```

use crate::types::{
    DecodedFrame, EngineError, Reading, Result, DATA_LEN, HEADER_SIZE, READING_SIZE,
};
use byteorder::{ByteOrder, LittleEndian};

/// Stateless frame decoder
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decode one raw frame into its timestamp and readings
    ///
    /// Fails with [`EngineError::MalformedFrame`] when the payload after the
    /// header is not a whole number of readings.
    pub fn decode(payload: &[u8]) -> Result<DecodedFrame> {
        let len = payload.len();
        Self::validate_length(len)?;

        let header = payload
            .get(1..HEADER_SIZE)
            .ok_or(EngineError::DecodeRange { offset: 1, len })?;
        let timestamp = LittleEndian::read_u32(header);

        let readings = payload[HEADER_SIZE..]
            .chunks_exact(READING_SIZE)
            .enumerate()
            .map(|(index, block)| Self::decode_reading(block, HEADER_SIZE + index * READING_SIZE, len))
            .collect::<Result<Vec<_>>>()?;

        log::trace!(
            "Decoded frame: {} bytes, t={}ms, {} readings",
            len,
            timestamp,
            readings.len()
        );

        Ok(DecodedFrame {
            timestamp,
            readings,
            len,
        })
    }

    /// Check that a frame of `len` bytes is a header plus whole readings
    pub fn validate_length(len: usize) -> Result<()> {
        if len < HEADER_SIZE || (len - HEADER_SIZE) % READING_SIZE != 0 {
            return Err(EngineError::MalformedFrame { len });
        }
        Ok(())
    }

    fn decode_reading(block: &[u8], offset: usize, len: usize) -> Result<Reading> {
        let id_bytes = block
            .get(0..2)
            .ok_or(EngineError::DecodeRange { offset, len })?;
        let data: [u8; DATA_LEN] = block
            .get(2..READING_SIZE)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(EngineError::DecodeRange {
                offset: offset + 2,
                len,
            })?;

        Ok(Reading {
            id: LittleEndian::read_u16(id_bytes),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(timestamp: u32, readings: &[(u16, [u8; 8])]) -> Vec<u8> {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&timestamp.to_le_bytes());
        for (id, data) in readings {
            bytes.extend_from_slice(&id.to_le_bytes());
            bytes.extend_from_slice(data);
        }
        bytes
    }

    #[test]
    fn test_length_validation() {
        assert!(matches!(
            FrameDecoder::decode(&[0u8; 14]),
            Err(EngineError::MalformedFrame { len: 14 })
        ));
        assert!(matches!(
            FrameDecoder::decode(&[0u8; 4]),
            Err(EngineError::MalformedFrame { len: 4 })
        ));
        assert!(FrameDecoder::decode(&[]).is_err());
        assert!(FrameDecoder::decode(&[0u8; 26]).is_err());

        assert_eq!(FrameDecoder::decode(&[0u8; 5]).unwrap().readings.len(), 0);
        assert_eq!(FrameDecoder::decode(&[0u8; 15]).unwrap().readings.len(), 1);
        assert_eq!(FrameDecoder::decode(&[0u8; 25]).unwrap().readings.len(), 2);
    }

    #[test]
    fn test_decode_timestamp_little_endian() {
        let bytes = [0xFF, 0x78, 0x56, 0x34, 0x12];
        let decoded = FrameDecoder::decode(&bytes).unwrap();
        assert_eq!(decoded.timestamp, 0x1234_5678);
        assert!(decoded.readings.is_empty());
        assert_eq!(decoded.len, 5);
    }

    #[test]
    fn test_decode_readings_in_offset_order() {
        let bytes = frame(
            1500,
            &[
                (0x185, [0xE0, 0x2E, 3, 4, 5, 6, 7, 8]),
                (0x010, [0xFF; 8]),
            ],
        );
        let decoded = FrameDecoder::decode(&bytes).unwrap();

        assert_eq!(decoded.timestamp, 1500);
        assert_eq!(decoded.len, 25);
        assert_eq!(
            decoded.readings,
            vec![
                Reading::new(0x185, [0xE0, 0x2E, 3, 4, 5, 6, 7, 8]),
                Reading::new(0x010, [0xFF; 8]),
            ]
        );
    }

    #[test]
    fn test_id_is_little_endian() {
        let mut bytes = vec![0, 0, 0, 0, 0, 0x85, 0x01];
        bytes.extend_from_slice(&[0; 8]);
        let decoded = FrameDecoder::decode(&bytes).unwrap();
        assert_eq!(decoded.readings[0].id, 0x185);
    }
}
