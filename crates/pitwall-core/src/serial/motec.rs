//! Motec CAN-over-serial binary framing.
//!
//! Frame layout, as emitted by the CAN-to-serial converter:
//!
//! ```text
//! [0xAA] [id lo] [id hi] [len] [payload ...] [crc lo] [crc hi]
//! ```
//!
//! The CRC is CRC-16/CCITT (poly 0x1021, init 0xFFFF) over id, len and
//! payload, transmitted little-endian. On a CRC mismatch the decoder
//! counts an error and resynchronizes by scanning for the next sync byte.

use std::collections::BTreeMap;

/// Frame sync byte.
pub const MOTEC_SYNC: u8 = 0xAA;

/// Cap on buffered bytes while hunting for frame boundaries; garbage past
/// this is discarded down to a tail that could still hold a partial frame.
const MAX_BUFFER: usize = 4096;
const KEEP_TAIL: usize = 256;

/// Motec M1 broadcast ids and how their payload words map onto sensors.
/// Each entry is (sensor id, scale, offset); words are i16 little-endian in
/// payload order.
const CAN_MAP: &[(u16, &[(&str, f64, f64)])] = &[
    (0x5F0, &[("rpm", 1.0, 0.0), ("throttle", 0.1, 0.0)]),
    (0x5F1, &[("speed", 0.1, 0.0), ("brake_pressure", 0.1, 0.0)]),
    (0x5F2, &[("coolant_temp", 0.1, -40.0), ("oil_temp", 0.1, -40.0)]),
    (0x5F3, &[("intake_temp", 0.1, -40.0), ("exhaust_temp", 1.0, 0.0)]),
    (0x5F4, &[("g_lateral", 0.001, 0.0), ("g_longitudinal", 0.001, 0.0)]),
    (0x5F5, &[("wheel_fl", 0.1, 0.0), ("wheel_fr", 0.1, 0.0)]),
    (0x5F6, &[("wheel_rl", 0.1, 0.0), ("wheel_rr", 0.1, 0.0)]),
    (0x5F7, &[("battery_voltage", 0.01, 0.0)]),
];

/// CRC-16/CCITT (poly 0x1021, init 0xFFFF, no reflection).
#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Incremental decoder over a byte stream; partial frames stay buffered
/// between reads.
#[derive(Debug, Default)]
pub struct MotecDecoder {
    buf: Vec<u8>,
}

impl MotecDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes and decodes every complete frame in the buffer.
    ///
    /// Returns decoded channel values and the number of CRC failures
    /// encountered while resynchronizing.
    pub fn push(&mut self, data: &[u8]) -> (BTreeMap<String, f64>, u64) {
        self.buf.extend_from_slice(data);

        let mut channels = BTreeMap::new();
        let mut errors: u64 = 0;
        let mut pos = 0;

        while pos < self.buf.len() {
            if self.buf[pos] != MOTEC_SYNC {
                pos += 1;
                continue;
            }
            // sync + id(2) + len(1)
            if pos + 4 > self.buf.len() {
                break;
            }
            let len = usize::from(self.buf[pos + 3]);
            let frame_end = pos + 4 + len + 2;
            if frame_end > self.buf.len() {
                // Incomplete frame; wait for more bytes.
                break;
            }

            let body = &self.buf[pos + 1..pos + 4 + len];
            let crc_got =
                u16::from_le_bytes([self.buf[frame_end - 2], self.buf[frame_end - 1]]);
            if crc16_ccitt(body) != crc_got {
                errors += 1;
                pos += 1;
                continue;
            }

            let id = u16::from_le_bytes([self.buf[pos + 1], self.buf[pos + 2]]);
            let payload = &self.buf[pos + 4..pos + 4 + len];
            decode_payload(id, payload, &mut channels);
            pos = frame_end;
        }

        self.buf.drain(..pos);
        if self.buf.len() > MAX_BUFFER {
            let cut = self.buf.len() - KEEP_TAIL;
            self.buf.drain(..cut);
        }

        (channels, errors)
    }

    /// Bytes currently buffered (partial frame or garbage tail).
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn decode_payload(id: u16, payload: &[u8], channels: &mut BTreeMap<String, f64>) {
    let Some((_, sensors)) = CAN_MAP.iter().find(|(can_id, _)| *can_id == id) else {
        return;
    };
    for (i, (sensor_id, scale, offset)) in sensors.iter().enumerate() {
        let at = i * 2;
        if at + 2 > payload.len() {
            break;
        }
        let raw = i16::from_le_bytes([payload[at], payload[at + 1]]);
        channels.insert((*sensor_id).to_string(), f64::from(raw) * scale + offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a well-formed frame for a CAN id and i16 payload words.
    fn frame(id: u16, words: &[i16]) -> Vec<u8> {
        let mut payload = Vec::new();
        for w in words {
            payload.extend_from_slice(&w.to_le_bytes());
        }
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_le_bytes());
        body.push(payload.len() as u8);
        body.extend_from_slice(&payload);
        let crc = crc16_ccitt(&body);
        let mut out = vec![MOTEC_SYNC];
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    #[test]
    fn test_decode_single_frame() {
        let mut dec = MotecDecoder::new();
        let (channels, errors) = dec.push(&frame(0x5F0, &[9300, 452]));
        assert_eq!(errors, 0);
        assert_eq!(channels.get("rpm"), Some(&9300.0));
        let throttle = channels.get("throttle").copied().unwrap();
        assert!((throttle - 45.2).abs() < 1e-9);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_scale_and_offset() {
        let mut dec = MotecDecoder::new();
        let (channels, _) = dec.push(&frame(0x5F2, &[1250, 1350]));
        assert!((channels["coolant_temp"] - 85.0).abs() < 1e-9);
        assert!((channels["oil_temp"] - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_frame_buffers() {
        let bytes = frame(0x5F7, &[1260]);
        let mut dec = MotecDecoder::new();
        let (channels, errors) = dec.push(&bytes[..4]);
        assert!(channels.is_empty());
        assert_eq!(errors, 0);
        let (channels, errors) = dec.push(&bytes[4..]);
        assert_eq!(errors, 0);
        assert!((channels["battery_voltage"] - 12.6).abs() < 1e-9);
    }

    #[test]
    fn test_bad_crc_resyncs_to_next_frame() {
        let mut corrupted = frame(0x5F0, &[9300, 452]);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        let good = frame(0x5F1, &[1015, 80]);
        let mut stream = corrupted;
        stream.extend_from_slice(&good);

        let mut dec = MotecDecoder::new();
        let (channels, errors) = dec.push(&stream);
        assert!(errors >= 1);
        assert!(!channels.contains_key("rpm"));
        assert!((channels["speed"] - 101.5).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_between_frames() {
        let mut stream = vec![0x00, 0x17, 0x42];
        stream.extend_from_slice(&frame(0x5F4, &[1800, -1500]));
        stream.extend_from_slice(&[0x99, 0x99]);

        let mut dec = MotecDecoder::new();
        let (channels, _) = dec.push(&stream);
        assert!((channels["g_lateral"] - 1.8).abs() < 1e-9);
        assert!((channels["g_longitudinal"] + 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_can_id_ignored() {
        let mut dec = MotecDecoder::new();
        let (channels, errors) = dec.push(&frame(0x123, &[1, 2]));
        assert!(channels.is_empty());
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_buffer_growth_is_bounded() {
        let mut dec = MotecDecoder::new();
        // Sync bytes with no completable frame keep accumulating; the cap
        // must kick in instead of growing without bound.
        for _ in 0..100 {
            dec.push(&[MOTEC_SYNC; 64]);
        }
        assert!(dec.buffered() <= MAX_BUFFER + 64);
    }
}
