//! Codecs for the MediaTek LOCUS on-chip GPS log format.
//!
//! A flash dump starts with a 16-byte header whose last byte is the XOR
//! of the other fifteen, followed by a slot-usage bitmap and a stream of
//! fixed-size records. The record layout is not fixed globally: the
//! header's content bitmap says which of nine optional fields each
//! record carries, in a fixed order, always followed by one XOR checksum
//! byte. Parsing stops at the first empty slot (a run of `0x00` or
//! `0xFF`) or checksum failure.
//!
//! The bitmap is carried through unparsed; slot boundaries come from the
//! record scan, not from it. Speed is a raw integer of unknown unit.

use bitflags::bitflags;
use serde::Serialize;

use crate::{HxError, Result};

/// XOR fold used by header and record checksums.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

bitflags! {
    /// Which optional fields each log record carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LocusContent: u16 {
        const UTC = 1 << 0;
        const VALID = 1 << 1;
        const LAT = 1 << 2;
        const LON = 1 << 3;
        const HEIGHT = 1 << 4;
        const SPEED = 1 << 5;
        const HEADING = 1 << 6;
        const HDOP = 1 << 10;
        const NSAT = 1 << 12;
    }
}

bitflags! {
    /// Logging-mode bits in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoggingMode: u8 {
        const ALWAYS_LOCATE = 1 << 0;
        const FIX_ONLY = 1 << 1;
        const NORMAL = 1 << 2;
        const INTERVAL = 1 << 3;
        const DISTANCE = 1 << 4;
        const SPEED = 1 << 5;
    }
}

/// GPS fix quality as reported in a record's fix-type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixQuality {
    Invalid,
    /// GPS standard positioning service.
    Sps,
    /// Differential GPS.
    Dgps,
    /// GPS precise positioning service.
    Pps,
    /// Real-time kinematic.
    Rtk,
    /// Float RTK.
    FloatRtk,
    /// Dead reckoning.
    Estimated,
    Manual,
    Simulator,
}

impl FixQuality {
    pub fn from_u8(v: u8) -> Option<FixQuality> {
        match v {
            0 => Some(FixQuality::Invalid),
            1 => Some(FixQuality::Sps),
            2 => Some(FixQuality::Dgps),
            3 => Some(FixQuality::Pps),
            4 => Some(FixQuality::Rtk),
            5 => Some(FixQuality::FloatRtk),
            6 => Some(FixQuality::Estimated),
            7 => Some(FixQuality::Manual),
            8 => Some(FixQuality::Simulator),
            _ => None,
        }
    }
}

/// Bytes one record occupies, including its checksum byte.
pub fn record_size(content: LocusContent) -> usize {
    let mut size = 1; // checksum
    for (flag, field_size) in FIELD_SIZES {
        if content.contains(*flag) {
            size += field_size;
        }
    }
    size
}

/// Copy the next `N` bytes and advance the cursor.
fn take<const N: usize>(data: &[u8], pos: &mut usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[*pos..*pos + N]);
    *pos += N;
    out
}

const FIELD_SIZES: &[(LocusContent, usize)] = &[
    (LocusContent::UTC, 4),
    (LocusContent::VALID, 1),
    (LocusContent::LAT, 4),
    (LocusContent::LON, 4),
    (LocusContent::HEIGHT, 2),
    (LocusContent::SPEED, 2),
    (LocusContent::HEADING, 2),
    (LocusContent::HDOP, 2),
    (LocusContent::NSAT, 1),
];

/// The 16-byte log header. Unknown fields are carried byte-exactly so a
/// header re-encodes to its original form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocusHeader {
    pub unknown_00: u8,
    pub unknown_01: u8,
    pub logging_type: u8,
    pub logging_mode: u8,
    pub log_content: u16,
    pub unknown_06: u16,
    pub interval: u16,
    pub distance: u16,
    pub speed: u16,
    pub unknown_0e: u8,
    pub checksum: u8,
}

impl LocusHeader {
    pub fn parse(data: &[u8], verify: bool) -> Result<LocusHeader> {
        if data.len() < 16 {
            return Err(HxError::Locus(
                "Insufficient data for parsing header".to_string(),
            ));
        }
        let le16 = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
        let header = LocusHeader {
            unknown_00: data[0],
            unknown_01: data[1],
            logging_type: data[2],
            logging_mode: data[3],
            log_content: le16(4),
            unknown_06: le16(6),
            interval: le16(8),
            distance: le16(10),
            speed: le16(12),
            unknown_0e: data[14],
            checksum: data[15],
        };
        if verify && header.checksum != checksum(&data[..15]) {
            return Err(HxError::Locus(format!(
                "Invalid header checksum in {}",
                hex::encode(&data[..16])
            )));
        }
        Ok(header)
    }

    pub fn content(&self) -> LocusContent {
        LocusContent::from_bits_truncate(self.log_content)
    }

    pub fn mode(&self) -> LoggingMode {
        LoggingMode::from_bits_truncate(self.logging_mode)
    }

    /// Re-encode; the checksum byte is recomputed.
    pub fn pack(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0] = self.unknown_00;
        out[1] = self.unknown_01;
        out[2] = self.logging_type;
        out[3] = self.logging_mode;
        out[4..6].copy_from_slice(&self.log_content.to_le_bytes());
        out[6..8].copy_from_slice(&self.unknown_06.to_le_bytes());
        out[8..10].copy_from_slice(&self.interval.to_le_bytes());
        out[10..12].copy_from_slice(&self.distance.to_le_bytes());
        out[12..14].copy_from_slice(&self.speed.to_le_bytes());
        out[14] = self.unknown_0e;
        out[15] = checksum(&out[..15]);
        out
    }
}

/// One decoded log record. Fields the content bitmap did not enable are
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocusWaypoint {
    pub utc_time: Option<u32>,
    pub fix_type: Option<u8>,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
    pub height: Option<i16>,
    pub speed: Option<u16>,
    pub heading: Option<u16>,
    pub hdop: Option<u16>,
    pub satellites: Option<u8>,
    pub checksum: u8,
}

impl LocusWaypoint {
    pub fn parse(content: LocusContent, data: &[u8], verify: bool) -> Result<LocusWaypoint> {
        if data.len() >= 6
            && (data[..6].iter().all(|&b| b == 0xFF) || data[..6].iter().all(|&b| b == 0x00))
        {
            return Err(HxError::Locus("Empty waypoint data".to_string()));
        }
        if data.len() != record_size(content) {
            return Err(HxError::Locus(format!(
                "Unexpected waypoint data size {}",
                data.len()
            )));
        }

        let mut pos = 0;
        let utc_time = if content.contains(LocusContent::UTC) {
            Some(u32::from_le_bytes(take::<4>(data, &mut pos)))
        } else {
            None
        };
        let fix_type = if content.contains(LocusContent::VALID) {
            Some(take::<1>(data, &mut pos)[0])
        } else {
            None
        };
        let latitude = if content.contains(LocusContent::LAT) {
            Some(f32::from_le_bytes(take::<4>(data, &mut pos)))
        } else {
            None
        };
        let longitude = if content.contains(LocusContent::LON) {
            Some(f32::from_le_bytes(take::<4>(data, &mut pos)))
        } else {
            None
        };
        let height = if content.contains(LocusContent::HEIGHT) {
            Some(i16::from_le_bytes(take::<2>(data, &mut pos)))
        } else {
            None
        };
        let speed = if content.contains(LocusContent::SPEED) {
            Some(u16::from_le_bytes(take::<2>(data, &mut pos)))
        } else {
            None
        };
        let heading = if content.contains(LocusContent::HEADING) {
            Some(u16::from_le_bytes(take::<2>(data, &mut pos)))
        } else {
            None
        };
        let hdop = if content.contains(LocusContent::HDOP) {
            Some(u16::from_le_bytes(take::<2>(data, &mut pos)))
        } else {
            None
        };
        let satellites = if content.contains(LocusContent::NSAT) {
            Some(take::<1>(data, &mut pos)[0])
        } else {
            None
        };

        let chk = data[data.len() - 1];
        if verify && chk != checksum(&data[..data.len() - 1]) {
            return Err(HxError::Locus(format!(
                "Checksum mismatch in waypoint data: {}",
                hex::encode(data)
            )));
        }
        Ok(LocusWaypoint {
            utc_time,
            fix_type,
            latitude,
            longitude,
            height,
            speed,
            heading,
            hdop,
            satellites,
            checksum: chk,
        })
    }

    pub fn fix_quality(&self) -> Option<FixQuality> {
        self.fix_type.and_then(FixQuality::from_u8)
    }

    /// Re-encode the present fields in record order; the checksum byte
    /// is recomputed.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(v) = self.utc_time {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.fix_type {
            out.push(v);
        }
        if let Some(v) = self.latitude {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.longitude {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.height {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.speed {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.heading {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.hdop {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.satellites {
            out.push(v);
        }
        out.push(checksum(&out));
        out
    }
}

/// One whole LOCUS flash dump.
#[derive(Debug, Clone)]
pub struct Locus {
    pub header: LocusHeader,
    /// Six bytes between header and bitmap, purpose unknown.
    pub unknown_10: [u8; 6],
    /// Slot-usage bitmap (one bit per slot, set while unused).
    pub mask: Vec<u8>,
    pub unknown_3c: [u8; 4],
    pub waypoints: Vec<LocusWaypoint>,
}

impl Locus {
    pub fn parse(data: &[u8], verify: bool) -> Result<Locus> {
        if data.len() < 0x40 {
            return Err(HxError::Locus("Insufficient data for GPS log".to_string()));
        }
        if data[..16].iter().all(|&b| b == 0xFF) {
            return Err(HxError::Locus("Empty GPS log".to_string()));
        }
        let header = LocusHeader::parse(&data[..16], verify)?;
        let content = header.content();
        let size = record_size(content);

        let mut waypoints = Vec::new();
        let mut offset = 0x40;
        while offset + size <= data.len() {
            match LocusWaypoint::parse(content, &data[offset..offset + size], true) {
                Ok(wp) => waypoints.push(wp),
                Err(_) => break,
            }
            offset += size;
        }

        let mut unknown_10 = [0u8; 6];
        unknown_10.copy_from_slice(&data[0x10..0x16]);
        let mut unknown_3c = [0u8; 4];
        unknown_3c.copy_from_slice(&data[0x3C..0x40]);
        Ok(Locus {
            header,
            unknown_10,
            mask: data[0x16..0x3C].to_vec(),
            unknown_3c,
            waypoints,
        })
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn header_parser() {
        let data_5s = unhex("0100010B7F0000000500000000007A0B");
        let data_60s = unhex("0100010B7F0000003C0000000000430B");
        let data_5min = unhex("0100010B7F0000002C0100000000530A");
        let data_invalid = unhex("0100010B7F0000002C010000000053FF");

        let header_5s = LocusHeader::parse(&data_5s, true).unwrap();
        let header_60s = LocusHeader::parse(&data_60s, true).unwrap();
        let header_5min = LocusHeader::parse(&data_5min, true).unwrap();

        LocusHeader::parse(&data_invalid, false).unwrap();
        assert!(LocusHeader::parse(&data_invalid, true).is_err());

        // Extra data is okay, truncated data is not.
        let mut long = data_5s.clone();
        long.extend_from_slice(&[0xFF; 16]);
        LocusHeader::parse(&long, true).unwrap();
        assert!(LocusHeader::parse(&data_5s[..15], true).is_err());

        assert_eq!(header_5s.interval, 5);
        assert_eq!(header_60s.interval, 60);
        assert_eq!(header_5min.interval, 300);

        assert_eq!(header_5s.log_content, 0x7F);
        assert_eq!(header_5s.logging_type, 1);
        assert_eq!(header_5s.logging_mode, 11);
        assert!(header_5s.mode().contains(LoggingMode::INTERVAL));
    }

    #[test]
    fn header_pack_idempotent() {
        let data = unhex("0100010B7F0000000500000000007A0B");
        let header = LocusHeader::parse(&data, true).unwrap();
        assert_eq!(header.pack().to_vec(), data);
    }

    #[test]
    fn header_flipped_byte_fails_verify() {
        let mut data = unhex("0100010B7F0000000500000000007A0B");
        data[8] ^= 0x01; // interval byte
        assert!(LocusHeader::parse(&data, true).is_err());
        assert!(LocusHeader::parse(&data, false).is_ok());
    }

    #[test]
    fn waypoint_parser() {
        let content = LocusContent::from_bits_truncate(0x7F);
        let data = unhex("0992245D02200952422861574130000D0027019D");
        let data_invalid = unhex("0992245D02200952422861574130000D002701FF");

        let wp = LocusWaypoint::parse(content, &data, true).unwrap();

        LocusWaypoint::parse(content, &data_invalid, false).unwrap();
        assert!(LocusWaypoint::parse(content, &data_invalid, true).is_err());

        assert_eq!(wp.utc_time, Some(1_562_677_769));
        assert_eq!(wp.fix_type, Some(2));
        assert_eq!(wp.fix_quality(), Some(FixQuality::Dgps));
        assert!((wp.latitude.unwrap() - 52.50891).abs() < 1e-5);
        assert!((wp.longitude.unwrap() - 13.46122).abs() < 1e-5);
        assert_eq!(wp.height, Some(48));
        assert_eq!(wp.speed, Some(13));
        assert_eq!(wp.heading, Some(295));
        assert_eq!(wp.hdop, None, "HDOP not in 0x7F content");
        assert_eq!(wp.satellites, None, "NSAT not in 0x7F content");
    }

    #[test]
    fn waypoint_pack_idempotent() {
        let content = LocusContent::from_bits_truncate(0x7F);
        let data = unhex("0992245D02200952422861574130000D0027019D");
        let wp = LocusWaypoint::parse(content, &data, true).unwrap();
        assert_eq!(wp.pack(), data);
    }

    #[test]
    fn waypoint_empty_slot() {
        let content = LocusContent::from_bits_truncate(0x7F);
        assert!(LocusWaypoint::parse(content, &[0xFF; 20], true).is_err());
        assert!(LocusWaypoint::parse(content, &[0x00; 20], true).is_err());
    }

    #[test]
    fn record_sizes() {
        assert_eq!(record_size(LocusContent::from_bits_truncate(0x7F)), 20);
        assert_eq!(record_size(LocusContent::UTC), 5);
        assert_eq!(
            record_size(LocusContent::from_bits_truncate(0x147F)),
            23,
            "HDOP and NSAT add three bytes"
        );
    }

    #[test]
    fn empty_log_is_rejected() {
        assert!(Locus::parse(&[0xFF; 0x40], true).is_err());
        assert!(Locus::parse(&[0xFF; 8], true).is_err());
    }
}
