//! Codecs for the 32-byte waypoint and route records in config memory.
//!
//! Waypoints store coordinates as BCD: two packed degree digits and six
//! packed minute digits (0.0001′ resolution) per axis, with an ASCII
//! hemisphere byte after each. The leading MMSI field is nine BCD digits
//! plus a filler nibble, or all `0xFF` when unset. Names are ASCII,
//! right-padded with `0xFF`. An `0xFF` slot-ID byte marks an empty slot.

use serde::{Deserialize, Serialize};

use crate::{HxError, Result};

/// Size of one waypoint or route record.
pub const RECORD_SIZE: usize = 32;

/// A navigation waypoint.
///
/// Coordinates are carried in both observed forms: the packed
/// degrees/minutes string (e.g. `52N30.5346`) and the signed decimal
/// value. The string form is authoritative when packing, so records
/// survive a decode/encode round trip bit-exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: u8,
    pub name: String,
    pub mmsi: Option<String>,
    pub latitude: String,
    pub longitude: String,
    pub latitude_decimal: f64,
    pub longitude_decimal: f64,
}

/// A route: a name plus the slot IDs of its member waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub points: Vec<u8>,
}

/// One route with its member waypoints dereferenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavRoute {
    pub name: String,
    pub points: Vec<Waypoint>,
}

/// Everything the nav-data engine reads from the device in one go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavData {
    pub waypoints: Vec<Waypoint>,
    pub routes: Vec<NavRoute>,
    pub nav_status: u8,
    pub waypoint_history: Vec<u8>,
    pub route_history: Vec<u8>,
}

fn strip_ff(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b != 0xFF)
        .map(|i| i + 1)
        .unwrap_or(0);
    &data[..end]
}

fn ascii_string(data: &[u8], what: &str) -> Result<String> {
    String::from_utf8(data.to_vec())
        .map_err(|_| HxError::Protocol(format!("{} is not ASCII", what)))
}

impl Waypoint {
    /// Build a waypoint from decimal-degree coordinates.
    pub fn new(id: u8, name: &str, mmsi: Option<&str>, latitude: f64, longitude: f64) -> Waypoint {
        let lat_deg = latitude.abs().trunc();
        let lat_min = (latitude.abs() - lat_deg) * 60.0;
        let lat_dir = if latitude.is_sign_negative() { 'S' } else { 'N' };
        let lon_deg = longitude.abs().trunc();
        let lon_min = (longitude.abs() - lon_deg) * 60.0;
        let lon_dir = if longitude.is_sign_negative() { 'W' } else { 'E' };
        Waypoint {
            id,
            name: name.to_string(),
            mmsi: mmsi.map(|m| m.to_string()),
            latitude: format!("{}{}{:.4}", lat_deg as u32, lat_dir, lat_min),
            longitude: format!("{}{}{:.4}", lon_deg as u32, lon_dir, lon_min),
            latitude_decimal: latitude,
            longitude_decimal: longitude,
        }
    }

    /// Decode one record. `None` for an empty slot.
    pub fn unpack(data: &[u8]) -> Result<Option<Waypoint>> {
        if data.len() != RECORD_SIZE {
            return Err(HxError::Protocol(format!(
                "Waypoint record has {} bytes",
                data.len()
            )));
        }
        let id = data[31];
        if id == 0xFF {
            return Ok(None);
        }
        let name = ascii_string(strip_ff(&data[16..31]), "Waypoint name")?;

        let mmsi_hex = hex::encode(&data[0..5]);
        let mmsi = if &mmsi_hex[0..9] == "fffffffff" {
            None
        } else {
            Some(mmsi_hex[0..9].to_string())
        };

        // The degree digits share byte 4 with the MMSI filler nibble, so
        // the BCD digits start one nibble in.
        let bad_lat = || HxError::Protocol("Invalid waypoint latitude encoding".to_string());
        let lat_str = hex::encode(&data[4..9]);
        let lat_deg: u32 = lat_str[2..4].parse().map_err(|_| bad_lat())?;
        let lat_min = lat_str[4..10].parse::<u32>().map_err(|_| bad_lat())? as f64 / 10000.0;
        let lat_dir = match data[9] {
            b'N' => 'N',
            b'S' => 'S',
            _ => return Err(bad_lat()),
        };

        let bad_lon = || HxError::Protocol("Invalid waypoint longitude encoding".to_string());
        let lon_str = hex::encode(&data[10..15]);
        let lon_deg: u32 = lon_str[0..4].parse().map_err(|_| bad_lon())?;
        let lon_min = lon_str[4..10].parse::<u32>().map_err(|_| bad_lon())? as f64 / 10000.0;
        let lon_dir = match data[15] {
            b'E' => 'E',
            b'W' => 'W',
            _ => return Err(bad_lon()),
        };

        let lat_sign = if lat_dir == 'S' { -1.0 } else { 1.0 };
        let lon_sign = if lon_dir == 'W' { -1.0 } else { 1.0 };

        Ok(Some(Waypoint {
            id,
            name,
            mmsi,
            latitude: format!("{}{}{:.4}", lat_deg, lat_dir, lat_min),
            longitude: format!("{}{}{:.4}", lon_deg, lon_dir, lon_min),
            latitude_decimal: lat_sign * lat_deg as f64 + lat_min / 60.0,
            longitude_decimal: lon_sign * lon_deg as f64 + lon_min / 60.0,
        }))
    }

    /// Encode to the 32-byte record layout.
    pub fn pack(&self) -> Result<[u8; 32]> {
        let (lat_deg, lat_dir, lat_min) = split_coord(&self.latitude, &['N', 'S'])
            .ok_or_else(|| HxError::Protocol("Invalid waypoint latitude format".to_string()))?;
        let lat_hex = format!(
            "{:02}{}{:02x}",
            lat_deg,
            bcd_minutes(lat_min),
            lat_dir as u8
        );
        if lat_hex.len() != 10 {
            return Err(HxError::Protocol(
                "Invalid waypoint latitude format".to_string(),
            ));
        }

        let (lon_deg, lon_dir, lon_min) = split_coord(&self.longitude, &['E', 'W'])
            .ok_or_else(|| HxError::Protocol("Invalid waypoint longitude format".to_string()))?;
        let lon_hex = format!(
            "{:04}{}{:02x}",
            lon_deg,
            bcd_minutes(lon_min),
            lon_dir as u8
        );
        if lon_hex.len() != 12 {
            return Err(HxError::Protocol(
                "Invalid waypoint longitude format".to_string(),
            ));
        }

        let mut out = Vec::with_capacity(RECORD_SIZE);
        match &self.mmsi {
            None => out.extend_from_slice(&[0xFF; 5]),
            Some(m) => {
                if m.len() != 9 || !m.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(HxError::Protocol(format!("Invalid waypoint MMSI `{}`", m)));
                }
                let packed = hex::decode(format!("{}0", m))
                    .map_err(|_| HxError::Protocol("Invalid waypoint MMSI".to_string()))?;
                out.extend_from_slice(&packed);
            }
        }
        out.extend_from_slice(
            &hex::decode(&lat_hex)
                .map_err(|_| HxError::Protocol("Invalid waypoint latitude format".to_string()))?,
        );
        out.extend_from_slice(
            &hex::decode(&lon_hex)
                .map_err(|_| HxError::Protocol("Invalid waypoint longitude format".to_string()))?,
        );
        if !self.name.is_ascii() {
            return Err(HxError::Protocol(format!(
                "Waypoint name `{}` is not ASCII",
                self.name
            )));
        }
        let mut name = self.name.as_bytes()[..self.name.len().min(15)].to_vec();
        name.resize(15, 0xFF);
        out.extend_from_slice(&name);
        out.push(self.id);

        debug_assert_eq!(out.len(), RECORD_SIZE);
        let mut record = [0u8; RECORD_SIZE];
        record.copy_from_slice(&out);
        Ok(record)
    }
}

/// Split `52N30.5346` into degrees, direction and minutes.
fn split_coord(coord: &str, dirs: &[char]) -> Option<(u32, char, f64)> {
    let coord = coord.to_ascii_uppercase();
    let pos = coord.find(|c| dirs.contains(&c))?;
    let dir = coord[pos..].chars().next()?;
    let deg: u32 = coord[..pos].parse().ok()?;
    let min_str = &coord[pos + 1..];
    if !min_str.contains('.') {
        return None;
    }
    let min: f64 = min_str.parse().ok()?;
    Some((deg, dir, min))
}

/// Six BCD digits of minutes at 0.0001′ resolution: `30.5346` → `305346`.
fn bcd_minutes(min: f64) -> String {
    let s = format!("{:.4}", min).replace('.', "");
    format!("{:0>6}", s)
}

impl Route {
    /// Decode one record. `None` for an empty slot.
    pub fn unpack(data: &[u8]) -> Result<Option<Route>> {
        if data.len() != RECORD_SIZE {
            return Err(HxError::Protocol(format!(
                "Route record has {} bytes",
                data.len()
            )));
        }
        if data[0] == 0xFF || data[16] == 0xFF {
            return Ok(None);
        }
        let name = ascii_string(strip_ff(&data[0..16]), "Route name")?;
        let points = data[16..32]
            .iter()
            .copied()
            .take_while(|&b| b != 0xFF)
            .collect();
        Ok(Some(Route { name, points }))
    }

    /// Encode to the 32-byte record layout.
    pub fn pack(&self) -> Result<[u8; 32]> {
        if self.points.len() > 16 {
            return Err(HxError::Protocol("Route encoding error".to_string()));
        }
        if !self.name.is_ascii() {
            return Err(HxError::Protocol(format!(
                "Route name `{}` is not ASCII",
                self.name
            )));
        }
        let mut out = self.name.as_bytes()[..self.name.len().min(15)].to_vec();
        out.resize(16, 0xFF);
        out.extend_from_slice(&self.points);
        out.resize(RECORD_SIZE, 0xFF);
        let mut record = [0u8; RECORD_SIZE];
        record.copy_from_slice(&out);
        Ok(record)
    }
}

/// Region names for the region byte at `0x010F`.
pub fn region_name(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("INTERNATIONAL"),
        1 => Some("UNITED KINGDOM"),
        2 => Some("BELGIUM"),
        3 => Some("NETHERLAND"),
        4 => Some("SWEDEN"),
        5 => Some("GERMANY"),
        255 => Some("NONE"),
        _ => None,
    }
}

/// Region byte for a region name, accepting the common aliases.
pub fn region_code(name: &str) -> Option<u8> {
    match name.to_ascii_uppercase().as_str() {
        "INTERNATIONAL" | "CANADA" | "INTL" | "INT" | "CAN" | "CA" => Some(0),
        "UNITED KINGDOM" | "UK" => Some(1),
        "BELGIUM" | "BE" => Some(2),
        "NETHERLAND" | "NETHERLANDS" | "NL" => Some(3),
        "SWEDEN" | "SE" => Some(4),
        "GERMANY" | "GRMN" | "DE" => Some(5),
        "NONE" => Some(255),
        _ => None,
    }
}
