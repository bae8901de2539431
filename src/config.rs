//! High-level operations on the configuration EEPROM: whole-image dump
//! and flash, navigation data, MMSI/ATIS programming.
//!
//! The image is 32 KiB. Its first and last two bytes hold a magic pair
//! that is never overwritten; flashing refuses to proceed when the
//! device's magic does not match the image, and refuses a US/non-US
//! region mismatch unless explicitly overridden.

use std::collections::HashMap;

use crate::nav::{self, NavData, NavRoute, Route, Waypoint, RECORD_SIZE};
use crate::protocol::{HxProtocol, PAGE_SIZE};
use crate::transport::Transport;
use crate::{HxError, Result, CONFIG_SIZE};

const NAV_STATUS_ADDR: u16 = 0x0005;
const REGION_ADDR: u16 = 0x010F;
const MMSI_ADDR: u16 = 0x00B0;
const ATIS_ADDR: u16 = 0x00B6;
const WAYPOINT_HISTORY_ADDR: u16 = 0x05E0;
const ROUTE_HISTORY_ADDR: u16 = 0x05F0;

const NAV_BASE: u16 = 0x4300;
const NAV_END: u16 = 0x5E80;
const WAYPOINT_SLOTS: usize = 200;
const ROUTE_SLOTS: usize = 20;
const ROUTE_REGION_OFFSET: usize = WAYPOINT_SLOTS * RECORD_SIZE;

/// Configuration engine on top of a CP-mode session.
pub struct HxConfig<'a, T: Transport> {
    p: &'a mut HxProtocol<T>,
}

impl<'a, T: Transport> HxConfig<'a, T> {
    pub fn new(p: &'a mut HxProtocol<T>) -> HxConfig<'a, T> {
        HxConfig { p }
    }

    /// Device capacity: (waypoints, routes).
    pub fn limits(&self) -> (usize, usize) {
        (WAYPOINT_SLOTS, ROUTE_SLOTS)
    }

    /// Dump the whole 32 KiB configuration image.
    pub fn config_read(&mut self) -> Result<Vec<u8>> {
        let mut config_data = Vec::with_capacity(CONFIG_SIZE);
        for offset in (0..CONFIG_SIZE).step_by(PAGE_SIZE) {
            if offset % 0x1000 == 0 {
                info!(
                    "{} / {} bytes ({}%)",
                    offset,
                    CONFIG_SIZE,
                    100 * offset / CONFIG_SIZE
                );
            }
            config_data.extend(self.p.read_config_memory(offset as u16, PAGE_SIZE as u8)?);
        }
        info!("{} / {} bytes (100%)", CONFIG_SIZE, CONFIG_SIZE);
        Ok(config_data)
    }

    /// Flash a whole configuration image.
    ///
    /// The first and last two bytes of the image are never written; they
    /// hold the magic and the device keeps its own. Write order matters
    /// to the firmware: the two low fragments first, then the bulk
    /// pages, then the tail fragment.
    pub fn config_write(&mut self, data: &[u8], check_region: bool) -> Result<()> {
        if data.len() != CONFIG_SIZE {
            return Err(HxError::Protocol("Unexpected config data size".to_string()));
        }
        let magic = self.p.read_config_memory(0x0000, 2)?;
        let magic_end = self.p.read_config_memory((CONFIG_SIZE - 2) as u16, 2)?;
        if magic[..] != data[..2] || magic_end[..] != data[CONFIG_SIZE - 2..] {
            return Err(HxError::Protocol(
                "Unexpected config magic in device".to_string(),
            ));
        }

        let region = self.p.read_config_memory(REGION_ADDR, 1)?[0];
        let region_is_us = region == 0xFF;
        let data_is_us = data[REGION_ADDR as usize] == 0xFF;
        if region_is_us != data_is_us {
            if check_region {
                error!(
                    "Region mismatch: device {}, image {}",
                    nav::region_name(region).unwrap_or("unknown"),
                    nav::region_name(data[REGION_ADDR as usize]).unwrap_or("unknown")
                );
                return Err(HxError::Protocol("Region mismatch".to_string()));
            }
            warn!("Ignoring region mismatch. Flashing anyway");
        }

        info!("0 / {} bytes (0%)", CONFIG_SIZE);
        self.p.write_config_memory(0x0002, &data[0x0002..0x000F])?;
        self.p.write_config_memory(0x0010, &data[0x0010..0x0040])?;
        for offset in (0x0040..0x7FC0usize).step_by(PAGE_SIZE) {
            if offset % 0x1000 == 0 {
                info!(
                    "{} / {} bytes ({}%)",
                    offset,
                    CONFIG_SIZE,
                    100 * offset / CONFIG_SIZE
                );
            }
            self.p
                .write_config_memory(offset as u16, &data[offset..offset + PAGE_SIZE])?;
        }
        self.p.write_config_memory(0x7FC0, &data[0x7FC0..0x7FFE])?;
        info!("{} / {} bytes (100%)", CONFIG_SIZE, CONFIG_SIZE);
        Ok(())
    }

    /// Read waypoints, routes (dereferenced), nav status and the two
    /// history trails.
    pub fn read_nav_data(&mut self) -> Result<NavData> {
        let mut nav_data = Vec::with_capacity((NAV_END - NAV_BASE) as usize);
        for offset in (NAV_BASE..NAV_END).step_by(PAGE_SIZE) {
            nav_data.extend(self.p.read_config_memory(offset, PAGE_SIZE as u8)?);
        }

        let mut waypoints = Vec::new();
        let mut by_id: HashMap<u8, usize> = HashMap::new();
        for slot in 0..WAYPOINT_SLOTS {
            let record = &nav_data[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE];
            if let Some(wp) = Waypoint::unpack(record)? {
                by_id.insert(wp.id, waypoints.len());
                waypoints.push(wp);
            }
        }

        let mut routes = Vec::new();
        for slot in 0..ROUTE_SLOTS {
            let start = ROUTE_REGION_OFFSET + slot * RECORD_SIZE;
            let record = &nav_data[start..start + RECORD_SIZE];
            if let Some(route) = Route::unpack(record)? {
                let mut points = Vec::with_capacity(route.points.len());
                for id in &route.points {
                    match by_id.get(id) {
                        Some(&i) => points.push(waypoints[i].clone()),
                        None => warn!("Route {} references unknown waypoint {}", route.name, id),
                    }
                }
                routes.push(NavRoute {
                    name: route.name,
                    points,
                });
            }
        }

        let nav_status = self.p.read_config_memory(NAV_STATUS_ADDR, 1)?[0];
        let waypoint_history = self
            .p
            .read_config_memory(WAYPOINT_HISTORY_ADDR, 6)?
            .into_iter()
            .filter(|&b| b != 0xFF)
            .collect();
        let route_history = self
            .p
            .read_config_memory(ROUTE_HISTORY_ADDR, 6)?
            .into_iter()
            .filter(|&b| b != 0xFF)
            .collect();

        Ok(NavData {
            waypoints,
            routes,
            nav_status,
            waypoint_history,
            route_history,
        })
    }

    /// Replace the navigation data on the device. Also resets the nav
    /// status byte and both history trails.
    pub fn write_nav_data(&mut self, nav: &NavData) -> Result<()> {
        if nav.waypoints.len() > WAYPOINT_SLOTS {
            return Err(HxError::Protocol(format!(
                "Too many waypoints to fit on device (maximum: {})",
                WAYPOINT_SLOTS
            )));
        }
        if nav.routes.len() > ROUTE_SLOTS {
            return Err(HxError::Protocol(format!(
                "Too many routes to fit on device (maximum: {})",
                ROUTE_SLOTS
            )));
        }

        let mut region = vec![0xFF; (NAV_END - NAV_BASE) as usize];
        for (slot, wp) in nav.waypoints.iter().enumerate() {
            let record = wp.pack()?;
            region[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE].copy_from_slice(&record);
        }
        for (slot, route) in nav.routes.iter().enumerate() {
            let record = Route {
                name: route.name.clone(),
                points: route.points.iter().map(|wp| wp.id).collect(),
            }
            .pack()?;
            let start = ROUTE_REGION_OFFSET + slot * RECORD_SIZE;
            region[start..start + RECORD_SIZE].copy_from_slice(&record);
        }

        for (i, page) in region.chunks(PAGE_SIZE).enumerate() {
            self.p
                .write_config_memory(NAV_BASE + (i * PAGE_SIZE) as u16, page)?;
        }
        self.p.write_config_memory(NAV_STATUS_ADDR, &[0x00])?;
        self.p
            .write_config_memory(WAYPOINT_HISTORY_ADDR, &[0xFF; 6])?;
        self.p.write_config_memory(ROUTE_HISTORY_ADDR, &[0xFF; 6])?;
        Ok(())
    }

    /// Read the programmed MMSI and its status byte.
    pub fn read_mmsi(&mut self) -> Result<(String, String)> {
        let data = hex::encode_upper(self.p.read_config_memory(MMSI_ADDR, 6)?);
        Ok((data[0..9].to_string(), data[10..12].to_string()))
    }

    /// Program or clear the MMSI. `None` clears; a programmed MMSI is
    /// exactly nine decimal digits. Status defaults to `02` when
    /// programming and `00` when clearing.
    pub fn write_mmsi(&mut self, mmsi: Option<&str>, status: Option<&str>) -> Result<()> {
        let (digits, status) = match mmsi {
            None => ("FFFFFFFFFF".to_string(), status.unwrap_or("00")),
            Some(m) => {
                if !is_decimal(m) {
                    return Err(HxError::Protocol("Invalid MMSI format".to_string()));
                }
                let mut digits = m.to_string();
                if digits.len() == 9 {
                    digits.push('0');
                }
                (digits, status.unwrap_or("02"))
            }
        };
        if digits.len() != 10 {
            return Err(HxError::Protocol("Invalid MMSI length".to_string()));
        }
        let status = status.to_ascii_uppercase();
        if !["00", "01", "02", "FF"].contains(&status.as_str()) {
            return Err(HxError::Protocol("Invalid MMSI status".to_string()));
        }
        let data = hex::decode(format!("{}{}", digits, status))
            .map_err(|_| HxError::Protocol("Invalid MMSI format".to_string()))?;
        self.p.write_config_memory(MMSI_ADDR, &data)
    }

    /// Read the programmed ATIS and its status byte.
    pub fn read_atis(&mut self) -> Result<(String, String)> {
        let data = hex::encode_upper(self.p.read_config_memory(ATIS_ADDR, 6)?);
        Ok((data[0..10].to_string(), data[10..12].to_string()))
    }

    /// Program or clear the ATIS. `None` clears; a programmed ATIS is
    /// exactly ten decimal digits and starts with `9`. Status defaults
    /// to `01` when programming and `00` when clearing.
    pub fn write_atis(&mut self, atis: Option<&str>, status: Option<&str>) -> Result<()> {
        let (digits, status) = match atis {
            None => ("FFFFFFFFFF".to_string(), status.unwrap_or("00")),
            Some(a) => {
                if !a.starts_with('9') || !is_decimal(a) {
                    return Err(HxError::Protocol("Invalid ATIS format".to_string()));
                }
                (a.to_string(), status.unwrap_or("01"))
            }
        };
        if digits.len() != 10 {
            return Err(HxError::Protocol("Invalid ATIS length".to_string()));
        }
        let status = status.to_ascii_uppercase();
        if !["00", "01", "02", "FF"].contains(&status.as_str()) {
            return Err(HxError::Protocol("Invalid ATIS status".to_string()));
        }
        let data = hex::decode(format!("{}{}", digits, status))
            .map_err(|_| HxError::Protocol("Invalid ATIS format".to_string()))?;
        self.p.write_config_memory(ATIS_ADDR, &data)
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
