//! Session handling and the paged configuration memory engine.
//!
//! [`HxProtocol::connect`] performs the mode probe: both directions are
//! flushed, the two bytes `P?` go out, and the first reply byte decides.
//! An HX handset in NMEA mode answers `P` to `P` (or races us with a
//! `$…` sentence), one in CP mode answers `@` to `?`; anything else is
//! not HX hardware. In CP mode the session then enters command mode and
//! syncs, after which the paged `#CEPRD`/`#CEPWR` engine and the GPS
//! chipset commands are usable.

use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::message::Message;
use crate::transport::Transport;
use crate::{HxError, Result};

/// Maximum number of bytes per paged read or write.
pub const PAGE_SIZE: usize = 0x40;

/// Which nuisance messages from the GPS chipset `receive` drops.
///
/// The chipset intersperses its own traffic with the command protocol:
/// `$PMTK LOG FULL_STOP` warnings when the log is full, `010` system
/// startup messages and `011` text notices. Most callers never want to
/// see any of them, but the log-status path must observe `FULL_STOP`,
/// so the policy is an explicit value rather than baked in.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveFilter {
    pub full_stop: bool,
    pub system: bool,
    pub text: bool,
}

impl Default for ReceiveFilter {
    fn default() -> ReceiveFilter {
        ReceiveFilter {
            full_stop: true,
            system: true,
            text: true,
        }
    }
}

impl ReceiveFilter {
    /// Drop nothing.
    pub fn none() -> ReceiveFilter {
        ReceiveFilter {
            full_stop: false,
            system: false,
            text: false,
        }
    }

    fn drops(&self, m: &Message) -> bool {
        if !matches!(m, Message::Nmea { .. }) || m.typ() != "$PMTK" {
            return false;
        }
        let args = m.args();
        if self.full_stop && args.len() >= 2 && args[0] == "LOG" && args[1] == "FULL_STOP" {
            return true;
        }
        if self.system && args.first().map(String::as_str) == Some("010") {
            return true;
        }
        if self.text && args.first().map(String::as_str) == Some("011") {
            return true;
        }
        false
    }
}

/// A protocol session on one transport.
///
/// The mode flags are set once by [`connect`](HxProtocol::connect) and
/// are immutable afterwards; reconnect to re-probe.
pub struct HxProtocol<T: Transport> {
    conn: T,
    pub connected: bool,
    pub hx_hardware: bool,
    pub cp_mode: bool,
    pub nmea_mode: bool,
}

impl<T: Transport> HxProtocol<T> {
    /// Probe the device on `conn` and, if it is in CP mode, enter
    /// command mode and sync.
    pub fn connect(conn: T) -> Result<HxProtocol<T>> {
        let mut p = HxProtocol {
            conn,
            connected: false,
            hx_hardware: false,
            cp_mode: false,
            nmea_mode: false,
        };
        p.detect_device_mode()?;
        p.connected = true;
        if p.hx_hardware {
            debug!("Device responds like HX style hardware");
        } else {
            debug!("Device behaves not like HX style hardware");
        }
        if p.cp_mode {
            debug!("Device is in CP mode, switching to command mode");
            p.cmd_mode()?;
            p.sync()?;
        }
        if p.nmea_mode {
            debug!("Device is in NMEA mode");
        }
        Ok(p)
    }

    fn detect_device_mode(&mut self) -> Result<()> {
        // In NMEA mode an HX device replies with "P" to "P" and with
        // nothing to "?"; in CP mode it replies with "@" to "?" and with
        // nothing to "P". So one "P?" probe distinguishes the modes.
        self.conn.flush_input()?;
        self.conn.flush_output()?;
        self.conn.write(b"P?")?;
        let r = match self.conn.read(1) {
            Ok(r) => r,
            Err(HxError::Timeout(_)) => {
                warn!("No response, so probably not talking to HX hardware");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match r[0] {
            b'P' | b'$' => {
                if r[0] == b'$' {
                    // The firmware sometimes races the probe reply with a
                    // NMEA sentence; drop the rest of it.
                    debug!("Race condition with NMEA message detected, assuming NMEA mode");
                    self.conn.flush_input()?;
                }
                debug!("Response like HX hardware in NMEA mode");
                self.hx_hardware = true;
                self.nmea_mode = true;
            }
            b'@' => {
                debug!("Response like HX hardware in CP mode");
                self.hx_hardware = true;
                self.cp_mode = true;
            }
            other => {
                warn!("Unexpected probe response {:#04x}, not HX hardware", other);
            }
        }
        Ok(())
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.conn
    }

    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.conn.write(&message.to_bytes())
    }

    /// Receive one message with the default filter policy.
    pub fn receive(&mut self) -> Result<Message> {
        self.receive_filtered(&ReceiveFilter::default())
    }

    /// Receive one message, dropping whatever `filter` says to drop.
    pub fn receive_filtered(&mut self, filter: &ReceiveFilter) -> Result<Message> {
        loop {
            let line = self.conn.read_line()?;
            let m = Message::parse(&line)?;
            if filter.drops(&m) {
                debug!("Filtered {:?}", m.to_string());
                continue;
            }
            return Ok(m);
        }
    }

    /// Nudge the firmware into command mode. The real hardware never
    /// acknowledges this line, so there is nothing to read back.
    pub fn cmd_mode(&mut self) -> Result<()> {
        debug!("Sending command mode request");
        self.conn.write(b"0ACMD:002\r\n")
    }

    /// `#CMDSY` handshake: one retry with flushes and a settle delay,
    /// then give up.
    pub fn sync(&mut self) -> Result<()> {
        self.conn.flush_output()?;
        self.conn.flush_input()?;
        self.send(&Message::cp("#CMDSY", &[]))?;
        if self.expect_cmdok() {
            return Ok(());
        }
        debug!("Device failed to sync, trying harder");
        self.conn.flush_output()?;
        sleep(Duration::from_millis(100));
        self.conn.flush_input()?;
        self.send(&Message::cp("#CMDSY", &[]))?;
        if self.expect_cmdok() {
            return Ok(());
        }
        debug!("Device failed to sync, giving up");
        Err(HxError::Protocol("Device failed to sync".to_string()))
    }

    fn expect_cmdok(&mut self) -> bool {
        matches!(self.receive(), Ok(m) if m.typ() == "#CMDOK")
    }

    /// Query the firmware version (`#CVRRQ`).
    pub fn firmware_version(&mut self) -> Result<String> {
        self.send(&Message::cp("#CVRRQ", &[]))?;
        let r = self.receive()?;
        if r.typ() != "#CMDOK" {
            return Err(HxError::Protocol(
                "Device did not acknowledge firmware version request".to_string(),
            ));
        }
        let cvrdq = self.receive()?;
        if cvrdq.typ() != "#CVRDQ" || cvrdq.args().is_empty() {
            return Err(HxError::Protocol(
                "Device did not reply with firmware version".to_string(),
            ));
        }
        self.send(&Message::cp("#CMDOK", &[]))?;
        let r = self.receive()?;
        if r.typ() != "#CMDOK" {
            return Err(HxError::Protocol(
                "Device did not acknowledge firmware version ack".to_string(),
            ));
        }
        Ok(cvrdq.args()[0].clone())
    }

    /// Flash chip identifier, e.g. `AM057N` or `AM063N`.
    ///
    /// The `#CMDNR` handshake for this only works once per power-on, so
    /// the canonical source is a direct read of the ID string in config
    /// memory.
    pub fn flash_id(&mut self) -> Result<String> {
        let mut data = self.read_config_memory(0x0100, 10)?;
        while data.last() == Some(&0xFF) {
            data.pop();
        }
        String::from_utf8(data).map_err(|_| HxError::Protocol("Flash ID is not ASCII".to_string()))
    }

    /// Check the device's flash ID against a model's known IDs.
    pub fn check_flash_id(&mut self, flash_id: &[&str]) -> Result<bool> {
        let fid = self.flash_id()?;
        if flash_id.contains(&fid.as_str()) {
            debug!("Device reported expected flash ID {}", fid);
            Ok(true)
        } else {
            warn!(
                "Flash ID mismatch. Device reported {}, expected {:?}",
                fid, flash_id
            );
            Ok(false)
        }
    }

    /// Poll `#CEPSR` until the radio reports status `00`.
    pub fn wait_for_ready(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut radio_status = String::new();
        while radio_status != "00" && Instant::now() < deadline {
            self.send(&Message::cp("#CEPSR", &["00"]))?;
            let r = self.receive()?;
            if r.typ() != "#CMDOK" {
                return Err(HxError::Protocol(
                    "Device did not acknowledge status request".to_string(),
                ));
            }
            let r = self.receive()?;
            if r.typ() != "#CEPSD" || r.args().is_empty() {
                return Err(HxError::Protocol(
                    "Device did not report status".to_string(),
                ));
            }
            radio_status = r.args()[0].clone();
            if radio_status != "00" {
                debug!("Waiting for radio, state={}", radio_status);
            }
            self.send(&Message::cp("#CMDOK", &[]))?;
        }
        if radio_status != "00" {
            return Err(HxError::Timeout("Device not ready".to_string()));
        }
        Ok(())
    }

    /// Read up to one page (`0x40` bytes) of config memory.
    pub fn read_config_memory(&mut self, offset: u16, length: u8) -> Result<Vec<u8>> {
        if length as usize > PAGE_SIZE {
            return Err(HxError::Protocol(format!(
                "Read length {:#04x} exceeds page size",
                length
            )));
        }
        self.wait_for_ready(Duration::from_secs(1))?;
        let offset_arg = format!("{:04X}", offset);
        let length_arg = format!("{:02X}", length);
        self.send(&Message::cp("#CEPRD", &[&offset_arg, &length_arg]))?;
        let r = self.receive()?;
        if r.typ() != "#CMDOK" {
            return Err(HxError::Protocol(
                "Device did not acknowledge read".to_string(),
            ));
        }
        let d = self.receive()?;
        if d.typ() != "#CEPDT" || d.args().len() < 3 {
            return Err(HxError::Protocol(
                "Device did not reply with data".to_string(),
            ));
        }
        self.send(&Message::cp("#CMDOK", &[]))?;
        let data = hex::decode(&d.args()[2])
            .map_err(|e| HxError::Protocol(format!("Bad hex in data reply: {}", e)))?;
        if data.len() != length as usize {
            return Err(HxError::Protocol(format!(
                "Device replied with {} bytes instead of {}",
                data.len(),
                length
            )));
        }
        Ok(data)
    }

    /// Write up to one page (`0x40` bytes) of config memory.
    pub fn write_config_memory(&mut self, offset: u16, data: &[u8]) -> Result<()> {
        if data.len() > PAGE_SIZE {
            return Err(HxError::Protocol(format!(
                "Write length {:#04x} exceeds page size",
                data.len()
            )));
        }
        self.wait_for_ready(Duration::from_secs(1))?;
        let offset_arg = format!("{:04X}", offset);
        let length_arg = format!("{:02X}", data.len());
        let data_arg = hex::encode_upper(data);
        self.send(&Message::cp("#CEPWR", &[&offset_arg, &length_arg, &data_arg]))?;
        let r = self.receive()?;
        if r.typ() != "#CMDOK" {
            return Err(HxError::Protocol(
                "Device did not acknowledge write".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn cp(typ: &str, args: &[&str]) -> Message {
        Message::cp(typ, args)
    }

    /// Push the `#CEPSR` readiness exchange one poll round needs.
    fn push_ready(t: &mut MockTransport, status: &str) {
        t.push_message(&cp("#CMDOK", &[]));
        t.push_message(&cp("#CEPSD", &[status]));
    }

    #[test]
    fn detect_nmea_mode() {
        let mut t = MockTransport::new();
        t.push_input(b"P");
        let p = HxProtocol::connect(t).unwrap();
        assert!(p.hx_hardware);
        assert!(p.nmea_mode);
        assert!(!p.cp_mode);
    }

    #[test]
    fn detect_nmea_mode_race() {
        let mut t = MockTransport::new();
        t.push_input(b"$GPGGA,123519,4807.038,N*58\r\n");
        let mut p = HxProtocol::connect(t).unwrap();
        assert!(p.hx_hardware);
        assert!(p.nmea_mode);
        // The rest of the racing sentence was flushed.
        assert_eq!(p.transport_mut().available().unwrap(), 0);
    }

    #[test]
    fn detect_cp_mode() {
        let mut t = MockTransport::new();
        t.push_input(b"@");
        t.push_message(&cp("#CMDOK", &[])); // sync reply
        let t_out;
        {
            let p = HxProtocol::connect(t).unwrap();
            assert!(p.hx_hardware);
            assert!(p.cp_mode);
            assert!(!p.nmea_mode);
            t_out = p.conn.output_string();
        }
        assert!(t_out.starts_with("P?"));
        assert!(t_out.contains("0ACMD:002\r\n"));
        assert!(t_out.contains("#CMDSY\r\n"));
    }

    #[test]
    fn detect_no_hardware() {
        let t = MockTransport::new(); // nothing to read: probe times out
        let p = HxProtocol::connect(t).unwrap();
        assert!(!p.hx_hardware);
        assert!(!p.cp_mode);
        assert!(!p.nmea_mode);

        let mut t = MockTransport::new();
        t.push_input(b"X");
        let p = HxProtocol::connect(t).unwrap();
        assert!(!p.hx_hardware);
    }

    #[test]
    fn sync_gives_up_after_retry() {
        let mut t = MockTransport::new();
        t.push_input(b"@"); // CP probe reply, but no sync replies at all
        match HxProtocol::connect(t) {
            Err(HxError::Protocol(e)) => assert_eq!(e, "Device failed to sync"),
            other => panic!("expected sync failure, got {:?}", other.map(|_| ())),
        }
    }

    fn cp_session(t: MockTransport) -> HxProtocol<MockTransport> {
        HxProtocol {
            conn: t,
            connected: true,
            hx_hardware: true,
            cp_mode: true,
            nmea_mode: false,
        }
    }

    #[test]
    fn receive_filter_policies() {
        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["010", "001"]));
        t.push_message(&Message::nmea("$PMTK", &["011", "MTKGPS"]));
        t.push_message(&Message::nmea("$PMTK", &["LOG", "FULL_STOP"]));
        t.push_message(&cp("#CVRDQ", &["23.42"]));
        let mut p = cp_session(t);
        let m = p.receive().unwrap();
        assert_eq!(m.typ(), "#CVRDQ");

        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["LOG", "FULL_STOP"]));
        let mut p = cp_session(t);
        let m = p.receive_filtered(&ReceiveFilter::none()).unwrap();
        assert_eq!(m.args()[1], "FULL_STOP");
    }

    #[test]
    fn firmware_version_exchange() {
        let mut t = MockTransport::new();
        t.push_message(&cp("#CMDOK", &[]));
        t.push_message(&cp("#CVRDQ", &["23.42"]));
        t.push_message(&cp("#CMDOK", &[]));
        let mut p = cp_session(t);
        assert_eq!(p.firmware_version().unwrap(), "23.42");
        assert!(p.conn.output_string().contains("#CVRRQ\t6E\r\n"));
    }

    #[test]
    fn wait_for_ready_polls_until_clear() {
        let mut t = MockTransport::new();
        push_ready(&mut t, "01");
        push_ready(&mut t, "00");
        let mut p = cp_session(t);
        p.wait_for_ready(Duration::from_secs(1)).unwrap();
        // Both status rounds were acknowledged.
        assert_eq!(p.conn.output_string().matches("#CMDOK\r\n").count(), 2);
    }

    #[test]
    fn read_config_memory_exchange() {
        let mut t = MockTransport::new();
        push_ready(&mut t, "00");
        t.push_message(&cp("#CMDOK", &[]));
        t.push_message(&cp("#CEPDT", &["0100", "0A", "414D3035374E32FFFFFF"]));
        let mut p = cp_session(t);
        let data = p.read_config_memory(0x0100, 10).unwrap();
        assert_eq!(data, b"AM057N2\xff\xff\xff");
        let out = p.conn.output_string();
        assert!(out.contains("#CEPRD\t0100\t0A\t"));
        assert!(out.ends_with("#CMDOK\r\n"));
    }

    #[test]
    fn read_config_memory_deviation() {
        let mut t = MockTransport::new();
        push_ready(&mut t, "00");
        t.push_message(&cp("#CMDOK", &[]));
        t.push_message(&cp("#CMDER", &[]));
        let mut p = cp_session(t);
        assert!(matches!(
            p.read_config_memory(0x0100, 10),
            Err(HxError::Protocol(_))
        ));
    }

    #[test]
    fn write_config_memory_exchange() {
        let mut t = MockTransport::new();
        push_ready(&mut t, "00");
        t.push_message(&cp("#CMDOK", &[]));
        let mut p = cp_session(t);
        p.write_config_memory(0x00B0, &[0x12, 0x34, 0x56, 0x78, 0x90, 0x02])
            .unwrap();
        assert!(p
            .conn
            .output_string()
            .contains("#CEPWR\t00B0\t06\t123456789002\t"));
    }

    #[test]
    fn write_config_memory_rejected() {
        let mut t = MockTransport::new();
        push_ready(&mut t, "00");
        t.push_message(&cp("#CMDER", &[]));
        let mut p = cp_session(t);
        assert!(matches!(
            p.write_config_memory(0x00B0, &[0x00]),
            Err(HxError::Protocol(_))
        ));
    }

    #[test]
    fn page_size_is_enforced() {
        let t = MockTransport::new();
        let mut p = cp_session(t);
        assert!(matches!(
            p.read_config_memory(0, 0x41),
            Err(HxError::Protocol(_))
        ));
        assert!(matches!(
            p.write_config_memory(0, &[0u8; 0x41]),
            Err(HxError::Protocol(_))
        ));
    }

    #[test]
    fn flash_id_via_memory_read() {
        let mut t = MockTransport::new();
        push_ready(&mut t, "00");
        t.push_message(&cp("#CMDOK", &[]));
        t.push_message(&cp("#CEPDT", &["0100", "0A", "414D3035374E32FFFFFF"]));
        let mut p = cp_session(t);
        assert_eq!(p.flash_id().unwrap(), "AM057N2");
    }
}
