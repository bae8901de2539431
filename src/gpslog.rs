//! MediaTek GPS chipset commands, tunneled through a CP-mode session.
//!
//! The chipset keeps answering `$PMTK` queries while the radio is in CP
//! mode, which is how the LOCUS log is reached: `$PMTK183` for status,
//! `$PMTK622,1` for a streamed dump, `$PMTK184,1` to erase. The dump
//! arrives as numbered `LOX` lines of 8-hex-digit words; a gap in the
//! numbering is fatal, dumps are never resumed.

use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::message::Message;
use crate::protocol::{HxProtocol, ReceiveFilter};
use crate::transport::Transport;
use crate::{HxError, Result};

const SYNC_TIMEOUT: Duration = Duration::from_secs(5);
const SYNC_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
const ERASE_TIMEOUT: Duration = Duration::from_secs(30);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(4);

/// Decoded `$PMTK LOG` status record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogStatus {
    /// 4 KiB flash pages in use.
    pub pages_used: u32,
    pub logging_type: u8,
    pub logging_mode: u8,
    pub log_content: u16,
    /// Logging interval in seconds.
    pub interval: u16,
    pub distance: u16,
    pub speed: u16,
    pub logging_enabled: bool,
    pub slots_used: u32,
    pub usage_percent: u8,
    /// The chipset warned that the log is full and logging halted.
    pub full_stop: bool,
}

fn is_full_stop(m: &Message) -> bool {
    m.typ() == "$PMTK" && m.args().len() >= 2 && m.args()[0] == "LOG" && m.args()[1] == "FULL_STOP"
}

/// Base-10 numeric field. Everything in the status record is decimal
/// except `logging_mode`.
fn dec<N: FromStr>(args: &[String], i: usize) -> Result<N> {
    args[i]
        .parse()
        .map_err(|_| HxError::Protocol(format!("Bad numeric field `{}`", args[i])))
}

impl<T: Transport> HxProtocol<T> {
    /// Ping the GPS chipset until it answers, for up to five seconds.
    pub fn gps_sync(&mut self) -> Result<()> {
        let restore = self.transport_mut().timeout();
        self.transport_mut().set_timeout(SYNC_ATTEMPT_TIMEOUT);
        let result = self.gps_sync_inner();
        self.transport_mut().set_timeout(restore);
        result
    }

    fn gps_sync_inner(&mut self) -> Result<()> {
        let deadline = Instant::now() + SYNC_TIMEOUT;
        while Instant::now() < deadline {
            self.send(&Message::nmea("$PMTK", &["000"]))?;
            match self.receive() {
                Ok(m) if m.typ() == "$PMTK" && m.args() == ["001", "0", "3"] => {
                    debug!("GPS chipset in sync");
                    return Ok(());
                }
                Ok(m) => debug!("Ignoring {:?} while syncing", m.to_string()),
                Err(HxError::Timeout(_)) | Err(HxError::Protocol(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(HxError::Timeout("GPS chipset failed to sync".to_string()))
    }

    /// Query the LOCUS logger status (`$PMTK183`).
    pub fn read_gps_log_status(&mut self) -> Result<LogStatus> {
        self.send(&Message::nmea("$PMTK", &["183"]))?;
        // The log-full warning precedes the status record and is part of
        // the answer, so it must not be filtered here.
        let filter = ReceiveFilter {
            full_stop: false,
            ..Default::default()
        };
        let mut full_stop = false;
        let mut r = self.receive_filtered(&filter)?;
        if is_full_stop(&r) {
            full_stop = true;
            r = self.receive_filtered(&filter)?;
        }
        if r.typ() != "$PMTK" || r.args().len() != 11 || r.args()[0] != "LOG" {
            return Err(HxError::Protocol(
                "Unexpected GPS log status reply".to_string(),
            ));
        }
        let args = r.args();
        let status = LogStatus {
            pages_used: dec(args, 1)?,
            logging_type: dec(args, 2)?,
            logging_mode: u8::from_str_radix(&args[3], 16)
                .map_err(|_| HxError::Protocol(format!("Bad logging mode `{}`", args[3])))?,
            log_content: dec(args, 4)?,
            interval: dec(args, 5)?,
            distance: dec(args, 6)?,
            speed: dec(args, 7)?,
            logging_enabled: dec::<u8>(args, 8)? != 0,
            slots_used: dec(args, 9)?,
            usage_percent: dec(args, 10)?,
            full_stop,
        };
        let ack = self.receive()?;
        if ack.typ() != "$PMTK" || ack.args() != ["001", "183", "3"] {
            return Err(HxError::Protocol(
                "Device did not acknowledge log status query".to_string(),
            ));
        }
        Ok(status)
    }

    /// Dump the raw LOCUS log (`$PMTK622,1`).
    pub fn read_gps_log(&mut self) -> Result<Vec<u8>> {
        self.send(&Message::nmea("$PMTK", &["622", "1"]))?;
        let r = self.receive()?;
        if r.typ() != "$PMTK" || r.args().len() != 3 || r.args()[0] != "LOX" || r.args()[1] != "0"
        {
            return Err(HxError::Protocol(
                "Device did not announce log dump".to_string(),
            ));
        }
        let lines: u32 = dec(r.args(), 2)?;
        debug!("Log dump of {} lines announced", lines);

        let mut data = Vec::new();
        let mut next_line = 0u32;
        let mut last_progress = Instant::now();
        loop {
            let m = self.receive()?;
            if m.typ() != "$PMTK" || m.args().len() < 2 || m.args()[0] != "LOX" {
                return Err(HxError::Protocol(
                    "Unexpected message in log dump".to_string(),
                ));
            }
            if m.args()[1] == "2" {
                break;
            }
            if m.args()[1] != "1" || m.args().len() < 3 {
                return Err(HxError::Protocol(
                    "Unexpected log dump sequence".to_string(),
                ));
            }
            let lineno: u32 = dec(m.args(), 2)?;
            if lineno != next_line {
                return Err(HxError::Protocol(
                    "Unexpected log dump sequence".to_string(),
                ));
            }
            next_line += 1;
            for word in &m.args()[3..] {
                if word.len() != 8 {
                    return Err(HxError::Protocol(format!("Bad log data word `{}`", word)));
                }
                data.extend(
                    hex::decode(word)
                        .map_err(|_| HxError::Protocol(format!("Bad log data word `{}`", word)))?,
                );
            }
            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                info!(
                    "{} / {} lines ({}%)",
                    next_line,
                    lines,
                    100 * next_line / lines.max(1)
                );
                last_progress = Instant::now();
            }
        }
        if next_line != lines {
            return Err(HxError::Protocol(
                "Unexpected log dump sequence".to_string(),
            ));
        }
        let ack = self.receive()?;
        if ack.typ() != "$PMTK" || ack.args() != ["001", "622", "3"] {
            return Err(HxError::Protocol(
                "Device did not acknowledge log dump".to_string(),
            ));
        }
        debug!("Received {} bytes of raw log data", data.len());
        Ok(data)
    }

    /// Erase the LOCUS log (`$PMTK184,1`). Takes several seconds on real
    /// hardware.
    pub fn erase_gps_log(&mut self) -> Result<()> {
        let restore = self.transport_mut().timeout();
        self.transport_mut().set_timeout(ERASE_TIMEOUT);
        let result = self.erase_gps_log_inner();
        self.transport_mut().set_timeout(restore);
        result
    }

    fn erase_gps_log_inner(&mut self) -> Result<()> {
        self.send(&Message::nmea("$PMTK", &["184", "1"]))?;
        let ack = self.receive()?;
        if ack.typ() != "$PMTK" || ack.args() != ["001", "184", "3"] {
            return Err(HxError::Protocol(
                "Device did not acknowledge log erase".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn cp_session(t: MockTransport) -> HxProtocol<MockTransport> {
        let mut p = HxProtocol::connect(MockTransport::new()).unwrap();
        *p.transport_mut() = t;
        p.cp_mode = true;
        p.hx_hardware = true;
        p
    }

    #[test]
    fn gps_sync_answers() {
        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["010", "001"])); // startup noise
        t.push_message(&Message::nmea("$PMTK", &["001", "0", "3"]));
        let mut p = cp_session(t);
        p.gps_sync().unwrap();
        assert!(p.transport_mut().output_string().contains("$PMTK000*32"));
    }

    #[test]
    fn log_status_plain() {
        let mut t = MockTransport::new();
        // The observed status sentence, lowercase hex mode field and all.
        t.push_input(b"$PMTKLOG,1,1,b,127,60,0,0,1,1,0*26\r\n");
        t.push_message(&Message::nmea("$PMTK", &["001", "183", "3"]));
        let mut p = cp_session(t);
        let status = p.read_gps_log_status().unwrap();
        assert_eq!(status.pages_used, 1);
        assert_eq!(status.logging_type, 1);
        assert_eq!(status.logging_mode, 0x0B);
        assert_eq!(status.log_content, 127);
        assert_eq!(status.interval, 60);
        assert!(status.logging_enabled);
        assert_eq!(status.slots_used, 1);
        assert_eq!(status.usage_percent, 0);
        assert!(!status.full_stop);
    }

    #[test]
    fn log_status_with_full_stop_warning() {
        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["LOG", "FULL_STOP"]));
        t.push_input(b"$PMTKLOG,16,1,b,127,60,0,0,0,682,100*1D\r\n");
        t.push_message(&Message::nmea("$PMTK", &["001", "183", "3"]));
        let mut p = cp_session(t);
        let status = p.read_gps_log_status().unwrap();
        assert!(status.full_stop);
        assert!(!status.logging_enabled);
        assert_eq!(status.usage_percent, 100);
    }

    #[test]
    fn log_dump_in_order() {
        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["LOX", "0", "2"]));
        t.push_message(&Message::nmea(
            "$PMTK",
            &["LOX", "1", "0", "0100010B", "7F000000"],
        ));
        t.push_message(&Message::nmea("$PMTK", &["LOX", "1", "1", "0500FFFF"]));
        t.push_message(&Message::nmea("$PMTK", &["LOX", "2"]));
        t.push_message(&Message::nmea("$PMTK", &["001", "622", "3"]));
        let mut p = cp_session(t);
        let data = p.read_gps_log().unwrap();
        assert_eq!(
            data,
            hex::decode("0100010B7F0000000500FFFF").unwrap(),
            "words concatenate across lines"
        );
    }

    #[test]
    fn log_dump_out_of_order() {
        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["LOX", "0", "2"]));
        t.push_message(&Message::nmea("$PMTK", &["LOX", "1", "1", "0100010B"]));
        let mut p = cp_session(t);
        match p.read_gps_log() {
            Err(HxError::Protocol(e)) => assert_eq!(e, "Unexpected log dump sequence"),
            other => panic!("expected sequence error, got {:?}", other),
        }
    }

    #[test]
    fn log_dump_missing_line() {
        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["LOX", "0", "3"]));
        t.push_message(&Message::nmea("$PMTK", &["LOX", "1", "0", "00000000"]));
        t.push_message(&Message::nmea("$PMTK", &["LOX", "1", "1", "00000000"]));
        t.push_message(&Message::nmea("$PMTK", &["LOX", "2"]));
        let mut p = cp_session(t);
        match p.read_gps_log() {
            Err(HxError::Protocol(e)) => assert_eq!(e, "Unexpected log dump sequence"),
            other => panic!("expected sequence error, got {:?}", other),
        }
    }

    #[test]
    fn erase_acknowledged() {
        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["001", "184", "3"]));
        let mut p = cp_session(t);
        p.erase_gps_log().unwrap();
        assert!(p.transport_mut().output_string().contains("$PMTK184,1*"));
    }

    #[test]
    fn erase_unacknowledged() {
        let mut t = MockTransport::new();
        t.push_message(&Message::nmea("$PMTK", &["001", "184", "2"]));
        let mut p = cp_session(t);
        assert!(matches!(p.erase_gps_log(), Err(HxError::Protocol(_))));
    }
}
