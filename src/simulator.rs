//! In-process device simulator serving the peer side of the protocol on
//! a pseudo-terminal.
//!
//! Each simulator owns one OS thread and one pty pair; the slave path is
//! published as [`Simulator::tty`] and clients open it like a serial
//! port. The thread scans input a byte at a time with a short loop delay
//! (roughly one byte time at 38400 baud), which also paces shutdown: a
//! stopped simulator is gone within a few loop delays. A stopped
//! instance cannot be restarted.
//!
//! In CP mode the simulator answers the probe, the sync handshake, the
//! firmware version query and the paged memory protocol against a
//! 32 KiB backing image. In NMEA mode it answers the probe and emits a
//! dummy position sentence at a fixed cadence.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::openpty;
use nix::unistd::ttyname;

use crate::message::Message;
use crate::transport::os_err;
use crate::{Result, CONFIG_SIZE};

/// Which line discipline the simulated radio is booted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorMode {
    Cp,
    Nmea,
}

/// Tunables for a simulator instance.
#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// Initial configuration image; all `0xFF` when omitted. Must be
    /// 32 KiB.
    pub config: Option<Vec<u8>>,
    /// Input scan delay, one byte per iteration.
    pub loop_delay: Duration,
    /// Cadence of the dummy NMEA sentence.
    pub nmea_delay: Duration,
}

impl Default for SimulatorOptions {
    fn default() -> SimulatorOptions {
        SimulatorOptions {
            config: None,
            loop_delay: Duration::from_micros(1_000_000 / 38_400),
            nmea_delay: Duration::from_secs(3),
        }
    }
}

/// Handle to a running simulator thread.
pub struct Simulator {
    /// Path of the pty slave; open this like a serial port.
    pub tty: PathBuf,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    // Keeps the slave end alive between client sessions.
    _slave: OwnedFd,
}

impl Simulator {
    pub fn spawn(mode: SimulatorMode) -> Result<Simulator> {
        Self::spawn_with(mode, SimulatorOptions::default())
    }

    pub fn spawn_with(mode: SimulatorMode, opts: SimulatorOptions) -> Result<Simulator> {
        let pty = openpty(None, None).map_err(os_err)?;
        let tty = ttyname(&pty.slave).map_err(os_err)?;
        let master = File::from(pty.master);

        let mem = opts.config.unwrap_or_else(|| vec![0xFF; CONFIG_SIZE]);
        if mem.len() != CONFIG_SIZE {
            return Err(crate::HxError::Protocol(
                "Unexpected config data size".to_string(),
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let loop_delay = opts.loop_delay;
        let nmea_delay = opts.nmea_delay;
        let handle = thread::Builder::new()
            .name("hx-simulator".to_string())
            .spawn(move || {
                let mut peer = Peer {
                    master,
                    mem,
                    expect_ack: false,
                    loop_delay,
                    nmea_delay,
                };
                match mode {
                    SimulatorMode::Nmea => peer.run_nmea(&stop_flag),
                    SimulatorMode::Cp => peer.run_cp(&stop_flag),
                }
            })
            .map_err(crate::HxError::Io)?;

        Ok(Simulator {
            tty,
            stop,
            handle: Some(handle),
            _slave: pty.slave,
        })
    }

    /// Ask the thread to finish. Returns immediately.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// Owns a set of simulators so a test harness can tear all of them down
/// in one place.
#[derive(Default)]
pub struct Supervisor {
    simulators: Vec<Simulator>,
}

impl Supervisor {
    pub fn new() -> Supervisor {
        Supervisor::default()
    }

    pub fn spawn(&mut self, mode: SimulatorMode) -> Result<&Simulator> {
        self.spawn_with(mode, SimulatorOptions::default())
    }

    pub fn spawn_with(&mut self, mode: SimulatorMode, opts: SimulatorOptions) -> Result<&Simulator> {
        let sim = Simulator::spawn_with(mode, opts)?;
        self.simulators.push(sim);
        Ok(self.simulators.last().unwrap())
    }

    pub fn stop_all(&self) {
        for sim in &self.simulators {
            sim.stop();
        }
    }

    pub fn join_all(&mut self) {
        for sim in &mut self.simulators {
            sim.join();
        }
    }
}

/// Thread-side state. Only the simulator thread touches it; the outside
/// world observes it through the pty bytes alone.
struct Peer {
    master: File,
    mem: Vec<u8>,
    expect_ack: bool,
    loop_delay: Duration,
    nmea_delay: Duration,
}

impl Peer {
    /// One byte of pending input, without blocking.
    fn read_byte(&mut self) -> Option<u8> {
        let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(n) if n > 0 => {}
            _ => return None,
        }
        let mut b = [0u8; 1];
        match self.master.read(&mut b) {
            Ok(1) => Some(b[0]),
            // Zero bytes or an error here means the slave side is
            // closed; keep looping, a client may reopen it.
            _ => None,
        }
    }

    fn write(&mut self, data: &[u8]) {
        let mut pos = 0;
        while pos < data.len() {
            match self.master.write(&data[pos..]) {
                Ok(n) => pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    warn!("Simulator write failed: {}", e);
                    return;
                }
            }
        }
    }

    fn send(&mut self, message: &Message) {
        self.write(&message.to_bytes());
    }

    fn run_nmea(&mut self, stop: &AtomicBool) {
        debug!("Starting simulator thread in NMEA mode");
        let mut message: Vec<u8> = Vec::new();
        let mut next_message_time = Instant::now() + self.nmea_delay;
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(self.loop_delay);
            match self.read_byte() {
                Some(b) => {
                    if !message.is_empty() {
                        message.push(b);
                        if message.ends_with(b"\r\n") {
                            debug!(
                                "NMEA simulator observed {:?}",
                                String::from_utf8_lossy(&message)
                            );
                            message.clear();
                        }
                    } else if b == b'$' {
                        message.push(b);
                    } else if b == b'P' {
                        debug!("NMEA simulator responding to ping");
                        self.write(b"P");
                    } else {
                        debug!("NMEA simulator ignoring unexpected input {:#04x}", b);
                    }
                }
                None => {
                    if Instant::now() >= next_message_time {
                        self.write(b"$GPLL,,,,\r\n");
                        next_message_time = Instant::now() + self.nmea_delay;
                    }
                }
            }
        }
        debug!("NMEA simulator thread finished");
    }

    fn run_cp(&mut self, stop: &AtomicBool) {
        debug!("Starting simulator thread in CP mode");
        let mut message: Vec<u8> = Vec::new();
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(self.loop_delay);
            if let Some(b) = self.read_byte() {
                if !message.is_empty() {
                    message.push(b);
                    if message.ends_with(b"\r\n") {
                        if message[0] == b'0' {
                            // The command-mode nudge; real hardware does
                            // not react to it either.
                            debug!(
                                "CP simulator ignoring message {:?}",
                                String::from_utf8_lossy(&message)
                            );
                        } else {
                            let msg = std::mem::take(&mut message);
                            self.process_cp(&msg);
                        }
                        message.clear();
                    }
                } else if b == b'0' || b == b'#' {
                    message.push(b);
                } else if b == b'?' {
                    debug!("CP simulator responding to ping");
                    self.write(b"@");
                } else {
                    debug!("CP simulator ignoring unexpected input {:#04x}", b);
                }
            }
        }
        debug!("CP simulator thread finished");
    }

    fn process_cp(&mut self, raw: &[u8]) {
        debug!(
            "CP simulator processing message {:?}",
            String::from_utf8_lossy(raw)
        );
        let m = match Message::parse(raw) {
            Ok(m) => m,
            Err(_) => {
                self.send(&Message::cp("#CMDER", &[]));
                return;
            }
        };
        if !m.validate() {
            self.send(&Message::cp("#CMDER", &[]));
            return;
        }
        match m.typ() {
            "#CMDSY" => self.send(&Message::cp("#CMDOK", &[])),
            "#CMDOK" => {
                if self.expect_ack {
                    self.expect_ack = false;
                } else {
                    self.send(&Message::cp("#CMDOK", &[]));
                }
            }
            "#CVRRQ" => {
                self.send(&Message::cp("#CMDOK", &[]));
                self.send(&Message::cp("#CVRDQ", &["23.42"]));
            }
            "#CEPSR" => {
                self.send(&Message::cp("#CMDOK", &[]));
                self.send(&Message::cp("#CEPSD", &["00"]));
                self.expect_ack = true;
            }
            "#CEPRD" => self.handle_read(&m),
            "#CEPWR" => self.handle_write(&m),
            _ => self.send(&Message::cp("#CMDER", &[])),
        }
        debug_assert_eq!(self.mem.len(), CONFIG_SIZE);
    }

    fn handle_read(&mut self, m: &Message) {
        let (offset, size) = match parse_offset_size(m.args()) {
            Some(v) => v,
            None => {
                self.send(&Message::cp("#CMDER", &[]));
                return;
            }
        };
        self.send(&Message::cp("#CMDOK", &[]));
        let start = offset.min(self.mem.len());
        let end = (offset + size).min(self.mem.len());
        let data = hex::encode_upper(&self.mem[start..end]);
        let reply = Message::cp(
            "#CEPDT",
            &[m.args()[0].as_str(), m.args()[1].as_str(), data.as_str()],
        );
        self.send(&reply);
        // The client acknowledges the data; swallow that #CMDOK.
        self.expect_ack = true;
    }

    fn handle_write(&mut self, m: &Message) {
        let parsed = match parse_offset_size(m.args()) {
            Some(v) if m.args().len() >= 3 => Some(v),
            _ => None,
        };
        let (offset, size) = match parsed {
            Some(v) => v,
            None => {
                self.send(&Message::cp("#CMDER", &[]));
                return;
            }
        };
        let data = match hex::decode(&m.args()[2]) {
            Ok(d) => d,
            Err(_) => {
                self.send(&Message::cp("#CMDER", &[]));
                return;
            }
        };
        if data.len() != size || offset + size > self.mem.len() {
            self.send(&Message::cp("#CMDER", &[]));
            return;
        }
        self.mem[offset..offset + size].copy_from_slice(&data);
        self.send(&Message::cp("#CMDOK", &[]));
    }
}

fn parse_offset_size(args: &[String]) -> Option<(usize, usize)> {
    if args.len() < 2 {
        return None;
    }
    let offset = usize::from_str_radix(&args[0], 16).ok()?;
    let size = usize::from_str_radix(&args[1], 16).ok()?;
    Some((offset, size))
}
