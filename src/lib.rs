//! The `hx_proto` module contains types and functions to talk to
//! Standard Horizon HX maritime handheld radios (HX870, HX890 and
//! compatibles) over a serial line.
//!
//! The handsets expose two line disciplines on the same port. Booted
//! normally they stream NMEA sentences at the GPS chipset rate; booted
//! into configuration-programming mode (hold MENU while powering on)
//! they speak a framed `#…` command protocol ("CP mode") carrying a
//! paged view of the 32 KiB configuration EEPROM and, tunneled through
//! the same stream, the MediaTek `$PMTK` commands of the GPS chipset.
//! [`HxProtocol`] probes which discipline is active and drives both.
//!
//! The main motivation to create this crate was independence from the
//! vendor's Windows-only programming software.
//!
//! # Testing
//!
//! The crate ships an in-process device simulator ([`Simulator`]) that
//! serves the peer side of the protocol on a pseudo-terminal. The test
//! suite talks to it exactly like to a radio, so `cargo test` exercises
//! the full stack without hardware.
//!
//! `hx_proto` has been tested against HX870 (flash ID `AM057N`,
//! `AM057N2`) and HX890 (`AM063N`) handsets.
//!
//! # Development notes
//!
//! Put the handset into CP mode (MENU + ON), then run your client with
//!
//! ```sh
//! RUST_LOG=hx_proto=debug
//! ```
//!
//! Every frame in and out of the transport is logged at DEBUG, which is
//! usually all that is needed to debug a protocol quirk.

#[macro_use]
extern crate log;

use std::fmt;
use std::io;

pub mod config;
pub mod gpslog;
pub mod locus;
pub mod message;
pub mod nav;
pub mod protocol;
pub mod simulator;
pub mod transport;

pub use config::HxConfig;
pub use gpslog::LogStatus;
pub use locus::Locus;
pub use message::Message;
pub use nav::{NavData, NavRoute, Route, Waypoint};
pub use protocol::{HxProtocol, ReceiveFilter};
pub use simulator::{Simulator, SimulatorMode, SimulatorOptions, Supervisor};
pub use transport::{SerialTransport, Transport};

/// Size of the configuration EEPROM image in bytes.
pub const CONFIG_SIZE: usize = 0x8000;

/// First and last two bytes of every valid configuration image.
pub const CONFIG_MAGIC: [u8; 2] = [0x03, 0x67];

/// Errors during device communication or record decoding.
#[derive(Debug)]
pub enum HxError {
    /// Generic I/O error (transport underflow or close).
    Io(io::Error),
    /// No bytes within the per-operation deadline.
    Timeout(String),
    /// Any wire deviation: wrong type, wrong argument shape, mismatched
    /// checksum, illegal value, unexpected magic, log sequence gap.
    Protocol(String),
    /// Invalid LOCUS header/record checksum, or an empty/absent log.
    Locus(String),
}

impl From<io::Error> for HxError {
    fn from(err: io::Error) -> HxError {
        HxError::Io(err)
    }
}

impl fmt::Display for HxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HxError::Io(e) => write!(f, "IoError: {}", e),
            HxError::Timeout(e) => write!(f, "Timeout: {}", e),
            HxError::Protocol(e) => write!(f, "ProtocolError: {}", e),
            HxError::Locus(e) => write!(f, "LocusError: {}", e),
        }
    }
}

impl std::error::Error for HxError {}

pub type Result<T> = std::result::Result<T, HxError>;
