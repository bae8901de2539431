//! Byte-stream endpoints the protocol engine runs on.
//!
//! The engine only needs a bidirectional byte channel with explicit
//! flushes and a per-operation timeout; [`SerialTransport`] provides it
//! for a real tty (or a pty slave, which is how the simulator is
//! reached). Reads are deadline-driven via `poll`, so a dead device
//! surfaces as [`HxError::Timeout`] instead of a hung call.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd};
use std::path::Path;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices,
};

use crate::{HxError, Result};

/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);
nix::ioctl_read_bad!(tiocoutq, libc::TIOCOUTQ, libc::c_int);

pub(crate) fn os_err(e: nix::errno::Errno) -> HxError {
    HxError::Io(io::Error::from_raw_os_error(e as i32))
}

/// A bidirectional byte channel with explicit flushes and a timeout.
pub trait Transport {
    /// Write all bytes.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `n` bytes, or fail with `Timeout`.
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;

    /// Read up to and including a LF. Returns what was buffered when the
    /// deadline expires, and fails with `Timeout` only when that is
    /// nothing at all.
    fn read_line(&mut self) -> Result<Vec<u8>>;

    /// Bytes buffered on the input side.
    fn available(&mut self) -> Result<usize>;

    /// Drop buffered input.
    fn flush_input(&mut self) -> Result<()>;

    /// Drop queued output.
    fn flush_output(&mut self) -> Result<()>;

    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration);
}

/// Serial connection to an HX handset (or a simulator pty).
pub struct SerialTransport {
    file: File,
    path: String,
    timeout: Duration,
}

impl SerialTransport {
    /// Open `path` at 9600 8N1 with the default timeout.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SerialTransport> {
        Self::open_with(path, 9600, DEFAULT_TIMEOUT)
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        baud: u32,
        timeout: Duration,
    ) -> Result<SerialTransport> {
        let path_str = path.as_ref().to_string_lossy().into_owned();
        debug!("Connecting to {}", path_str);
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        configure_serial(&file, baud)?;
        Ok(SerialTransport {
            file,
            path: path_str,
            timeout,
        })
    }

    /// Wait until the fd is readable or the deadline passes.
    fn wait_readable(&self, deadline: Instant) -> Result<bool> {
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        let ms = (deadline - now).as_millis().min(u128::from(u16::MAX)) as u16;
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::from(ms)).map_err(os_err)?;
        Ok(n > 0)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        loop {
            match self.file.read(&mut b) {
                Ok(0) => {
                    return Err(HxError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} closed", self.path),
                    )))
                }
                Ok(_) => return Ok(Some(b[0])),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        debug!("OUT: {:?}", String::from_utf8_lossy(data));
        self.file.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::with_capacity(n);
        while buf.len() < n {
            if !self.wait_readable(deadline)? {
                return Err(HxError::Timeout(format!("{} read() timeout", self.path)));
            }
            if let Some(b) = self.read_byte()? {
                buf.push(b);
            }
        }
        debug!("  IN: {:?}", String::from_utf8_lossy(&buf));
        Ok(buf)
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::new();
        loop {
            if !self.wait_readable(deadline)? {
                if buf.is_empty() {
                    return Err(HxError::Timeout(format!(
                        "{} read_line() timeout",
                        self.path
                    )));
                }
                break;
            }
            match self.read_byte()? {
                Some(b) => {
                    buf.push(b);
                    if b == b'\n' {
                        break;
                    }
                }
                None => continue,
            }
        }
        debug!("  IN: {:?}", String::from_utf8_lossy(&buf));
        Ok(buf)
    }

    fn available(&mut self) -> Result<usize> {
        let mut n: libc::c_int = 0;
        unsafe { fionread(self.file.as_raw_fd(), &mut n) }.map_err(os_err)?;
        Ok(n as usize)
    }

    fn flush_input(&mut self) -> Result<()> {
        let pending = self.available()?;
        if pending > 0 {
            warn!("{} flushing {} bytes from input buffer", self.path, pending);
        }
        termios::tcflush(&self.file, FlushArg::TCIFLUSH).map_err(os_err)?;
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        let mut n: libc::c_int = 0;
        unsafe { tiocoutq(self.file.as_raw_fd(), &mut n) }.map_err(os_err)?;
        if n > 0 {
            warn!("{} flushing {} bytes from output buffer", self.path, n);
        }
        termios::tcflush(&self.file, FlushArg::TCOFLUSH).map_err(os_err)?;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

/// Configure the fd for raw 8N1 I/O: no canonical mode, no echo, no
/// signals, no flow control. VMIN/VTIME are zeroed; timeouts are driven
/// by `poll` instead.
fn configure_serial(file: &File, baud: u32) -> Result<()> {
    let mut t = termios::tcgetattr(file).map_err(os_err)?;

    t.local_flags &=
        !(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG);
    t.output_flags &= !OutputFlags::OPOST;
    t.input_flags &= !(InputFlags::IXON
        | InputFlags::IXOFF
        | InputFlags::IXANY
        | InputFlags::ISTRIP
        | InputFlags::INPCK
        | InputFlags::ICRNL
        | InputFlags::IGNCR);
    t.control_flags |= ControlFlags::CS8 | ControlFlags::CREAD | ControlFlags::CLOCAL;
    t.control_flags &= !(ControlFlags::CSIZE | ControlFlags::CSTOPB | ControlFlags::PARENB);

    t.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    t.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    let baud_rate = match baud {
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        _ => BaudRate::B9600,
    };
    termios::cfsetospeed(&mut t, baud_rate).map_err(os_err)?;
    termios::cfsetispeed(&mut t, baud_rate).map_err(os_err)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &t).map_err(os_err)?;

    Ok(())
}
