//! Wire codec for the two message shapes the handsets speak.
//!
//! CP frames are tab-separated: `#TYPE\targ…\tCHK\r\n`, with a two-digit
//! uppercase hex checksum that is the XOR over the frame bytes up to and
//! including the tab before the checksum. NMEA sentences are the usual
//! `$TYPE…*CHK\r\n` with the XOR taken between `$` and `*`. In both
//! shapes the byte `!` is excluded from the fold; the firmware does this
//! for a message class that may embed it.
//!
//! Five CP types are unary: they never carry arguments or a checksum.

use std::fmt;

use crate::{HxError, Result};

/// CP types that never carry args and never carry a checksum.
pub const UNARY_TYPES: [&str; 5] = ["#CMDOK", "#CMDER", "#CMDUN", "#CMDSM", "#CMDSY"];

fn xor_fold(bytes: impl Iterator<Item = u8>) -> u8 {
    bytes.filter(|&b| b != b'!').fold(0, |acc, b| acc ^ b)
}

/// A single protocol message, either a CP frame or an NMEA sentence.
///
/// A received checksum, when present, takes precedence over the
/// recomputed one on reserialization, so that broken peer frames
/// round-trip byte-exactly for logging.
#[derive(Debug, Clone)]
pub enum Message {
    Cp {
        typ: String,
        args: Vec<String>,
        checksum_recv: Option<String>,
    },
    Nmea {
        typ: String,
        args: Vec<String>,
        checksum_recv: Option<String>,
    },
}

impl Message {
    /// Build a CP frame to send.
    pub fn cp(typ: &str, args: &[&str]) -> Message {
        Message::Cp {
            typ: typ.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            checksum_recv: None,
        }
    }

    /// Build an NMEA sentence to send.
    pub fn nmea(typ: &str, args: &[&str]) -> Message {
        Message::Nmea {
            typ: typ.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            checksum_recv: None,
        }
    }

    /// Parse one line from the wire, with or without the trailing CRLF.
    pub fn parse(line: &[u8]) -> Result<Message> {
        let line = std::str::from_utf8(line)
            .map_err(|_| HxError::Protocol(format!("non-ASCII message {:?}", line)))?;
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');

        if line.starts_with('#') {
            let tokens: Vec<&str> = line.split('\t').collect();
            let typ = tokens[0].to_string();
            if UNARY_TYPES.contains(&typ.as_str()) {
                if tokens.len() > 1 {
                    return Err(HxError::Protocol(format!(
                        "unary message with arguments: {:?}",
                        line
                    )));
                }
                return Ok(Message::Cp {
                    typ,
                    args: Vec::new(),
                    checksum_recv: None,
                });
            }
            let checksum_recv = if tokens.len() > 1 {
                Some(tokens[tokens.len() - 1].to_string())
            } else {
                None
            };
            let args = if tokens.len() > 2 {
                tokens[1..tokens.len() - 1]
                    .iter()
                    .map(|a| a.to_string())
                    .collect()
            } else {
                Vec::new()
            };
            return Ok(Message::Cp {
                typ,
                args,
                checksum_recv,
            });
        }

        if line.starts_with('$') {
            if line.len() < 5 {
                return Err(HxError::Protocol(format!("truncated sentence {:?}", line)));
            }
            let typ = line[..5].to_string();
            let rest = &line[5..];
            let mut parts = rest.splitn(2, '*');
            let body = parts.next().unwrap_or("");
            let checksum_recv = parts.next().map(|c| c.to_string());
            let args = body.split(',').map(|a| a.to_string()).collect();
            return Ok(Message::Nmea {
                typ,
                args,
                checksum_recv,
            });
        }

        Err(HxError::Protocol(format!("unparseable message {:?}", line)))
    }

    pub fn typ(&self) -> &str {
        match self {
            Message::Cp { typ, .. } | Message::Nmea { typ, .. } => typ,
        }
    }

    pub fn args(&self) -> &[String] {
        match self {
            Message::Cp { args, .. } | Message::Nmea { args, .. } => args,
        }
    }

    pub fn checksum_recv(&self) -> Option<&str> {
        match self {
            Message::Cp { checksum_recv, .. } | Message::Nmea { checksum_recv, .. } => {
                checksum_recv.as_deref()
            }
        }
    }

    /// The checksum this message should carry. `None` for unary CP types.
    ///
    /// CP frames are checksummed over their uppercased bytes (they are
    /// uppercased on the wire); NMEA payload case is preserved, which
    /// matters for the odd lowercase byte the chipset emits.
    pub fn checksum(&self) -> Option<String> {
        match self {
            Message::Cp { typ, args, .. } => {
                if UNARY_TYPES.contains(&typ.as_str()) {
                    return None;
                }
                let mut body = typ.clone();
                for a in args {
                    body.push('\t');
                    body.push_str(a);
                }
                body.push('\t');
                let body = body.to_ascii_uppercase();
                Some(format!("{:02X}", xor_fold(body.bytes())))
            }
            Message::Nmea { typ, args, .. } => {
                let mut body = typ[1..].to_string();
                body.push_str(&args.join(","));
                Some(format!("{:02X}", xor_fold(body.bytes())))
            }
        }
    }

    /// True unless a received checksum is present and disagrees with the
    /// computed one.
    pub fn validate(&self) -> bool {
        match self.checksum_recv() {
            None => true,
            Some(recv) => Some(recv) == self.checksum().as_deref(),
        }
    }

    /// Serialized frame including the trailing CRLF.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Cp {
                typ,
                args,
                checksum_recv,
            } => {
                let mut parts = vec![typ.clone()];
                parts.extend(args.iter().cloned());
                if let Some(chk) = checksum_recv.clone().or_else(|| self.checksum()) {
                    parts.push(chk);
                }
                write!(f, "{}\r\n", parts.join("\t").to_ascii_uppercase())
            }
            Message::Nmea {
                typ,
                args,
                checksum_recv,
            } => {
                let chk = checksum_recv
                    .clone()
                    .or_else(|| self.checksum())
                    .unwrap_or_default();
                write!(f, "{}{}*{}\r\n", typ, args.join(","), chk)
            }
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Message) -> bool {
        let same_shape = match (self, other) {
            (Message::Cp { .. }, Message::Cp { .. }) => true,
            (Message::Nmea { .. }, Message::Nmea { .. }) => true,
            _ => false,
        };
        if !same_shape || self.typ() != other.typ() || self.args() != other.args() {
            return false;
        }
        match (self.checksum_recv(), other.checksum_recv()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl Eq for Message {}
