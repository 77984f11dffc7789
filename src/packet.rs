use crate::{INFINITY, RouterId};

pub const VERSION: u8 = 2;
pub const ADDRESS_FAMILY: u16 = 2;

const HEADER_LEN: usize = 4;
const ENTRY_LEN: usize = 20;

const COMMAND_REQUEST: u8 = 1;
const COMMAND_RESPONSE: u8 = 2;

/// The command field of a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Request,
    Response,
}

/// A single advertised destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub id: RouterId,
    pub metric: u8,
}

/// A packet on the wire.
///
/// The layout diverges from RFC 2453 in one deliberate way: the sender's
/// identity lives in header bytes 2-3, which the RFC reserves as
/// "Must Be Zero". Every instance of this daemon frames packets the same
/// way, which is the only interoperability target.
///
/// ```text
/// header (4 bytes):  [command:u8][version:u8][sender:u16]
/// entry (20 bytes):  [address_family:u16][0:u16][id:u32][0:u64][metric:u32]
/// ```
///
/// All fields are big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: Command,
    pub sender: RouterId,
    pub entries: Vec<Entry>,
}

impl Packet {
    pub fn response(sender: RouterId, entries: Vec<Entry>) -> Self {
        Self {
            command: Command::Response,
            sender,
            entries,
        }
    }

    pub fn request(sender: RouterId) -> Self {
        Self {
            command: Command::Request,
            sender,
            entries: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.entries.len() * ENTRY_LEN);

        let command = match self.command {
            Command::Request => COMMAND_REQUEST,
            Command::Response => COMMAND_RESPONSE,
        };

        buf.push(command);
        buf.push(VERSION);
        buf.extend_from_slice(&self.sender.value().to_be_bytes());

        for entry in &self.entries {
            buf.extend_from_slice(&ADDRESS_FAMILY.to_be_bytes());
            buf.extend_from_slice(&0u16.to_be_bytes());
            buf.extend_from_slice(&u32::from(entry.id.value()).to_be_bytes());
            buf.extend_from_slice(&0u64.to_be_bytes());
            buf.extend_from_slice(&u32::from(entry.metric).to_be_bytes());
        }

        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < HEADER_LEN || (bytes.len() - HEADER_LEN) % ENTRY_LEN != 0 {
            return Err(ParseError::InvalidLength(bytes.len()));
        }

        let (header, body) = bytes.split_at(HEADER_LEN);

        let version = header[1];
        if version != VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }

        let sender = RouterId::new(u16::from_be_bytes([header[2], header[3]]));

        let command = match header[0] {
            COMMAND_REQUEST => {
                // Requests carry no routing state this daemon acts on;
                // trailing bytes are ignored.
                return Ok(Packet::request(sender));
            }
            COMMAND_RESPONSE => Command::Response,
            other => return Err(ParseError::InvalidCommand(other)),
        };

        let mut entries = Vec::with_capacity(body.len() / ENTRY_LEN);

        for chunk in body.chunks_exact(ENTRY_LEN) {
            let family = u16::from_be_bytes([chunk[0], chunk[1]]);
            if family != ADDRESS_FAMILY {
                return Err(ParseError::UnsupportedAddressFamily(family));
            }

            let id = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            let id = u16::try_from(id)
                .ok()
                .filter(|id| *id > 0)
                .ok_or(ParseError::InvalidRouterId(id))?;

            let metric = u32::from_be_bytes([chunk[16], chunk[17], chunk[18], chunk[19]]);
            if metric > u32::from(INFINITY) {
                return Err(ParseError::MetricOutOfRange(metric));
            }

            entries.push(Entry {
                id: RouterId::new(id),
                metric: metric as u8,
            });
        }

        Ok(Packet {
            command,
            sender,
            entries,
        })
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("packet length {0} is not 4 + 20 * n")]
    InvalidLength(usize),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown command {0}")]
    InvalidCommand(u8),
    #[error("unsupported address family {0}")]
    UnsupportedAddressFamily(u16),
    #[error("router id {0} is outside 1..=65535")]
    InvalidRouterId(u32),
    #[error("metric {0} exceeds infinity")]
    MetricOutOfRange(u32),
}
