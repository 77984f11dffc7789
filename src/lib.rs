#![cfg_attr(test, allow(clippy::unwrap_used))]

//! A RIPv2-style distance-vector routing daemon for fleets of logical
//! routers on a local UDP transport.
//!
//! Router identities are small integers rather than IPv4 addresses and every
//! instance talks to its peers over loopback UDP ports. The protocol core
//! ([`Router`]) is sans-IO: it consumes datagrams and timer ticks and emits
//! [`Transmit`]s, while [`Eventloop`] owns the sockets and the clock.

pub mod config;
pub mod packet;

mod eventloop;
mod router;
mod sockets;
mod table;

pub use config::Config;
pub use eventloop::Eventloop;
pub use packet::{Entry, Packet, ParseError};
pub use router::{Peer, Router, RouterConfig, Transmit};
pub use sockets::{Datagram, Sockets};
pub use table::{Route, RouteTable, TableSnapshot};

use core::fmt;

/// A metric at or above this value means "unreachable".
pub const INFINITY: u8 = 16;

/// New-type for a router's identity.
///
/// Identities take the place of IPv4 addresses on this transport: every
/// daemon instance is configured with one and stamps it into the header of
/// every packet it sends.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct RouterId(u16);

impl RouterId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl From<u16> for RouterId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}
