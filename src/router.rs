use crate::packet::{Command, Packet, ParseError};
use crate::table::RouteTable;
use crate::{INFINITY, RouterId};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// A configured neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub id: RouterId,
    /// The UDP port the peer listens on.
    pub port: u16,
    /// The cost of the direct link to this peer, added to every metric it
    /// advertises.
    pub link_metric: u8,
}

/// Everything the protocol core needs to know about its instance.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub id: RouterId,
    pub peers: Vec<Peer>,
    pub periodic_interval: Duration,
    pub timeout: Duration,
    pub gc_window: Duration,
}

/// An outgoing datagram produced by the [`Router`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub payload: Vec<u8>,
    pub port: u16,
}

/// The sans-IO core of a daemon instance.
///
/// The [`Router`] never reads the clock and never touches a socket: the
/// caller feeds it received datagrams via [`Router::handle_input`] and
/// drives time via [`Router::handle_tick`], then drains the send queue
/// with [`Router::poll_transmit`] and performs the IO itself.
///
/// The caller must process all datagrams of a poll tick before calling
/// [`Router::handle_tick`]; that fixes the ordering between fresh routing
/// information and route expiry in favour of the former.
pub struct Router {
    id: RouterId,
    peers: BTreeMap<RouterId, Peer>,
    table: RouteTable,
    timeout: Duration,
    periodic_interval: Duration,
    next_periodic: Instant,
    pending_transmits: VecDeque<Transmit>,
}

impl Router {
    /// Creates a router whose first periodic update is due immediately.
    pub fn new(config: RouterConfig, now: Instant) -> Self {
        let table = RouteTable::new(config.id, config.timeout, config.gc_window);

        Self {
            id: config.id,
            peers: config
                .peers
                .into_iter()
                .map(|peer| (peer.id, peer))
                .collect(),
            table,
            timeout: config.timeout,
            periodic_interval: config.periodic_interval,
            next_periodic: now,
            pending_transmits: VecDeque::new(),
        }
    }

    pub fn id(&self) -> RouterId {
        self.id
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Process one received datagram.
    ///
    /// Malformed datagrams are reported back to the caller, which logs and
    /// drops them; they never affect the table.
    pub fn handle_input(&mut self, bytes: &[u8], now: Instant) -> Result<(), ParseError> {
        let packet = Packet::decode(bytes)?;

        match packet.command {
            Command::Request => {
                // Recognized but not answered in this revision.
                tracing::trace!(sender = %packet.sender, "ignoring request");
            }
            Command::Response => self.handle_response(packet, now),
        }

        Ok(())
    }

    fn handle_response(&mut self, packet: Packet, now: Instant) {
        let sender = packet.sender;

        let Some(peer) = self.peers.get(&sender).copied() else {
            tracing::warn!(%sender, "dropping response from unconfigured peer");
            return;
        };

        for entry in packet.entries {
            if entry.id == self.id {
                continue;
            }

            let metric = (entry.metric + peer.link_metric).min(INFINITY);

            match self.table.get(entry.id).copied() {
                None => {
                    if metric < INFINITY {
                        self.table.add_route(entry.id, sender, metric, now);
                    }
                }
                Some(current) if current.next_hop == sender => {
                    if metric == INFINITY && current.metric < INFINITY {
                        // The next hop withdrew the route. Backdating the
                        // refresh by the timeout makes the next expiry scan
                        // poison it and start garbage collection right away.
                        self.table
                            .add_route(entry.id, sender, INFINITY, now - self.timeout);
                    } else if metric < INFINITY {
                        self.table.add_route(entry.id, sender, metric, now);
                    }
                    // Repeated withdrawals leave the entry alone so the GC
                    // timer keeps running.
                }
                Some(current) if metric < current.metric => {
                    self.table.add_route(entry.id, sender, metric, now);
                }
                Some(_) => {}
            }
        }
    }

    /// Advance the periodic schedule and the per-route timers to `now`.
    ///
    /// A newly expired route provokes a triggered update: the same
    /// advertisements as the periodic one, emitted immediately and without
    /// resetting the periodic schedule.
    pub fn handle_tick(&mut self, now: Instant) {
        if now >= self.next_periodic {
            tracing::debug!("sending periodic update");
            tracing::debug!("table contents\n{}", self.table.display(now));

            self.advertise_to_all_peers();
            self.next_periodic = now + self.periodic_interval;
        }

        if self.table.scan_expiries(now) {
            tracing::debug!("route expired, sending triggered update");

            self.advertise_to_all_peers();
        }
    }

    /// Returns the next datagram to put on the wire.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.pending_transmits.pop_front()
    }

    fn advertise_to_all_peers(&mut self) {
        for peer in self.peers.values() {
            let entries = self.table.advertisement_entries(peer.id);
            let payload = Packet::response(self.id, entries).encode();

            self.pending_transmits.push_back(Transmit {
                payload,
                port: peer.port,
            });
        }
    }
}
