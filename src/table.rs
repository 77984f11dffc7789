use crate::packet::Entry;
use crate::{INFINITY, RouterId};
use core::fmt;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A single routing-table entry.
///
/// `last_updated` anchors both timers: the route is poisoned once
/// `timeout` has elapsed without a refresh and removed once
/// `timeout + gc_window` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub next_hop: RouterId,
    pub metric: u8,
    pub last_updated: Instant,
    pub gc_active: bool,
}

/// A point-in-time copy of the table, for observers outside the daemon task.
pub type TableSnapshot = BTreeMap<RouterId, Route>;

/// The routing table of a single daemon instance.
///
/// Keyed by destination; holds at most one route per destination and never
/// one for the owning router itself (self is implicit and advertised with
/// metric 0).
#[derive(Debug)]
pub struct RouteTable {
    own_id: RouterId,
    timeout: Duration,
    gc_window: Duration,
    routes: BTreeMap<RouterId, Route>,
}

impl RouteTable {
    pub fn new(own_id: RouterId, timeout: Duration, gc_window: Duration) -> Self {
        Self {
            own_id,
            timeout,
            gc_window,
            routes: BTreeMap::new(),
        }
    }

    /// Apply the add/update decision to a learned route.
    ///
    /// `last_updated` is the timestamp recorded on the entry; callers pass
    /// the current instant except when arming immediate garbage collection,
    /// where they backdate it by the timeout.
    ///
    /// The rules, in order:
    ///
    /// 1. Routes to self are ignored.
    /// 2. An unknown destination with a finite metric is inserted.
    /// 3. An unknown destination at infinity is ignored (nothing to withdraw).
    /// 4. An update from the current next hop always wins, even if it raises
    ///    the metric. This is what lets a peer withdraw a route.
    /// 5. A strictly better metric from a different next hop replaces the
    ///    entry.
    /// 6. An equal-or-worse path from a different next hop is ignored.
    pub fn add_route(
        &mut self,
        destination: RouterId,
        next_hop: RouterId,
        metric: u8,
        last_updated: Instant,
    ) {
        debug_assert!(metric <= INFINITY);

        if destination == self.own_id {
            return;
        }

        let accept = match self.routes.get(&destination) {
            None if metric < INFINITY => {
                tracing::debug!(%destination, %next_hop, metric, "learned new route");
                true
            }
            None => false,
            Some(current) if current.next_hop == next_hop => true,
            Some(current) if metric < current.metric => {
                tracing::debug!(%destination, %next_hop, metric, "found better route");
                true
            }
            Some(_) => false,
        };

        if accept {
            self.routes.insert(
                destination,
                Route {
                    next_hop,
                    metric,
                    last_updated,
                    gc_active: false,
                },
            );
        }
    }

    pub fn get(&self, destination: RouterId) -> Option<&Route> {
        self.routes.get(&destination)
    }

    pub fn remove(&mut self, destination: RouterId) -> bool {
        self.routes.remove(&destination).is_some()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RouterId, &Route)> {
        self.routes.iter().map(|(id, route)| (*id, route))
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.routes.clone()
    }

    /// Project the table into the entries of an advertisement towards `peer`.
    ///
    /// The first entry is always the sender itself at metric 0. Routes whose
    /// next hop is `peer` are advertised at infinity (poisoned
    /// reverse). Withdrawn routes stay in the projection until they are
    /// removed, so peers that missed a triggered update still learn of the
    /// withdrawal. Stored state is never touched.
    pub fn advertisement_entries(&self, peer: RouterId) -> Vec<Entry> {
        let mut entries = Vec::with_capacity(1 + self.routes.len());

        entries.push(Entry {
            id: self.own_id,
            metric: 0,
        });

        for (destination, route) in &self.routes {
            let metric = if route.next_hop == peer {
                INFINITY
            } else {
                route.metric
            };

            entries.push(Entry {
                id: *destination,
                metric,
            });
        }

        entries
    }

    /// Advance the per-route timers to `now`.
    ///
    /// Routes older than `timeout` are poisoned in place; routes older than
    /// `timeout + gc_window` are removed. Removal candidates are collected
    /// first and deleted after the pass.
    ///
    /// Returns `true` iff at least one route was newly poisoned, which is
    /// the caller's cue to emit a triggered update.
    pub fn scan_expiries(&mut self, now: Instant) -> bool {
        let mut newly_poisoned = false;
        let mut to_remove = Vec::new();

        for (destination, route) in &mut self.routes {
            let age = now.saturating_duration_since(route.last_updated);

            if age >= self.timeout + self.gc_window {
                to_remove.push(*destination);
            } else if age >= self.timeout && !route.gc_active {
                tracing::debug!(%destination, "route timed out, starting garbage collection");

                route.metric = INFINITY;
                route.gc_active = true;
                newly_poisoned = true;
            }
        }

        for destination in to_remove {
            tracing::debug!(%destination, "garbage collection expired, deleting route");

            self.routes.remove(&destination);
        }

        newly_poisoned
    }

    /// Render the table with ages computed against `now`.
    pub fn display(&self, now: Instant) -> impl fmt::Display + '_ {
        TableDisplay { table: self, now }
    }
}

struct TableDisplay<'a> {
    table: &'a RouteTable,
    now: Instant,
}

impl fmt::Display for TableDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<12} {:<10} {:<8} {:<8} {}", "destination", "next hop", "metric", "age (s)", "gc")?;

        for (destination, route) in self.table.iter() {
            let age = self.now.saturating_duration_since(route.last_updated);

            writeln!(
                f,
                "{:<12} {:<10} {:<8} {:<8} {}",
                destination.to_string(),
                route.next_hop.to_string(),
                route.metric,
                age.as_secs(),
                if route.gc_active { "active" } else { "-" }
            )?;
        }

        Ok(())
    }
}
