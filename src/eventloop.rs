use crate::config::Config;
use crate::router::Router;
use crate::sockets::Sockets;
use crate::table::TableSnapshot;
use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::Level;

/// The cooperative event loop of one daemon instance.
///
/// A single task multiplexes socket readiness, the periodic-update schedule
/// and the table-expiry scan; all routing state is owned by this task and
/// mutated nowhere else. Within one iteration, received datagrams are
/// processed before any timer work, and transmits provoked by either are
/// flushed before the next poll.
pub struct Eventloop {
    router: Router,
    sockets: Sockets,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    snapshot_tx: watch::Sender<TableSnapshot>,
}

impl Eventloop {
    /// Binds all sockets and schedules the first periodic update for now.
    ///
    /// Socket binding is the fallible part; a port that cannot be bound is
    /// fatal for the instance.
    pub fn new(config: &Config, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let sockets = Sockets::bind(config.bind_address, &config.incoming_ports)
            .context("failed to bind sockets")?;
        let router = Router::new(config.router_config(), Instant::now());

        let (snapshot_tx, _) = watch::channel(TableSnapshot::default());

        Ok(Self {
            router,
            sockets,
            poll_timeout: config.poll_timeout(),
            shutdown,
            snapshot_tx,
        })
    }

    /// A watch over point-in-time copies of the routing table, refreshed
    /// once per loop iteration. Lets tests and observers query convergence
    /// without reaching into the running task.
    pub fn subscribe_table(&self) -> watch::Receiver<TableSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Runs until the shutdown flag is raised or an unrecoverable IO error
    /// occurs. All sockets are released on every exit path.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let datagrams = tokio::select! {
                biased;

                _ = self.shutdown.changed() => break,
                result = self.sockets.poll_once(self.poll_timeout) => {
                    result.context("failed to poll sockets")?
                }
            };

            let now = Instant::now();

            for datagram in datagrams {
                if tracing::enabled!(target: "wire", Level::TRACE) {
                    let hex_bytes = hex::encode(&datagram.payload);
                    tracing::trace!(target: "wire", source = %datagram.source, port = datagram.local_port, "rx {hex_bytes}");
                }

                if let Err(e) = self.router.handle_input(&datagram.payload, now) {
                    tracing::warn!(source = %datagram.source, "dropping malformed packet: {e}");
                }
            }

            self.router.handle_tick(now);

            while let Some(transmit) = self.router.poll_transmit() {
                if tracing::enabled!(target: "wire", Level::TRACE) {
                    let hex_bytes = hex::encode(&transmit.payload);
                    tracing::trace!(target: "wire", port = transmit.port, "tx {hex_bytes}");
                }

                if let Err(e) = self.sockets.unicast(&transmit.payload, transmit.port).await {
                    // The next periodic update retries implicitly.
                    tracing::warn!(port = transmit.port, "failed to send advertisement: {e}");
                }
            }

            self.snapshot_tx.send_replace(self.router.table().snapshot());
        }

        tracing::info!(id = %self.router.id(), "shutting down");

        Ok(())
    }
}
