use futures::future;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// The largest datagram we accept.
///
/// A packet carrying a full table of 25 routes is 504 bytes; anything
/// larger is not something a peer daemon would send.
pub const MAX_DATAGRAM: usize = 512;

/// A datagram read from one of the incoming sockets.
#[derive(Debug)]
pub struct Datagram {
    pub payload: Vec<u8>,
    /// The local port the datagram arrived on.
    pub local_port: u16,
    pub source: SocketAddr,
}

/// The UDP interface of a daemon instance.
///
/// Owns one bound socket per configured incoming port plus a single shared
/// socket for outbound sends. All sockets are closed when the value is
/// dropped, which the event loop relies on for release on every exit path.
pub struct Sockets {
    incoming: Vec<(u16, UdpSocket)>,
    outgoing: UdpSocket,
    bind_address: IpAddr,
}

impl Sockets {
    /// Binds all incoming ports plus the outgoing socket on `bind_address`.
    ///
    /// Must be called from within a tokio runtime. Any failure to create or
    /// bind a socket is fatal for the instance.
    pub fn bind(bind_address: IpAddr, incoming_ports: &[u16]) -> io::Result<Self> {
        if incoming_ports.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "at least one incoming port is required",
            ));
        }

        let incoming = incoming_ports
            .iter()
            .map(|port| {
                let socket = make_nonblocking_socket(SocketAddr::new(bind_address, *port))?;

                tracing::debug!(%bind_address, port, "bound incoming socket");

                Ok((*port, socket))
            })
            .collect::<io::Result<Vec<_>>>()?;

        let outgoing = make_nonblocking_socket(SocketAddr::new(bind_address, 0))?;

        Ok(Self {
            incoming,
            outgoing,
            bind_address,
        })
    }

    /// Waits up to `timeout` for any incoming socket to become readable,
    /// then drains every ready socket with a single non-blocking receive.
    ///
    /// Returns an empty list on timeout. This is the event loop's only
    /// suspension point.
    pub async fn poll_once(&self, timeout: Duration) -> io::Result<Vec<Datagram>> {
        let readable = self
            .incoming
            .iter()
            .map(|(_, socket)| Box::pin(socket.readable()));

        let (result, _, _) = match tokio::time::timeout(timeout, future::select_all(readable)).await
        {
            Ok(ready) => ready,
            Err(_) => return Ok(Vec::new()),
        };
        result?;

        let mut received = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM];

        for (port, socket) in &self.incoming {
            match socket.try_recv_from(&mut buf) {
                Ok((len, source)) => received.push(Datagram {
                    payload: buf[..len].to_vec(),
                    local_port: *port,
                    source,
                }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(received)
    }

    /// Sends `payload` to `dest_port` on the bind address via the shared
    /// outgoing socket.
    pub async fn unicast(&self, payload: &[u8], dest_port: u16) -> io::Result<()> {
        let dest = SocketAddr::new(self.bind_address, dest_port);
        let sent = self.outgoing.send_to(payload, dest).await?;

        debug_assert_eq!(sent, payload.len());

        Ok(())
    }
}

/// Creates a non-blocking UDP socket bound to `addr`, registered with the
/// tokio reactor.
fn make_nonblocking_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}
