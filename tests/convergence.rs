//! Multi-instance scenarios over real loopback sockets.
//!
//! Every daemon runs as an independent task with its own ports and is
//! stopped through its shutdown flag; nothing is shared between instances
//! except the wire. Convergence is observed through each instance's table
//! watch rather than by sleeping.

use ripd::config::{Config, PeerConfig};
use ripd::packet::{Command, Packet};
use ripd::{Eventloop, INFINITY, Route, RouterId, TableSnapshot};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Bounded join budget per instance.
const STOP_WITHIN: Duration = Duration::from_secs(5);

#[tokio::test]
async fn two_routers_discover_each_other() {
    let r1 = spawn_router(config(1, 40101, &[(2, 40102, 1)]));
    let r2 = spawn_router(config(2, 40102, &[(1, 40101, 1)]));

    let route = wait_for_route(
        r1.table.clone(),
        2,
        |route| route.metric == 1,
        Duration::from_secs(3),
    )
    .await;
    assert_eq!(route.next_hop, RouterId::new(2));

    let route = wait_for_route(
        r2.table.clone(),
        1,
        |route| route.metric == 1,
        Duration::from_secs(3),
    )
    .await;
    assert_eq!(route.next_hop, RouterId::new(1));

    stop(r1).await;
    stop(r2).await;
}

#[tokio::test]
async fn transit_routes_converge_across_three_routers() {
    let r1 = spawn_router(config(1, 40201, &[(2, 40202, 1)]));
    let r2 = spawn_router(config(2, 40202, &[(1, 40201, 1), (3, 40203, 1)]));
    let r3 = spawn_router(config(3, 40203, &[(2, 40202, 1)]));

    let route = wait_for_route(
        r1.table.clone(),
        3,
        |route| route.metric == 2,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(route.next_hop, RouterId::new(2));

    let route = wait_for_route(
        r3.table.clone(),
        1,
        |route| route.metric == 2,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(route.next_hop, RouterId::new(2));

    stop(r1).await;
    stop(r2).await;
    stop(r3).await;
}

#[tokio::test]
async fn advertisements_poison_routes_towards_their_next_hop() {
    // R1 peers "R2", which we play ourselves from a plain socket so we can
    // inspect what R1 puts on the wire.
    let r1 = spawn_router(config(1, 40301, &[(2, 40302, 1)]));
    let wire = UdpSocket::bind(SocketAddr::new(LOCALHOST, 40302))
        .await
        .unwrap();

    // Teach R1 a route to 3 through us.
    let advertisement = Packet::response(
        RouterId::new(2),
        vec![
            ripd::Entry {
                id: RouterId::new(2),
                metric: 0,
            },
            ripd::Entry {
                id: RouterId::new(3),
                metric: 1,
            },
        ],
    );
    wire.send_to(
        &advertisement.encode(),
        SocketAddr::new(LOCALHOST, 40301),
    )
    .await
    .unwrap();

    wait_for_route(r1.table.clone(), 3, |route| route.metric == 2, Duration::from_secs(3)).await;

    // The next advertisement towards us must carry 3 at infinity: our link
    // is R1's next hop for it.
    let deadline = Duration::from_secs(3);
    let packet = timeout(deadline, async {
        let mut buf = [0u8; 512];
        loop {
            let (len, _) = wire.recv_from(&mut buf).await.unwrap();
            let packet = Packet::decode(&buf[..len]).unwrap();

            if packet.entries.iter().any(|entry| entry.id == RouterId::new(3)) {
                return packet;
            }
        }
    })
    .await
    .expect("no advertisement carrying destination 3");

    assert_eq!(packet.command, Command::Response);
    assert_eq!(packet.sender, RouterId::new(1));
    assert_eq!(packet.entries[0].id, RouterId::new(1));
    assert_eq!(packet.entries[0].metric, 0);

    let poisoned = packet
        .entries
        .iter()
        .find(|entry| entry.id == RouterId::new(3))
        .unwrap();
    assert_eq!(poisoned.metric, INFINITY);

    stop(r1).await;
}

#[tokio::test]
async fn dead_neighbour_is_poisoned_then_removed() {
    let r1 = spawn_router(fast_config(1, 40401, &[(2, 40402, 1)]));
    let r2 = spawn_router(fast_config(2, 40402, &[(1, 40401, 1)]));

    wait_for_route(r1.table.clone(), 2, |route| route.metric == 1, Duration::from_secs(3)).await;

    stop(r2).await;

    // After `timeout` of silence the route is poisoned and enters garbage
    // collection, after `timeout + gc` it is gone.
    let route = wait_for_route(
        r1.table.clone(),
        2,
        |route| route.metric == INFINITY && route.gc_active,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(route.next_hop, RouterId::new(2));

    wait_for(r1.table.clone(), Duration::from_secs(6), |snapshot| {
        !snapshot.contains_key(&RouterId::new(2))
    })
    .await;

    stop(r1).await;
}

#[tokio::test]
async fn expiry_provokes_triggered_update_before_the_periodic_one() {
    // R1's periodic interval is far beyond the test budget: any
    // advertisement after the initial one must be a triggered update.
    let mut config_r1 = fast_config(1, 40501, &[(2, 40502, 1), (3, 40503, 1)]);
    config_r1.periodic_update_time = 600;

    let r1 = spawn_router(config_r1);
    let r2 = spawn_router(fast_config(2, 40502, &[(1, 40501, 1)]));
    let wire = UdpSocket::bind(SocketAddr::new(LOCALHOST, 40503))
        .await
        .unwrap();

    wait_for_route(r1.table.clone(), 2, |route| route.metric == 1, Duration::from_secs(3)).await;

    // Drain R1's initial advertisement(s) to us.
    let mut buf = [0u8; 512];
    while let Ok(result) = timeout(Duration::from_millis(500), wire.recv_from(&mut buf)).await {
        result.unwrap();
    }

    stop(r2).await;

    // R1 notices the silence after `timeout` and must tell us immediately
    // that 2 is gone, without waiting out its periodic schedule.
    let withdrawal = timeout(Duration::from_secs(6), async {
        loop {
            let (len, _) = wire.recv_from(&mut buf).await.unwrap();
            let packet = Packet::decode(&buf[..len]).unwrap();

            if let Some(entry) = packet
                .entries
                .iter()
                .find(|entry| entry.id == RouterId::new(2))
            {
                return *entry;
            }
        }
    })
    .await
    .expect("no triggered update received");

    assert_eq!(withdrawal.metric, INFINITY);

    stop(r1).await;
}

#[tokio::test]
async fn malformed_datagrams_are_tolerated() {
    let r1 = spawn_router(config(1, 40601, &[(2, 40602, 1)]));
    let wire = UdpSocket::bind(SocketAddr::new(LOCALHOST, 40602))
        .await
        .unwrap();
    let target = SocketAddr::new(LOCALHOST, 40601);

    // Neither a truncated packet nor random bytes may affect the instance.
    wire.send_to(&[0x02, 0x02, 0x00, 0x02, 0xff], target)
        .await
        .unwrap();
    wire.send_to(&[0xde, 0xad, 0xbe, 0xef], target).await.unwrap();

    let advertisement = Packet::response(
        RouterId::new(2),
        vec![ripd::Entry {
            id: RouterId::new(5),
            metric: 1,
        }],
    );
    wire.send_to(&advertisement.encode(), target).await.unwrap();

    let snapshot = wait_for(r1.table.clone(), Duration::from_secs(3), |snapshot| {
        snapshot.contains_key(&RouterId::new(5))
    })
    .await;

    // Only the valid advertisement made it into the table.
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[&RouterId::new(5)].metric, 2);

    stop(r1).await;
}

struct Instance {
    shutdown: watch::Sender<bool>,
    table: watch::Receiver<TableSnapshot>,
    task: JoinHandle<anyhow::Result<()>>,
}

fn spawn_router(config: Config) -> Instance {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let eventloop = Eventloop::new(&config, shutdown_rx).unwrap();
    let table = eventloop.subscribe_table();
    let task = tokio::spawn(eventloop.run());

    Instance {
        shutdown,
        table,
        task,
    }
}

async fn stop(instance: Instance) {
    let _ = instance.shutdown.send(true);

    timeout(STOP_WITHIN, instance.task)
        .await
        .expect("instance did not stop in time")
        .expect("instance panicked")
        .expect("instance failed");
}

/// The scenario timers: periodic every second, poison after 6 s of silence,
/// remove 12 s later.
fn config(router_id: u16, incoming_port: u16, peers: &[(u16, u16, u8)]) -> Config {
    Config {
        router_id,
        incoming_ports: vec![incoming_port],
        bind_address: LOCALHOST,
        periodic_update_time: 1,
        timeout: 6,
        garbage_collection_time: 12,
        poll_timeout_ms: 50,
        peers: peers
            .iter()
            .map(|(router_id, port, metric)| PeerConfig {
                router_id: *router_id,
                port: *port,
                metric: *metric,
            })
            .collect(),
    }
}

/// Same topology helpers with timers tightened for failure scenarios.
fn fast_config(router_id: u16, incoming_port: u16, peers: &[(u16, u16, u8)]) -> Config {
    let mut config = config(router_id, incoming_port, peers);
    config.timeout = 2;
    config.garbage_collection_time = 3;

    config
}

async fn wait_for(
    mut table: watch::Receiver<TableSnapshot>,
    within: Duration,
    predicate: impl FnMut(&TableSnapshot) -> bool,
) -> TableSnapshot {
    timeout(within, table.wait_for(predicate))
        .await
        .expect("table did not converge in time")
        .expect("instance stopped")
        .clone()
}

async fn wait_for_route(
    table: watch::Receiver<TableSnapshot>,
    destination: u16,
    mut predicate: impl FnMut(&Route) -> bool,
    within: Duration,
) -> Route {
    let destination = RouterId::new(destination);

    let snapshot = wait_for(table, within, |snapshot| {
        snapshot.get(&destination).is_some_and(&mut predicate)
    })
    .await;

    snapshot[&destination]
}
