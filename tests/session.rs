use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dis_multicast::pdu::{DecodeMode, EntityId, EntityStatePdu, Vector3};
use dis_multicast::transport::open_listener;
use dis_multicast::{
    Error, ListenerWorker, MulticastEndpoint, Session, SessionConfig, StatisticsAggregator,
    TransportConfig, WorkerState,
};

fn loopback_transport() -> TransportConfig {
    TransportConfig {
        interface: Ipv4Addr::LOCALHOST,
        read_timeout: Duration::from_millis(50),
        ..TransportConfig::default()
    }
}

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .unwrap()
}

fn endpoint(last_octet: u8, port: u16) -> MulticastEndpoint {
    MulticastEndpoint::new(Ipv4Addr::new(239, 255, 60, last_octet), port).unwrap()
}

fn valid_pdu(timestamp: u32) -> Vec<u8> {
    EntityStatePdu::new(
        1,
        timestamp,
        EntityId::new(1, 1, 1),
        Vector3::new(-2_707_000.0, -4_353_000.0, 3_781_000.0),
        Vector3::new(10.0, 0.0, 0.0),
    )
    .encode()
    .unwrap()
}

/// Starts a listener or returns `None` when the host cannot join groups.
fn start_listener(
    endpoints: Vec<MulticastEndpoint>,
    transport: &TransportConfig,
) -> Option<(ListenerWorker, Arc<StatisticsAggregator>)> {
    let stats = Arc::new(StatisticsAggregator::new());
    let mut listener = ListenerWorker::new(endpoints, stats.clone(), DecodeMode::Permissive);
    match listener.start(transport) {
        Ok(()) => Some((listener, stats)),
        Err(e @ Error::Transport { .. }) => {
            eprintln!("skipping: multicast unavailable ({})", e);
            None
        }
        Err(e) => panic!("unexpected listener error: {}", e),
    }
}

fn wait_for_count(stats: &StatisticsAggregator, expected: u64, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if stats.total_count() >= expected {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    stats.total_count() >= expected
}

#[test]
fn short_datagram_does_not_stop_listener() {
    let port = free_port();
    let transport = loopback_transport();
    let Some((mut listener, stats)) = start_listener(vec![endpoint(3, port)], &transport) else {
        return;
    };

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = ("127.0.0.1", port);
    socket.send_to(&[1, 2, 3, 4, 5], target).unwrap();
    for i in 0..3 {
        socket.send_to(&valid_pdu(i), target).unwrap();
    }

    assert!(wait_for_count(&stats, 3, Duration::from_secs(2)));
    listener.stop();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total_count, 3);
    assert_eq!(snapshot.decode_failures, 1);
    assert_eq!(snapshot.latencies.len(), 2);
    assert_eq!(snapshot.per_port.get(&port), Some(&3));
}

#[test]
fn oversized_datagram_is_dropped() {
    let port = free_port();
    let transport = TransportConfig {
        max_datagram_size: 64,
        ..loopback_transport()
    };
    let Some((mut listener, stats)) = start_listener(vec![endpoint(4, port)], &transport) else {
        return;
    };

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.send_to(&[0u8; 200], ("127.0.0.1", port)).unwrap();
    socket.send_to(&valid_pdu(1), ("127.0.0.1", port)).unwrap();

    assert!(wait_for_count(&stats, 1, Duration::from_secs(2)));
    listener.stop();

    assert_eq!(stats.total_count(), 1);
    assert_eq!(stats.oversized_dropped(), 1);
    assert_eq!(stats.decode_failures(), 0);
}

#[test]
fn idle_listener_stops_promptly() {
    let transport = loopback_transport();
    let Some((mut listener, stats)) = start_listener(vec![endpoint(5, free_port())], &transport)
    else {
        return;
    };
    assert_eq!(listener.state(), WorkerState::Running);

    thread::sleep(Duration::from_millis(100));
    let begin = Instant::now();
    listener.stop();
    assert!(begin.elapsed() < Duration::from_millis(200));
    assert_eq!(listener.state(), WorkerState::Idle);
    assert_eq!(stats.total_count(), 0);
}

#[test]
fn two_groups_end_to_end() {
    let groups = vec![endpoint(1, free_port()), endpoint(2, free_port())];
    let ports: Vec<u16> = groups.iter().map(|g| g.port()).collect();
    let mut config = SessionConfig::new(groups, 100);
    config.transport = loopback_transport();

    let session = match Session::start(config) {
        Ok(session) => session,
        Err(e @ Error::Transport { .. }) => {
            eprintln!("skipping: multicast unavailable ({})", e);
            return;
        }
        Err(e) => panic!("unexpected session error: {}", e),
    };

    thread::sleep(Duration::from_secs(2));
    let polled = session.poll_count();

    // Stopping must finish within two send intervals.
    let begin = Instant::now();
    let snapshot = session.stop();
    assert!(begin.elapsed() < Duration::from_millis(200));

    if snapshot.total_count == 0 {
        eprintln!("skipping: multicast loopback delivered nothing on this host");
        return;
    }

    let total = snapshot.total_count;
    assert!(total >= polled);
    assert!((20..=60).contains(&total), "unexpected packet count {}", total);
    assert_eq!(snapshot.latencies.len() as u64, total - 1);
    assert_eq!(snapshot.rate_per_window.len() as u64, total);
    assert!(snapshot.rate_per_window.iter().all(|&c| c >= 1 && c <= total));
    assert!(
        snapshot.mean_latency_ms > 20.0 && snapshot.mean_latency_ms < 110.0,
        "mean latency {} ms",
        snapshot.mean_latency_ms
    );
    for port in ports {
        assert!(snapshot.per_port.get(&port).copied().unwrap_or(0) > 0);
    }
    assert_eq!(snapshot.decode_failures, 0);
    assert!(snapshot.latencies.iter().all(|&gap| gap >= 0.0));
}

#[test]
fn failed_start_leaves_nothing_running() {
    // A unicast interface address that does not exist on this host makes
    // the group join fail.
    let mut config = SessionConfig::new(vec![endpoint(6, free_port())], 100);
    config.transport.interface = Ipv4Addr::new(192, 0, 2, 123);
    match Session::start(config) {
        Err(Error::Transport { .. }) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(session) => {
            // Some sandboxes accept any interface; the session must still stop cleanly.
            session.stop();
        }
    }
}

#[test]
fn out_of_range_ttl_is_rejected_before_any_socket_opens() {
    let group = endpoint(7, free_port());
    let mut config = SessionConfig::new(vec![group], 100);
    config.transport = TransportConfig {
        ttl: 1000,
        ..loopback_transport()
    };
    assert!(matches!(Session::start(config), Err(Error::Config(_))));

    // Nothing was left holding the endpoint.
    if let Some((mut listener, _)) = start_listener(vec![group], &loopback_transport()) {
        listener.stop();
    }
}

#[test]
fn full_receive_queue_counts_drops() {
    let port = free_port();
    let transport = TransportConfig {
        queue_capacity: 1,
        ..loopback_transport()
    };
    let handle = match open_listener(&[endpoint(8, port)], &transport) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("skipping: multicast unavailable ({})", e);
            return;
        }
    };

    // Nobody drains the queue, so everything after the first datagram drops.
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    for i in 0..5 {
        socket.send_to(&valid_pdu(i), ("127.0.0.1", port)).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.queue_drops() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(handle.queue_drops() >= 1);
    assert!(handle.receive().is_ok());
    handle.close();

    let stats = StatisticsAggregator::new();
    stats.record_queue_drops(handle.queue_drops());
    assert_eq!(stats.snapshot().queue_dropped, handle.queue_drops());
}
