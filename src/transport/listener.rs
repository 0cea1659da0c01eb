use crossbeam::channel::{self, Receiver, Sender, TrySendError, select};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::IoResultExt;
use crate::config::TransportConfig;
use crate::endpoint::MulticastEndpoint;
use crate::error::{Error, Result};

/// A datagram read from one of the listener's sockets.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Local port of the socket that read it.
    pub port: u16,
    pub source: SocketAddr,
    pub payload: Vec<u8>,
    /// Stamped right after the OS returned the bytes.
    pub received_at: Instant,
}

type Delivery = Result<Datagram>;

/// Receive side of the transport: one socket per distinct port, each joined
/// to every group configured on that port.
///
/// Every socket has a reader thread feeding a shared bounded queue, so a
/// single `receive` call waits on all sockets at once. `close` wakes any
/// blocked `receive` immediately; readers notice within one read timeout.
pub struct ListenerHandle {
    datagrams: Receiver<Delivery>,
    shutdown: Receiver<()>,
    shutdown_trigger: Mutex<Option<Sender<()>>>,
    closed: Arc<AtomicBool>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    queue_drops: Arc<AtomicU64>,
    ports: Vec<u16>,
}

pub fn open_listener(
    endpoints: &[MulticastEndpoint],
    config: &TransportConfig,
) -> Result<ListenerHandle> {
    if endpoints.is_empty() {
        return Err(Error::Config("listener needs at least one endpoint".into()));
    }

    let mut groups_by_port: BTreeMap<u16, Vec<Ipv4Addr>> = BTreeMap::new();
    for endpoint in endpoints {
        let groups = groups_by_port.entry(endpoint.port()).or_default();
        if !groups.contains(&endpoint.group()) {
            groups.push(endpoint.group());
        }
    }

    // Open everything before spawning anything; an error here drops the
    // sockets opened so far.
    let mut sockets = Vec::with_capacity(groups_by_port.len());
    for (&port, groups) in &groups_by_port {
        sockets.push((port, open_port_socket(port, groups, config)?));
    }

    let (datagram_tx, datagrams) = channel::bounded(config.queue_capacity);
    let (shutdown_trigger, shutdown) = channel::bounded::<()>(0);
    let handle = ListenerHandle {
        datagrams,
        shutdown,
        shutdown_trigger: Mutex::new(Some(shutdown_trigger)),
        closed: Arc::new(AtomicBool::new(false)),
        readers: Mutex::new(Vec::with_capacity(sockets.len())),
        queue_drops: Arc::new(AtomicU64::new(0)),
        ports: groups_by_port.keys().copied().collect(),
    };

    for (port, socket) in sockets {
        let reader = SocketReader {
            port,
            socket,
            max_datagram_size: config.max_datagram_size,
            queue: datagram_tx.clone(),
            closed: handle.closed.clone(),
            queue_drops: handle.queue_drops.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("dis-recv-{}", port))
            .spawn(move || reader.run())
            .transport_context(|| format!("spawn reader for port {}", port));
        match spawned {
            Ok(join) => handle.readers.lock().push(join),
            Err(e) => {
                handle.close();
                return Err(e);
            }
        }
    }

    info!(
        "Listening on {} endpoint(s) across ports {:?}",
        endpoints.len(),
        handle.ports
    );
    Ok(handle)
}

fn open_port_socket(port: u16, groups: &[Ipv4Addr], config: &TransportConfig) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .transport_context(|| format!("create listener socket for port {}", port))?;

    // Several listeners on one host may share the port.
    socket
        .set_reuse_address(true)
        .transport_context(|| format!("set SO_REUSEADDR on port {}", port))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .transport_context(|| format!("set SO_REUSEPORT on port {}", port))?;

    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        warn!("Failed to set large receive buffer for port {}: {}", port, e);
    }
    socket
        .set_read_timeout(Some(config.read_timeout))
        .transport_context(|| format!("set read timeout on port {}", port))?;

    let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket
        .bind(&local.into())
        .transport_context(|| format!("bind port {}", port))?;

    for group in groups {
        socket
            .join_multicast_v4(group, &config.interface)
            .transport_context(|| format!("join {}:{} on {}", group, port, config.interface))?;
        info!("Joined multicast group {}:{} on {}", group, port, config.interface);
    }

    Ok(socket.into())
}

impl ListenerHandle {
    /// Blocks until a datagram arrives on any socket or the handle is closed.
    pub fn receive(&self) -> Result<Datagram> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ListenerClosed);
        }

        select! {
            recv(self.datagrams) -> delivery => match delivery {
                Ok(delivery) => delivery,
                Err(_) => Err(Error::ListenerClosed),
            },
            recv(self.shutdown) -> _ => Err(Error::ListenerClosed),
        }
    }

    /// Releases every socket. Safe to call more than once and from another
    /// thread than the one blocked in `receive`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the trigger disconnects `shutdown`, waking `receive`.
        self.shutdown_trigger.lock().take();

        let readers = std::mem::take(&mut *self.readers.lock());
        for (i, reader) in readers.into_iter().enumerate() {
            if let Err(e) = reader.join() {
                warn!("Error joining reader thread {}: {:?}", i, e);
            }
        }
        info!("Listener on ports {:?} closed", self.ports);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Datagrams dropped because the listener loop fell behind.
    pub fn queue_drops(&self) -> u64 {
        self.queue_drops.load(Ordering::Relaxed)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

struct SocketReader {
    port: u16,
    socket: UdpSocket,
    max_datagram_size: usize,
    queue: Sender<Delivery>,
    closed: Arc<AtomicBool>,
    queue_drops: Arc<AtomicU64>,
}

impl SocketReader {
    fn run(self) {
        // One spare byte tells an oversized datagram apart from a full one.
        let mut buffer = vec![0u8; self.max_datagram_size + 1];
        debug!("Reader for port {} started", self.port);

        while !self.closed.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buffer) {
                Ok((size, source)) => {
                    let received_at = Instant::now();
                    let delivery = if size > self.max_datagram_size {
                        Err(Error::OversizedPacket {
                            size,
                            max: self.max_datagram_size,
                        })
                    } else {
                        Ok(Datagram {
                            port: self.port,
                            source,
                            payload: buffer[..size].to_vec(),
                            received_at,
                        })
                    };

                    match self.queue.try_send(delivery) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            self.queue_drops.fetch_add(1, Ordering::Relaxed);
                            debug!("Receive queue full, dropped datagram on port {}", self.port);
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => continue,
                    _ => {
                        if self.closed.load(Ordering::Acquire) {
                            break;
                        }
                        warn!("Error receiving on port {}: {}", self.port, e);
                        thread::sleep(Duration::from_millis(10));
                    }
                },
            }
        }

        debug!("Reader for port {} shutting down", self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_endpoint_set_rejected() {
        assert!(matches!(
            open_listener(&[], &TransportConfig::default()),
            Err(Error::Config(_))
        ));
    }
}
