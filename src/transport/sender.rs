use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tracing::{debug, warn};

use super::IoResultExt;
use crate::config::TransportConfig;
use crate::endpoint::MulticastEndpoint;
use crate::error::Result;

/// Send-only socket bound to an ephemeral port, aimed at one group.
pub struct SenderHandle {
    socket: UdpSocket,
    endpoint: MulticastEndpoint,
}

pub fn open_sender(endpoint: MulticastEndpoint, config: &TransportConfig) -> Result<SenderHandle> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .transport_context(|| format!("create sender socket for {}", endpoint))?;

    socket
        .set_multicast_ttl_v4(config.ttl)
        .transport_context(|| format!("set multicast TTL {} for {}", config.ttl, endpoint))?;
    socket
        .set_multicast_loop_v4(config.loopback)
        .transport_context(|| format!("set multicast loopback for {}", endpoint))?;
    if !config.interface.is_unspecified() {
        socket
            .set_multicast_if_v4(&config.interface)
            .transport_context(|| format!("select interface {} for {}", config.interface, endpoint))?;
    }

    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        warn!("Failed to set send buffer for {}: {}", endpoint, e);
    }

    let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket
        .bind(&local.into())
        .transport_context(|| format!("bind sender socket for {}", endpoint))?;

    debug!("Sender socket ready for {} (ttl {})", endpoint, config.ttl);
    Ok(SenderHandle {
        socket: socket.into(),
        endpoint,
    })
}

impl SenderHandle {
    /// Best-effort transmit of one datagram to the group.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        self.socket
            .send_to(payload, self.endpoint.socket_addr())
            .transport_context(|| format!("send to {}", self.endpoint))
    }

    pub fn endpoint(&self) -> MulticastEndpoint {
        self.endpoint
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .transport_context(|| format!("local address of sender for {}", self.endpoint))
    }
}
