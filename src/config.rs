use std::net::Ipv4Addr;
use std::time::Duration;

use crate::endpoint::MulticastEndpoint;
use crate::error::{Error, Result};
use crate::pdu::{DecodeMode, ENTITY_STATE_PDU_SIZE};
use crate::stats::DEFAULT_RATE_WINDOW;

/// Largest PDU the DIS standard allows on the wire.
pub const DIS_MAX_PDU_SIZE: usize = 8192;

/// Socket level settings shared by senders and the listener.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interface used for group membership and outgoing multicast.
    /// `UNSPECIFIED` lets the OS pick.
    pub interface: Ipv4Addr,
    pub ttl: u32,
    /// Deliver our own multicast back to local listeners.
    pub loopback: bool,
    pub max_datagram_size: usize,
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
    /// Upper bound on how long a listener socket blocks before noticing a
    /// close request.
    pub read_timeout: Duration,
    /// Datagrams buffered between socket readers and the listener loop.
    pub queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 2,
            loopback: true,
            max_datagram_size: DIS_MAX_PDU_SIZE,
            recv_buffer_size: 1024 * 1024,
            send_buffer_size: 256 * 1024,
            read_timeout: Duration::from_millis(100),
            queue_capacity: 4096,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ttl == 0 || self.ttl > 255 {
            return Err(Error::Config(format!(
                "multicast TTL {} is outside 1..=255",
                self.ttl
            )));
        }
        if self.max_datagram_size < ENTITY_STATE_PDU_SIZE {
            return Err(Error::Config(format!(
                "max datagram size {} cannot hold an Entity State PDU ({} bytes)",
                self.max_datagram_size, ENTITY_STATE_PDU_SIZE
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be non-zero".into()));
        }
        Ok(())
    }
}

/// Identity stamped on synthetic entities. Each sender gets its own entity
/// number, starting at `first_entity_number`.
#[derive(Debug, Clone, Copy)]
pub struct EntityConfig {
    pub exercise_id: u8,
    pub site_id: u16,
    pub application_id: u16,
    pub first_entity_number: u16,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            exercise_id: 1,
            site_id: 1,
            application_id: 1,
            first_entity_number: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// One sender per endpoint; the listener joins all of them.
    pub groups: Vec<MulticastEndpoint>,
    pub send_interval_ms: u32,
    pub rate_window: Duration,
    pub decode_mode: DecodeMode,
    pub entity: EntityConfig,
    pub transport: TransportConfig,
}

impl SessionConfig {
    pub fn new(groups: Vec<MulticastEndpoint>, send_interval_ms: u32) -> Self {
        Self {
            groups,
            send_interval_ms,
            rate_window: DEFAULT_RATE_WINDOW,
            decode_mode: DecodeMode::Permissive,
            entity: EntityConfig::default(),
            transport: TransportConfig::default(),
        }
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            return Err(Error::Config("at least one multicast group is required".into()));
        }
        for (i, group) in self.groups.iter().enumerate() {
            if self.groups[..i].contains(group) {
                return Err(Error::Config(format!("duplicate endpoint {}", group)));
            }
        }
        if self.send_interval_ms == 0 {
            return Err(Error::Config("send interval must be non-zero".into()));
        }
        if self.rate_window.is_zero() {
            return Err(Error::Config("rate window must be non-zero".into()));
        }
        self.transport.validate()
    }
}

/// The two groups the capture tool has always used.
pub fn default_groups() -> Vec<MulticastEndpoint> {
    [
        (Ipv4Addr::new(224, 0, 0, 1), 6060),
        (Ipv4Addr::new(224, 0, 0, 2), 6061),
    ]
    .into_iter()
    .filter_map(|(group, port)| MulticastEndpoint::new(group, port).ok())
    .collect()
}
