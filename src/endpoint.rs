use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use crate::error::{Error, Result};

/// One multicast group/port pair a sender emits on or the listener joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MulticastEndpoint {
    group: Ipv4Addr,
    port: u16,
}

impl MulticastEndpoint {
    pub fn new(group: Ipv4Addr, port: u16) -> Result<Self> {
        if !group.is_multicast() {
            return Err(Error::Config(format!("{} is not a multicast address", group)));
        }
        if port == 0 {
            return Err(Error::Config(format!("port 0 is not usable for group {}", group)));
        }
        Ok(Self { group, port })
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.group, self.port))
    }
}

impl fmt::Display for MulticastEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.port)
    }
}

impl FromStr for MulticastEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let addr: SocketAddrV4 = s
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid endpoint '{}': {}", s, e)))?;
        Self::new(*addr.ip(), addr.port())
    }
}
