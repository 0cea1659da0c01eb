use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Socket or OS level failure. Fatal when starting a session, logged and
    /// counted when it happens on a single send.
    #[error("transport error ({context}): {source}")]
    Transport {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("truncated packet: need {needed} bytes, got {actual}")]
    TruncatedPacket { needed: usize, actual: usize },

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("oversized packet: {size} bytes exceeds maximum of {max}")]
    OversizedPacket { size: usize, max: usize },

    /// Returned by a blocked receive once the listener has been closed.
    #[error("listener closed")]
    ListenerClosed,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn transport(context: impl Into<String>, source: io::Error) -> Self {
        Error::Transport {
            context: context.into(),
            source,
        }
    }

    /// True for errors scoped to one datagram; the listener drops the packet
    /// and keeps running.
    pub fn is_per_packet(&self) -> bool {
        matches!(
            self,
            Error::TruncatedPacket { .. } | Error::Decoding(_) | Error::OversizedPacket { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_packet_classification() {
        assert!(Error::TruncatedPacket { needed: 12, actual: 5 }.is_per_packet());
        assert!(Error::Decoding("bad type".into()).is_per_packet());
        assert!(Error::OversizedPacket { size: 9000, max: 8192 }.is_per_packet());
        assert!(!Error::ListenerClosed.is_per_packet());
        assert!(!Error::transport("bind", io::Error::other("boom")).is_per_packet());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::transport("join 224.0.0.1:6060", io::Error::other("no device"));
        let text = err.to_string();
        assert!(text.contains("join 224.0.0.1:6060"));
        assert!(text.contains("no device"));
    }
}
