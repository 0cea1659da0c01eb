// UDP multicast sockets
pub mod listener;
pub mod sender;

pub use listener::{Datagram, ListenerHandle, open_listener};
pub use sender::{SenderHandle, open_sender};

use crate::error::{Error, Result};

/// Attaches socket context to an `io::Result`.
pub(crate) trait IoResultExt<T> {
    fn transport_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn transport_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::transport(context(), e))
    }
}
