use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the reactor core.
///
/// Only [`Error::AcceptSocket`] and [`Error::Shutdown`] are allowed to unwind
/// a poller's poll loop (see spec §7); every other variant is logged at
/// `warn!` at the dispatch site and the loop continues.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The main reactor's `accept()` failed for a reason other than
    /// `EAGAIN`/`EWOULDBLOCK`. Fatal: exits the main reactor and triggers
    /// server shutdown.
    #[error("failed to accept a new connection")]
    AcceptSocket,

    /// The distinguished sentinel enqueued by `Server::stop` to unwind a
    /// reactor's poll loop cleanly.
    #[error("server is shutting down")]
    Shutdown,

    #[error("unsupported network protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(std::time::Duration),

    /// A user `EventHandler` callback returned an application error. Logged
    /// and swallowed; the connection or loop survives.
    #[error("handler error: {0}")]
    Handler(String),
}

impl Error {
    /// True for the two variants allowed to escape a poll loop.
    pub fn is_fatal_to_loop(&self) -> bool {
        matches!(self, Error::AcceptSocket | Error::Shutdown)
    }
}
