//! The application-supplied event handler, named an external collaborator
//! by spec §1/§6 but given a concrete trait definition here so the crate is
//! usable. Grounded on spec §6's six callbacks and on the original's
//! `EventHandler` interface (`OnInitComplete`/`OnOpened`/`OnClosed`/`React`/
//! `Tick`/`OnShutdown`, referenced throughout `server_unix.go` and
//! `reactor_linux.go`).

use std::net::SocketAddr;
use std::time::Duration;

use crate::conn::Connection;

/// What should happen after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Continue as normal.
    None,
    /// Close this connection once its outbound buffer has drained.
    Close,
    /// Begin server-wide shutdown.
    Shutdown,
}

/// Read-only server info handed to `on_init_complete`/`on_shutdown`,
/// mirroring the original's public `Server` struct
/// (`Multicore`/`Addr`/`NumEventLoop`/`ReusePort`/`TCPKeepAlive`).
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub multicore: bool,
    pub addr: SocketAddr,
    pub num_event_loop: usize,
    pub reuse_port: bool,
    pub tcp_keepalive: Option<Duration>,
}

/// Application callbacks, invoked exclusively on the owning reactor's
/// thread for a given connection (spec §5) — no callback for connection
/// `c` ever runs concurrently with another callback for `c`.
pub trait EventHandler: Send + Sync {
    /// Per-connection application state, replacing a dynamically-typed
    /// context slot (spec §9 Design Notes) with an associated type.
    type Context: Default + Send;

    /// Called once, before any reactor starts. Returning `Action::Shutdown`
    /// aborts startup before `Server::start` launches any thread.
    fn on_init_complete(&self, _server: &ServerInfo) -> Action {
        Action::None
    }

    /// Called once, on the reactor that will host the connection, right
    /// after its fd is registered and inserted into that reactor's map.
    /// Any returned bytes are appended to the outbound buffer.
    fn on_opened(&self, _conn: &mut Connection<Self>) -> (Vec<u8>, Action)
    where
        Self: Sized,
    {
        (Vec::new(), Action::None)
    }

    /// Called once a connection is fully torn down (poller entry deleted,
    /// fd closed, removed from the loop's map).
    fn on_closed(&self, _conn: &Connection<Self>, _err: Option<&crate::error::Error>) -> Action
    where
        Self: Sized,
    {
        Action::None
    }

    /// Called once per frame the codec decodes off the wire. Any returned
    /// bytes are appended to the connection's outbound buffer.
    fn react(&self, frame: &[u8], conn: &mut Connection<Self>) -> (Vec<u8>, Action)
    where
        Self: Sized;

    /// Called once per ticker period on loop 0, only when `Config::ticker`
    /// is enabled. Returns the delay until the next call.
    fn tick(&self) -> (Duration, Action) {
        (Duration::from_secs(1), Action::None)
    }

    /// Called once, from the thread that is about to join all reactors,
    /// right before the shutdown sentinel is triggered on each of them.
    fn on_shutdown(&self, _server: &ServerInfo) {}
}
