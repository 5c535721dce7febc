//! In-memory configuration surface (spec §6). spec.md's Non-goals exclude
//! *parsing* a config file, but the options themselves are core, so this is
//! a plain struct plus a fluent builder — no `serde`, no file I/O.
//!
//! Grounded on the original's functional-options pattern
//! (`WithMulticore`/`WithNumEventLoop`/... in `options.go`), translated to
//! the builder idiom the teacher's sibling example crates use for their own
//! config surfaces (`get10101`'s `*Config` structs built field-by-field).

use std::time::Duration;

use crate::codec::{Codec, PassThroughCodec};

/// Load-balancer policy selector (spec §4.4/§6 `LB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbKind {
    RoundRobin,
    LeastConnections,
    SourceAddrHash,
}

impl Default for LbKind {
    fn default() -> LbKind {
        LbKind::RoundRobin
    }
}

/// Per-loop scratch read buffer default (spec §6 `ReadBufferCap`).
pub const DEFAULT_READ_BUFFER_CAP: usize = 64 * 1024;

/// Recognized server options (spec §6), resolved once at `Server::start` and
/// immutable for the server's lifetime (spec §1 Non-goals: no dynamic
/// reactor-count reconfiguration).
pub struct Config {
    pub(crate) multicore: bool,
    pub(crate) num_event_loop: usize,
    pub(crate) lock_os_thread: bool,
    pub(crate) reuse_port: bool,
    pub(crate) ticker: bool,
    pub(crate) read_buffer_cap: usize,
    pub(crate) tcp_keepalive: Option<Duration>,
    pub(crate) tcp_nodelay: bool,
    pub(crate) lb: LbKind,
    pub(crate) codec: Box<dyn Codec>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolves the number of sub-reactors: `num_event_loop` wins when
    /// non-zero, otherwise `multicore` selects the CPU count, otherwise 1.
    pub(crate) fn resolved_num_event_loop(&self) -> usize {
        if self.num_event_loop > 0 {
            self.num_event_loop
        } else if self.multicore {
            num_cpus::get().max(1)
        } else {
            1
        }
    }
}

pub struct ConfigBuilder {
    multicore: bool,
    num_event_loop: usize,
    lock_os_thread: bool,
    reuse_port: bool,
    ticker: bool,
    read_buffer_cap: usize,
    tcp_keepalive: Option<Duration>,
    tcp_nodelay: bool,
    lb: LbKind,
    codec: Box<dyn Codec>,
}

impl Default for ConfigBuilder {
    fn default() -> ConfigBuilder {
        ConfigBuilder {
            multicore: false,
            num_event_loop: 0,
            lock_os_thread: false,
            reuse_port: false,
            ticker: false,
            read_buffer_cap: DEFAULT_READ_BUFFER_CAP,
            tcp_keepalive: None,
            tcp_nodelay: true,
            lb: LbKind::default(),
            codec: Box::new(PassThroughCodec),
        }
    }
}

impl ConfigBuilder {
    pub fn multicore(mut self, enable: bool) -> Self {
        self.multicore = enable;
        self
    }

    pub fn num_event_loop(mut self, n: usize) -> Self {
        self.num_event_loop = n;
        self
    }

    pub fn lock_os_thread(mut self, enable: bool) -> Self {
        self.lock_os_thread = enable;
        self
    }

    pub fn reuse_port(mut self, enable: bool) -> Self {
        self.reuse_port = enable;
        self
    }

    pub fn ticker(mut self, enable: bool) -> Self {
        self.ticker = enable;
        self
    }

    pub fn read_buffer_cap(mut self, cap: usize) -> Self {
        self.read_buffer_cap = cap;
        self
    }

    pub fn tcp_keepalive(mut self, duration: Duration) -> Self {
        self.tcp_keepalive = Some(duration);
        self
    }

    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.tcp_nodelay = enable;
        self
    }

    pub fn lb(mut self, kind: LbKind) -> Self {
        self.lb = kind;
        self
    }

    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn build(self) -> crate::error::Result<Config> {
        if let Some(d) = self.tcp_keepalive {
            if d.is_zero() {
                return Err(crate::error::Error::InvalidDuration(d));
            }
        }

        Ok(Config {
            multicore: self.multicore,
            num_event_loop: self.num_event_loop,
            lock_os_thread: self.lock_os_thread,
            reuse_port: self.reuse_port,
            ticker: self.ticker,
            read_buffer_cap: self.read_buffer_cap,
            tcp_keepalive: self.tcp_keepalive,
            tcp_nodelay: self.tcp_nodelay,
            lb: self.lb,
            codec: self.codec,
        })
    }
}

/// Alias matching the original's naming for the options bag passed to
/// `Server::start` (spec §3 `Server` → `server::Server<H>` + `server::Options`).
pub type Options = Config;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_single_loop_round_robin() {
        let cfg = Config::builder().build().unwrap();
        assert_eq!(cfg.resolved_num_event_loop(), 1);
        assert_eq!(cfg.lb, LbKind::RoundRobin);
        assert!(cfg.tcp_nodelay);
    }

    #[test]
    fn explicit_num_event_loop_wins_over_multicore() {
        let cfg = Config::builder().multicore(true).num_event_loop(3).build().unwrap();
        assert_eq!(cfg.resolved_num_event_loop(), 3);
    }

    #[test]
    fn zero_keepalive_is_rejected() {
        let err = Config::builder().tcp_keepalive(Duration::ZERO).build();
        assert!(err.is_err());
    }
}
