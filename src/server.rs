//! Reactor orchestration (spec §4.7): binds the listener(s), starts the
//! main reactor and sub-reactors or the N self-accepting reuse-port
//! reactors, and runs the multi-stage shutdown sequence. Grounded on the
//! original's `server_unix.go` (`Start`/`activateReactors`/
//! `activateEventLoops`/`Stop`).

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::balancer::{LeastConnections, LoadBalancer, LoopRef, RoundRobin, SourceAddrHash};
use crate::codec::Codec;
use crate::config::{Config, LbKind};
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::eventloop::{EventLoop, RouteTable, MAIN_LOOP_INDEX};
use crate::handler::{Action, EventHandler, ServerInfo};
use crate::listener::Listener;

pub use crate::config::Options;

/// Shutdown condition variable plus the `inShutdown`-adjacent request flag
/// (spec §3 `Server` attributes: "a shutdown condition variable, an
/// `inShutdown` atomic flag"). Distinct from `Server::in_shutdown`: this one
/// is set the moment shutdown is *requested* (by a handler returning
/// `Action::Shutdown` or an external [`ShutdownHandle`]); `in_shutdown` is
/// only set `true` once the full stop sequence (spec §4.7 `stop` steps 1-6)
/// has completed.
pub(crate) struct ShutdownSignal {
    requested: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub(crate) fn new() -> ShutdownSignal {
        ShutdownSignal {
            requested: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn request(&self) {
        let mut requested = self.requested.lock().unwrap();
        if !*requested {
            *requested = true;
            self.condvar.notify_all();
        }
    }

    pub(crate) fn is_requested(&self) -> bool {
        *self.requested.lock().unwrap()
    }

    fn wait(&self) {
        let guard = self.requested.lock().unwrap();
        let _unused = self.condvar.wait_while(guard, |requested| !*requested).unwrap();
    }
}

/// A cloneable handle for requesting shutdown from outside any handler
/// callback — the signal that would otherwise only ever originate from an
/// `Action::Shutdown` return value.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<ShutdownSignal>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.request();
    }
}

/// Owns the configuration and the application handler for one server
/// instance. Bound addresses and reactor threads are created only once
/// [`Server::run`] is called (spec §4.7 `start`).
pub struct Server<H: EventHandler> {
    addr: String,
    handler: Arc<H>,
    config: Config,
    shutdown_signal: Arc<ShutdownSignal>,
    in_shutdown: Arc<AtomicBool>,
}

impl<H: EventHandler + 'static> Server<H> {
    pub fn new(addr: impl Into<String>, handler: H, config: Config) -> Server<H> {
        Server {
            addr: addr.into(),
            handler: Arc::new(handler),
            config,
            shutdown_signal: Arc::new(ShutdownSignal::new()),
            in_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A cloneable handle that can request shutdown from any thread,
    /// obtained before [`Server::run`] consumes `self`.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_signal.clone())
    }

    pub fn in_shutdown(&self) -> bool {
        self.in_shutdown.load(Ordering::Acquire)
    }

    /// Binds, starts every reactor thread, then blocks the calling thread
    /// until shutdown is requested and the full stop sequence (spec §4.7
    /// `stop` steps 1-6) has completed.
    pub fn run(self) -> Result<()> {
        let Server {
            addr,
            handler,
            config,
            shutdown_signal,
            in_shutdown,
        } = self;

        let resolved_addr = addr
            .to_socket_addrs()
            .map_err(Error::Io)?
            .next()
            .ok_or_else(|| Error::UnsupportedProtocol(addr.clone()))?;

        let num_event_loop = config.resolved_num_event_loop();
        let codec: Arc<dyn Codec> = Arc::from(config.codec);
        let balancer: Arc<dyn LoadBalancer> = match config.lb {
            LbKind::RoundRobin => Arc::new(RoundRobin::new()),
            LbKind::LeastConnections => Arc::new(LeastConnections::new()),
            LbKind::SourceAddrHash => Arc::new(SourceAddrHash::new()),
        };

        let server_info = ServerInfo {
            multicore: config.multicore,
            addr: resolved_addr,
            num_event_loop,
            reuse_port: config.reuse_port,
            tcp_keepalive: config.tcp_keepalive,
        };

        if handler.on_init_complete(&server_info) == Action::Shutdown {
            info!("on_init_complete requested shutdown; not starting any reactor");
            return Ok(());
        }

        let mut threads: Vec<JoinHandle<()>> = Vec::new();
        let mut listeners: Vec<Arc<Listener>> = Vec::new();
        let mut shutdown_triggers: Vec<crate::poller::Trigger> = Vec::new();
        let mut ticker_thread: Option<JoinHandle<()>> = None;

        if config.reuse_port {
            for index in 0..num_event_loop {
                let listener = Arc::new(Listener::bind(&addr, true)?);
                listeners.push(listener.clone());

                let mut eventloop = EventLoop::new(
                    index as isize,
                    Some(listener),
                    config.read_buffer_cap,
                    handler.clone(),
                    codec.clone(),
                    balancer.clone(),
                    config.tcp_nodelay,
                    config.tcp_keepalive,
                    shutdown_signal.clone(),
                    None,
                    None,
                )?;

                balancer.register(LoopRef::new(index, eventloop.trigger_handle()));
                shutdown_triggers.push(eventloop.trigger_handle());

                if index == 0 && config.ticker {
                    ticker_thread = Some(spawn_ticker(&mut eventloop, handler.clone(), shutdown_signal.clone()));
                }

                threads.push(spawn_reactor(eventloop, config.lock_os_thread));
            }
        } else {
            let mut pending_txs: Vec<Sender<Connection<H>>> = Vec::with_capacity(num_event_loop);

            for index in 0..num_event_loop {
                let (tx, rx) = mpsc::channel::<Connection<H>>();
                pending_txs.push(tx);

                let mut eventloop = EventLoop::new(
                    index as isize,
                    None,
                    config.read_buffer_cap,
                    handler.clone(),
                    codec.clone(),
                    balancer.clone(),
                    config.tcp_nodelay,
                    config.tcp_keepalive,
                    shutdown_signal.clone(),
                    None,
                    Some(rx),
                )?;

                balancer.register(LoopRef::new(index, eventloop.trigger_handle()));
                shutdown_triggers.push(eventloop.trigger_handle());

                if index == 0 && config.ticker {
                    ticker_thread = Some(spawn_ticker(&mut eventloop, handler.clone(), shutdown_signal.clone()));
                }

                threads.push(spawn_reactor(eventloop, config.lock_os_thread));
            }

            let main_listener = Arc::new(Listener::bind(&addr, false)?);
            listeners.push(main_listener.clone());

            let main_loop = EventLoop::new(
                MAIN_LOOP_INDEX,
                Some(main_listener),
                config.read_buffer_cap,
                handler.clone(),
                codec.clone(),
                balancer.clone(),
                config.tcp_nodelay,
                config.tcp_keepalive,
                shutdown_signal.clone(),
                Some(RouteTable { balancer: balancer.clone(), pending_txs }),
                None,
            )?;

            shutdown_triggers.push(main_loop.trigger_handle());
            threads.push(spawn_reactor(main_loop, config.lock_os_thread));
        }

        shutdown_signal.wait();

        handler.on_shutdown(&server_info);

        for listener in &listeners {
            listener.close();
        }

        for trigger in &shutdown_triggers {
            if trigger.trigger(Box::new(|| Err(Error::Shutdown))).is_err() {
                warn!("failed to deliver shutdown sentinel to a reactor; it may already be gone");
            }
        }

        for handle in threads {
            if handle.join().is_err() {
                warn!("a reactor thread panicked during shutdown");
            }
        }

        if let Some(handle) = ticker_thread {
            let _ = handle.join();
        }

        in_shutdown.store(true, Ordering::Release);
        Ok(())
    }
}

fn spawn_reactor<H: EventHandler + 'static>(mut eventloop: EventLoop<H>, lock_os_thread: bool) -> JoinHandle<()> {
    let index = eventloop.index();
    thread::Builder::new()
        .name(format!("evreactor-{index}"))
        .spawn(move || {
            if let Err(e) = eventloop.run(lock_os_thread) {
                warn!("reactor {index} exited with error: {e}");
            }
        })
        .expect("failed to spawn reactor thread")
}

/// One dedicated worker thread per server, seeded by loop 0's own initial
/// `handler.tick()` call (made directly on loop 0's thread, inside
/// `EventLoop::run`, before this worker's first `recv`). Recurring calls
/// are triggered back onto loop 0 so `Tick` always runs on the loop thread
/// (spec §4.3 `loopTicker`, Design Notes §9 "Coroutine/channel tick").
fn spawn_ticker<H: EventHandler + 'static>(
    loop0: &mut EventLoop<H>,
    handler: Arc<H>,
    shutdown_signal: Arc<ShutdownSignal>,
) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel::<Duration>();
    loop0.set_ticker_tx(tx.clone());
    let loop0_trigger = loop0.trigger_handle();

    // Polling interval for `shutdown_signal`: loop 0's own `tx` clone (held
    // by the trigger closure below) never drops on its own, so `rx` alone
    // can't be trusted to disconnect on shutdown — this thread has to
    // notice the flag itself instead of blocking on `recv()` forever.
    const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

    thread::Builder::new()
        .name("evreactor-ticker".to_string())
        .spawn(move || loop {
            if shutdown_signal.is_requested() {
                return;
            }

            let duration = match rx.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                Ok(duration) => duration,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            };

            thread::sleep(duration);

            if shutdown_signal.is_requested() {
                return;
            }

            let handler = handler.clone();
            let shutdown_signal2 = shutdown_signal.clone();
            let tx = tx.clone();

            let triggered = loop0_trigger.trigger(Box::new(move || {
                let (next, action) = handler.tick();
                if action == Action::Shutdown {
                    shutdown_signal2.request();
                }
                let _ = tx.send(next);
                Ok(())
            }));

            if triggered.is_err() {
                return;
            }
        })
        .expect("failed to spawn ticker thread")
}
