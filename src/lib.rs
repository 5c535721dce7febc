//! A multi-reactor, edge-triggered epoll event-loop core for TCP servers.
//!
//! One OS thread per reactor: a distinguished main reactor accepts
//! connections and routes each to a sub-reactor through a pluggable
//! [`LoadBalancer`](balancer::LoadBalancer); every sub-reactor then owns a
//! private set of connections for their whole lifetime and drives their
//! read/write state machine. `ReusePort` mode drops the main reactor
//! entirely — every reactor owns its own listener via `SO_REUSEPORT` and
//! accepts directly.
//!
//! ```no_run
//! use evreactor::{Action, Config, Connection, EventHandler, Server};
//!
//! #[derive(Default)]
//! struct Echo;
//!
//! impl EventHandler for Echo {
//!     type Context = ();
//!
//!     fn react(&self, frame: &[u8], _conn: &mut Connection<Self>) -> (Vec<u8>, Action) {
//!         (frame.to_vec(), Action::None)
//!     }
//! }
//!
//! let config = Config::builder().num_event_loop(4).build().unwrap();
//! let server = Server::new("127.0.0.1:9000", Echo, config);
//! server.run().unwrap();
//! ```
//!
//! See [`EventHandler`] for the full callback surface and [`Config`] for the
//! recognized options.

pub mod balancer;
pub mod buffer;
pub mod codec;
pub mod conn;
pub mod config;
pub mod error;
pub mod eventloop;
pub mod handler;
pub mod listener;
pub mod poller;
pub mod queue;
pub mod ready;
pub mod server;
mod sys;
pub mod token;
pub mod waker;

pub use balancer::{LeastConnections, LoadBalancer, RoundRobin, SourceAddrHash};
pub use codec::{Codec, PassThroughCodec};
pub use config::{Config, ConfigBuilder, LbKind, Options};
pub use conn::Connection;
pub use error::{Error, Result};
pub use eventloop::EventLoop;
pub use handler::{Action, EventHandler, ServerInfo};
pub use listener::Listener;
pub use server::{Server, ShutdownHandle};
