//! End-to-end loopback tests against the public `Server`/`EventHandler`
//! surface (spec §8 scenario 1: single connection echo; scenario 4:
//! shutdown during traffic).

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use evreactor::{Action, Config, Connection, EventHandler, Server, ServerInfo};

/// Echoes every frame back unmodified and reports the address it actually
/// bound to over `ready_tx`, since `Server::run` resolves `"…:0"` to an
/// ephemeral port internally.
struct Echo {
    ready_tx: Mutex<Option<mpsc::Sender<SocketAddr>>>,
}

impl Echo {
    fn new(ready_tx: mpsc::Sender<SocketAddr>) -> Echo {
        Echo {
            ready_tx: Mutex::new(Some(ready_tx)),
        }
    }
}

impl EventHandler for Echo {
    type Context = ();

    fn on_init_complete(&self, server: &ServerInfo) -> Action {
        if let Some(tx) = self.ready_tx.lock().unwrap().take() {
            let _ = tx.send(server.addr);
        }
        Action::None
    }

    fn react(&self, frame: &[u8], _conn: &mut Connection<Self>) -> (Vec<u8>, Action) {
        (frame.to_vec(), Action::None)
    }
}

#[test]
fn single_connection_echo() {
    let (ready_tx, ready_rx) = mpsc::channel();
    let config = Config::builder().num_event_loop(1).build().unwrap();
    let server = Server::new("127.0.0.1:0", Echo::new(ready_tx), config);
    let shutdown = server.shutdown_handle();

    let join = thread::spawn(move || server.run().unwrap());

    let addr = ready_rx.recv_timeout(Duration::from_secs(5)).expect("server never became ready");

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"ping").unwrap();

    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    drop(client);
    shutdown.shutdown();
    join.join().unwrap();
}

/// A handler whose `react` grows the outbound buffer unboundedly relative
/// to what it reads, exercising the P5 read-fallback path under
/// backpressure (spec §8 scenario 5) without actually needing to fill a
/// kernel send buffer: since the client here keeps draining its socket,
/// this mainly proves the loop doesn't deadlock or drop bytes under
/// many small round-trips in a row.
struct Amplifier {
    ready_tx: Mutex<Option<mpsc::Sender<SocketAddr>>>,
}

impl EventHandler for Amplifier {
    type Context = ();

    fn on_init_complete(&self, server: &ServerInfo) -> Action {
        if let Some(tx) = self.ready_tx.lock().unwrap().take() {
            let _ = tx.send(server.addr);
        }
        Action::None
    }

    fn react(&self, frame: &[u8], _conn: &mut Connection<Self>) -> (Vec<u8>, Action) {
        let mut out = Vec::with_capacity(frame.len() * 2);
        out.extend_from_slice(frame);
        out.extend_from_slice(frame);
        (out, Action::None)
    }
}

#[test]
fn streamed_writes_do_not_deadlock() {
    let (ready_tx, ready_rx) = mpsc::channel();
    let config = Config::builder().num_event_loop(1).build().unwrap();
    let handler = Amplifier {
        ready_tx: Mutex::new(Some(ready_tx)),
    };
    let server = Server::new("127.0.0.1:0", handler, config);
    let shutdown = server.shutdown_handle();

    let join = thread::spawn(move || server.run().unwrap());
    let addr = ready_rx.recv_timeout(Duration::from_secs(5)).expect("server never became ready");

    let mut client = TcpStream::connect(addr).unwrap();
    let chunk = [0x5au8; 256];

    for _ in 0..64 {
        client.write_all(&chunk).unwrap();
        let mut echoed = vec![0u8; chunk.len() * 2];
        client.read_exact(&mut echoed).unwrap();
        assert!(echoed[..chunk.len()] == chunk);
        assert!(echoed[chunk.len()..] == chunk);
    }

    drop(client);
    shutdown.shutdown();
    join.join().unwrap();
}

/// Scenario 4: shutdown while connections are still open. Every client
/// socket should observe the far end going away (EOF), and `Server::run`
/// should return once all reactors have joined.
#[test]
fn shutdown_with_open_connections() {
    let (ready_tx, ready_rx) = mpsc::channel();
    let config = Config::builder().num_event_loop(2).build().unwrap();
    let server = Server::new("127.0.0.1:0", Echo::new(ready_tx), config);
    let shutdown = server.shutdown_handle();

    let join = thread::spawn(move || server.run().unwrap());
    let addr = ready_rx.recv_timeout(Duration::from_secs(5)).expect("server never became ready");

    let clients: Vec<TcpStream> = (0..16).map(|_| TcpStream::connect(addr).unwrap()).collect();

    // Give the accept/handoff path a moment to land every connection in a
    // sub-reactor's map before shutting down, so this asserts against the
    // established-connection teardown path rather than a race against
    // connections still sitting unaccepted in the listen backlog.
    thread::sleep(Duration::from_millis(200));

    shutdown.shutdown();
    join.join().unwrap();

    for mut client in clients {
        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).unwrap_or(0);
        assert_eq!(n, 0, "client socket should see EOF after shutdown");
    }
}
