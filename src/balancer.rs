//! Load balancer (spec §4.4): maps a newly-accepted connection to a
//! sub-reactor. Grounded on the original's `loadbalancing.go`
//! (`roundRobinEventLoop`/`leastConnectionsEventLoop`/
//! `sourceAddrHashEventLoop`, all behind the shared `loadBalancer`
//! interface).

use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::poller::Trigger;

/// A registered sub-reactor as seen by the load balancer: enough to route a
/// new connection to it (`trigger`) and to track its open-connection count
/// for the least-connections policy. Cheap to clone (an index plus two
/// `Arc`s).
#[derive(Clone)]
pub struct LoopRef {
    pub index: usize,
    pub trigger: Trigger,
    connections: Arc<AtomicUsize>,
}

impl LoopRef {
    pub fn new(index: usize, trigger: Trigger) -> LoopRef {
        LoopRef {
            index,
            trigger,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Shared interface for all three policies (spec §4.4).
///
/// `next` is only ever called from the main-reactor thread (spec §4.4/§5),
/// so implementations need not make it safe to call concurrently with
/// itself — only concurrently with `calibrate`, which runs on whichever
/// sub-reactor thread observed the open/close.
pub trait LoadBalancer: Send + Sync {
    fn register(&self, loop_ref: LoopRef);
    fn iterate(&self, f: &mut dyn FnMut(&LoopRef));
    fn next(&self, addr: &SocketAddr) -> LoopRef;
    fn calibrate(&self, loop_index: usize, delta: isize);
    fn length(&self) -> usize;
}

/// Monotonic counter, `next` returns `loops[counter mod N]` (spec §4.4).
/// `calibrate` is a no-op: round-robin carries no per-loop counter.
#[derive(Default)]
pub struct RoundRobin {
    loops: Mutex<Vec<LoopRef>>,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> RoundRobin {
        RoundRobin::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn register(&self, loop_ref: LoopRef) {
        self.loops.lock().unwrap().push(loop_ref);
    }

    fn iterate(&self, f: &mut dyn FnMut(&LoopRef)) {
        for l in self.loops.lock().unwrap().iter() {
            f(l);
        }
    }

    fn next(&self, _addr: &SocketAddr) -> LoopRef {
        let loops = self.loops.lock().unwrap();
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        loops[n % loops.len()].clone()
    }

    fn calibrate(&self, _loop_index: usize, _delta: isize) {}

    fn length(&self) -> usize {
        self.loops.lock().unwrap().len()
    }
}

/// `next` scans every registered loop's atomic counter and returns the one
/// with the fewest open connections, ties broken by lowest index (spec
/// §4.4).
#[derive(Default)]
pub struct LeastConnections {
    loops: Mutex<Vec<LoopRef>>,
}

impl LeastConnections {
    pub fn new() -> LeastConnections {
        LeastConnections::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn register(&self, loop_ref: LoopRef) {
        self.loops.lock().unwrap().push(loop_ref);
    }

    fn iterate(&self, f: &mut dyn FnMut(&LoopRef)) {
        for l in self.loops.lock().unwrap().iter() {
            f(l);
        }
    }

    fn next(&self, _addr: &SocketAddr) -> LoopRef {
        let loops = self.loops.lock().unwrap();
        loops
            .iter()
            .min_by_key(|l| (l.connection_count(), l.index))
            .expect("next() called before any loop was registered")
            .clone()
    }

    fn calibrate(&self, loop_index: usize, delta: isize) {
        let loops = self.loops.lock().unwrap();
        if let Some(l) = loops.iter().find(|l| l.index == loop_index) {
            if delta >= 0 {
                l.connections.fetch_add(delta as usize, Ordering::Relaxed);
            } else {
                l.connections.fetch_sub((-delta) as usize, Ordering::Relaxed);
            }
        }
    }

    fn length(&self) -> usize {
        self.loops.lock().unwrap().len()
    }
}

/// Stable hash of the remote address selects the loop; pure with respect to
/// its input and the registered set (spec §4.4).
#[derive(Default)]
pub struct SourceAddrHash {
    loops: Mutex<Vec<LoopRef>>,
}

impl SourceAddrHash {
    pub fn new() -> SourceAddrHash {
        SourceAddrHash::default()
    }
}

impl LoadBalancer for SourceAddrHash {
    fn register(&self, loop_ref: LoopRef) {
        self.loops.lock().unwrap().push(loop_ref);
    }

    fn iterate(&self, f: &mut dyn FnMut(&LoopRef)) {
        for l in self.loops.lock().unwrap().iter() {
            f(l);
        }
    }

    fn next(&self, addr: &SocketAddr) -> LoopRef {
        let loops = self.loops.lock().unwrap();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        addr.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % loops.len();
        loops[idx].clone()
    }

    // calibrate is still tracked so `length`/diagnostics and P7 (sum of
    // calibration counters == open connections) hold for every variant, even
    // though `next` itself never consults it.
    fn calibrate(&self, loop_index: usize, delta: isize) {
        let loops = self.loops.lock().unwrap();
        if let Some(l) = loops.iter().find(|l| l.index == loop_index) {
            if delta >= 0 {
                l.connections.fetch_add(delta as usize, Ordering::Relaxed);
            } else {
                l.connections.fetch_sub((-delta) as usize, Ordering::Relaxed);
            }
        }
    }

    fn length(&self) -> usize {
        self.loops.lock().unwrap().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::poller::Poller;

    fn loop_ref(index: usize) -> LoopRef {
        let poller = Poller::open().unwrap();
        LoopRef::new(index, poller.trigger_handle())
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn round_robin_cycles_evenly() {
        let lb = RoundRobin::new();
        for i in 0..3 {
            lb.register(loop_ref(i));
        }

        let mut counts = [0usize; 3];
        for p in 0..9u16 {
            let chosen = lb.next(&addr(p));
            counts[chosen.index] += 1;
        }

        assert_eq!(counts, [3, 3, 3]);
    }

    #[test]
    fn least_connections_prefers_idle_loop() {
        let lb = LeastConnections::new();
        lb.register(loop_ref(0));
        lb.register(loop_ref(1));

        lb.calibrate(0, 1); // loop 0 has one held-open connection

        for p in 0..5u16 {
            let chosen = lb.next(&addr(p));
            lb.calibrate(chosen.index, 1);
        }

        // Expect loop 1 to have absorbed the first of the 5 (since loop 0
        // started at 1), then alternated: loop1,loop0,loop1,loop0,loop1 ->
        // loop0 ends at 1+2=3, loop1 ends at 3.
        let mut final_counts = [0usize; 2];
        lb.iterate(&mut |l| final_counts[l.index] = l.connection_count());
        assert_eq!(final_counts, [3, 3]);
    }

    #[test]
    fn source_addr_hash_is_pure() {
        let lb = SourceAddrHash::new();
        lb.register(loop_ref(0));
        lb.register(loop_ref(1));

        let a = addr(4000);
        let first = lb.next(&a).index;
        let second = lb.next(&a).index;
        assert_eq!(first, second);
    }
}
