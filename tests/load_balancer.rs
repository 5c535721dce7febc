//! Load-balancer policy tests against the public surface (spec §8 scenario
//! 2: round-robin fan-out; scenario 3: least-connections rebalancing).
//! `next`/`calibrate` are exercised directly, without a socket layer, since
//! spec §4.4 only requires `next` to run on the main-reactor thread — not
//! that it requires one.

use std::net::SocketAddr;

use evreactor::balancer::LoopRef;
use evreactor::poller::Poller;
use evreactor::{LeastConnections, LoadBalancer, RoundRobin};

fn loop_ref(index: usize) -> LoopRef {
    let poller = Poller::open().unwrap();
    LoopRef::new(index, poller.trigger_handle())
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// Scenario 2: `NumEventLoop=3`, `RoundRobin`. Opening 9 connections in
/// sequence assigns exactly 3 to each loop.
#[test]
fn round_robin_spreads_nine_connections_across_three_loops() {
    let lb = RoundRobin::new();
    for i in 0..3 {
        lb.register(loop_ref(i));
    }

    let mut counts = [0usize; 3];
    for port in 0..9u16 {
        let chosen = lb.next(&addr(port));
        counts[chosen.index] += 1;
        lb.calibrate(chosen.index, 1);
    }

    assert_eq!(counts, [3, 3, 3]);

    let mut calibrated = [0usize; 3];
    lb.iterate(&mut |l| calibrated[l.index] = l.connection_count());
    // RoundRobin tracks no per-loop counter; calibrate is a no-op, so these
    // stay at whatever `loop_ref` initialized them to (zero).
    assert_eq!(calibrated, [0, 0, 0]);
}

/// Scenario 3: `NumEventLoop=2`, `LeastConnections`. One connection is
/// opened and held on loop 0 first; the next 5 should start on loop 1 (the
/// idle one) and alternate from there, ending 3-3.
#[test]
fn least_connections_rebalances_after_a_held_open_connection() {
    let lb = LeastConnections::new();
    lb.register(loop_ref(0));
    lb.register(loop_ref(1));

    // Loop 0 holds one connection open before the next 5 land.
    lb.calibrate(0, 1);

    let mut choices = Vec::new();
    for port in 0..5u16 {
        let chosen = lb.next(&addr(port));
        lb.calibrate(chosen.index, 1);
        choices.push(chosen.index);
    }

    // loop1 (0 open) beats loop0 (1 open) for the first pick, then they
    // alternate as counts equalize: 1,0,1,0,1.
    assert_eq!(choices, vec![1, 0, 1, 0, 1]);

    let mut final_counts = [0usize; 2];
    lb.iterate(&mut |l| final_counts[l.index] = l.connection_count());
    assert_eq!(final_counts, [3, 3]);
}

/// P7: for every variant, the sum of calibration counters equals the
/// number of open connections at every quiescent point — including after
/// opens are interleaved with closes.
#[test]
fn calibration_counters_track_opens_and_closes() {
    let lb = LeastConnections::new();
    lb.register(loop_ref(0));
    lb.register(loop_ref(1));

    for port in 0..6u16 {
        let chosen = lb.next(&addr(port));
        lb.calibrate(chosen.index, 1);
    }

    let mut total: usize = 0;
    lb.iterate(&mut |l| total += l.connection_count());
    assert_eq!(total, 6);

    lb.calibrate(0, -1);
    lb.calibrate(1, -1);

    total = 0;
    lb.iterate(&mut |l| total += l.connection_count());
    assert_eq!(total, 4);
}
