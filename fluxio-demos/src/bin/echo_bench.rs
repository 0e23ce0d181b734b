//! Echo benchmark demo: hammers an echo server with `-c` concurrent clients for `-t`
//! seconds each, reporting how many messages were sent versus successfully echoed back.
//!
//! Ported from `original_source/example/echo_bench.cc`: `getopt`-style `-t seconds -c
//! clients -s addr -h` argument parsing, one client per worker pumping random 1-50 byte
//! strings for the whole run and counting sent vs. echoed messages, then aggregating
//! totals once every worker finishes. The original forks one child process per client
//! and aggregates through pipes; this port uses one OS thread per client and `Arc<Atomic
//! Usize>` counters instead, since Rust threads sharing one address space are the
//! idiomatic equivalent here and `fluxio_net::Client` is freely thread-compatible.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fluxio_net::{Client, Connection, ConnectionHandle};
use rand::Rng;

const DEFAULT_SECONDS: u64 = 10;
const DEFAULT_CLIENTS: usize = 1;
const DEFAULT_ADDR: &str = "127.0.0.1:12345";

struct Args {
    seconds: u64,
    clients: usize,
    addr: String,
}

fn parse_args() -> Option<Args> {
    let mut seconds = DEFAULT_SECONDS;
    let mut clients = DEFAULT_CLIENTS;
    let mut addr = DEFAULT_ADDR.to_string();

    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "-t" => seconds = iter.next()?.parse().ok()?,
            "-c" => clients = iter.next()?.parse().ok()?,
            "-s" => addr = iter.next()?,
            "-h" => return None,
            other => {
                eprintln!("unrecognized argument: {other}");
                return None;
            }
        }
    }
    Some(Args { seconds, clients, addr })
}

fn print_usage() {
    eprintln!("usage: echo_bench [-t seconds] [-c clients] [-s addr] [-h]");
    eprintln!("  -t  seconds each client runs for (default {DEFAULT_SECONDS})");
    eprintln!("  -c  number of concurrent clients (default {DEFAULT_CLIENTS})");
    eprintln!("  -s  server address to connect to (default {DEFAULT_ADDR})");
}

fn random_message() -> String {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(1..=50usize);
    (0..len).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect()
}

/// Runs one client for `duration`, sending a fresh random message every time the
/// previous one finishes writing, and counting every send and every echoed reply.
fn echo_test(addr: SocketAddrV4, duration: Duration, sent: Arc<AtomicUsize>, success: Arc<AtomicUsize>) {
    let client = match Client::connect_async(addr) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("connect failed: {err}");
            return;
        }
    };

    let send_next = {
        let sent = sent.clone();
        move |conn: &ConnectionHandle| {
            let message = random_message();
            Connection::send(conn, message.as_bytes());
            sent.fetch_add(1, Ordering::Relaxed);
        }
    };

    client.set_on_connect(Arc::new(send_next.clone()));
    client.set_on_write_complete(Arc::new(send_next));
    client.set_on_message(Arc::new(move |conn: &ConnectionHandle| {
        success.fetch_add(1, Ordering::Relaxed);
        conn.lock().expect("connection mutex poisoned").inbound_mut().clear();
    }));

    let event_loop = client.event_loop();
    let stopper = event_loop.clone();
    let _ = event_loop.schedule_timer(duration, None, move || stopper.stop());

    if let Err(err) = client.run() {
        eprintln!("client run failed: {err}");
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let Some(args) = parse_args() else {
        print_usage();
        std::process::exit(1);
    };
    let Ok(addr) = args.addr.parse::<SocketAddrV4>() else {
        eprintln!("malformed address: {}", args.addr);
        std::process::exit(1);
    };
    let duration = Duration::from_secs(args.seconds);

    let sent_total = Arc::new(AtomicUsize::new(0));
    let success_total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..args.clients)
        .map(|_| {
            let sent = sent_total.clone();
            let success = success_total.clone();
            std::thread::spawn(move || echo_test(addr, duration, sent, success))
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    println!("send message: {}", sent_total.load(Ordering::Relaxed));
    println!("success message: {}", success_total.load(Ordering::Relaxed));
}
