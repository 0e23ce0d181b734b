//! Echo client demo: connects once, then repeatedly sends a counting message and prints
//! whatever comes back.
//!
//! Ported from `original_source/example/echo_client.cc`: connect to `127.0.0.1:12345`,
//! loop forever sending `"hello, count = {i}"`, print the echoed reply, sleep a second,
//! increment `i`. Uses [`fluxio_net::Client`]'s synchronous facade (`connect_blocking`/
//! `send_blocking`/`recv_blocking`) rather than the original's own blocking send/recv,
//! since both are built on the very same reactor underneath.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use fluxio_net::Client;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 12345);
    let client = Client::connect_blocking(addr)?;
    info!(%addr, "connected");

    let mut count = 0u64;
    loop {
        let message = format!("hello, count = {count}");
        client.send_blocking(message.as_bytes());
        let reply = client.recv_blocking();
        println!("{}", String::from_utf8_lossy(&reply));
        std::thread::sleep(Duration::from_secs(1));
        count += 1;
    }
}
