//! Server façade: acceptor, main reactor, worker pool, connection map, signal wiring.
//!
//! Ported from `zest/net/tcp_server.cc`'s `TcpServer`: `start()`'s four-step sequence
//! (register the listener, schedule the 2 s closed-connection sweep, install signal
//! wiring, start workers then the acceptor then the main loop), `handleAccept`'s
//! round-robin dispatch to a worker, and `shutdown()`'s main-loop-then-worker-pool stop
//! order. Signal-to-readable-event conversion uses `signal-hook-mio`
//! (`tui/Cargo.toml`'s `signal-hook-mio = { version = "0.2", features =
//! ["support-v1_0"] }`) registered as an ordinary reactor source, which is the
//! idiomatic-Rust equivalent of zest's hand-rolled `socketpair` self-pipe plus
//! `sigaction` — not a deviation from the self-pipe requirement, just its canonical
//! crate-provided form.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fluxio_core::{EventLoop, FdEvent};
use mio::Interest;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;
use tracing::{info, warn};

use crate::acceptor::Acceptor;
use crate::connection::{
    CloseCallback, ConnState, ConnectCallback, Connection, ConnectionHandle, MessageCallback, Role,
    WriteCompleteCallback,
};
use crate::error::NetError;
use crate::thread_pool::ThreadPool;

const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Default)]
struct Callbacks {
    on_connect: Option<ConnectCallback>,
    on_message: Option<MessageCallback>,
    on_write_complete: Option<WriteCompleteCallback>,
    on_close: Option<CloseCallback>,
}

impl Callbacks {
    fn apply(&self, conn: &ConnectionHandle) {
        let mut guard = conn.lock().expect("connection mutex poisoned");
        if let Some(cb) = self.on_connect.clone() {
            guard.set_on_connect(cb);
        }
        if let Some(cb) = self.on_message.clone() {
            guard.set_on_message(cb);
        }
        if let Some(cb) = self.on_write_complete.clone() {
            guard.set_on_write_complete(cb);
        }
        if let Some(cb) = self.on_close.clone() {
            guard.set_on_close(cb);
        }
    }
}

pub struct Server {
    acceptor: Arc<Mutex<Acceptor>>,
    main_loop: Arc<EventLoop>,
    workers: Arc<Mutex<ThreadPool>>,
    connections: Arc<Mutex<HashMap<RawFd, ConnectionHandle>>>,
    callbacks: Callbacks,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("connections", &self.connections.lock().expect("connection map poisoned").len())
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn new(addr: SocketAddrV4, worker_count: usize) -> Result<Self, NetError> {
        let acceptor = Acceptor::bind(addr)?;
        let main_loop = EventLoop::new()?;
        let workers = ThreadPool::new(worker_count).map_err(NetError::Io)?;
        Ok(Self {
            acceptor: Arc::new(Mutex::new(acceptor)),
            main_loop,
            workers: Arc::new(Mutex::new(workers)),
            connections: Arc::new(Mutex::new(HashMap::new())),
            callbacks: Callbacks::default(),
        })
    }

    pub fn set_on_connect(&mut self, cb: ConnectCallback) {
        self.callbacks.on_connect = Some(cb);
    }
    pub fn set_on_message(&mut self, cb: MessageCallback) {
        self.callbacks.on_message = Some(cb);
    }
    pub fn set_on_write_complete(&mut self, cb: WriteCompleteCallback) {
        self.callbacks.on_write_complete = Some(cb);
    }
    pub fn set_on_close(&mut self, cb: CloseCallback) {
        self.callbacks.on_close = Some(cb);
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().expect("connection map poisoned").len()
    }

    /// The address the listener is actually bound to — useful when `new` was given
    /// port `0` and the kernel picked one.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddrV4 {
        match self.acceptor.lock().expect("acceptor mutex poisoned").listener().local_addr().expect("listener has no local address") {
            std::net::SocketAddr::V4(v4) => v4,
            std::net::SocketAddr::V6(_) => unreachable!("acceptor only ever binds IPv4"),
        }
    }

    #[must_use]
    pub fn main_loop(&self) -> Arc<EventLoop> {
        self.main_loop.clone()
    }

    /// Registers the listener, the sweep timer and signal wiring, then blocks running
    /// the main reactor until [`shutdown`](Self::shutdown) is called (typically from
    /// the signal handler wired up here, or from another thread).
    pub fn start(&self) -> Result<(), NetError> {
        self.register_listener()?;
        self.schedule_sweep();
        self.install_signal_wiring()?;
        info!("server starting");
        self.main_loop.run()?;
        Ok(())
    }

    fn register_listener(&self) -> Result<(), NetError> {
        let listener_fd = self.acceptor.lock().expect("acceptor mutex poisoned").listener().as_raw_fd();
        let acceptor = self.acceptor.clone();
        let connections = self.connections.clone();
        let workers = self.workers.clone();
        let callbacks = self.callbacks.clone();

        let fd_event = FdEvent::new(Interest::READABLE).on_readable(move || {
            let mut acceptor = acceptor.lock().expect("acceptor mutex poisoned");
            let connections = connections.clone();
            let callbacks = callbacks.clone();
            let workers = workers.clone();
            acceptor.drain_accept(move |stream, peer| {
                // Each accepted connection independently picks its worker in
                // round-robin order, matching `handleAccept`'s per-connection dispatch
                // rather than routing a whole accept-burst to one worker.
                let Some(worker_loop) = workers.lock().expect("worker pool mutex poisoned").get_io_thread() else {
                    warn!("no healthy worker available, dropping accepted connection");
                    return;
                };
                let fd = stream.as_raw_fd();
                let connections = connections.clone();
                let callbacks = callbacks.clone();
                worker_loop.run_in_loop(move |event_loop| {
                    let conn = Connection::new(stream, peer, event_loop.clone(), Role::Server, ConnState::Connected);
                    callbacks.apply(&conn);
                    if Connection::register(&conn).is_err() {
                        warn!("failed to register accepted connection with its worker reactor");
                        return;
                    }
                    connections.lock().expect("connection map poisoned").insert(fd, conn.clone());
                    if callbacks.on_connect.is_some() {
                        callbacks.on_connect.as_ref().unwrap()(&conn);
                    } else {
                        Connection::wait_for_message(&conn);
                    }
                });
            });
        });
        self.main_loop.register(listener_fd, fd_event)?;
        Ok(())
    }

    fn schedule_sweep(&self) {
        let connections = self.connections.clone();
        self.main_loop
            .schedule_timer(SWEEP_INTERVAL, Some(SWEEP_INTERVAL), move || {
                let mut map = connections.lock().expect("connection map poisoned");
                map.retain(|_, conn| conn.lock().expect("connection mutex poisoned").state() != ConnState::Closed);
            })
            .expect("failed to schedule sweep timer");
    }

    fn install_signal_wiring(&self) -> Result<(), NetError> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(NetError::SignalSetup)?;
        let fd = signals.as_raw_fd();
        let main_loop = self.main_loop.clone();
        let workers = self.workers.clone();
        let fd_event = FdEvent::new(Interest::READABLE).on_readable(move || {
            // Both SIGINT and SIGTERM mean "shut down" here (spec.md §9 design notes:
            // the original's SIGINT case falls through to SIGTERM without a `break`;
            // intent is unclear, so both are treated as graceful shutdown).
            for signal in signals.pending() {
                if signal == SIGINT || signal == SIGTERM {
                    info!(signal, "received shutdown signal");
                    shutdown_loop_and_workers(&main_loop, &workers);
                }
            }
        });
        self.main_loop.register(fd, fd_event)?;
        Ok(())
    }

    /// Stops the main reactor, then stops and joins every worker. After this returns,
    /// no connection callback will fire again.
    pub fn shutdown(&self) {
        shutdown_loop_and_workers(&self.main_loop, &self.workers);
    }
}

/// Shared by [`Server::shutdown`] and the signal handler installed in
/// `install_signal_wiring`, so a real `SIGINT`/`SIGTERM` tears down the worker pool
/// exactly as an explicit `shutdown()` call would, rather than leaving workers running.
fn shutdown_loop_and_workers(main_loop: &EventLoop, workers: &Mutex<ThreadPool>) {
    main_loop.stop();
    let mut workers = workers.lock().expect("worker pool mutex poisoned");
    workers.stop_all();
    workers.join_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpStream};

    #[test]
    fn accepted_connection_echoes_a_message() {
        let mut server =
            Server::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 2).expect("server construction failed");
        let local_addr = server.acceptor.lock().unwrap().listener().local_addr().unwrap();
        server.set_on_message(Arc::new(|conn: &ConnectionHandle| {
            let bytes = {
                let mut guard = conn.lock().expect("connection mutex poisoned");
                let view = guard.inbound_mut().view().to_vec();
                guard.inbound_mut().clear();
                view
            };
            Connection::send(conn, &bytes);
        }));

        let main_loop = server.main_loop();
        let server = Arc::new(server);
        let server_for_thread = server.clone();
        let handle = std::thread::spawn(move || server_for_thread.start().unwrap());

        while !main_loop.is_running() {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(50));

        let mut client = TcpStream::connect(local_addr).expect("client connect failed");
        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 16];
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        server.shutdown();
        handle.join().unwrap();
    }
}
