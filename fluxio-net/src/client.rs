//! Client façade: one reactor, one connection, async-callback and synchronous usage.
//!
//! Ported from the most complete of `original_source/zest/net`'s several `tcp_client.cc`
//! revisions: a non-blocking `connect()`, `EINPROGRESS` handled by arming writable
//! interest and re-checking via `getsockopt(SO_ERROR)`, a 3 s `connect_timeout` timer
//! that fails the client if still `NotConnected` when it fires, and both usage modes
//! sharing one `Connection` whose state is the single source of truth.
//!
//! The synchronous usage mode is built on [`fluxio_core::EventLoop::run`] being
//! re-entrant across sequential calls from the same thread: each blocking call installs
//! a short recurring poll timer that stops the reactor once its condition holds, runs
//! the reactor on the calling thread, then cancels the timer. This keeps the blocking
//! and callback-driven modes sharing the exact same reactor and `Connection` rather than
//! needing a second, throwaway driver thread.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use fluxio_core::EventLoop;
use mio::net::TcpStream;

use crate::connection::{
    CloseCallback, ConnState, ConnectCallback, Connection, ConnectionHandle, MessageCallback, Role,
    WriteCompleteCallback,
};
use crate::error::NetError;
use crate::inet_addr::InetAddr;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A single-connection client sharing its reactor and [`Connection`] between the
/// asynchronous and synchronous usage modes.
pub struct Client {
    event_loop: Arc<EventLoop>,
    conn: ConnectionHandle,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("state", &self.conn.lock().expect("connection mutex poisoned").state()).finish()
    }
}

impl Client {
    /// Issues a non-blocking `connect()` to `addr` and wires up the `EINPROGRESS`
    /// completion handler plus the connect-timeout timer. Does not block; the
    /// returned `Client`'s reactor is not yet running.
    pub fn connect_async(addr: SocketAddrV4) -> Result<Self, NetError> {
        let event_loop = EventLoop::new()?;
        let stream = TcpStream::connect(std::net::SocketAddr::V4(addr))
            .map_err(|source| NetError::ListenerBind { addr: addr.to_string(), source })?;
        let conn = Connection::new(stream, InetAddr::from(addr), event_loop.clone(), Role::Client, ConnState::NotConnected);

        let client = Self { event_loop, conn };
        client.wire_connect_completion();
        client.arm_connect_timeout();
        Ok(client)
    }

    fn wire_connect_completion(&self) {
        let conn = self.conn.clone();
        self.event_loop.run_in_loop(move |event_loop| {
            let fd = conn.lock().expect("connection mutex poisoned").fd();
            let weak = Arc::downgrade(&conn);
            let handler = fluxio_core::FdEvent::new(mio::Interest::WRITABLE).on_writable(move || {
                if let Some(conn) = weak.upgrade() {
                    Client::finish_connect(&conn);
                }
            });
            let _ = event_loop.register(fd, handler);
        });
    }

    fn finish_connect(conn: &ConnectionHandle) {
        if conn.lock().expect("connection mutex poisoned").state() != ConnState::NotConnected {
            return;
        }
        let fd = conn.lock().expect("connection mutex poisoned").fd();
        let success = getsockopt_so_error(fd) == 0;
        Connection::complete_connect(conn, success);
    }

    fn arm_connect_timeout(&self) {
        let conn = self.conn.clone();
        self.conn
            .lock()
            .expect("connection mutex poisoned")
            .timers()
            .add_timer("connect_timeout".to_string(), CONNECT_TIMEOUT, None, move || {
                Connection::complete_connect(&conn, false);
            })
            .expect("failed to schedule connect_timeout timer");
    }

    #[must_use]
    pub fn connection(&self) -> ConnectionHandle {
        self.conn.clone()
    }

    #[must_use]
    pub fn event_loop(&self) -> Arc<EventLoop> {
        self.event_loop.clone()
    }

    pub fn set_on_connect(&self, cb: ConnectCallback) {
        self.conn.lock().expect("connection mutex poisoned").set_on_connect(cb);
    }
    pub fn set_on_message(&self, cb: MessageCallback) {
        self.conn.lock().expect("connection mutex poisoned").set_on_message(cb);
    }
    pub fn set_on_write_complete(&self, cb: WriteCompleteCallback) {
        self.conn.lock().expect("connection mutex poisoned").set_on_write_complete(cb);
    }
    pub fn set_on_close(&self, cb: CloseCallback) {
        self.conn.lock().expect("connection mutex poisoned").set_on_close(cb);
    }

    /// Runs the reactor until [`stop`](Self::stop) is called. Used by the async usage
    /// mode after `connect_async` has wired everything up.
    pub fn run(&self) -> Result<(), NetError> {
        self.event_loop.run()?;
        Ok(())
    }

    /// Thread-safe: stops the reactor from any thread via `run_in_loop`.
    pub fn stop(&self) {
        self.event_loop.stop();
    }

    /// Synchronous connect: blocks running the reactor until the connection leaves
    /// `NotConnected`, then reports success or failure via `getsockopt(SO_ERROR)`.
    pub fn connect_blocking(addr: SocketAddrV4) -> Result<Self, NetError> {
        let client = Self::connect_async(addr)?;
        client.run_until(|conn| conn.lock().expect("connection mutex poisoned").state() != ConnState::NotConnected);
        Ok(client)
    }

    /// Swaps `bytes` into the outbound buffer and runs the reactor until the write
    /// pump has drained it (or a fatal error stops the reactor first).
    pub fn send_blocking(&self, bytes: &[u8]) {
        let conn = self.conn.clone();
        let owned = bytes.to_vec();
        self.event_loop.run_in_loop(move |_| {
            Connection::send(&conn, &owned);
        });
        self.run_until(|conn| conn.lock().expect("connection mutex poisoned").outbound_is_empty());
    }

    /// Runs the reactor until the inbound buffer has something in it, then drains and
    /// returns it.
    pub fn recv_blocking(&self) -> Vec<u8> {
        self.run_until(|conn| !conn.lock().expect("connection mutex poisoned").inbound_is_empty());
        let mut guard = self.conn.lock().expect("connection mutex poisoned");
        let bytes = guard.inbound_mut().view().to_vec();
        guard.inbound_mut().clear();
        bytes
    }

    /// Drives the reactor on the calling thread until `condition` holds. A short
    /// recurring timer polls `condition` and stops the reactor once it's satisfied;
    /// any other reason the reactor stops (a fatal I/O error, an explicit external
    /// `stop()`) also returns control here, leaving `condition` to the caller to
    /// re-check if it matters.
    fn run_until(&self, condition: impl Fn(&ConnectionHandle) -> bool + Send + 'static) {
        let poll_conn = self.conn.clone();
        let event_loop = self.event_loop.clone();
        let stopper = event_loop.clone();
        let handle = event_loop
            .schedule_timer(POLL_INTERVAL, Some(POLL_INTERVAL), move || {
                if condition(&poll_conn) {
                    stopper.stop();
                }
            })
            .expect("failed to schedule blocking-wait poll timer");
        self.event_loop.run().expect("event loop run failed");
        handle.cancel();
    }
}

/// `getsockopt(SOL_SOCKET, SO_ERROR)` — distinguishes a completed non-blocking
/// connect's success (`0`) from its failure (the `errno` that would have been
/// returned by a blocking `connect`).
fn getsockopt_so_error(fd: std::os::fd::RawFd) -> i32 {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `fd` is a valid, live socket fd; `err`/`len` are valid out-pointers sized
    // for the buffer getsockopt will write into.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            std::ptr::from_mut(&mut err).cast(),
            &mut len,
        )
    };
    if rc < 0 {
        return -1;
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn echo_server(listener: TcpListener) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept failed");
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).expect("read failed");
            stream.write_all(&buf[..n]).expect("write failed");
        })
    }

    #[test]
    fn connect_blocking_then_send_and_recv_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
        let addr = match listener.local_addr().expect("local_addr failed") {
            std::net::SocketAddr::V4(v4) => v4,
            std::net::SocketAddr::V6(_) => unreachable!("bound an IPv4 listener"),
        };
        let server = echo_server(listener);

        let client = Client::connect_blocking(addr).expect("connect_blocking failed");
        assert_eq!(client.conn.lock().unwrap().state(), ConnState::Connected);

        client.send_blocking(b"ping");
        let reply = client.recv_blocking();
        assert_eq!(reply, b"ping");

        server.join().unwrap();
    }

    #[test]
    fn connect_blocking_to_a_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
        let addr = match listener.local_addr().expect("local_addr failed") {
            std::net::SocketAddr::V4(v4) => v4,
            std::net::SocketAddr::V6(_) => unreachable!("bound an IPv4 listener"),
        };
        drop(listener);

        let client = Client::connect_blocking(addr).expect("connect_blocking failed");
        assert_eq!(client.conn.lock().unwrap().state(), ConnState::Failed);
    }
}
