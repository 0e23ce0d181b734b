//! Connection state machine, read/write pumps, per-connection timers and user context.
//!
//! Ported from `zest/net/tcp_connection.h`/`.cc`'s `TcpConnection`: the five-state
//! machine, the edge-triggered drain-until-`EAGAIN` read pump, the swap-into-outbound
//! `send`, and the "unregister before close" ordering (the kernel may reuse a just-closed
//! fd immediately, which would alias a still-present connection-map entry otherwise).
//!
//! Unlike the original's raw `TcpConnection::s_ptr` (`shared_ptr<TcpConnection>`), the
//! four callback members here are `Arc<dyn Fn(&ConnectionHandle) + Send + Sync>` rather
//! than mutable closures: callbacks are invoked after releasing the connection's own
//! lock (to let a callback itself call back into the connection, e.g. `send` from an
//! `on_message` handler, without self-deadlocking), which requires `Fn`, not `FnMut`.

use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use fluxio_core::{ByteBuffer, EventLoop, FdEvent, TimerContainer};
use mio::Interest;
use mio::net::TcpStream;

use crate::context::Context;
use crate::error::NetError;
use crate::inet_addr::InetAddr;

const READ_CHUNK: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    NotConnected,
    Connected,
    HalfClosing,
    Closed,
    Failed,
}

/// Which side of the connection this is — governs what a fatal mid-stream I/O error
/// does beyond the shared `shutdown(WR)` + `HalfClosing` transition: a client additionally
/// stops its own reactor, since a single-connection client has no other purpose left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

pub type ConnectCallback = Arc<dyn Fn(&ConnectionHandle) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&ConnectionHandle) + Send + Sync>;
pub type WriteCompleteCallback = Arc<dyn Fn(&ConnectionHandle) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&ConnectionHandle) + Send + Sync>;

/// Shared ownership handle; held by the server's connection map, by the client facade,
/// and weakly by the fd-event and timer callbacks registered for this connection.
pub type ConnectionHandle = Arc<Mutex<Connection>>;

pub struct Connection {
    fd: RawFd,
    stream: Option<TcpStream>,
    event_loop: Arc<EventLoop>,
    peer: InetAddr,
    inbound: ByteBuffer,
    outbound: ByteBuffer,
    state: ConnState,
    role: Role,
    write_interest_armed: bool,
    context: Context,
    timers: TimerContainer<String>,
    on_connect: Option<ConnectCallback>,
    on_message: Option<MessageCallback>,
    on_write_complete: Option<WriteCompleteCallback>,
    on_close: Option<CloseCallback>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.fd)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wraps an already-connected (or connecting) stream. `state` should be
    /// `Connected` for an accepted server-side connection, `NotConnected` for a
    /// client that has just issued a non-blocking `connect`.
    #[must_use]
    pub fn new(
        stream: TcpStream,
        peer: InetAddr,
        event_loop: Arc<EventLoop>,
        role: Role,
        state: ConnState,
    ) -> ConnectionHandle {
        let fd = stream.as_raw_fd();
        let timers = TimerContainer::new(event_loop.clone());
        Arc::new(Mutex::new(Self {
            fd,
            stream: Some(stream),
            event_loop,
            peer,
            inbound: ByteBuffer::new(),
            outbound: ByteBuffer::new(),
            state,
            role,
            write_interest_armed: false,
            context: Context::new(),
            timers,
            on_connect: None,
            on_message: None,
            on_write_complete: None,
            on_close: None,
        }))
    }

    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[must_use]
    pub fn peer(&self) -> InetAddr {
        self.peer
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn context(&mut self) -> &mut Context {
        &mut self.context
    }

    /// The inbound buffer, for an `on_message` callback to read and consume whatever
    /// triggered it.
    pub fn inbound_mut(&mut self) -> &mut ByteBuffer {
        &mut self.inbound
    }

    #[must_use]
    pub fn timers(&self) -> &TimerContainer<String> {
        &self.timers
    }

    /// Whether the outbound buffer has fully drained (nothing left for the write pump
    /// to send). Used by the synchronous client facade to detect a completed `send`.
    #[must_use]
    pub fn outbound_is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    /// Whether the inbound buffer is empty. Used by the synchronous client facade to
    /// detect an arrived message.
    #[must_use]
    pub fn inbound_is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    pub fn set_on_connect(&mut self, cb: ConnectCallback) {
        self.on_connect = Some(cb);
    }
    pub fn set_on_message(&mut self, cb: MessageCallback) {
        self.on_message = Some(cb);
    }
    pub fn set_on_write_complete(&mut self, cb: WriteCompleteCallback) {
        self.on_write_complete = Some(cb);
    }
    pub fn set_on_close(&mut self, cb: CloseCallback) {
        self.on_close = Some(cb);
    }

    /// Registers this connection's socket with its owning reactor, arming readable
    /// interest so `wait_for_message`'s default policy takes effect immediately.
    /// Must be called on the owning reactor's thread.
    pub fn register(handle: &ConnectionHandle) -> Result<(), NetError> {
        let (fd, event_loop) = {
            let conn = handle.lock().expect("connection mutex poisoned");
            conn.event_loop.assert_in_loop_thread();
            (conn.fd, conn.event_loop.clone())
        };
        let weak_read = Arc::downgrade(handle);
        let weak_write = Arc::downgrade(handle);
        let fd_event = FdEvent::new(Interest::READABLE)
            .on_readable(move || {
                if let Some(handle) = weak_read.upgrade() {
                    Connection::handle_read(&handle);
                }
            })
            .on_writable(move || {
                if let Some(handle) = weak_write.upgrade() {
                    Connection::handle_write(&handle);
                }
            });
        event_loop.register(fd, fd_event)?;
        Ok(())
    }

    /// Arms readable interest. A no-op beyond the initial [`register`](Self::register)
    /// call unless interest was previously narrowed, which this implementation never
    /// does — kept as an explicit operation to match spec.md's public surface.
    pub fn wait_for_message(handle: &ConnectionHandle) {
        let conn = handle.lock().expect("connection mutex poisoned");
        conn.event_loop.assert_in_loop_thread();
        if !matches!(conn.state, ConnState::Connected | ConnState::HalfClosing) {
            return;
        }
        let interest =
            if conn.write_interest_armed { Interest::READABLE | Interest::WRITABLE } else { Interest::READABLE };
        let _ = conn.event_loop.reregister(conn.fd, interest);
    }

    /// Swaps `bytes` into the outbound buffer and arms writable interest; the pump
    /// runs on the reactor's next iteration. No-op unless `Connected`.
    pub fn send(handle: &ConnectionHandle, bytes: &[u8]) {
        let mut conn = handle.lock().expect("connection mutex poisoned");
        conn.event_loop.assert_in_loop_thread();
        if conn.state != ConnState::Connected {
            return;
        }
        if conn.outbound.is_empty() {
            // Nothing pending: swap the caller's bytes straight in rather than copy.
            let mut staging = ByteBuffer::new();
            staging.append(bytes);
            conn.outbound.swap(&mut staging);
        } else {
            conn.outbound.append(bytes);
        }
        conn.write_interest_armed = true;
        let _ = conn.event_loop.reregister(conn.fd, Interest::READABLE | Interest::WRITABLE);
    }

    /// `shutdown(WR)`, transition to `HalfClosing`. Reading continues until the peer's
    /// FIN arrives.
    pub fn shutdown(handle: &ConnectionHandle) {
        let mut conn = handle.lock().expect("connection mutex poisoned");
        conn.event_loop.assert_in_loop_thread();
        if conn.state != ConnState::Connected {
            return;
        }
        if let Some(stream) = conn.stream.as_ref() {
            let _ = stream.shutdown(Shutdown::Write);
        }
        conn.state = ConnState::HalfClosing;
    }

    /// Tears the connection down: cancels all named timers, transitions to `Closed`,
    /// invokes the close callback, unregisters the fd, then drops the socket last —
    /// the kernel may reuse that fd the instant it's closed, which would alias a
    /// connection-map entry that hadn't yet been removed.
    pub fn close(handle: &ConnectionHandle) {
        let (event_loop, fd, close_cb, already_closed) = {
            let mut conn = handle.lock().expect("connection mutex poisoned");
            conn.event_loop.assert_in_loop_thread();
            if !matches!(conn.state, ConnState::Connected | ConnState::HalfClosing) {
                (conn.event_loop.clone(), conn.fd, None, true)
            } else {
                conn.timers.clear();
                conn.state = ConnState::Closed;
                let cb = conn.on_close.clone();
                (conn.event_loop.clone(), conn.fd, cb, false)
            }
        };
        if already_closed {
            return;
        }
        if let Some(cb) = close_cb.as_ref() {
            cb(handle);
        }
        event_loop.deregister(fd);
        // Dropping the stream closes the fd; do this only after deregistration.
        handle.lock().expect("connection mutex poisoned").stream = None;
    }

    /// Read pump: drains the socket into the inbound buffer until `EAGAIN`.
    pub fn handle_read(handle: &ConnectionHandle) {
        let (message_cb, peer_closed, fatal) = {
            let mut conn = handle.lock().expect("connection mutex poisoned");
            conn.event_loop.assert_in_loop_thread();
            if !matches!(conn.state, ConnState::Connected | ConnState::HalfClosing) {
                return;
            }
            let mut buf = [0u8; READ_CHUNK];
            let mut peer_closed = false;
            let mut fatal = None;
            loop {
                let Some(stream) = conn.stream.as_mut() else { break };
                match stream.read(&mut buf) {
                    Ok(0) => {
                        peer_closed = true;
                        break;
                    }
                    Ok(n) => conn.inbound.append(&buf[..n]),
                    Err(ref err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        fatal = Some(err);
                        break;
                    }
                }
            }
            let message_cb = if !peer_closed && fatal.is_none() && !conn.inbound.is_empty() {
                conn.on_message.clone()
            } else {
                None
            };
            (message_cb, peer_closed, fatal)
        };

        if let Some(err) = fatal {
            Connection::fatal_error(handle, err);
            return;
        }
        if peer_closed {
            Connection::close(handle);
            return;
        }
        if let Some(cb) = message_cb {
            cb(handle);
        }
    }

    /// Write pump: sends from the front of the outbound buffer until it's empty or
    /// the socket reports `EAGAIN`.
    pub fn handle_write(handle: &ConnectionHandle) {
        let (write_complete_cb, fatal) = {
            let mut conn = handle.lock().expect("connection mutex poisoned");
            conn.event_loop.assert_in_loop_thread();
            if !matches!(conn.state, ConnState::Connected | ConnState::HalfClosing) {
                return;
            }
            let mut fatal = None;
            loop {
                if conn.outbound.is_empty() {
                    break;
                }
                let view_len = conn.outbound.view().len();
                let Some(stream) = conn.stream.as_mut() else { break };
                let mut tmp = vec![0u8; view_len];
                tmp.copy_from_slice(conn.outbound.view());
                match stream.write(&tmp) {
                    Ok(0) => break,
                    Ok(n) => conn.outbound.consume_front(n),
                    Err(ref err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        fatal = Some(err);
                        break;
                    }
                }
            }
            let drained = conn.outbound.is_empty();
            let cb = if drained && fatal.is_none() {
                conn.write_interest_armed = false;
                let interest = Interest::READABLE;
                let _ = conn.event_loop.reregister(conn.fd, interest);
                conn.on_write_complete.clone()
            } else {
                None
            };
            (cb, fatal)
        };

        if let Some(err) = fatal {
            Connection::fatal_error(handle, err);
            return;
        }
        if let Some(cb) = write_complete_cb {
            cb(handle);
        }
    }

    /// Shared fatal-I/O-error path: `shutdown(WR)` and transition to `HalfClosing`,
    /// awaiting the peer's own close. A client additionally stops its reactor, since
    /// there is no further work for a single-connection client once its connection
    /// has failed.
    fn fatal_error(handle: &ConnectionHandle, err: std::io::Error) {
        let (event_loop, role) = {
            let mut conn = handle.lock().expect("connection mutex poisoned");
            tracing::warn!(fd = conn.fd, %err, "fatal I/O error on connection");
            if conn.state == ConnState::Connected {
                if let Some(stream) = conn.stream.as_ref() {
                    let _ = stream.shutdown(Shutdown::Write);
                }
                conn.state = ConnState::HalfClosing;
            }
            (conn.event_loop.clone(), conn.role)
        };
        if role == Role::Client {
            event_loop.stop();
        }
    }

    /// Marks a client connection's non-blocking connect attempt as complete.
    /// Transitions `NotConnected` → `Connected` (invoking `on_connect`) or
    /// `NotConnected` → `Failed`, depending on `success`.
    pub fn complete_connect(handle: &ConnectionHandle, success: bool) {
        let connect_cb = {
            let mut conn = handle.lock().expect("connection mutex poisoned");
            conn.event_loop.assert_in_loop_thread();
            if conn.state != ConnState::NotConnected {
                return;
            }
            if success {
                conn.state = ConnState::Connected;
                conn.on_connect.clone()
            } else {
                conn.state = ConnState::Failed;
                None
            }
        };
        if let Some(cb) = connect_cb {
            cb(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn loopback_pair() -> (mio::net::TcpStream, mio::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        client.set_nonblocking(true).unwrap();
        (mio::net::TcpStream::from_std(server), mio::net::TcpStream::from_std(client))
    }

    fn spawn_running_loop() -> Arc<EventLoop> {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.clone();
        std::thread::spawn(move || handle.run().unwrap());
        while !event_loop.is_running() {
            std::thread::yield_now();
        }
        event_loop
    }

    #[test]
    fn send_then_handle_write_drains_and_fires_write_complete() {
        let event_loop = spawn_running_loop();
        let (server_stream, mut client_stream) = loopback_pair();
        let peer = InetAddr::new(Ipv4Addr::LOCALHOST, 0);
        let done = Arc::new(AtomicUsize::new(0));
        let done_cb = done.clone();

        let conn = Connection::new(server_stream, peer, event_loop.clone(), Role::Server, ConnState::Connected);
        conn.lock().unwrap().set_on_write_complete(Arc::new(move |_| {
            done_cb.fetch_add(1, Ordering::SeqCst);
        }));

        let conn_for_loop = conn.clone();
        event_loop.run_in_loop(move |_| {
            Connection::register(&conn_for_loop).unwrap();
            Connection::send(&conn_for_loop, b"hello");
        });

        std::thread::sleep(std::time::Duration::from_millis(100));
        let mut buf = [0u8; 16];
        let n = client_stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        std::thread::sleep(std::time::Duration::from_millis(50));
        event_loop.stop();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_length_read_closes_connection_and_fires_on_close() {
        let event_loop = spawn_running_loop();
        let (server_stream, client_stream) = loopback_pair();
        let peer = InetAddr::new(Ipv4Addr::LOCALHOST, 0);
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_cb = closed.clone();

        let conn = Connection::new(server_stream, peer, event_loop.clone(), Role::Server, ConnState::Connected);
        conn.lock().unwrap().set_on_close(Arc::new(move |_| {
            closed_cb.fetch_add(1, Ordering::SeqCst);
        }));

        event_loop.run_in_loop(move |_| {
            Connection::register(&conn).unwrap();
        });

        drop(client_stream);
        std::thread::sleep(std::time::Duration::from_millis(150));
        event_loop.stop();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
