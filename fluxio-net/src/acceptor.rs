//! Non-blocking TCP listener.
//!
//! Ported from `zest/net/tcp_acceptor.cc`: a non-blocking `socket`/`setsockopt(SO_REUSEADDR)`/
//! `bind`/`listen(backlog=1000)` sequence, then `accept()` draining in a loop until
//! `EAGAIN`. `mio::net::TcpListener::bind` doesn't give a chance to set `SO_REUSEADDR`
//! between `bind` and `listen`, so the raw sequence is built with `libc` (already pulled
//! in transitively by `mio`'s Linux backend, same rationale as the timer hub's
//! `timerfd`) and handed to `mio` via `TcpListener::from_std`.

use std::net::SocketAddrV4;
use std::os::fd::FromRawFd;

use mio::net::TcpListener;

use crate::error::NetError;
use crate::inet_addr::InetAddr;

const BACKLOG: i32 = 1000;

/// A non-blocking listening socket, not yet registered with any reactor.
pub struct Acceptor {
    listener: TcpListener,
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor").field("local_addr", &self.listener.local_addr().ok()).finish()
    }
}

impl Acceptor {
    pub fn bind(addr: SocketAddrV4) -> Result<Self, NetError> {
        let listener = bind_reuseaddr(addr)
            .map_err(|source| NetError::ListenerBind { addr: addr.to_string(), source })?;
        Ok(Self { listener })
    }

    #[must_use]
    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    #[must_use]
    pub fn listener_mut(&mut self) -> &mut TcpListener {
        &mut self.listener
    }

    /// Drains pending connections until the kernel reports `EAGAIN`, invoking
    /// `on_accept` for each. Peers that fail [`InetAddr::check`] are closed
    /// (dropped) and skipped without invoking the callback.
    pub fn drain_accept(&mut self, mut on_accept: impl FnMut(mio::net::TcpStream, InetAddr)) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let addr = match peer {
                        std::net::SocketAddr::V4(v4) => InetAddr::from(v4),
                        std::net::SocketAddr::V6(_) => {
                            tracing::warn!("rejecting unexpected IPv6 peer on an IPv4 listener");
                            continue;
                        }
                    };
                    if !addr.check() {
                        tracing::warn!(%addr, "rejecting peer that fails address sanity check");
                        continue;
                    }
                    on_accept(stream, addr);
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(?err, "accept() failed");
                    break;
                }
            }
        }
    }
}

fn bind_reuseaddr(addr: SocketAddrV4) -> std::io::Result<TcpListener> {
    // SAFETY: a standard non-blocking IPv4 stream socket setup sequence; every syscall's
    // return value is checked before proceeding to the next step.
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let reuse: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            std::ptr::from_ref(&reuse).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) < 0
        {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }

        let sockaddr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: addr.port().to_be(),
            sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(addr.ip().octets()) },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            std::ptr::from_ref(&sockaddr).cast(),
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) < 0
        {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }

        if libc::listen(fd, BACKLOG) < 0 {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }

        let std_listener = std::net::TcpListener::from_raw_fd(fd);
        TcpListener::from_std(std_listener)
    }
}
