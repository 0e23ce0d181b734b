//! A single registered descriptor: its readiness interest and callbacks.
//!
//! Ported from `zest/net/fd_event.h` (`FdEvent::listen(events, callback)`), generalized
//! to three independent callbacks (readable / writable / error) instead of one callback
//! reused for whichever event fired, since this port separates them explicitly.

use mio::Interest;

pub(crate) type Callback = Box<dyn FnMut() + Send>;

/// Readiness callbacks bound to one descriptor, registered with exactly one
/// [`EventLoop`](crate::EventLoop).
///
/// `FdEvent` itself never performs I/O — it only carries the closures the reactor
/// invokes when the kernel reports a descriptor ready. The actual socket or file
/// descriptor (a `mio::net::TcpStream`, `mio::net::TcpListener`, or a raw fd wrapped in
/// `mio::unix::SourceFd`) is owned separately by whoever registers it and is what
/// actually gets passed to `mio::Registry::register`.
pub struct FdEvent {
    pub(crate) interest: Interest,
    pub(crate) on_readable: Option<Callback>,
    pub(crate) on_writable: Option<Callback>,
    pub(crate) on_error: Option<Callback>,
}

impl std::fmt::Debug for FdEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdEvent")
            .field("interest", &self.interest)
            .field("has_readable", &self.on_readable.is_some())
            .field("has_writable", &self.on_writable.is_some())
            .field("has_error", &self.on_error.is_some())
            .finish()
    }
}

impl FdEvent {
    #[must_use]
    pub fn new(interest: Interest) -> Self {
        Self { interest, on_readable: None, on_writable: None, on_error: None }
    }

    #[must_use]
    pub fn readable(interest: Interest) -> Self {
        Self::new(interest)
    }

    #[must_use]
    pub fn on_readable(mut self, cb: impl FnMut() + Send + 'static) -> Self {
        self.on_readable = Some(Box::new(cb));
        self
    }

    #[must_use]
    pub fn on_writable(mut self, cb: impl FnMut() + Send + 'static) -> Self {
        self.on_writable = Some(Box::new(cb));
        self
    }

    #[must_use]
    pub fn on_error(mut self, cb: impl FnMut() + Send + 'static) -> Self {
        self.on_error = Some(Box::new(cb));
        self
    }

    #[must_use]
    pub fn interest(&self) -> Interest {
        self.interest
    }
}
