//! Reactor core of the fluxio networking runtime: a single-threaded event loop built on
//! `mio`, a min-heap timer hub backed by one kernel `timerfd`, a named-key façade over
//! it, the fd-event readiness bookkeeping the loop dispatches against, and the sliding
//! window byte buffer connections use for inbound/outbound data.
//!
//! This crate has no notion of a TCP connection or server — that lives in `fluxio-net`,
//! which is built on top of the primitives exported here.

mod buffer;
mod error;
mod fd_event;
mod reactor;
mod timer;
mod timer_container;

pub use buffer::ByteBuffer;
pub use error::ReactorError;
pub use fd_event::FdEvent;
pub use reactor::EventLoop;
pub use timer::{Instant, TimerHandle, TimerHub};
pub use timer_container::TimerContainer;
