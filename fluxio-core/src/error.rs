//! Error types for the reactor core.

use thiserror::Error;

/// Errors that can arise while constructing or driving an [`EventLoop`](crate::EventLoop).
///
/// Per the reactor's error-handling contract, none of these are surfaced across a
/// thread boundary as an exception — callers either propagate them up through
/// construction (a `?` on `EventLoop::new`) or the condition is process-fatal by
/// design (see [`EventLoop::assert_in_loop_thread`](crate::EventLoop::assert_in_loop_thread),
/// which aborts rather than returning an error).
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to create mio::Poll")]
    PollCreate(#[source] std::io::Error),

    #[error("failed to create cross-thread waker")]
    WakerCreate(#[source] std::io::Error),

    #[error("failed to create monotonic timerfd")]
    TimerFdCreate(#[source] std::io::Error),

    #[error("failed to arm timerfd")]
    TimerFdArm(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
