//! I/O thread pool: one reactor per worker thread, round-robin dispatch.
//!
//! Ported from `zest/net/{io_thread.cc,thread_pool.cc}`: each `IoThread` owns and runs
//! one `EventLoop` on its own OS thread; `ThreadPool::get_io_thread` hands back the next
//! worker in round-robin order, skipping one whose loop has already stopped running.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fluxio_core::EventLoop;

/// One worker thread owning exactly one [`EventLoop`].
pub struct IoThread {
    event_loop: Arc<EventLoop>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for IoThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoThread").field("running", &self.event_loop.is_running()).finish()
    }
}

impl IoThread {
    fn spawn(index: usize) -> std::io::Result<Self> {
        let event_loop = EventLoop::new().map_err(std::io::Error::other)?;
        let loop_for_thread = event_loop.clone();
        let join_handle = std::thread::Builder::new()
            .name(format!("fluxio-io-{index}"))
            .spawn(move || {
                if let Err(err) = loop_for_thread.run() {
                    tracing::error!(?err, "io thread's event loop exited with an error");
                }
            })?;
        Ok(Self { event_loop, join_handle: Some(join_handle) })
    }

    #[must_use]
    pub fn event_loop(&self) -> Arc<EventLoop> {
        self.event_loop.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.event_loop.is_running()
    }

    pub fn stop(&self) {
        self.event_loop.stop();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

/// A fixed pool of [`IoThread`]s, dispatched round-robin and skipping any worker whose
/// loop has already exited.
pub struct ThreadPool {
    workers: Vec<IoThread>,
    next: AtomicUsize,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool").field("workers", &self.workers.len()).finish()
    }
}

impl ThreadPool {
    pub fn new(size: usize) -> std::io::Result<Self> {
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            workers.push(IoThread::spawn(i)?);
        }
        Ok(Self { workers, next: AtomicUsize::new(0) })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns the next worker's reactor in round-robin order, skipping any worker
    /// whose loop has already stopped running. Returns `None` only if every worker is
    /// unhealthy.
    pub fn get_io_thread(&self) -> Option<Arc<EventLoop>> {
        let len = self.workers.len();
        if len == 0 {
            return None;
        }
        for _ in 0..len {
            let idx = self.next.fetch_add(1, Ordering::Relaxed) % len;
            let worker = &self.workers[idx];
            if worker.is_running() {
                return Some(worker.event_loop());
            }
        }
        None
    }

    pub fn stop_all(&self) {
        for worker in &self.workers {
            worker.stop();
        }
    }

    pub fn join_all(&mut self) {
        for worker in &mut self.workers {
            worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadPool;

    #[test]
    fn round_robin_cycles_through_all_workers() {
        let pool = ThreadPool::new(3).unwrap();
        while pool.workers.iter().any(|w| !w.is_running()) {
            std::thread::yield_now();
        }
        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            let el = pool.get_io_thread().unwrap();
            seen.insert(std::sync::Arc::as_ptr(&el) as usize);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn stop_all_then_join_all_returns() {
        let mut pool = ThreadPool::new(2).unwrap();
        pool.stop_all();
        pool.join_all();
        assert!(pool.workers.iter().all(|w| !w.is_running()));
    }
}
