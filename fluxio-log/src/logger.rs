//! Async multi-slab logger: front-end `append` under a mutex, a background flush
//! thread woken via condvar, rotation by record count.
//!
//! Ported from `zest/base/async_logging.h`'s `AsyncLogging`: a front-end `Mutex`
//! guarding the buffer list, a `Condvar` waking the backend thread, a second mutex
//! (`m_flush_mutex` there) serializing an explicit `flush()` against the backend.
//! Here that second mutex is folded into the open file handle itself — `flush_mutex`
//! below is a `Mutex<FileState>`, so locking it to write *is* the serialization, with
//! no separate unit-value lock needed.
//!
//! The buffer list itself is a `VecDeque<Box<Slab>>` rather than the original's
//! doubly-linked list plus `current`/`next_to_flush` iterators: the back of the deque
//! is always the slab being written, and flushing drains everything in front of it.
//! A `free_list` of reclaimed (flushed, reset) slabs stands in for the original's
//! buffer reuse, so a healthy flusher means steady-state append never allocates.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use crate::config::LoggerConfig;
use crate::error::LogError;
use crate::level::LogLevel;
use crate::record::format_record;
use crate::slab::Slab;

struct Inner {
    slabs: VecDeque<Box<Slab>>,
    free_list: Vec<Box<Slab>>,
}

impl Inner {
    fn allocated(&self) -> usize {
        self.slabs.len() + self.free_list.len()
    }
}

struct FileState {
    file: File,
    path: PathBuf,
    record_count: usize,
}

/// The async logger itself. Cheaply cloned (`Arc`-backed internally via [`init`]); hold
/// onto the `Arc<AsyncLogger>` it returns and call [`AsyncLogger::shutdown`] before
/// process exit to guarantee a final flush.
pub struct AsyncLogger {
    inner: Mutex<Inner>,
    cond: Condvar,
    flush_mutex: Mutex<FileState>,
    config: LoggerConfig,
    stop: AtomicBool,
    backend: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for AsyncLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncLogger")
            .field("level", &self.config.level)
            .field("basename", &self.config.basename)
            .finish_non_exhaustive()
    }
}

static GLOBAL_LOGGER: OnceLock<Arc<AsyncLogger>> = OnceLock::new();

/// Initializes the global logger and starts its background flush thread. Logging
/// macros (`log_info!` and friends) are silent no-ops until this has been called.
pub fn init(config: LoggerConfig) -> Result<Arc<AsyncLogger>, LogError> {
    let logger = AsyncLogger::new(config)?;
    drop(GLOBAL_LOGGER.set(logger.clone()));
    Ok(logger)
}

/// The global logger installed by [`init`], if any.
#[must_use]
pub fn global() -> Option<Arc<AsyncLogger>> {
    GLOBAL_LOGGER.get().cloned()
}

impl AsyncLogger {
    pub fn new(config: LoggerConfig) -> Result<Arc<Self>, LogError> {
        let file_state = open_new_file(&config)?;
        let logger = Arc::new(Self {
            inner: Mutex::new(Inner { slabs: VecDeque::new(), free_list: Vec::new() }),
            cond: Condvar::new(),
            flush_mutex: Mutex::new(file_state),
            config,
            stop: AtomicBool::new(false),
            backend: Mutex::new(None),
        });

        let backend_logger = logger.clone();
        let handle = std::thread::Builder::new()
            .name("fluxio-log-flush".to_string())
            .spawn(move || backend_loop(&backend_logger))
            .expect("failed to spawn log flush thread");
        *logger.backend.lock().expect("backend handle mutex poisoned") = Some(handle);

        Ok(logger)
    }

    #[must_use]
    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Appends one record. Silently dropped if `level` is below the configured
    /// threshold. `Sync` forces a synchronous [`flush`](Self::flush) after appending.
    pub fn append(&self, level: LogLevel, file: &str, line: u32, message: &str) {
        if level < self.config.level {
            return;
        }
        let record = format_record(level, file, line, message);
        let bytes = record.as_bytes();

        let mut guard = self.inner.lock().expect("logger buffer mutex poisoned");
        loop {
            if let Some(current) = guard.slabs.back_mut() {
                if current.append(bytes) {
                    break;
                }
            }
            if let Some(mut reclaimed) = guard.free_list.pop() {
                reclaimed.reset();
                guard.slabs.push_back(reclaimed);
                continue;
            }
            if guard.allocated() < self.config.max_slabs {
                guard.slabs.push_back(Slab::new());
                continue;
            }
            // At capacity and nothing flushed yet: nudge the flusher and wait briefly
            // rather than block forever or silently drop the record.
            self.cond.notify_all();
            let (woken, _timeout) =
                self.cond.wait_timeout(guard, self.config.flush_interval()).expect("logger buffer condvar poisoned");
            guard = woken;
        }
        drop(guard);
        self.cond.notify_all();

        if level == LogLevel::Sync {
            if let Err(err) = self.flush() {
                tracing::error!(?err, "synchronous log flush failed");
            }
        }
    }

    /// Drains every slab (including the one currently being written), writes them to
    /// the log file under `flush_mutex`, and returns once they're durable. Synchronous;
    /// coordinates with the background thread purely by sharing its file-state mutex.
    pub fn flush(&self) -> Result<(), LogError> {
        let drained = self.drain(true);
        let result = self.write_slabs(&drained);
        self.reclaim(drained);
        result
    }

    fn drain(&self, include_current: bool) -> Vec<Box<Slab>> {
        let mut guard = self.inner.lock().expect("logger buffer mutex poisoned");
        let keep = if include_current || guard.slabs.is_empty() { 0 } else { 1 };
        let take = guard.slabs.len() - keep;
        guard.slabs.drain(..take).collect()
    }

    fn reclaim(&self, slabs: Vec<Box<Slab>>) {
        if slabs.is_empty() {
            return;
        }
        let mut guard = self.inner.lock().expect("logger buffer mutex poisoned");
        guard.free_list.extend(slabs);
        drop(guard);
        self.cond.notify_all();
    }

    /// Writes every slab's records to the log file, rotating as soon as the running
    /// record count in the current file reaches the configured maximum. Records are
    /// written one at a time (rather than a whole slab in one `write_all`) so rotation
    /// lands on exact record-count boundaries even when several records still fit in a
    /// single slab.
    fn write_slabs(&self, slabs: &[Box<Slab>]) -> Result<(), LogError> {
        if slabs.is_empty() {
            return Ok(());
        }
        let mut state = self.flush_mutex.lock().expect("log file mutex poisoned");
        for slab in slabs {
            for record in slab.data().split_inclusive(|&b| b == b'\n') {
                if record.is_empty() {
                    continue;
                }
                state.file.write_all(record)?;
                state.record_count += 1;
                if state.record_count >= self.config.max_records_per_file {
                    state.file.flush()?;
                    rotate(&mut state, &self.config)?;
                }
            }
        }
        state.file.flush()?;
        Ok(())
    }

    /// Stops the background thread (after one final flush) and joins it. Further
    /// `append` calls still buffer but will never be written to disk.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.cond.notify_all();
        if let Some(handle) = self.backend.lock().expect("backend handle mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

fn backend_loop(logger: &Arc<AsyncLogger>) {
    while !logger.stop.load(Ordering::Acquire) {
        {
            let guard = logger.inner.lock().expect("logger buffer mutex poisoned");
            let _ = logger.cond.wait_timeout(guard, logger.config.flush_interval());
        }
        if logger.stop.load(Ordering::Acquire) {
            break;
        }
        let drained = logger.drain(false);
        if let Err(err) = logger.write_slabs(&drained) {
            tracing::error!(?err, "background log flush failed");
        }
        logger.reclaim(drained);
    }
    if let Err(err) = logger.flush() {
        tracing::error!(?err, "final log flush on shutdown failed");
    }
}

fn open_new_file(config: &LoggerConfig) -> Result<FileState, LogError> {
    ensure_directory(&config.directory)?;
    let path = timestamped_path(&config.directory, &config.basename);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LogError::OpenFile { path: path.clone(), source })?;
    Ok(FileState { file, path, record_count: 0 })
}

fn rotate(state: &mut FileState, config: &LoggerConfig) -> Result<(), LogError> {
    let fresh = open_new_file(config)?;
    *state = fresh;
    Ok(())
}

/// `<dir>/<basename>_YYYYMMDDHHMMSS.log`, disambiguated with a numeric suffix if a
/// rotation lands within the same wall-clock second as the previous file.
fn timestamped_path(directory: &Path, basename: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let base = directory.join(format!("{basename}_{stamp}.log"));
    if !base.exists() {
        return base;
    }
    for suffix in 1u32.. {
        let candidate = directory.join(format!("{basename}_{stamp}-{suffix}.log"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("exhausted u32 disambiguation suffixes")
}

fn ensure_directory(directory: &Path) -> Result<(), LogError> {
    if directory.exists() {
        return Ok(());
    }
    fs::create_dir_all(directory).map_err(|source| LogError::CreateDir { path: directory.to_path_buf(), source })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o775);
        let _ = fs::set_permissions(directory, perms);
    }
    Ok(())
}
