//! Async multi-slab logger: front-end append, N fixed buffers, a background flush
//! thread, periodic sync and file rotation.

mod config;
mod error;
mod level;
#[macro_use]
mod macros;
mod logger;
mod record;
mod slab;

pub use config::LoggerConfig;
pub use error::LogError;
pub use level::LogLevel;
pub use logger::{AsyncLogger, global, init};
pub use record::format_record;
pub use slab::{Slab, SLAB_SIZE};
