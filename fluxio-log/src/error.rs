use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to create log directory {path}")]
    CreateDir { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to open log file {path}")]
    OpenFile { path: PathBuf, #[source] source: std::io::Error },

    #[error("failed to parse logger config")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
