use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by update checks and downloads.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Transport-level failure, including timeouts, refused redirects and
    /// HTTP error statuses.
    #[error("Network error: {0}")]
    Network(String),

    /// The appcast body could not be decoded.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Too many redirects (limit is {0})")]
    TooManyRedirects(usize),

    #[error("File system error on {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Aborted by the user, by a mandatory-update policy or by `abort()`.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Couldn't find the downloaded update file")]
    FileNotFound,

    #[error("An update check is already running for this URL")]
    Busy,
}

impl UpdateError {
    pub(crate) fn file_system(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }
}
