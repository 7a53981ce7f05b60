use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Could not write settings: {0}")]
    SettingsWrite(#[from] toml::ser::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Error walking watch directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{0}")]
    Precondition(String),

    /// Manifest state that should be impossible, such as zero or several open discs.
    #[error("Manifest invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Disc {0} does not exist")]
    UnknownDisc(i64),

    #[error("Disc {0} is still open and cannot be marked lost")]
    DiscStillOpen(i64),

    /// The source file could not be read. Only this file is affected.
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: content changed while copying (expected {expected_size} bytes, copied {copied_size})", path.display())]
    CopyMismatch {
        path: PathBuf,
        expected_size: u64,
        copied_size: u64,
    },
}

impl Error {
    pub(crate) fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }

    /// Errors confined to a single source file. The monitor reports these and
    /// keeps walking; everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::File { .. } | Error::CopyMismatch { .. } => true,
            Error::Walk(e) => e.path().is_some() && e.io_error().is_some(),
            _ => false,
        }
    }
}
