use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read filesystem capacity: {0}")]
    Capacity(String),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("scan worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("{0} does not exist")]
    NotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("{0} is in use")]
    InUse(PathBuf),

    #[error("{0} is a protected system path")]
    Protected(PathBuf),

    #[error("failed to delete {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

const EBUSY: i32 = 16;

impl DeleteError {
    pub fn from_io(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => DeleteError::NotFound(path),
            io::ErrorKind::PermissionDenied => DeleteError::PermissionDenied(path),
            _ if source.raw_os_error() == Some(EBUSY) => DeleteError::InUse(path),
            _ => DeleteError::Io { path, source },
        }
    }

    /// True when retrying with elevated privileges could succeed.
    pub fn needs_elevation(&self) -> bool {
        matches!(self, DeleteError::PermissionDenied(_))
    }
}
