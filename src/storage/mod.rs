use std::io;
use std::path::PathBuf;
use thiserror::Error;

mod region;

pub use region::SharedRegion;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open register file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create register file {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to resize register file {}: {source}", .path.display())]
    Resize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to map register file {}: {source}", .path.display())]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat register file {}: {source}", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read register file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("register file {} changed size while mapped: expected {expected} bytes, found {actual}", .path.display())]
    SizeChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}
