//! Error taxonomy for CAS operations.
//!
//! Each variant corresponds to one kind in the store's error table; the
//! "not really an error" paths (object already present, destination already
//! extracted, dangling subtree during checkout/reachability) never construct
//! a `CasError` at all — they are early-return success paths in the calling
//! code, not suppressed errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CasError {
    #[error("CAS repository at {path:?} is missing required directories")]
    StoreUninitialized { path: PathBuf },

    #[error("ref not found: {ref_name}")]
    RefNotFound { ref_name: String },

    #[error("subdirectory not found: {name}")]
    SubdirectoryNotFound { name: String },

    #[error("unsupported file type at {path:?}")]
    UnsupportedFileType { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to extract ref '{ref_name}': {source}")]
    ExtractFailure {
        ref_name: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CasError>;
