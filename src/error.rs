// src/error.rs

//! Error taxonomy for the atomic installer core (spec §7).

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The image was mutated concurrently while CHECK was walking it.
    #[error("image entry disappeared during check: {path}")]
    FilesystemChanged { path: PathBuf },

    /// A phase was invoked in an order the core cannot make sense of. Most
    /// call-order mistakes are unrepresentable by construction (see
    /// `installer::Plan`/`PreparedPlan`, which consume their predecessor by
    /// value) — this variant remains for the cases the type system can't
    /// reach, such as recovery functions handed an inconsistent filelist.
    #[error("invalid call order: {0}")]
    InvalidCallOrder(String),

    /// A `PlanEntry` reached PREPARE or MERGE carrying a kind CHECK should
    /// have filtered out. Reaching this is an internal-invariant violation,
    /// not a recoverable condition.
    #[error("internal invariant violated: unsupported kind reached {phase} for {path}")]
    UnsupportedKind { phase: &'static str, path: PathBuf },

    /// A syscall failed while materializing a shadow or executing a rename.
    /// `op` and `path` give context the bare `io::Error` doesn't.
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
