//! Error types for the loop-closure engine.
//!
//! Only a small subset of these errors ever reaches the caller. During the
//! candidate search, `NotFound` and `DegenerateGeometry` collapse to "this
//! candidate rejected, try the next"; the remaining variants fail the calling
//! operation (`init`, `set_node`, `finalize`).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A parameter is out of range. Raised by `init()`.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The scratch directory could not be created or cleaned.
    #[error("scratch directory error at {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A descriptor matrix does not match the dimensionality locked in at
    /// basis initialization. Fails the offending `set_node` call.
    #[error("descriptor dimensionality {actual} does not match the projection basis ({expected})")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The requested node index was never stored.
    #[error("node {0} is not present in the feature store")]
    NotFound(usize),

    /// A geometric model could not be estimated (near-zero fundamental
    /// matrix, PnP failure, too few correspondences).
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// The external feature extractor failed.
    #[error("feature extraction failed: {0}")]
    Extraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
