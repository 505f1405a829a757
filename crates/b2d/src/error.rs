//! Error types for the converter library.

use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Conversion error taxonomy.
///
/// Per-object and per-frame filtering never produces an error; these
/// variants are the structural failures that abort a worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on a specific file
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// JSON (de)serialization failure on a specific file
    #[error("JSON error in {path}: {source}")]
    Json {
        /// File being parsed or written
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// Zip container error
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Depth image could not be decoded
    #[error("Image error in {path}: {source}")]
    Image {
        /// Image path
        path: PathBuf,
        /// Underlying error
        source: image::ImageError,
    },

    /// A camera has no depth buffer for the frame being classified
    #[error("Missing depth buffer for {camera}: {path}")]
    MissingDepth {
        /// Camera channel name
        camera: &'static str,
        /// Expected depth image location
        path: PathBuf,
    },

    /// Annotation is structurally invalid
    #[error("Malformed frame {path}: {reason}")]
    MalformedFrame {
        /// Annotation file
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// Transform has no inverse
    #[error("Singular transform: {0}")]
    SingularTransform(&'static str),

    /// NPY payload could not be parsed
    #[error("Invalid NPY data: {0}")]
    Npy(String),

    /// Frame references a zone the map infos do not contain
    #[error("Unknown map zone: {0}")]
    UnknownZone(String),

    /// Expert action id outside the discrete action table
    #[error("Unknown expert action id: {0}")]
    UnknownAction(i64),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker returned an error
    #[error("Worker {index} failed: {source}")]
    Worker {
        /// Worker index
        index: usize,
        /// Error the worker stopped on
        source: Box<Error>,
    },

    /// A worker thread panicked
    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Json {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::MalformedFrame {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
