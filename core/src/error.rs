// Error taxonomy for the dependency index and change analyzer.
//
// One variant per distinct failure kind the core is expected to surface;
// the core never promotes one of these to fatal or retries on its own.
// Internal helpers still thread `anyhow::Result` for convenience; this enum
// is what crosses the public API boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestscopeError {
    #[error("file missing: {0}")]
    FileMissing(String),

    #[error("failed to parse {path}: {source}")]
    ParseFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("tracer failure: {0}")]
    TracerFailure(String),

    #[error("store I/O error: {0}")]
    StoreIoError(#[from] std::io::Error),

    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, TestscopeError>;
