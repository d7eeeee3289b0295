// testscope-core: the block-level test-impact engine.
//
// Parses source into blocks, folds executed lines into block checksums,
// persists per-test dependency records, and decides which tests a given
// change can skip. The coverage tracer and test runner that drive this
// engine are external collaborators (see `session::CoverageTracer`); this
// crate only decides, never executes, a test.

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod fold;
pub mod parser;
pub mod session;
pub mod store;
pub mod types;

pub use analyzer::{affected_tests, invert, unaffected, UnaffectedResult};
pub use cache::{find_python_files, FingerprintCache};
pub use config::{Config, VariantExpr};
pub use driver::current_fingerprints;
pub use error::{Result, TestscopeError};
pub use fold::fold;
pub use parser::{parse_file, parse_source};
pub use session::{track, CoverageTracer};
pub use store::DependencyIndex;
pub use types::{
    Block, BlockChecksum, BlockKind, FileFingerprint, FilePath, LastFailed, MTimeMap, ReportMap,
    TestId, TestRecord, Variant, VariantState,
};

/// Thin PyO3 boundary: every function here takes and returns JSON, and does
/// nothing the Rust API above doesn't already do. Kept intentionally small
/// -- it exists so a Python test runner can drive this engine, not to
/// duplicate it.
#[cfg(feature = "extension-module")]
mod python {
    use pyo3::exceptions::PyValueError;
    use pyo3::prelude::*;

    use crate::{analyzer, fold, parser, types};

    fn to_py_err(e: impl std::fmt::Display) -> PyErr {
        PyValueError::new_err(e.to_string())
    }

    /// Parse a Python source file into its blocks, returned as a JSON array.
    #[pyfunction]
    fn parse_module(path: String) -> PyResult<String> {
        let blocks = parser::parse_file(std::path::Path::new(&path)).map_err(to_py_err)?;
        serde_json::to_string(&blocks).map_err(to_py_err)
    }

    /// Fold a JSON array of blocks and a JSON array of executed line
    /// numbers into the JSON array of block checksums they touch.
    #[pyfunction]
    fn fold_coverage(blocks_json: String, executed_lines_json: String) -> PyResult<String> {
        let blocks: Vec<types::Block> = serde_json::from_str(&blocks_json).map_err(to_py_err)?;
        let lines: std::collections::BTreeSet<usize> =
            serde_json::from_str(&executed_lines_json).map_err(to_py_err)?;
        let checksums = fold::fold(&blocks, &lines);
        serde_json::to_string(&checksums).map_err(to_py_err)
    }

    /// Given JSON `TestId -> FilePath -> checksums` node data and JSON
    /// `FilePath -> FileFingerprint` current fingerprints, return the JSON
    /// `UnaffectedResult`.
    #[pyfunction]
    fn detect_changes(node_data_json: String, current_fingerprints_json: String) -> PyResult<String> {
        let node_data: std::collections::BTreeMap<types::TestId, types::TestRecord> =
            serde_json::from_str(&node_data_json).map_err(to_py_err)?;
        let current: std::collections::BTreeMap<types::FilePath, types::FileFingerprint> =
            serde_json::from_str(&current_fingerprints_json).map_err(to_py_err)?;
        let result = analyzer::unaffected(&node_data, &current);
        serde_json::to_string(&(
            result.unaffected_tests,
            result.unaffected_files,
        ))
        .map_err(to_py_err)
    }

    #[pymodule]
    fn _testscope_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(parse_module, m)?)?;
        m.add_function(wrap_pyfunction!(fold_coverage, m)?)?;
        m.add_function(wrap_pyfunction!(detect_changes, m)?)?;
        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        Ok(())
    }
}
