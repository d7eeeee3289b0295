// Tracking session: drives one test's coverage capture end to end.
//
// The actual coverage tracer and test runner are external collaborators --
// this crate doesn't reimplement `sys.monitoring`-style line tracing or a
// test execution harness, the same boundary the teacher draws by exposing
// `calculate_fingerprint`/`detect_changes`/`process_coverage_data` as free
// functions for a Python caller to drive rather than owning execution
// itself. `CoverageTracer` is that boundary expressed as a trait.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::Result;
use crate::fold::fold;
use crate::parser::parse_file;
use crate::types::{FilePath, TestId, TestRecord};

/// What a tracking session needs from whatever actually measures coverage.
/// A real implementation wraps a subprocess-aware line tracer; tests can
/// use a trivial in-memory stand-in.
pub trait CoverageTracer {
    /// Begin measuring. `include` narrows the files considered in scope;
    /// an empty list means "everything under the project root".
    fn start(&mut self, include: &[FilePath]) -> Result<()>;

    /// Stop measuring and return `file -> executed line numbers`.
    fn stop(&mut self) -> Result<std::collections::BTreeMap<FilePath, BTreeSet<usize>>>;

    /// Merge coverage recorded by a subprocess, if the tracer supports
    /// subprocess propagation. Default is a no-op for tracers that don't.
    fn merge_subprocess_data(
        &mut self,
        _acc: &mut std::collections::BTreeMap<FilePath, BTreeSet<usize>>,
    ) -> Result<()> {
        Ok(())
    }
}

const BOOTSTRAP_ENV_VAR: &str = "TESTSCOPE_BOOTSTRAP";

/// Writes the transient subprocess bootstrap file on construction and
/// removes both the file and the environment variable it points subprocess
/// children at, whatever happens in between. Built as a guard so cleanup
/// runs on every exit path out of `track()`, including an early return via
/// `?` from `run_fn`.
struct BootstrapGuard {
    path: PathBuf,
}

impl BootstrapGuard {
    fn write(bootstrap_dir: &std::path::Path, test_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(bootstrap_dir)?;
        let path = bootstrap_dir.join(format!("{}.bootstrap", sanitize(test_id)));
        std::fs::write(&path, test_id)?;
        std::env::set_var(BOOTSTRAP_ENV_VAR, &path);
        Ok(Self { path })
    }
}

impl Drop for BootstrapGuard {
    fn drop(&mut self) {
        std::env::remove_var(BOOTSTRAP_ENV_VAR);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn sanitize(test_id: &str) -> String {
    test_id
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Drive one test through the tracer, fold its coverage into block
/// checksums, and return the record ready to stage into the dependency
/// index. Never flushes the index itself -- that stays the caller's call.
pub fn track<T, E>(
    tracer: &mut dyn CoverageTracer,
    bootstrap_dir: &std::path::Path,
    test_id: &TestId,
    test_file: &FilePath,
    include: &[FilePath],
    run_fn: impl FnOnce() -> std::result::Result<T, E>,
) -> Result<(std::result::Result<T, E>, TestRecord)> {
    let guard = BootstrapGuard::write(bootstrap_dir, test_id)
        .map_err(crate::error::TestscopeError::StoreIoError)?;

    tracing::debug!(test_id = %test_id, "tracking started");
    tracer.start(include)?;
    let run_result = run_fn();
    let mut measured = tracer.stop()?;
    tracer.merge_subprocess_data(&mut measured)?;
    drop(guard);
    tracing::debug!(test_id = %test_id, files_measured = measured.len(), "tracking stopped");

    let mut record = TestRecord::new();
    for (file, lines) in &measured {
        let blocks = parse_file(std::path::Path::new(file))
            .map_err(crate::error::TestscopeError::StoreIoError)?;
        let checksums = fold(&blocks, lines);
        if !checksums.is_empty() {
            record.insert(file.clone(), checksums);
        }
    }

    if record.is_empty() {
        tracing::debug!(test_id = %test_id, test_file = %test_file, "no files measured, falling back to sentinel");
        record.insert(
            test_file.clone(),
            sentinel_checksum(test_file)?,
        );
    }

    Ok((run_result, record))
}

/// When a test measures zero files -- nothing it touches is instrumented,
/// or it's a pure-collection error -- it still needs a dependency record,
/// otherwise it would look "never run" forever and never get picked up for
/// re-execution. The sentinel points at the checksum of the test file's
/// own first block, so any edit to that file (including the test itself)
/// invalidates it.
fn sentinel_checksum(test_file: &FilePath) -> Result<BTreeSet<crate::types::BlockChecksum>> {
    let blocks =
        parse_file(std::path::Path::new(test_file)).map_err(crate::error::TestscopeError::StoreIoError)?;
    let checksum = blocks
        .first()
        .map(|b| b.checksum.clone())
        .unwrap_or_else(|| "0".repeat(8));
    Ok(std::iter::once(checksum).collect())
}
