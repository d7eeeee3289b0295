// Core entities for the dependency index and change analyzer: blocks,
// fingerprints, test records, and the small pieces of metadata the index
// persists alongside them. `BTreeMap`/`BTreeSet` (rather than the
// `HashMap`s reached for elsewhere) are used deliberately here: the
// persistence layer requires sorted keys so identical in-memory state
// serializes to identical bytes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Opaque test identity, e.g. `path/to/file.py::TestClass::test_name`.
pub type TestId = String;

/// Root-relative or absolute path to a tracked source file.
pub type FilePath = String;

/// Fixed-width hex fingerprint of a block's canonical source text.
pub type BlockChecksum = String;

/// Kind of a parsed block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Top-level statements outside any function/class (import side effects
    /// live here too).
    Module,
    Function,
    AsyncFunction,
    /// Header of a class body, up to (not including) its first method.
    Class,
}

/// A contiguous, semantically meaningful chunk of a source file.
///
/// Blocks within a file are non-overlapping and cover every executable
/// line; see `parser` for how they're produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub checksum: BlockChecksum,
}

impl Block {
    pub fn contains_line(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }
}

/// The set of block checksums present in a file at a given revision.
///
/// A test is unaffected with respect to a file iff its recorded checksums
/// are still a subset of the file's current `FileFingerprint`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileFingerprint {
    pub checksums: BTreeSet<BlockChecksum>,
}

impl FileFingerprint {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        Self {
            checksums: blocks.iter().map(|b| b.checksum.clone()).collect(),
        }
    }

    pub fn contains_all(&self, expected: &BTreeSet<BlockChecksum>) -> bool {
        expected.is_subset(&self.checksums)
    }
}

/// What one test touched, per file, on its last recorded run.
pub type TestRecord = BTreeMap<FilePath, BTreeSet<BlockChecksum>>;

/// `FilePath -> last-known mtime`, used only as a fast-path cache to skip
/// re-parsing files whose mtime hasn't moved.
pub type MTimeMap = BTreeMap<FilePath, i64>;

/// `TestId -> opaque pass/fail payload`, stored and returned verbatim.
pub type ReportMap = BTreeMap<TestId, serde_json::Value>;

/// TestIds that failed on the previous run, in the order the runner gave
/// them.
pub type LastFailed = Vec<TestId>;

/// Namespace key partitioning independent indices within one store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variant(pub String);

impl Default for Variant {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four attributes persisted per variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantState {
    pub mtimes: MTimeMap,
    pub node_data: BTreeMap<TestId, TestRecord>,
    pub reports: ReportMap,
    pub lastfailed: LastFailed,
}
