// In-memory fingerprint cache: memoizes "parse this file and fold it into
// a fingerprint" so a file touched by many tests in one run is only parsed
// once. Three-level check mirrors the teacher's `fingerprint.rs`
// (`mtime -> blake3 hash -> full reparse`): an unchanged mtime is a pure
// hit, a changed mtime but unchanged whole-file hash skips the parse, and
// anything else reparses. `lru`+`ahash` replace the teacher's naive
// clear-everything-at-capacity `HashMap` eviction in `fingerprint_cache.rs`
// with real LRU semantics, both already teacher dependencies.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::parser::parse_source;
use crate::types::FileFingerprint;

const DEFAULT_MAX_ENTRIES: usize = 100_000;

struct Entry {
    mtime: i64,
    file_hash: blake3::Hash,
    fingerprint: FileFingerprint,
}

/// Caches parsed fingerprints keyed by file path. Every method takes
/// `&self`; the lock is internal so one cache can be shared across the
/// rayon-parallel bulk path without the caller juggling synchronization.
pub struct FingerprintCache {
    entries: Mutex<LruCache<String, Entry, ahash::RandomState>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl FingerprintCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::with_hasher(cap, ahash::RandomState::default())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get_or_compute(&self, path: &Path, mtime: i64) -> std::io::Result<FileFingerprint> {
        let key = path.to_string_lossy().to_string();

        if let Some(entry) = self.entries.lock().get(&key) {
            if entry.mtime == mtime {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.fingerprint.clone());
            }
        }

        let bytes = std::fs::read(path)?;
        let file_hash = blake3::hash(&bytes);

        if let Some(entry) = self.entries.lock().get_mut(&key) {
            if entry.file_hash == file_hash {
                entry.mtime = mtime;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.fingerprint.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let source = String::from_utf8_lossy(&bytes).into_owned();
        let blocks = parse_source(&source);
        let fingerprint = FileFingerprint::from_blocks(&blocks);

        self.entries.lock().put(
            key,
            Entry {
                mtime,
                file_hash,
                fingerprint: fingerprint.clone(),
            },
        );

        Ok(fingerprint)
    }

    /// Fingerprint many files in parallel -- the path used to establish a
    /// fresh baseline across a whole project rather than one file at a
    /// time.
    pub fn bulk_compute(
        &self,
        paths: &[(PathBuf, i64)],
    ) -> Vec<(PathBuf, std::io::Result<FileFingerprint>)> {
        paths
            .par_iter()
            .map(|(path, mtime)| (path.clone(), self.get_or_compute(path, *mtime)))
            .collect()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

/// Every `.py` file under `root`, skipping hidden directories,
/// `__pycache__`, and `node_modules`. Used to enumerate the files a fresh
/// baseline needs to fingerprint.
pub fn find_python_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            (name.starts_with('.') && entry.path() == root)
                || (!name.starts_with('.') && name != "__pycache__" && name != "node_modules")
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().map(|ext| ext == "py").unwrap_or(false))
        .map(|entry| entry.path().to_path_buf())
        .collect()
}
