// Driver: ties the parser/cache and the change analyzer together the way
// the original's `TestmonData.read_fs` does, producing the
// `current_fingerprints` map §4.D consumes.
//
// This is not the out-of-scope "command-line glue that loads configuration
// and invokes the core" (spec.md §1) -- it's the file-selection logic
// §2's data flow and §3 invariant 2 require: deciding, per file a recorded
// test depends on, whether it needs re-parsing at all, and handling the
// one case the original gets wrong (see below).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cache::FingerprintCache;
use crate::types::{FileFingerprint, FilePath, MTimeMap};

/// For every file in `tracked_files` (the files at least one recorded test
/// depends on -- `analyzer::invert`'s keys): compare its current mtime
/// against `mtimes`. Unchanged mtime means the file is left out of the
/// result entirely, so the analyzer treats it as "not re-parsed this run,
/// presumed unchanged" per spec.md §4.D. A changed mtime triggers a
/// `cache`-backed reparse, contributing its fresh `FileFingerprint` and a
/// staged mtime update. A file that has disappeared from disk contributes
/// an empty `FileFingerprint` sentinel, so every dependent test fails
/// containment and is reported affected -- spec.md §7's `FileMissing`
/// policy ("treat as empty fingerprint; dependents become affected").
///
/// This corrects the original's `read_fs`, which on `OSError` from
/// `os.path.getmtime` only stamps a sentinel mtime and never adds the file
/// to `changed_files` -- so a deleted file's dependents are never actually
/// reparsed or invalidated there. spec.md's own worked scenario (§8,
/// "File deleted") requires the fingerprint to be explicitly present and
/// empty, which is what this function does.
pub fn current_fingerprints<'a>(
    tracked_files: impl IntoIterator<Item = &'a FilePath>,
    mtimes: &MTimeMap,
    cache: &FingerprintCache,
) -> (BTreeMap<FilePath, FileFingerprint>, MTimeMap) {
    let mut fingerprints = BTreeMap::new();
    let mut staged_mtimes = MTimeMap::new();

    for file in tracked_files {
        let path = Path::new(file);
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => {
                let new_mtime = system_time_to_epoch_secs(modified);
                if mtimes.get(file) == Some(&new_mtime) {
                    continue;
                }
                match cache.get_or_compute(path, new_mtime) {
                    Ok(fingerprint) => {
                        fingerprints.insert(file.clone(), fingerprint);
                        staged_mtimes.insert(file.clone(), new_mtime);
                    }
                    Err(err) => {
                        tracing::warn!(file = %file, error = %err, "failed to reparse tracked file");
                    }
                }
            }
            Err(_) => {
                tracing::debug!(file = %file, "tracked file missing on disk, treating as changed");
                fingerprints.insert(file.clone(), FileFingerprint::default());
            }
        }
    }

    (fingerprints, staged_mtimes)
}

fn system_time_to_epoch_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_py(dir: &std::path::Path, name: &str, source: &str) -> FilePath {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(source.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn unchanged_mtime_is_left_out_of_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_py(dir.path(), "a.py", "def f():\n    return 1\n");
        let mtime = std::fs::metadata(&file).unwrap().modified().unwrap();
        let recorded = system_time_to_epoch_secs(mtime);

        let mut mtimes = MTimeMap::new();
        mtimes.insert(file.clone(), recorded);

        let cache = FingerprintCache::default();
        let (fingerprints, staged) =
            current_fingerprints([&file], &mtimes, &cache);

        assert!(fingerprints.is_empty());
        assert!(staged.is_empty());
    }

    #[test]
    fn changed_mtime_reparses_and_stages_new_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_py(dir.path(), "a.py", "def f():\n    return 1\n");

        let mtimes = MTimeMap::new(); // nothing recorded yet -> always "changed"
        let cache = FingerprintCache::default();
        let (fingerprints, staged) =
            current_fingerprints([&file], &mtimes, &cache);

        assert!(fingerprints.contains_key(&file));
        assert!(staged.contains_key(&file));
    }

    #[test]
    fn missing_file_yields_empty_sentinel_fingerprint() {
        let missing = "/nonexistent/path/does_not_exist.py".to_string();
        let mtimes = MTimeMap::new();
        let cache = FingerprintCache::default();

        let (fingerprints, staged) =
            current_fingerprints([&missing], &mtimes, &cache);

        assert_eq!(fingerprints.get(&missing), Some(&FileFingerprint::default()));
        assert!(staged.is_empty());
    }
}
