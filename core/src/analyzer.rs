// Change analyzer: decides which tests are unaffected by the current state
// of the source tree.
//
// Ported from `original_source/testmon/testmon_core.py`'s `unaffected()`
// and `flip_dictionary()` -- the containment check and the pivot are both
// direct translations of that Python, generalized from dicts/sets to
// `BTreeMap`/`HashSet`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::types::{BlockChecksum, FileFingerprint, FilePath, TestId, TestRecord};

/// Pivot `TestId -> FilePath -> checksums` into `FilePath -> TestId ->
/// checksums`. Builds a fresh map every call; never mutates or aliases the
/// one it's given, so repeated calls against the same snapshot are safe to
/// run concurrently.
pub fn invert(
    node_data: &BTreeMap<TestId, TestRecord>,
) -> BTreeMap<FilePath, BTreeMap<TestId, BTreeSet<BlockChecksum>>> {
    let mut by_file: BTreeMap<FilePath, BTreeMap<TestId, BTreeSet<BlockChecksum>>> =
        BTreeMap::new();
    for (test_id, record) in node_data {
        for (file, checksums) in record {
            by_file
                .entry(file.clone())
                .or_default()
                .insert(test_id.clone(), checksums.clone());
        }
    }
    by_file
}

/// Result of comparing recorded dependencies against current fingerprints:
/// tests whose every recorded file is still a superset of what they last
/// touched, and the subset of changed files that actually mattered to at
/// least one recorded test.
#[derive(Debug, Default, Clone)]
pub struct UnaffectedResult {
    pub unaffected_tests: BTreeSet<TestId>,
    pub unaffected_files: BTreeSet<FilePath>,
}

/// For every file that was actually re-parsed this run (i.e. present in
/// `current_fingerprints`) and that some recorded test depends on, a test
/// keeps its place in `unaffected_tests` only as long as none of its
/// recorded checksums for that file are missing from the file's current
/// fingerprint. This mirrors the Python original's `unaffected()` exactly:
/// only `set(changed_files) & set(file_data)` is ever examined: a file
/// absent from `current_fingerprints` (mtime unchanged, so presumed
/// unchanged and never re-parsed) is not touched at all, and every test
/// depending only on such files stays unaffected by default. A deleted
/// file is not "absent" here -- the caller represents deletion as an
/// explicit empty `FileFingerprint` entry (see `driver::current_fingerprints`),
/// which this function then sees like any other fingerprint that fails
/// containment.
pub fn unaffected(
    node_data: &BTreeMap<TestId, TestRecord>,
    current_fingerprints: &BTreeMap<FilePath, FileFingerprint>,
) -> UnaffectedResult {
    let by_file = invert(node_data);

    let mut unaffected_tests: BTreeSet<TestId> = node_data.keys().cloned().collect();
    let mut unaffected_files: BTreeSet<FilePath> = by_file.keys().cloned().collect();

    for file in current_fingerprints.keys() {
        let Some(tests_for_file) = by_file.get(file) else {
            continue;
        };
        let fingerprint = &current_fingerprints[file];

        for (test_id, recorded_checksums) in tests_for_file {
            if !fingerprint.contains_all(recorded_checksums) {
                unaffected_tests.remove(test_id);
                unaffected_files.remove(file);
            }
        }
    }

    tracing::debug!(
        total = node_data.len(),
        unaffected = unaffected_tests.len(),
        "computed unaffected tests"
    );

    UnaffectedResult {
        unaffected_tests,
        unaffected_files,
    }
}

/// Tests recorded but not in `unaffected_tests` must run. Convenience for
/// callers that want the complement rather than the set itself.
pub fn affected_tests(
    all_tests: &BTreeSet<TestId>,
    result: &UnaffectedResult,
) -> HashSet<TestId> {
    all_tests
        .difference(&result.unaffected_tests)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entries: &[(&str, &[&str])]) -> TestRecord {
        entries
            .iter()
            .map(|(file, checksums)| {
                (
                    file.to_string(),
                    checksums.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect()
    }

    fn fingerprint(checksums: &[&str]) -> FileFingerprint {
        FileFingerprint {
            checksums: checksums.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_with_unchanged_dependencies_is_unaffected() {
        let mut node_data = BTreeMap::new();
        node_data.insert("m.py::test_a".to_string(), record(&[("m.py", &["abc"])]));

        let mut current = BTreeMap::new();
        current.insert("m.py".to_string(), fingerprint(&["abc", "def"]));

        let result = unaffected(&node_data, &current);
        assert!(result.unaffected_tests.contains("m.py::test_a"));
    }

    #[test]
    fn test_whose_checksum_vanished_is_affected() {
        let mut node_data = BTreeMap::new();
        node_data.insert("m.py::test_a".to_string(), record(&[("m.py", &["abc"])]));

        let mut current = BTreeMap::new();
        current.insert("m.py".to_string(), fingerprint(&["xyz"]));

        let result = unaffected(&node_data, &current);
        assert!(!result.unaffected_tests.contains("m.py::test_a"));
    }

    #[test]
    fn test_depending_on_a_deleted_file_is_affected() {
        let mut node_data = BTreeMap::new();
        node_data.insert("m.py::test_a".to_string(), record(&[("gone.py", &["abc"])]));

        // Deletion is represented as an explicit empty fingerprint, not as
        // absence from `current_fingerprints` -- see `driver::current_fingerprints`.
        let mut current = BTreeMap::new();
        current.insert("gone.py".to_string(), FileFingerprint::default());

        let result = unaffected(&node_data, &current);
        assert!(!result.unaffected_tests.contains("m.py::test_a"));
    }

    #[test]
    fn file_not_reparsed_this_run_leaves_dependents_unaffected() {
        let mut node_data = BTreeMap::new();
        node_data.insert("m.py::test_a".to_string(), record(&[("m.py", &["abc"])]));

        // `m.py` simply never shows up in `current_fingerprints` -- its
        // mtime didn't move, so the caller never re-parsed it this run.
        let result = unaffected(&node_data, &BTreeMap::new());
        assert!(result.unaffected_tests.contains("m.py::test_a"));
        assert!(result.unaffected_files.contains("m.py"));
    }

    #[test]
    fn unrelated_tests_are_unaffected_by_a_changed_file() {
        let mut node_data = BTreeMap::new();
        node_data.insert("a.py::test_a".to_string(), record(&[("a.py", &["abc"])]));
        node_data.insert("b.py::test_b".to_string(), record(&[("b.py", &["def"])]));

        let mut current = BTreeMap::new();
        current.insert("a.py".to_string(), fingerprint(&["zzz"]));
        current.insert("b.py".to_string(), fingerprint(&["def"]));

        let result = unaffected(&node_data, &current);
        assert!(!result.unaffected_tests.contains("a.py::test_a"));
        assert!(result.unaffected_tests.contains("b.py::test_b"));
    }

    #[test]
    fn invert_pivots_test_major_to_file_major() {
        let mut node_data = BTreeMap::new();
        node_data.insert("m.py::test_a".to_string(), record(&[("m.py", &["abc"])]));

        let by_file = invert(&node_data);
        assert_eq!(
            by_file["m.py"]["m.py::test_a"],
            ["abc".to_string()].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn invert_does_not_alias_its_input() {
        let mut node_data = BTreeMap::new();
        node_data.insert("m.py::test_a".to_string(), record(&[("m.py", &["abc"])]));
        let original_len = node_data.len();

        let mut by_file = invert(&node_data);
        by_file.clear();

        assert_eq!(node_data.len(), original_len);
    }

    proptest::proptest! {
        #[test]
        fn adding_new_checksums_never_makes_an_unaffected_test_affected(
            extra in proptest::collection::vec("[a-z]{3}", 0..5)
        ) {
            let mut node_data = BTreeMap::new();
            node_data.insert("m.py::test_a".to_string(), record(&[("m.py", &["abc"])]));

            let mut checksums: Vec<String> = vec!["abc".to_string()];
            checksums.extend(extra);

            let mut current = BTreeMap::new();
            current.insert(
                "m.py".to_string(),
                FileFingerprint {
                    checksums: checksums.into_iter().collect(),
                },
            );

            let result = unaffected(&node_data, &current);
            proptest::prop_assert!(result.unaffected_tests.contains("m.py::test_a"));
        }
    }
}
