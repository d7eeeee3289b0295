// Dependency index: the on-disk store behind a `.testmondata` file.
//
// One table, one shape: `alldata(dataid TEXT PRIMARY KEY, data BLOB)`, where
// `dataid = "<variant>:<attribute>"` and `data` is a deflate-compressed JSON
// payload. Four attributes are persisted per variant: mtimes, node_data,
// reports, lastfailed. Connection handling (WAL, busy timeout, an
// `Arc<RwLock<Connection>>`) follows the teacher's `database.rs`; the schema
// itself does not, since the teacher's relational layout has no single file
// this store's external interface can be built around.

use std::collections::BTreeMap;
use std::io::{Read, Write as _};
use std::path::Path;
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, TestscopeError};
use crate::types::{FilePath, LastFailed, MTimeMap, ReportMap, TestId, TestRecord, Variant, VariantState};

const BUSY_TIMEOUT_MS: u64 = 30_000;

const ATTR_MTIMES: &str = "mtimes";
const ATTR_NODE_DATA: &str = "node_data";
const ATTR_REPORTS: &str = "reports";
const ATTR_LASTFAILED: &str = "lastfailed";

/// The staging layer for one variant. Unlike `VariantState`, `lastfailed`
/// is `Option`: the original writes `self.lastfailed` unconditionally on
/// every `write_data()`, so staging it as a bare `Vec` would make "nothing
/// staged" indistinguishable from "explicitly staged to empty" (e.g. every
/// previously-failing test now passes). `Some(vec![])` is a real flush
/// target; `None` means `flush()` leaves `current.lastfailed` untouched.
#[derive(Default)]
struct StagedState {
    mtimes: MTimeMap,
    node_data: BTreeMap<TestId, TestRecord>,
    reports: ReportMap,
    lastfailed: Option<LastFailed>,
}

/// The persisted index for one `.testmondata` file, shared across every
/// variant namespace it holds. Opening is cheap; all the real work happens
/// behind the `RwLock`-guarded connection so concurrent readers don't block
/// each other while a writer holds a transaction.
pub struct DependencyIndex {
    conn: Arc<RwLock<Connection>>,
    variant: Variant,
    current: RwLock<VariantState>,
    staged: RwLock<StagedState>,
}

impl DependencyIndex {
    pub fn open(path: &Path, variant: Variant) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS alldata (
                 dataid TEXT PRIMARY KEY,
                 data BLOB NOT NULL
             );",
        )?;

        let current = Self::load_state(&conn, &variant)?;

        Ok(Self {
            conn: Arc::new(RwLock::new(conn)),
            variant,
            current: RwLock::new(current),
            staged: RwLock::new(StagedState::default()),
        })
    }

    fn load_state(conn: &Connection, variant: &Variant) -> Result<VariantState> {
        Ok(VariantState {
            mtimes: Self::fetch_attr(conn, variant, ATTR_MTIMES)?.unwrap_or_default(),
            node_data: Self::fetch_attr(conn, variant, ATTR_NODE_DATA)?.unwrap_or_default(),
            reports: Self::fetch_attr(conn, variant, ATTR_REPORTS)?.unwrap_or_default(),
            lastfailed: Self::fetch_attr(conn, variant, ATTR_LASTFAILED)?.unwrap_or_default(),
        })
    }

    fn dataid(variant: &Variant, attribute: &str) -> String {
        format!("{}:{}", variant, attribute)
    }

    fn fetch_attr<T: serde::de::DeserializeOwned>(
        conn: &Connection,
        variant: &Variant,
        attribute: &str,
    ) -> Result<Option<T>> {
        let raw: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM alldata WHERE dataid = ?1",
                params![Self::dataid(variant, attribute)],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            None => Ok(None),
            Some(bytes) => {
                let mut decoder = DeflateDecoder::new(&bytes[..]);
                let mut json = String::new();
                decoder.read_to_string(&mut json).map_err(|e| {
                    TestscopeError::IndexCorrupt(format!(
                        "{} payload for variant {}: {}",
                        attribute, variant, e
                    ))
                })?;
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| TestscopeError::IndexCorrupt(format!("{}: {}", attribute, e)))
            }
        }
    }

    fn write_attr<T: serde::Serialize>(
        conn: &Connection,
        variant: &Variant,
        attribute: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| TestscopeError::IndexCorrupt(format!("{}: {}", attribute, e)))?;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes())?;
        let compressed = encoder.finish()?;

        conn.execute(
            "INSERT INTO alldata (dataid, data) VALUES (?1, ?2)
             ON CONFLICT(dataid) DO UPDATE SET data = excluded.data",
            params![Self::dataid(variant, attribute), compressed],
        )?;
        Ok(())
    }

    /// Current committed state, ignoring anything staged but not yet
    /// flushed. Exposed for the change analyzer.
    pub fn snapshot(&self) -> VariantState {
        self.current.read().clone()
    }

    /// Stage one test's dependency record. Not visible via `snapshot()`
    /// until `flush()`.
    pub fn stage_test_record(&self, test_id: TestId, record: TestRecord) {
        self.staged.write().node_data.insert(test_id, record);
    }

    pub fn stage_mtime(&self, file: FilePath, mtime: i64) {
        self.staged.write().mtimes.insert(file, mtime);
    }

    pub fn stage_report(&self, test_id: TestId, report: serde_json::Value) {
        self.staged.write().reports.insert(test_id, report);
    }

    /// Stages a full replacement of `lastfailed`, including an explicit
    /// empty list (every previously-failing test now passes). See
    /// `StagedState::lastfailed` for why this can't be a bare `Vec`.
    pub fn stage_lastfailed(&self, failed: LastFailed) {
        self.staged.write().lastfailed = Some(failed);
    }

    /// Merge staged state into current and persist all four attributes in
    /// one transaction. The merge happens against a throwaway candidate,
    /// not `self.current` directly, so a failed write really does leave
    /// both `current` and `staged` exactly as they were -- a flush is
    /// all-or-nothing from the caller's point of view.
    pub fn flush(&self) -> Result<()> {
        let mut staged = self.staged.write();
        let mut current = self.current.write();

        let mut candidate = current.clone();
        candidate
            .mtimes
            .extend(staged.mtimes.iter().map(|(k, v)| (k.clone(), *v)));
        candidate
            .node_data
            .extend(staged.node_data.iter().map(|(k, v)| (k.clone(), v.clone())));
        candidate
            .reports
            .extend(staged.reports.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(lastfailed) = &staged.lastfailed {
            candidate.lastfailed = lastfailed.clone();
        }

        let conn = self.conn.write();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<()> {
            Self::write_attr(&conn, &self.variant, ATTR_MTIMES, &candidate.mtimes)?;
            Self::write_attr(&conn, &self.variant, ATTR_NODE_DATA, &candidate.node_data)?;
            Self::write_attr(&conn, &self.variant, ATTR_REPORTS, &candidate.reports)?;
            Self::write_attr(&conn, &self.variant, ATTR_LASTFAILED, &candidate.lastfailed)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                *current = candidate;
                *staged = StagedState::default();
                tracing::debug!(variant = %self.variant, "flushed dependency index");
                Ok(())
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                tracing::warn!(variant = %self.variant, error = %e, "flush failed, index unchanged");
                Err(e)
            }
        }
    }

    /// Drop every test record and report for a test not present in
    /// `live_test_ids`; the same filter is applied to `lastfailed` (spec.md
    /// §4.C). The original disables garbage collection outright (a prior
    /// naive pass lost data); this requires the caller to supply the
    /// complete surviving set rather than guessing from staleness.
    pub fn gc(&self, live_test_ids: &std::collections::BTreeSet<TestId>) -> Result<()> {
        {
            let mut current = self.current.write();
            current.node_data.retain(|id, _| live_test_ids.contains(id));
            current.reports.retain(|id, _| live_test_ids.contains(id));
            current.lastfailed.retain(|id| live_test_ids.contains(id));
        }

        let conn = self.conn.write();
        let current = self.current.read();
        Self::write_attr(&conn, &self.variant, ATTR_NODE_DATA, &current.node_data)?;
        Self::write_attr(&conn, &self.variant, ATTR_REPORTS, &current.reports)?;
        Self::write_attr(&conn, &self.variant, ATTR_LASTFAILED, &current.lastfailed)?;
        Ok(())
    }

    pub fn close_and_checkpoint(&self) -> Result<()> {
        let conn = self.conn.write();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
