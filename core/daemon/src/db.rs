//! SQLite persistence for sitescan-daemon.
//!
//! Two tables: `locations` (named sampling targets) and `scans` (one finished
//! per-AP series per row, stored as a JSON array). Multi-row writes run in a
//! single transaction so a session flush and a location delete never
//! interleave.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use sitescan_core::{ApKey, LocationKey, SeriesRecord, SeriesStore, StoredSeries, SENTINEL};
use std::collections::BTreeMap;
use std::path::PathBuf;

use sitescan_daemon_protocol::{LocationInfo, ScanInfo};

pub struct Db {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResetSummary {
    pub orphans_deleted: usize,
    pub series_zeroed: usize,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn add_location(&self, name: &str) -> Result<LocationInfo, String> {
        let name = name.trim();
        if name.is_empty() {
            return Err("Location name must not be empty".to_string());
        }
        self.with_connection(|conn| {
            conn.execute("INSERT INTO locations (name) VALUES (?1)", params![name])
                .map_err(|err| format!("Failed to insert location: {}", err))?;
            Ok(LocationInfo {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                scanning: false,
            })
        })
    }

    pub fn get_location(&self, id: LocationKey) -> Result<Option<LocationInfo>, String> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, name FROM locations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(LocationInfo {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        scanning: false,
                    })
                },
            )
            .optional()
            .map_err(|err| format!("Failed to query location: {}", err))
        })
    }

    pub fn list_locations(&self) -> Result<Vec<LocationInfo>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name FROM locations ORDER BY id ASC")
                .map_err(|err| format!("Failed to prepare locations query: {}", err))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LocationInfo {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        scanning: false,
                    })
                })
                .map_err(|err| format!("Failed to query locations: {}", err))?;

            let mut locations = Vec::new();
            for row in rows {
                locations
                    .push(row.map_err(|err| format!("Failed to decode location row: {}", err))?);
            }
            Ok(locations)
        })
    }

    /// Deletes the location and every series stored for it. Returns whether
    /// the location existed.
    pub fn delete_location(&self, id: LocationKey) -> Result<bool, String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;
            tx.execute("DELETE FROM scans WHERE location_id = ?1", params![id])
                .map_err(|err| format!("Failed to delete scans: {}", err))?;
            let removed = tx
                .execute("DELETE FROM locations WHERE id = ?1", params![id])
                .map_err(|err| format!("Failed to delete location: {}", err))?;
            tx.commit()
                .map_err(|err| format!("Failed to commit location delete: {}", err))?;
            Ok(removed > 0)
        })
    }

    pub fn insert_series_batch(&self, records: &[SeriesRecord]) -> Result<(), String> {
        if records.is_empty() {
            return Ok(());
        }
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO scans (location_id, bssid, ssid, recorded_at, series) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(|err| format!("Failed to prepare scan insert: {}", err))?;
                for record in records {
                    let series = serde_json::to_string(&record.series)
                        .map_err(|err| format!("Failed to serialize series: {}", err))?;
                    stmt.execute(params![
                        record.location,
                        record.ap,
                        record.display_name,
                        format_timestamp(record.recorded_at),
                        series
                    ])
                    .map_err(|err| format!("Failed to insert scan: {}", err))?;
                }
            }
            tx.commit()
                .map_err(|err| format!("Failed to commit scans: {}", err))?;
            Ok(())
        })
    }

    /// Every stored series for one location, newest first.
    pub fn list_scans(&self, location: LocationKey) -> Result<Vec<ScanInfo>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, bssid, ssid, recorded_at, series FROM scans \
                     WHERE location_id = ?1 ORDER BY recorded_at DESC, id DESC",
                )
                .map_err(|err| format!("Failed to prepare scans query: {}", err))?;
            let rows = stmt
                .query_map(params![location], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(|err| format!("Failed to query scans: {}", err))?;

            let mut scans = Vec::new();
            for row in rows {
                let (id, bssid, ssid, recorded_at, payload) =
                    row.map_err(|err| format!("Failed to decode scan row: {}", err))?;
                let series = serde_json::from_str(&payload)
                    .map_err(|err| format!("Failed to parse series for {}: {}", bssid, err))?;
                scans.push(ScanInfo {
                    id,
                    location_id: location,
                    bssid,
                    ssid,
                    recorded_at,
                    series,
                });
            }
            Ok(scans)
        })
    }

    /// Newest stored series per AP for one location.
    pub fn latest_series(
        &self,
        location: LocationKey,
    ) -> Result<BTreeMap<ApKey, StoredSeries>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT bssid, ssid, series FROM scans WHERE location_id = ?1 \
                     ORDER BY recorded_at ASC, id ASC",
                )
                .map_err(|err| format!("Failed to prepare scans query: {}", err))?;
            let rows = stmt
                .query_map(params![location], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|err| format!("Failed to query scans: {}", err))?;

            let mut latest = BTreeMap::new();
            for row in rows {
                let (bssid, ssid, payload) =
                    row.map_err(|err| format!("Failed to decode scan row: {}", err))?;
                let series = serde_json::from_str(&payload)
                    .map_err(|err| format!("Failed to parse series for {}: {}", bssid, err))?;
                latest.insert(
                    bssid,
                    StoredSeries {
                        display_name: ssid,
                        series,
                    },
                );
            }
            Ok(latest)
        })
    }

    /// Drops series whose location is gone and overwrites the rest with
    /// `series_len` sentinels.
    pub fn reset_stored(&self, series_len: usize) -> Result<ResetSummary, String> {
        let zeros = serde_json::to_string(&vec![SENTINEL; series_len])
            .map_err(|err| format!("Failed to serialize zero series: {}", err))?;
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;
            let orphans_deleted = tx
                .execute(
                    "DELETE FROM scans WHERE location_id NOT IN (SELECT id FROM locations)",
                    [],
                )
                .map_err(|err| format!("Failed to delete orphaned scans: {}", err))?;
            let series_zeroed = tx
                .execute("UPDATE scans SET series = ?1", params![zeros])
                .map_err(|err| format!("Failed to zero stored series: {}", err))?;
            tx.commit()
                .map_err(|err| format!("Failed to commit reset: {}", err))?;
            Ok(ResetSummary {
                orphans_deleted,
                series_zeroed,
            })
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS locations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS scans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    location_id INTEGER NOT NULL,
                    bssid TEXT NOT NULL,
                    ssid TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    series TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS scans_location_idx ON scans (location_id, bssid);
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl SeriesStore for Db {
    fn insert(&self, record: &SeriesRecord) -> Result<(), String> {
        self.insert_series_batch(std::slice::from_ref(record))
    }

    fn insert_batch(&self, records: &[SeriesRecord]) -> Result<(), String> {
        self.insert_series_batch(records)
    }
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
