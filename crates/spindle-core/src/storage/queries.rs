use super::models::*;
use super::sqlite::Database;
use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

/// Fixed-width UTC timestamp; lexicographic order is chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

const DISC_COLUMNS: &str = "id, state, started_at, completed_at, dispatched_at, lost_at";

const FILE_VERSION_COLUMNS: &str = "fv.id, fv.rel_path, fv.observed_at, fv.content_hash, \
     fv.file_size, fv.mtime, fv.disc_id, fv.description, fv.copied";

fn disc_from_row(row: &Row<'_>) -> rusqlite::Result<Disc> {
    let state_tag: String = row.get(1)?;
    let completed_at: Option<String> = row.get(3)?;
    let state = match state_tag.as_str() {
        "open" => DiscState::Open,
        "sealed" => DiscState::Sealed {
            completed_at: completed_at.unwrap_or_default(),
            dispatched_at: row.get(4)?,
        },
        "unavailable" => DiscState::Unavailable {
            completed_at,
            lost_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        },
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Text,
                format!("unknown disc state '{}'", other).into(),
            ))
        }
    };
    Ok(Disc {
        id: row.get(0)?,
        started_at: row.get(2)?,
        state,
    })
}

fn file_version_from_row(row: &Row<'_>) -> rusqlite::Result<FileVersion> {
    Ok(FileVersion {
        id: row.get(0)?,
        rel_path: row.get(1)?,
        observed_at: row.get(2)?,
        content_hash: row.get(3)?,
        file_size: row.get(4)?,
        mtime: row.get(5)?,
        disc_id: row.get(6)?,
        description: row.get(7)?,
        copied: row.get(8)?,
    })
}

fn open_disc_ids(conn: &Connection) -> rusqlite::Result<Vec<i64>> {
    let mut stmt =
        conn.prepare_cached("SELECT id FROM disc WHERE state = 'open' ORDER BY started_at DESC, id DESC")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn insert_open_disc(conn: &Connection) -> Result<i64> {
    if let Some(open) = open_disc_ids(conn)?.first() {
        return Err(Error::InvariantViolation(format!(
            "cannot open a new disc while disc {} is still open",
            open
        )));
    }
    conn.execute(
        "INSERT INTO disc (state, started_at) VALUES ('open', ?1)",
        params![now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn seal_open_disc(conn: &Connection, disc_id: i64) -> Result<()> {
    let open = open_disc_ids(conn)?;
    match open.as_slice() {
        [] => Err(Error::InvariantViolation(
            "there is no open disc to seal".to_string(),
        )),
        [only] if *only == disc_id => {
            conn.execute(
                "UPDATE disc SET state = 'sealed', completed_at = ?1 WHERE id = ?2",
                params![now_timestamp(), disc_id],
            )?;
            Ok(())
        }
        [only] => Err(Error::InvariantViolation(format!(
            "asked to seal disc {} but the open disc is {}",
            disc_id, only
        ))),
        many => Err(Error::InvariantViolation(format!(
            "{} discs are open at once: {:?}",
            many.len(),
            many
        ))),
    }
}

impl Database {
    // ── Discs ────────────────────────────────────────────────────

    /// Start a new open disc. Fails if one is already open.
    pub fn open_disc(&self) -> Result<i64> {
        let tx = self.connection().unchecked_transaction()?;
        let id = insert_open_disc(&tx)?;
        tx.commit()?;
        debug!("Opened disc {}", id);
        Ok(id)
    }

    /// The open disc, if any. With a healthy manifest this is always `Some`.
    pub fn current_disc_id(&self) -> rusqlite::Result<Option<i64>> {
        Ok(open_disc_ids(self.connection())?.first().copied())
    }

    /// The open disc, treating its absence as manifest corruption.
    pub fn require_current_disc(&self) -> Result<i64> {
        let open = open_disc_ids(self.connection())?;
        match open.as_slice() {
            [only] => Ok(*only),
            [] => Err(Error::InvariantViolation("no disc is open".to_string())),
            many => Err(Error::InvariantViolation(format!(
                "{} discs are open at once: {:?}",
                many.len(),
                many
            ))),
        }
    }

    /// Record completion on the open disc, which must be `disc_id`.
    pub fn seal_disc(&self, disc_id: i64) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        seal_open_disc(&tx, disc_id)?;
        tx.commit()?;
        debug!("Sealed disc {}", disc_id);
        Ok(())
    }

    /// Seal `disc_id` and open its successor in one transaction, so the
    /// manifest never shows zero open discs.
    pub fn rotate_disc(&self, disc_id: i64) -> Result<i64> {
        let tx = self.connection().unchecked_transaction()?;
        seal_open_disc(&tx, disc_id)?;
        let next = insert_open_disc(&tx)?;
        tx.commit()?;
        debug!("Rotated disc {} -> {}", disc_id, next);
        Ok(next)
    }

    pub fn mark_dispatched(&self, disc_id: i64) -> Result<()> {
        let updated = self.connection().execute(
            "UPDATE disc SET dispatched_at = ?1 WHERE id = ?2 AND state = 'sealed'",
            params![now_timestamp(), disc_id],
        )?;
        if updated == 0 {
            return Err(Error::InvariantViolation(format!(
                "disc {} is not sealed and cannot be dispatched",
                disc_id
            )));
        }
        Ok(())
    }

    /// Flag a sealed disc as lost. Returns `false` when it already was.
    pub fn mark_disc_unavailable(&self, disc_id: i64) -> Result<bool> {
        let tx = self.connection().unchecked_transaction()?;
        let disc = tx
            .query_row(
                &format!("SELECT {} FROM disc WHERE id = ?1", DISC_COLUMNS),
                params![disc_id],
                disc_from_row,
            )
            .optional()?
            .ok_or(Error::UnknownDisc(disc_id))?;

        let changed = match disc.state {
            DiscState::Open => return Err(Error::DiscStillOpen(disc_id)),
            DiscState::Unavailable { .. } => false,
            DiscState::Sealed { .. } => {
                tx.execute(
                    "UPDATE disc SET state = 'unavailable', lost_at = ?1 WHERE id = ?2",
                    params![now_timestamp(), disc_id],
                )?;
                true
            }
        };
        tx.commit()?;
        Ok(changed)
    }

    pub fn get_disc(&self, disc_id: i64) -> rusqlite::Result<Option<Disc>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM disc WHERE id = ?1", DISC_COLUMNS),
                params![disc_id],
                disc_from_row,
            )
            .optional()
    }

    pub fn list_discs(&self) -> rusqlite::Result<Vec<Disc>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("SELECT {} FROM disc ORDER BY id", DISC_COLUMNS))?;
        let discs = stmt
            .query_map([], disc_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(discs)
    }

    /// Sealed discs whose hand-off to the image hook was never recorded.
    pub fn undispatched_discs(&self) -> rusqlite::Result<Vec<Disc>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM disc WHERE state = 'sealed' AND dispatched_at IS NULL ORDER BY id",
            DISC_COLUMNS
        ))?;
        let discs = stmt
            .query_map([], disc_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(discs)
    }

    pub fn disc_summaries(&self) -> rusqlite::Result<Vec<DiscSummary>> {
        let mut stmt = self.connection().prepare(
            "SELECT d.id, d.state, d.started_at, d.completed_at, d.dispatched_at, d.lost_at, \
                    COUNT(fv.id), COALESCE(SUM(fv.file_size), 0) \
             FROM disc d \
             LEFT JOIN file_version fv ON fv.disc_id = d.id AND fv.copied = 1 \
             GROUP BY d.id \
             ORDER BY d.id",
        )?;
        let summaries = stmt
            .query_map([], |row| {
                Ok(DiscSummary {
                    disc: disc_from_row(row)?,
                    copied_files: row.get(6)?,
                    copied_bytes: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(summaries)
    }

    // ── File Versions ────────────────────────────────────────────

    /// Record a version that has not been copied yet.
    pub fn insert_file_version(&self, new: &NewFileVersion<'_>) -> rusqlite::Result<i64> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO file_version \
             (rel_path, observed_at, content_hash, file_size, mtime, disc_id, description, copied) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![
                new.rel_path,
                now_timestamp(),
                new.content_hash,
                new.file_size as i64,
                new.mtime,
                new.disc_id,
                new.description,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Flip the copied flag. The row must exist and not be copied already.
    pub fn mark_copied(&self, version_id: i64) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE file_version SET copied = 1 WHERE id = ?1 AND copied = 0",
            params![version_id],
        )?;
        if updated != 1 {
            return Err(Error::InvariantViolation(format!(
                "file version {} is missing or already copied",
                version_id
            )));
        }
        tx.commit()?;
        Ok(())
    }

    /// Newest copied version of `rel_path`, by observation time.
    pub fn latest_copied_version(&self, rel_path: &str) -> rusqlite::Result<Option<LatestVersion>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {}, d.state FROM file_version fv \
                     JOIN disc d ON d.id = fv.disc_id \
                     WHERE fv.rel_path = ?1 AND fv.copied = 1 \
                     ORDER BY fv.observed_at DESC, fv.id DESC LIMIT 1",
                    FILE_VERSION_COLUMNS
                ),
                params![rel_path],
                |row| {
                    let state: String = row.get(9)?;
                    Ok(LatestVersion {
                        version: file_version_from_row(row)?,
                        disc_available: state != "unavailable",
                    })
                },
            )
            .optional()
    }

    /// All versions of `rel_path`, oldest first, copied or not.
    pub fn file_versions_for(&self, rel_path: &str) -> rusqlite::Result<Vec<FileVersion>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM file_version fv WHERE fv.rel_path = ?1 ORDER BY fv.observed_at, fv.id",
            FILE_VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map(params![rel_path], file_version_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    /// Copied versions stored on `disc_id`, in copy order.
    pub fn copied_versions_on(&self, disc_id: i64) -> rusqlite::Result<Vec<FileVersion>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM file_version fv WHERE fv.disc_id = ?1 AND fv.copied = 1 ORDER BY fv.id",
            FILE_VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map(params![disc_id], file_version_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    pub fn count_file_versions(&self) -> rusqlite::Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM file_version", [], |row| row.get(0))
    }

    pub fn sum_copied_size(&self, disc_id: i64) -> rusqlite::Result<u64> {
        let total: i64 = self.connection().query_row(
            "SELECT COALESCE(SUM(file_size), 0) FROM file_version WHERE disc_id = ?1 AND copied = 1",
            params![disc_id],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    /// Ids of versions on `disc_id` whose copy was never confirmed.
    pub fn uncommitted_versions(&self, disc_id: i64) -> rusqlite::Result<Vec<i64>> {
        let mut stmt = self.connection().prepare(
            "SELECT id FROM file_version WHERE disc_id = ?1 AND copied = 0 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![disc_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Delete a version whose copy never completed. Copied rows are left
    /// alone; returns whether a row was removed.
    pub fn discard_version(&self, version_id: i64) -> rusqlite::Result<bool> {
        let deleted = self.connection().execute(
            "DELETE FROM file_version WHERE id = ?1 AND copied = 0",
            params![version_id],
        )?;
        Ok(deleted == 1)
    }

    /// Paths whose most recent copy lives on `disc_id`.
    pub fn paths_last_copied_on(&self, disc_id: i64) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.connection().prepare(
            "SELECT fv.rel_path FROM file_version fv \
             WHERE fv.disc_id = ?1 AND fv.copied = 1 \
               AND fv.id = (SELECT latest.id FROM file_version latest \
                            WHERE latest.rel_path = fv.rel_path AND latest.copied = 1 \
                            ORDER BY latest.observed_at DESC, latest.id DESC LIMIT 1) \
             ORDER BY fv.rel_path",
        )?;
        let paths = stmt
            .query_map(params![disc_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    pub fn manifest_summary(&self) -> rusqlite::Result<ManifestSummary> {
        let conn = self.connection();
        let (distinct_files, file_versions, latest_addition) = conn.query_row(
            "SELECT COUNT(DISTINCT rel_path), COUNT(*), MAX(observed_at) \
             FROM file_version WHERE copied = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let (sealed_discs, lost_discs) = conn.query_row(
            "SELECT COALESCE(SUM(state = 'sealed'), 0), COALESCE(SUM(state = 'unavailable'), 0) FROM disc",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(ManifestSummary {
            distinct_files,
            file_versions,
            latest_addition,
            sealed_discs,
            lost_discs,
        })
    }
}
