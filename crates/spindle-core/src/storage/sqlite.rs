use crate::error::{Error, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use tracing::debug;

pub const SCHEMA_VERSION: i64 = 1;

/// The manifest: discs and file versions in a single SQLite file.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new manifest file (or initialize an empty one).
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::init(conn)
    }

    /// Open an existing manifest. Never creates the file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        // journal_mode answers with a row, so it is queried rather than batched.
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        self.conn.execute_batch(
            "PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (journal_mode={}, synchronous=FULL)", mode);
        Ok(())
    }

    /// Bring the schema up to `SCHEMA_VERSION`. A manifest written by a newer
    /// build is refused rather than guessed at.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            return Err(Error::Precondition(format!(
                "The manifest uses schema version {}, this build understands up to {}.",
                version, SCHEMA_VERSION
            )));
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        if version < SCHEMA_VERSION {
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
            debug!("Manifest schema initialized (version {})", SCHEMA_VERSION);
        }
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Logical size of the manifest in bytes (`page_count * page_size`).
    ///
    /// This counts pages still sitting in the WAL, so it matches what a
    /// snapshot of the manifest will occupy on the disc.
    pub fn manifest_size(&self) -> Result<u64> {
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Write a consistent, self-contained copy of the manifest to `dest`.
    /// An existing file at `dest` is replaced.
    pub fn snapshot_to(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            std::fs::remove_file(dest)?;
        }
        let dest_str = dest.to_string_lossy().into_owned();
        self.conn.execute("VACUUM INTO ?1", params![dest_str])?;

        // The copy ends up on read-only media, where a WAL database cannot be opened.
        let snapshot = Connection::open_with_flags(dest, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        let _: String = snapshot.query_row("PRAGMA journal_mode = DELETE", [], |row| row.get(0))?;
        drop(snapshot);

        debug!("Manifest snapshot written to {}", dest.display());
        Ok(())
    }
}
