use crate::error::{Error, Result};
use crate::hasher::content::mtime_secs;
use crate::storage::Database;
use chrono::{Local, TimeZone};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path};

/// One attribute that differs from the last copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason {
    SizeChanged { old: u64, new: u64 },
    MtimeChanged { old: i64, new: i64 },
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeReason::SizeChanged { old, new } => {
                write!(f, "Size changed: {} -> {}", old, new)
            }
            ChangeReason::MtimeChanged { old, new } => write!(
                f,
                "Modification time changed: {} ({}) -> {} ({})",
                old,
                ctime(*old),
                new,
                ctime(*new)
            ),
        }
    }
}

fn ctime(secs: i64) -> String {
    match Local.timestamp_opt(secs, 0).single() {
        Some(t) => t.format("%a %b %e %H:%M:%S %Y").to_string(),
        None => "?".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No usable copy exists: never copied, or the newest copy sits on a
    /// disc that was marked lost.
    Unseen { lost_disc: Option<i64> },
    Unchanged,
    /// Ordered: size before modification time.
    Modified(Vec<ChangeReason>),
}

impl Classification {
    pub fn needs_copy(&self) -> bool {
        !matches!(self, Classification::Unchanged)
    }

    /// Text stored with the file version and shown to the operator.
    pub fn describe(&self) -> String {
        match self {
            Classification::Unseen { lost_disc: None } => "New file".to_string(),
            Classification::Unseen {
                lost_disc: Some(id),
            } => format!("Previous copy on lost disc {}", id),
            Classification::Unchanged => "Unchanged".to_string(),
            Classification::Modified(reasons) => reasons
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// Decides whether a file under the watch root needs a fresh copy.
///
/// Only size and whole-second mtime are compared; content is hashed later,
/// for files that are copied anyway.
pub struct ChangeDetector<'a> {
    db: &'a Database,
    root: &'a Path,
}

impl<'a> ChangeDetector<'a> {
    /// `root` must already be canonical.
    pub fn new(db: &'a Database, root: &'a Path) -> Self {
        Self { db, root }
    }

    /// Manifest key for `path`: relative to the root, `/`-separated.
    ///
    /// Names that are not valid UTF-8 are refused as a per-file error; a lossy
    /// conversion would let distinct files share one key.
    pub fn relative_path(&self, path: &Path) -> Result<String> {
        let rel = path.strip_prefix(self.root).map_err(|_| {
            Error::file(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path is outside the watch directory"),
            )
        })?;
        let mut parts = Vec::new();
        for component in rel.components() {
            if let Component::Normal(part) = component {
                let part = part.to_str().ok_or_else(|| {
                    Error::file(
                        path,
                        io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
                    )
                })?;
                parts.push(part);
            }
        }
        Ok(parts.join("/"))
    }

    pub fn classify(&self, path: &Path) -> Result<Classification> {
        let rel = self.relative_path(path)?;
        let latest = match self.db.latest_copied_version(&rel)? {
            None => return Ok(Classification::Unseen { lost_disc: None }),
            Some(latest) => latest,
        };
        if !latest.disc_available {
            return Ok(Classification::Unseen {
                lost_disc: Some(latest.version.disc_id),
            });
        }

        let metadata = fs::metadata(path).map_err(|e| Error::file(path, e))?;
        let size = metadata.len();
        let mtime = mtime_secs(&metadata).map_err(|e| Error::file(path, e))?;

        let stored = &latest.version;
        let mut reasons = Vec::new();
        if size != stored.file_size as u64 {
            reasons.push(ChangeReason::SizeChanged {
                old: stored.file_size as u64,
                new: size,
            });
        }
        if mtime != stored.mtime {
            reasons.push(ChangeReason::MtimeChanged {
                old: stored.mtime,
                new: mtime,
            });
        }

        if reasons.is_empty() {
            Ok(Classification::Unchanged)
        } else {
            Ok(Classification::Modified(reasons))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::NewFileVersion;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::tempdir;

    fn record(db: &Database, disc_id: i64, rel: &str, size: u64, mtime: i64) {
        let id = db
            .insert_file_version(&NewFileVersion {
                rel_path: rel,
                content_hash: "ab",
                file_size: size,
                mtime,
                disc_id,
                description: "New file",
            })
            .unwrap();
        db.mark_copied(id).unwrap();
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let db = Database::open_in_memory().unwrap();
        let root = Path::new("/watch");
        let detector = ChangeDetector::new(&db, root);
        assert_eq!(
            detector.relative_path(Path::new("/watch/a/b/c.txt")).unwrap(),
            "a/b/c.txt"
        );
        assert!(detector.relative_path(Path::new("/elsewhere/x")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_are_refused() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let db = Database::open_in_memory().unwrap();
        let root = Path::new("/watch");
        let detector = ChangeDetector::new(&db, root);
        let path = root.join(OsStr::from_bytes(b"dir/a\xff"));

        let err = detector.relative_path(&path).unwrap_err();
        assert!(matches!(err, Error::File { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_unseen_unchanged_modified() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let file = root.join("doc.txt");
        fs::write(&file, b"0123456789").unwrap();
        set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

        let db = Database::open_in_memory().unwrap();
        let disc = db.open_disc().unwrap();
        let detector = ChangeDetector::new(&db, &root);

        assert_eq!(
            detector.classify(&file).unwrap(),
            Classification::Unseen { lost_disc: None }
        );

        record(&db, disc, "doc.txt", 10, 1_700_000_000);
        assert_eq!(detector.classify(&file).unwrap(), Classification::Unchanged);

        // Same size, new mtime.
        set_file_mtime(&file, FileTime::from_unix_time(1_700_000_500, 0)).unwrap();
        assert_eq!(
            detector.classify(&file).unwrap(),
            Classification::Modified(vec![ChangeReason::MtimeChanged {
                old: 1_700_000_000,
                new: 1_700_000_500
            }])
        );

        // Size and mtime.
        fs::write(&file, b"01234567890123456789").unwrap();
        set_file_mtime(&file, FileTime::from_unix_time(1_700_000_900, 0)).unwrap();
        let class = detector.classify(&file).unwrap();
        let text = class.describe();
        assert!(text.contains("Size changed: 10 -> 20"));
        assert!(text.contains("Modification time changed"));
        assert!(text.contains(" | "));
    }

    #[test]
    fn test_uncopied_versions_are_ignored() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let file = root.join("half.bin");
        fs::write(&file, b"abc").unwrap();

        let db = Database::open_in_memory().unwrap();
        let disc = db.open_disc().unwrap();
        db.insert_file_version(&NewFileVersion {
            rel_path: "half.bin",
            content_hash: "ab",
            file_size: 3,
            mtime: 0,
            disc_id: disc,
            description: "New file",
        })
        .unwrap();

        let detector = ChangeDetector::new(&db, &root);
        assert_eq!(
            detector.classify(&file).unwrap(),
            Classification::Unseen { lost_disc: None }
        );
    }

    #[test]
    fn test_copy_on_lost_disc_reads_as_unseen() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let file = root.join("photo.jpg");
        fs::write(&file, b"jpeg").unwrap();
        set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let db = Database::open_in_memory().unwrap();
        let first = db.open_disc().unwrap();
        record(&db, first, "photo.jpg", 4, 1_600_000_000);
        db.rotate_disc(first).unwrap();
        db.mark_disc_unavailable(first).unwrap();

        let detector = ChangeDetector::new(&db, &root);
        let class = detector.classify(&file).unwrap();
        assert_eq!(
            class,
            Classification::Unseen {
                lost_disc: Some(first)
            }
        );
        assert!(class.needs_copy());
        assert_eq!(class.describe(), "Previous copy on lost disc 1");
    }

    #[test]
    fn test_vanished_file_is_recoverable_error() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let db = Database::open_in_memory().unwrap();
        let disc = db.open_disc().unwrap();
        record(&db, disc, "gone.txt", 1, 1);

        let detector = ChangeDetector::new(&db, &root);
        let err = detector.classify(&root.join("gone.txt")).unwrap_err();
        assert!(err.is_recoverable());
    }
}
