#![allow(dead_code)]

use filetime::{set_file_mtime, FileTime};
use spindle_core::disc::{DispatchHook, DispatchReceipt, SealedDisc};
use spindle_core::{Repository, Settings};
use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

/// Hook double: remembers every dispatch, optionally refusing to start.
#[derive(Default)]
pub struct RecordingHook {
    pub calls: RefCell<Vec<SealedDisc>>,
    pub fail: bool,
}

impl RecordingHook {
    pub fn failing() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            fail: true,
        }
    }

    pub fn disc_ids(&self) -> Vec<i64> {
        self.calls.borrow().iter().map(|c| c.disc_id).collect()
    }
}

impl DispatchHook for RecordingHook {
    fn dispatch(&self, disc: &SealedDisc) -> io::Result<DispatchReceipt> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no /bin/sh here"));
        }
        self.calls.borrow_mut().push(disc.clone());
        Ok(DispatchReceipt { pid: None })
    }
}

/// A watch directory plus a repository whose budget is `budget` bytes on top
/// of what the freshly created manifest already occupies.
pub struct Fixture {
    pub watch: TempDir,
    pub work: TempDir,
    pub root: PathBuf,
    pub threshold: u64,
}

impl Fixture {
    pub fn new(budget: u64) -> Self {
        let watch = tempdir().unwrap();
        let work = tempdir().unwrap();
        let root = work.path().join("repo");

        let repo = Repository::init(&root, watch.path()).unwrap();
        let threshold = repo.manifest().manifest_size().unwrap() + budget;
        let mut settings: Settings = repo.settings().clone();
        settings.disc_size = threshold;
        settings.email = "backup@example.org".to_string();
        settings.save(&repo.layout().settings_file()).unwrap();

        Self {
            watch,
            work,
            root,
            threshold,
        }
    }

    pub fn open(&self) -> Repository {
        Repository::open(&self.root).unwrap()
    }

    pub fn watch_path(&self, rel: &str) -> PathBuf {
        self.watch.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &[u8], mtime: i64) -> PathBuf {
        let path = self.watch_path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
        path
    }
}

/// Every regular file under `dir`, recursively.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else if path.is_file() {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}
