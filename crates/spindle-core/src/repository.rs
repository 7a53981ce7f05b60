use crate::config::Settings;
use crate::disc::hook;
use crate::error::{Error, Result};
use crate::storage::Database;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Staged copies are grouped this many ids per directory.
pub const FILES_PER_BUCKET: i64 = 256;

/// Paths inside a repository working directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.toml")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.root.join("manifest.db")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn staging_files_dir(&self) -> PathBuf {
        self.staging_dir().join("files")
    }

    /// Where the manifest snapshot goes when the open disc is sealed.
    pub fn staging_manifest(&self) -> PathBuf {
        self.staging_dir().join("manifest.db")
    }

    pub fn staged_file(&self, version_id: i64) -> PathBuf {
        self.staging_files_dir()
            .join((version_id / FILES_PER_BUCKET).to_string())
            .join(version_id.to_string())
    }

    pub fn preparing_dir(&self, disc_id: i64) -> PathBuf {
        self.root.join(format!("preparing-{}", disc_id))
    }

    pub fn isos_dir(&self) -> PathBuf {
        self.root.join("isos")
    }

    pub fn iso_file(&self, disc_id: i64) -> PathBuf {
        self.isos_dir().join(format!("disc-{}.iso", disc_id))
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.root.join("hooks")
    }

    pub fn process_hook(&self) -> PathBuf {
        self.hooks_dir().join("process.sh")
    }

    pub fn make_iso_hook(&self) -> PathBuf {
        self.hooks_dir().join("make_iso.sh")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("spindle.lock")
    }
}

/// One invocation's handle on a backup repository: layout, settings and the
/// open manifest. Every component borrows what it needs from here.
pub struct Repository {
    layout: Layout,
    settings: Settings,
    db: Database,
}

impl Repository {
    /// Create a repository in `workdir` watching `watch_dir` with default settings.
    pub fn init(workdir: &Path, watch_dir: &Path) -> Result<Self> {
        let watch_dir = canonical_watch_dir(watch_dir)?;
        Self::init_with_settings(workdir, Settings::new(watch_dir))
    }

    /// Create a repository from explicit settings.
    ///
    /// `workdir` must be absent or empty and the watch directory must exist.
    pub fn init_with_settings(workdir: &Path, mut settings: Settings) -> Result<Self> {
        if workdir.exists() && fs::read_dir(workdir)?.next().is_some() {
            return Err(Error::Precondition(format!(
                "The working directory {} is not empty. Refusing to create a repository \
                 among unexpected pre-existing files.",
                workdir.display()
            )));
        }
        settings.watch_dir = canonical_watch_dir(&settings.watch_dir)?;

        fs::create_dir_all(workdir)?;
        let layout = Layout::new(workdir);
        fs::create_dir_all(layout.hooks_dir())?;
        fs::create_dir_all(layout.isos_dir())?;
        fs::create_dir_all(layout.staging_files_dir())?;
        hook::write_default_hooks(&layout)?;
        settings.save(&layout.settings_file())?;

        let db = Database::create(&layout.manifest_file())?;
        let disc_id = db.open_disc()?;
        info!(
            "Repository created in {} watching {} (disc {} open)",
            workdir.display(),
            settings.watch_dir.display(),
            disc_id
        );

        Ok(Self {
            layout,
            settings,
            db,
        })
    }

    /// Open an existing repository. No files or directories are created, but
    /// opening the manifest sets its journal pragmas and applies any pending
    /// schema migration.
    pub fn open(workdir: &Path) -> Result<Self> {
        if !workdir.is_dir() {
            return Err(Error::Precondition(format!(
                "The working directory {} does not exist.",
                workdir.display()
            )));
        }
        let layout = Layout::new(workdir);
        if !layout.manifest_file().is_file() {
            return Err(Error::Precondition(format!(
                "The working directory {} does not contain a manifest.",
                workdir.display()
            )));
        }
        if !layout.settings_file().is_file() {
            return Err(Error::Precondition(format!(
                "The working directory {} does not contain the settings file.",
                workdir.display()
            )));
        }

        let settings = Settings::load(&layout.settings_file())?;
        let db = Database::open(&layout.manifest_file())?;

        // A missing staging folder is only legitimate while a rotation is
        // half-way done; the rotator recreates it.
        if !layout.staging_dir().is_dir() && db.undispatched_discs()?.is_empty() {
            return Err(Error::Precondition(format!(
                "The working directory {} does not contain a staging folder.",
                workdir.display()
            )));
        }

        debug!("Opened repository {}", workdir.display());
        Ok(Self {
            layout,
            settings,
            db,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn manifest(&self) -> &Database {
        &self.db
    }

    /// The watch directory with symlinks resolved. Relative paths in the
    /// manifest are computed against this.
    pub fn watch_root(&self) -> Result<PathBuf> {
        canonical_watch_dir(&self.settings.watch_dir)
    }
}

fn canonical_watch_dir(watch_dir: &Path) -> Result<PathBuf> {
    match fs::canonicalize(watch_dir) {
        Ok(path) if path.is_dir() => Ok(path),
        _ => Err(Error::Precondition(format!(
            "The watch directory {} does not exist.",
            watch_dir.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_staged_files_are_bucketed() {
        let layout = Layout::new("/repo");
        assert_eq!(
            layout.staged_file(1),
            PathBuf::from("/repo/staging/files/0/1")
        );
        assert_eq!(
            layout.staged_file(255),
            PathBuf::from("/repo/staging/files/0/255")
        );
        assert_eq!(
            layout.staged_file(256),
            PathBuf::from("/repo/staging/files/1/256")
        );
        assert_eq!(
            layout.staged_file(1000),
            PathBuf::from("/repo/staging/files/3/1000")
        );
    }

    #[test]
    fn test_init_creates_layout_and_first_disc() {
        let watch = tempdir().unwrap();
        let work = tempdir().unwrap();
        let root = work.path().join("repo");

        let repo = Repository::init(&root, watch.path()).unwrap();
        let layout = repo.layout();
        assert!(layout.manifest_file().is_file());
        assert!(layout.settings_file().is_file());
        assert!(layout.staging_files_dir().is_dir());
        assert!(layout.isos_dir().is_dir());
        assert!(layout.process_hook().is_file());
        assert!(layout.make_iso_hook().is_file());
        assert_eq!(repo.manifest().current_disc_id().unwrap(), Some(1));
    }

    #[test]
    fn test_init_refuses_non_empty_workdir() {
        let watch = tempdir().unwrap();
        let work = tempdir().unwrap();
        fs::write(work.path().join("stray.txt"), "x").unwrap();

        let err = Repository::init(work.path(), watch.path()).err().unwrap();
        assert!(matches!(err, Error::Precondition(_)));
        assert!(!work.path().join("manifest.db").exists());
    }

    #[test]
    fn test_init_refuses_missing_watch_dir() {
        let work = tempdir().unwrap();
        let err = Repository::init(&work.path().join("repo"), &work.path().join("nope"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Precondition(_)));
        assert!(!work.path().join("repo").exists());
    }

    #[test]
    fn test_open_reports_missing_pieces() {
        let work = tempdir().unwrap();
        let err = Repository::open(work.path()).err().unwrap();
        assert!(err.to_string().contains("manifest"));

        let watch = tempdir().unwrap();
        let root = work.path().join("repo");
        Repository::init(&root, watch.path()).unwrap();
        fs::remove_dir_all(root.join("staging")).unwrap();
        let err = Repository::open(&root).err().unwrap();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_open_migrates_manifest_without_creating_directories() {
        let watch = tempdir().unwrap();
        let work = tempdir().unwrap();
        let root = work.path().join("repo");
        let layout = Repository::init(&root, watch.path()).unwrap().layout().clone();
        fs::remove_dir_all(layout.isos_dir()).unwrap();
        rusqlite::Connection::open(layout.manifest_file())
            .unwrap()
            .execute_batch("PRAGMA user_version = 0")
            .unwrap();

        let repo = Repository::open(&root).unwrap();
        let version: i64 = repo
            .manifest()
            .connection()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, crate::storage::sqlite::SCHEMA_VERSION);
        assert!(!layout.isos_dir().exists());
    }

    #[test]
    fn test_open_reads_back_settings() {
        let watch = tempdir().unwrap();
        let work = tempdir().unwrap();
        let root = work.path().join("repo");
        let mut settings = Settings::new(watch.path());
        settings.disc_size = 123_456;
        Repository::init_with_settings(&root, settings).unwrap();

        let repo = Repository::open(&root).unwrap();
        assert_eq!(repo.settings().disc_size, 123_456);
        assert_eq!(
            repo.watch_root().unwrap(),
            fs::canonicalize(watch.path()).unwrap()
        );
    }
}
