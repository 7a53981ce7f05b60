use crate::detect::ChangeDetector;
use crate::disc::{DiscAccumulator, DiscRotator, DispatchHook, Rotation, Verdict};
use crate::error::Result;
use crate::hasher::{self, content::partial_path};
use crate::progress::ProgressReporter;
use crate::repository::Repository;
use crate::scanner;
use crate::storage::models::NewFileVersion;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs one monitor pass over the watch directory.
pub struct MonitorEngine<'a> {
    repo: &'a Repository,
    hook: &'a dyn DispatchHook,
}

#[derive(Debug, Default, Clone)]
pub struct MonitorReport {
    pub duration: Duration,
    pub files_scanned: usize,
    pub files_unchanged: usize,
    pub files_copied: usize,
    pub files_failed: usize,
    pub bytes_copied: u64,
    /// Discs sealed during this pass, in order.
    pub discs_sealed: Vec<i64>,
    /// Discs whose interrupted rotation this pass finished.
    pub discs_resumed: Vec<i64>,
    pub discarded_partials: usize,
}

enum FileOutcome {
    Unchanged,
    Copied {
        bytes: u64,
        rotation: Option<Rotation>,
    },
}

impl<'a> MonitorEngine<'a> {
    pub fn new(repo: &'a Repository, hook: &'a dyn DispatchHook) -> Self {
        Self { repo, hook }
    }

    /// Walk the watch directory once, copying every new or modified file
    /// into staging and rotating discs as they fill up.
    ///
    /// Per-file failures are reported and counted; nothing is recorded for
    /// the file and the next pass tries it again.
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<MonitorReport> {
        let start = Instant::now();
        let mut report = MonitorReport::default();

        let rotator = DiscRotator::new(self.repo, self.hook);
        report.discs_resumed = rotator.resume()?;
        for disc_id in &report.discs_resumed {
            reporter.on_resumed(*disc_id);
        }
        report.discarded_partials = self.discard_uncommitted()?;

        let root = self.repo.watch_root()?;
        let ignore = self.repo.settings().ignore_globs();
        let detector = ChangeDetector::new(self.repo.manifest(), &root);
        let accumulator =
            DiscAccumulator::new(self.repo.manifest(), self.repo.settings().disc_size);

        info!("Monitoring {}", root.display());
        reporter.on_walk_start(&root);

        for entry in scanner::walk_files(&root, &ignore) {
            let path = match entry {
                Ok(path) => path,
                Err(e) if e.is_recoverable() => {
                    warn!("{}", e);
                    report.files_failed += 1;
                    reporter.on_file_error(None, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            report.files_scanned += 1;
            reporter.on_file_scanned(report.files_scanned);

            match self.process_file(&detector, &accumulator, &rotator, &path, reporter) {
                Ok(FileOutcome::Unchanged) => report.files_unchanged += 1,
                Ok(FileOutcome::Copied { bytes, rotation }) => {
                    report.files_copied += 1;
                    report.bytes_copied += bytes;
                    if let Some(rotation) = rotation {
                        reporter.on_rotation(&rotation);
                        report.discs_sealed.push(rotation.sealed);
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.files_failed += 1;
                    reporter.on_file_error(Some(&path), &e);
                }
                Err(e) => return Err(e),
            }
        }

        report.duration = start.elapsed();
        debug!(
            "Monitor pass completed in {:.2}s: {} scanned, {} copied, {} failed",
            report.duration.as_secs_f64(),
            report.files_scanned,
            report.files_copied,
            report.files_failed,
        );
        reporter.on_walk_complete(&report);
        Ok(report)
    }

    fn process_file(
        &self,
        detector: &ChangeDetector<'_>,
        accumulator: &DiscAccumulator<'_>,
        rotator: &DiscRotator<'_>,
        path: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<FileOutcome> {
        let change = detector.classify(path)?;
        if !change.needs_copy() {
            return Ok(FileOutcome::Unchanged);
        }
        reporter.on_change(path, &change);

        let db = self.repo.manifest();
        let rel_path = detector.relative_path(path)?;
        let fingerprint = hasher::fingerprint(path)?;
        let disc_id = db.require_current_disc()?;
        let description = change.describe();

        let version_id = db.insert_file_version(&NewFileVersion {
            rel_path: &rel_path,
            content_hash: &fingerprint.content_hash,
            file_size: fingerprint.size,
            mtime: fingerprint.mtime,
            disc_id,
            description: &description,
        })?;
        let staged = self.repo.layout().staged_file(version_id);
        if let Err(e) = hasher::copy_verified(path, &staged, &fingerprint) {
            db.discard_version(version_id)?;
            return Err(e);
        }
        db.mark_copied(version_id)?;
        debug!("{} -> version {} on disc {}", rel_path, version_id, disc_id);

        let admission = accumulator.admit(fingerprint.size)?;
        let rotation = match admission.verdict {
            Verdict::UnderBudget => None,
            Verdict::OverBudget => Some(rotator.rotate(&admission)?),
        };

        Ok(FileOutcome::Copied {
            bytes: fingerprint.size,
            rotation,
        })
    }

    /// Drop versions that never got marked copied (a crash between copy and
    /// commit): their staged bytes first, then the row. Returns how many
    /// staged files were removed.
    fn discard_uncommitted(&self) -> Result<usize> {
        let db = self.repo.manifest();
        let layout = self.repo.layout();
        let disc_id = db.require_current_disc()?;
        let mut discarded = 0;
        for version_id in db.uncommitted_versions(disc_id)? {
            let staged = layout.staged_file(version_id);
            for candidate in [partial_path(&staged), staged] {
                if candidate.exists() {
                    fs::remove_file(&candidate)?;
                    discarded += 1;
                    debug!("Discarded uncommitted copy {}", candidate.display());
                }
            }
            db.discard_version(version_id)?;
        }
        if discarded > 0 {
            info!("Discarded {} uncommitted staged files", discarded);
        }
        Ok(discarded)
    }
}
