use super::accumulator::{Admission, Usage};
use super::hook::{DispatchHook, DispatchReceipt, SealedDisc};
use crate::error::{Error, Result};
use crate::repository::Repository;
use crate::storage::models::{Disc, DiscState};
use std::fs;
use tracing::{debug, info, warn};

/// Where a disc is in its hand-off.
///
/// `Open` and `Dispatched` come straight from the manifest; `Sealing` and
/// `Sealed` are told apart by whether `preparing-N/` exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    Open,
    /// Sealed in the manifest, staging not yet relocated.
    Sealing,
    /// Relocated to `preparing-N/`, hook not yet started.
    Sealed,
    Dispatched,
}

/// Outcome of one rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub sealed: i64,
    pub opened: i64,
    pub usage: Usage,
    pub dispatched: bool,
    pub pid: Option<u32>,
}

pub struct DiscRotator<'a> {
    repo: &'a Repository,
    hook: &'a dyn DispatchHook,
}

impl<'a> DiscRotator<'a> {
    pub fn new(repo: &'a Repository, hook: &'a dyn DispatchHook) -> Self {
        Self { repo, hook }
    }

    /// Phase of `disc`, or `None` for a disc marked lost.
    pub fn phase(&self, disc: &Disc) -> Option<RotationPhase> {
        match &disc.state {
            DiscState::Open => Some(RotationPhase::Open),
            DiscState::Sealed {
                dispatched_at: Some(_),
                ..
            } => Some(RotationPhase::Dispatched),
            DiscState::Sealed {
                dispatched_at: None,
                ..
            } => {
                if self.repo.layout().preparing_dir(disc.id).is_dir() {
                    Some(RotationPhase::Sealed)
                } else {
                    Some(RotationPhase::Sealing)
                }
            }
            DiscState::Unavailable { .. } => None,
        }
    }

    /// Seal the full disc from `admission`, open the next one and hand the
    /// sealed disc to the hook.
    pub fn rotate(&self, admission: &Admission) -> Result<Rotation> {
        let db = self.repo.manifest();
        let sealed = admission.disc_id;
        let opened = db.rotate_disc(sealed)?;
        info!(
            "Disc {} completed. Files: {}, DB: {}, Total: {}",
            sealed,
            admission.usage.file_bytes,
            admission.usage.manifest_bytes,
            admission.usage.total()
        );

        self.relocate_staging(sealed)?;
        info!("Disc {} started", opened);

        let receipt = self.dispatch(sealed)?;
        Ok(Rotation {
            sealed,
            opened,
            usage: admission.usage,
            dispatched: receipt.is_some(),
            pid: receipt.and_then(|r| r.pid),
        })
    }

    /// Finish rotations a previous run left half done. Returns the discs
    /// that were handed to the hook.
    pub fn resume(&self) -> Result<Vec<i64>> {
        let db = self.repo.manifest();
        let layout = self.repo.layout();
        let pending = db.undispatched_discs()?;
        // Only the most recently closed disc can still own the staging area.
        let newest_sealed = db
            .list_discs()?
            .iter()
            .filter(|d| d.state != DiscState::Open)
            .map(|d| d.id)
            .max();
        let mut resumed = Vec::new();

        for disc in pending {
            match self.phase(&disc) {
                Some(RotationPhase::Sealing) => {
                    if layout.iso_file(disc.id).is_file() {
                        debug!("Disc {} already has an image, recording dispatch", disc.id);
                        db.mark_dispatched(disc.id)?;
                        continue;
                    }
                    if Some(disc.id) != newest_sealed || !layout.staging_dir().is_dir() {
                        warn!(
                            "Disc {} is sealed but neither {} nor its image exist; skipping",
                            disc.id,
                            layout.preparing_dir(disc.id).display()
                        );
                        continue;
                    }
                    let current = db.require_current_disc()?;
                    if !db.copied_versions_on(current)?.is_empty() {
                        return Err(Error::InvariantViolation(format!(
                            "staging holds copies for disc {} while disc {} was never relocated",
                            current, disc.id
                        )));
                    }
                    info!("Resuming interrupted rotation of disc {}", disc.id);
                    self.relocate_staging(disc.id)?;
                }
                Some(RotationPhase::Sealed) => {
                    fs::create_dir_all(layout.staging_files_dir())?;
                }
                _ => continue,
            }
            if self.dispatch(disc.id)?.is_some() {
                resumed.push(disc.id);
            }
        }

        fs::create_dir_all(layout.staging_files_dir())?;
        Ok(resumed)
    }

    /// Snapshot the manifest into staging, move staging to `preparing-N/`
    /// and start an empty staging area.
    fn relocate_staging(&self, disc_id: i64) -> Result<()> {
        let layout = self.repo.layout();
        let preparing = layout.preparing_dir(disc_id);
        if preparing.exists() {
            return Err(Error::InvariantViolation(format!(
                "{} already exists",
                preparing.display()
            )));
        }

        fs::create_dir_all(layout.staging_files_dir())?;
        self.repo.manifest().snapshot_to(&layout.staging_manifest())?;
        fs::rename(layout.staging_dir(), &preparing)?;
        fs::create_dir_all(layout.staging_files_dir())?;
        debug!("Staging for disc {} moved to {}", disc_id, preparing.display());
        Ok(())
    }

    /// Start the hook for a relocated disc. A hook that fails to start is
    /// logged and retried by the next `resume`; it never fails the run.
    fn dispatch(&self, disc_id: i64) -> Result<Option<DispatchReceipt>> {
        let layout = self.repo.layout();
        let sealed = SealedDisc {
            root: layout.root().to_path_buf(),
            disc_id,
            preparing_dir: layout.preparing_dir(disc_id),
            notify: self.repo.settings().email.clone(),
        };
        match self.hook.dispatch(&sealed) {
            Ok(receipt) => {
                self.repo.manifest().mark_dispatched(disc_id)?;
                match receipt.pid {
                    Some(pid) => info!("Started background processing of disc {} (PID={})", disc_id, pid),
                    None => info!("Started background processing of disc {}", disc_id),
                }
                Ok(Some(receipt))
            }
            Err(e) => {
                warn!("Could not start processing of disc {}: {}", disc_id, e);
                Ok(None)
            }
        }
    }
}
