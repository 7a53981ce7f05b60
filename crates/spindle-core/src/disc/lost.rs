use crate::error::Result;
use crate::repository::Repository;
use serde::Serialize;
use tracing::info;

/// What marking a disc lost put back in the queue.
#[derive(Debug, Clone, Serialize)]
pub struct LostDiscReport {
    pub disc_id: i64,
    /// False when the disc had already been marked lost.
    pub newly_marked: bool,
    /// Paths whose newest copy was on the disc and that still exist; the next
    /// monitor pass copies them again.
    pub requeued: Vec<String>,
    /// Paths whose newest copy was on the disc but that are gone from the
    /// watch directory. Nothing can refresh these.
    pub missing: Vec<String>,
}

impl Repository {
    /// Mark a sealed disc unavailable. Its rows stay; the change detector
    /// treats every path last copied there as unseen from now on.
    pub fn mark_disc_lost(&self, disc_id: i64) -> Result<LostDiscReport> {
        let db = self.manifest();
        let newly_marked = db.mark_disc_unavailable(disc_id)?;
        let paths = db.paths_last_copied_on(disc_id)?;

        let watch_dir = self
            .watch_root()
            .unwrap_or_else(|_| self.settings().watch_dir.clone());
        let (requeued, missing): (Vec<String>, Vec<String>) = paths
            .into_iter()
            .partition(|rel| watch_dir.join(rel).is_file());

        info!(
            "Disc {} marked lost: {} files to refresh, {} no longer present",
            disc_id,
            requeued.len(),
            missing.len()
        );
        Ok(LostDiscReport {
            disc_id,
            newly_marked,
            requeued,
            missing,
        })
    }
}
