use crate::disc::{DiscAccumulator, Usage};
use crate::error::Result;
use crate::repository::Repository;
use crate::storage::models::ManifestSummary;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// Snapshot of the repository for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub working_dir: PathBuf,
    pub watch_dir: PathBuf,
    pub email: String,
    pub current_disc: i64,
    pub disc_threshold: u64,
    pub usage: Usage,
    pub pct_full: u64,
    /// Share of current usage taken by the manifest.
    pub pct_database: u64,
    /// Manifest size as a share of the whole disc.
    pub pct_db_overhead: u64,
    pub available_isos: usize,
    #[serde(flatten)]
    pub summary: ManifestSummary,
}

fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        0
    } else {
        ((part as u128 * 100) / whole as u128) as u64
    }
}

impl Repository {
    pub fn status(&self) -> Result<StatusReport> {
        let db = self.manifest();
        let settings = self.settings();
        let current_disc = db.require_current_disc()?;
        let usage = DiscAccumulator::new(db, settings.disc_size).usage(current_disc)?;

        Ok(StatusReport {
            working_dir: self.layout().root().to_path_buf(),
            watch_dir: settings.watch_dir.clone(),
            email: settings.email.clone(),
            current_disc,
            disc_threshold: settings.disc_size,
            usage,
            pct_full: percent(usage.total(), settings.disc_size),
            pct_database: percent(usage.manifest_bytes, usage.total()),
            pct_db_overhead: percent(usage.manifest_bytes, settings.disc_size),
            available_isos: self.count_isos()?,
            summary: db.manifest_summary()?,
        })
    }

    fn count_isos(&self) -> Result<usize> {
        let dir = self.layout().isos_dir();
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "iso") {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_guards_zero() {
        assert_eq!(percent(10, 0), 0);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
    }
}
