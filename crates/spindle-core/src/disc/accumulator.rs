use crate::error::Result;
use crate::storage::Database;
use serde::Serialize;
use tracing::trace;

/// Space taken on the open disc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Usage {
    pub manifest_bytes: u64,
    pub file_bytes: u64,
}

impl Usage {
    /// The manifest travels on the disc too, so it counts against the budget.
    pub fn total(&self) -> u64 {
        self.manifest_bytes + self.file_bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    UnderBudget,
    OverBudget,
}

#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub disc_id: i64,
    pub usage: Usage,
    pub verdict: Verdict,
}

/// Tracks the open disc's usage against the capacity threshold.
///
/// Usage is recomputed from the manifest on every call instead of being
/// carried in memory.
pub struct DiscAccumulator<'a> {
    db: &'a Database,
    threshold: u64,
}

impl<'a> DiscAccumulator<'a> {
    pub fn new(db: &'a Database, threshold: u64) -> Self {
        Self { db, threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn usage(&self, disc_id: i64) -> Result<Usage> {
        Ok(Usage {
            manifest_bytes: self.db.manifest_size()?,
            file_bytes: self.db.sum_copied_size(disc_id)?,
        })
    }

    /// Check the open disc after a copy of `file_size` bytes was committed.
    /// Over budget means strictly greater than the threshold.
    pub fn admit(&self, file_size: u64) -> Result<Admission> {
        let disc_id = self.db.require_current_disc()?;
        let usage = self.usage(disc_id)?;
        let verdict = if usage.total() > self.threshold {
            Verdict::OverBudget
        } else {
            Verdict::UnderBudget
        };
        trace!(
            "Admitted {} bytes to disc {}: {} / {} ({:?})",
            file_size,
            disc_id,
            usage.total(),
            self.threshold,
            verdict
        );
        Ok(Admission {
            disc_id,
            usage,
            verdict,
        })
    }
}
