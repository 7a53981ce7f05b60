use crate::detect::Classification;
use crate::disc::Rotation;
use crate::engine::MonitorReport;
use crate::error::Error;
use std::path::Path;

/// Trait for reporting monitor progress.
///
/// The CLI implements it with indicatif (interactive) or plain lines (cron).
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_walk_start(&self, _root: &Path) {}
    fn on_file_scanned(&self, _files_scanned: usize) {}
    fn on_change(&self, _path: &Path, _change: &Classification) {}
    fn on_file_error(&self, _path: Option<&Path>, _error: &Error) {}
    fn on_rotation(&self, _rotation: &Rotation) {}
    fn on_resumed(&self, _disc_id: i64) {}
    fn on_walk_complete(&self, _report: &MonitorReport) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
