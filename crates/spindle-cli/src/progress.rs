use indicatif::{ProgressBar, ProgressStyle};
use spindle_core::{Classification, MonitorReport, ProgressReporter, Rotation};
use std::path::Path;
use std::time::Duration;

/// Interactive reporter: a spinner while walking, one line per copied file.
///
/// Disc transitions are already logged at `info`, so they are not repeated.
pub struct CliReporter {
    pb: ProgressBar,
}

impl CliReporter {
    pub fn new() -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        Self { pb }
    }
}

impl ProgressReporter for CliReporter {
    fn on_walk_start(&self, root: &Path) {
        self.pb.set_message(format!("Scanning {}", root.display()));
        self.pb.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_file_scanned(&self, files_scanned: usize) {
        self.pb
            .set_message(format!("Scanning... {} files checked", files_scanned));
    }

    fn on_change(&self, path: &Path, change: &Classification) {
        self.pb
            .println(format!("{}: {}", path.display(), change.describe()));
    }

    fn on_walk_complete(&self, _report: &MonitorReport) {
        self.pb.finish_and_clear();
    }
}

// A pass that fails never reaches on_walk_complete.
impl Drop for CliReporter {
    fn drop(&mut self) {
        if !self.pb.is_finished() {
            self.pb.finish_and_clear();
        }
    }
}

/// Cron reporter: plain terse lines, nothing at all when nothing changed.
pub struct CronReporter;

impl ProgressReporter for CronReporter {
    fn on_change(&self, path: &Path, _change: &Classification) {
        println!("+ {}", path.display());
    }

    fn on_rotation(&self, rotation: &Rotation) {
        println!(" \\--- Disc {} completed --- ", rotation.sealed);
        println!(" /--- Disc {} started --- ", rotation.opened);
        if let Some(pid) = rotation.pid {
            println!(
                "  - Background processing of disc {} (PID={})",
                rotation.sealed, pid
            );
        }
    }

    fn on_resumed(&self, disc_id: i64) {
        println!("  - Resumed processing of disc {}", disc_id);
    }
}
