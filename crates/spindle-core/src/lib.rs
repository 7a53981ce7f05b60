pub mod config;
pub mod detect;
pub mod disc;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod progress;
pub mod repository;
pub mod scanner;
pub mod status;
pub mod storage;

pub use config::Settings;
pub use detect::{ChangeDetector, ChangeReason, Classification};
pub use disc::{DispatchHook, LostDiscReport, Rotation, ShellHook};
pub use engine::{MonitorEngine, MonitorReport};
pub use error::{Error, Result};
pub use progress::{ProgressReporter, SilentReporter};
pub use repository::{Layout, Repository};
pub use status::StatusReport;
