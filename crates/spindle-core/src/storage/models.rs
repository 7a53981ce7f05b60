use serde::Serialize;

/// Lifecycle of a disc. Timestamps are RFC 3339 strings in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DiscState {
    /// Receiving copies. Exactly one disc is in this state.
    Open,
    /// Closed to writes and handed (or about to be handed) to the image hook.
    Sealed {
        completed_at: String,
        dispatched_at: Option<String>,
    },
    /// Marked lost by the operator; its latest copies get re-queued.
    Unavailable {
        completed_at: Option<String>,
        lost_at: String,
    },
}

impl DiscState {
    pub fn label(&self) -> &'static str {
        match self {
            DiscState::Open => "open",
            DiscState::Sealed { .. } => "sealed",
            DiscState::Unavailable { .. } => "unavailable",
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, DiscState::Unavailable { .. })
    }
}

/// One rotation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disc {
    pub id: i64,
    pub started_at: String,
    #[serde(flatten)]
    pub state: DiscState,
}

/// One recorded copy event for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub id: i64,
    pub rel_path: String,
    pub observed_at: String,
    pub content_hash: String,
    pub file_size: i64,
    pub mtime: i64,
    pub disc_id: i64,
    pub description: String,
    pub copied: bool,
}

/// Fields supplied when recording a new, not yet copied, version.
#[derive(Debug, Clone)]
pub struct NewFileVersion<'a> {
    pub rel_path: &'a str,
    pub content_hash: &'a str,
    pub file_size: u64,
    pub mtime: i64,
    pub disc_id: i64,
    pub description: &'a str,
}

/// Most recent copied version of a path, with whether its disc is still usable.
#[derive(Debug, Clone)]
pub struct LatestVersion {
    pub version: FileVersion,
    pub disc_available: bool,
}

/// Per-disc totals for listings.
#[derive(Debug, Clone, Serialize)]
pub struct DiscSummary {
    #[serde(flatten)]
    pub disc: Disc,
    pub copied_files: i64,
    pub copied_bytes: i64,
}

/// Whole-manifest counters for status reports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManifestSummary {
    pub distinct_files: i64,
    pub file_versions: i64,
    pub latest_addition: Option<String>,
    pub sealed_discs: i64,
    pub lost_discs: i64,
}
