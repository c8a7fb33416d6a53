use serde::{Deserialize, Serialize};

/// Ordered pipeline stages for an episode. Ordering is significant: it is
/// the sole input to step selection, and the stage only moves forward
/// except for an explicit administrative reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStage {
    Init,
    Downloaded,
    Transcribed,
    Chaptered,
    Translated,
    ReadyForReview,
    Approved,
    Published,
}

impl EpisodeStage {
    pub fn next(self) -> Option<EpisodeStage> {
        match self {
            Self::Init => Some(Self::Downloaded),
            Self::Downloaded => Some(Self::Transcribed),
            Self::Transcribed => Some(Self::Chaptered),
            Self::Chaptered => Some(Self::Translated),
            Self::Translated => Some(Self::ReadyForReview),
            Self::ReadyForReview => Some(Self::Approved),
            Self::Approved => Some(Self::Published),
            Self::Published => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Published
    }
}

impl std::fmt::Display for EpisodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Downloaded => write!(f, "downloaded"),
            Self::Transcribed => write!(f, "transcribed"),
            Self::Chaptered => write!(f, "chaptered"),
            Self::Translated => write!(f, "translated"),
            Self::ReadyForReview => write!(f, "ready_for_review"),
            Self::Approved => write!(f, "approved"),
            Self::Published => write!(f, "published"),
        }
    }
}

impl From<String> for EpisodeStage {
    fn from(s: String) -> Self {
        match s.as_str() {
            "init" => Self::Init,
            "downloaded" => Self::Downloaded,
            "transcribed" => Self::Transcribed,
            "chaptered" => Self::Chaptered,
            "translated" => Self::Translated,
            "ready_for_review" => Self::ReadyForReview,
            "approved" => Self::Approved,
            "published" => Self::Published,
            _ => Self::Init,
        }
    }
}

/// Work status shared by segments and translations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Default for WorkStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for WorkStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl WorkStatus {
    /// Terminal statuses need no further work this run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Aggregate root: one long-form recording working its way to publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub title: String,
    pub audio_url: String,
    /// Dedup key, set at download time; UNIQUE in the store.
    pub content_hash: Option<String>,
    pub stage: EpisodeStage,
    pub duration: Option<f64>,
    pub audio_path: Option<String>,
    pub review_path: Option<String>,
    pub metadata_json: Option<String>,
    pub published_record: Option<String>,
    pub added_date: String,
}

/// Fixed-width, independently-checkpointed partition of an episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSegment {
    pub id: i64,
    pub episode_id: i64,
    pub idx: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub status: WorkStatus,
    /// Transient extraction artifact; retained on failure so a resume can
    /// skip re-extraction, deleted on completion.
    pub artifact_path: Option<String>,
    pub retry_count: i64,
    pub error_message: Option<String>,
}

/// Smallest addressable piece of transcript output, owned by a segment.
/// Times are absolute within the episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptCue {
    pub id: i64,
    pub episode_id: i64,
    pub segment_id: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub speaker: Option<String>,
    pub text: String,
    /// Human correction; never overwrites the raw text.
    pub corrected_text: Option<String>,
    pub chapter_id: Option<i64>,
}

/// Dual-text translation row keyed by (cue, language). `original` is the
/// first AI-produced value and is immutable after first set — enforced by
/// database triggers, not application code; `current` is human-editable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub id: i64,
    pub cue_id: i64,
    pub language: String,
    pub original: Option<String>,
    pub current: Option<String>,
    pub edited: bool,
    pub status: WorkStatus,
    pub retry_count: i64,
    pub error_message: Option<String>,
}

/// Non-overlapping, sorted time range over an episode's cues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub episode_id: i64,
    pub title: String,
    pub start_time: f64,
    pub end_time: f64,
}

/// Per-status row counts used for stage resync and diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }

    pub fn all_completed(&self) -> bool {
        self.total() > 0 && self.completed == self.total()
    }

    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }
}

/// A cue produced by segment processing, ready for insertion. Times are
/// already absolute (segment start + cue-relative time).
#[derive(Debug, Clone)]
pub struct NewCue {
    pub start_time: f64,
    pub end_time: f64,
    pub speaker: Option<String>,
    pub text: String,
}

/// A chapter range parsed from structured generation, pre-validation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewChapter {
    pub title: String,
    pub start_time: f64,
    pub end_time: f64,
}

/// One row of the review document: a cue joined with its translation for
/// the document's language.
#[derive(Debug, Clone)]
pub struct ReviewRow {
    pub cue_id: i64,
    pub translation_id: i64,
    pub cue_start: f64,
    pub source_text: String,
    pub current: Option<String>,
}
