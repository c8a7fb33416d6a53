use thiserror::Error;

/// Typed error hierarchy for the pipeline core.
///
/// Each variant maps to a distinct handling policy: transient network
/// failures are retried with exponential backoff, resource exhaustion is
/// fatal at model-load time, an empty inference result is terminal for one
/// segment without touching its siblings, and validation failures count as
/// batch-retry round failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("accelerator allocation failed: {0}")]
    ResourceExhaustion(String),

    #[error("inference produced no cues for segment {segment_idx}")]
    EmptyResult { segment_idx: i64 },

    #[error("structured output failed validation: {0}")]
    Validation(String),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Database(e.to_string())
    }
}

/// Allows `.map_err(|e| format!("…", e))?` and `ok_or_else(|| format!(…))?`
/// to coerce into PipelineError without changing the call sites.
impl From<String> for PipelineError {
    fn from(s: String) -> Self {
        PipelineError::Other(s)
    }
}

/// Allows `.ok_or("literal string")?` to coerce into PipelineError.
impl From<&str> for PipelineError {
    fn from(s: &str) -> Self {
        PipelineError::Other(s.to_string())
    }
}
