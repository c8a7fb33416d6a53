//! External capability contracts consumed by the pipeline core.
//!
//! The core never speaks a provider wire protocol directly; everything
//! hardware- or network-shaped sits behind one of these closed traits.
//! Shipped implementations live in `fetch` (HTTP downloads) and `llm`
//! (Ollama structured generation); tests use in-memory fakes.

use crate::error::PipelineError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A cue produced by the speech model, with times relative to the start of
/// the artifact it was inferred from.
#[derive(Debug, Clone)]
pub struct RawCue {
    pub start: f64,
    pub end: f64,
    pub speaker: Option<String>,
    pub text: String,
}

/// Hardware-resident speech-to-text handle. `infer` is a pure function
/// over a local artifact.
pub trait SpeechHandle: Send {
    fn infer(&self, artifact: &Path, lang: &str) -> Result<Vec<RawCue>, PipelineError>;
}

/// Auxiliary per-language handle (tokenizer, punctuation model, …). Only
/// one is resident at a time; see [`crate::resources::ModelPool`].
pub trait AuxHandle: Send {
    fn key(&self) -> &str;
}

/// Heavyweight timestamp-alignment handle with an explicit load/release
/// lifetime spanning a whole episode's segment loop.
pub trait AlignHandle: Send {
    fn refine(&self, cues: &mut [RawCue]) -> Result<(), PipelineError>;
}

/// Allocates hardware-resident handles. An allocation failure here is
/// fatal ([`PipelineError::ResourceExhaustion`]).
pub trait HandleLoader: Send + Sync {
    fn load_primary(&self, model_id: &str) -> Result<Box<dyn SpeechHandle>, PipelineError>;
    fn load_auxiliary(&self, key: &str) -> Result<Box<dyn AuxHandle>, PipelineError>;
    fn load_secondary(&self) -> Result<Box<dyn AlignHandle>, PipelineError>;
}

/// Extracts the `[start, end)` slice of a source recording into `dest`.
pub trait AudioSlicer: Send + Sync {
    fn extract(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        dest: &Path,
    ) -> Result<(), PipelineError>;
}

/// Downloaded media plus the metadata the pipeline needs from it. Duration
/// is optional because plain HTTP fetches cannot determine it; feed metadata
/// recorded at episode creation fills the gap.
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub file_size: i64,
    pub content_hash: String,
    pub duration: Option<f64>,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch `url` into `dest_dir`. May fail terminally; the caller wraps
    /// this in a retry policy.
    async fn download(&self, url: &str, dest_dir: &Path)
        -> Result<DownloadedMedia, PipelineError>;
}

#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Generate a JSON value shaped by `schema`. A response that yields no
    /// parseable JSON surfaces as [`PipelineError::Validation`], which
    /// retry policies treat as an ordinary round failure.
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        schema: &Value,
    ) -> Result<Value, PipelineError>;
}

/// Record returned by the publishing integration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PublishedRecord {
    pub id: String,
    pub url: Option<String>,
}

pub trait Publisher: Send + Sync {
    fn publish(&self, title: &str, content: &str) -> Result<PublishedRecord, PipelineError>;
}
