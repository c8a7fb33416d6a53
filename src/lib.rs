//! Resumable pipeline core for turning long-form audio into reviewed,
//! multi-language, publishable transcripts.
//!
//! Every piece of pipeline state lives in SQLite; the in-process objects
//! are stateless coordinators over it, so a crash at any point resumes
//! from the last committed unit of work. Hardware, network, and publishing
//! integrations sit behind the traits in [`backend`].

pub mod backend;
pub mod config;
pub mod database;
pub mod error;
pub mod fetch;
pub mod llm;
pub mod pipeline;
pub mod resources;
pub mod retry;
pub mod review;
pub mod scheduler;

pub use config::Config;
pub use database::{Database, EpisodeStage, WorkStatus};
pub use error::PipelineError;
pub use fetch::HttpFetcher;
pub use llm::OllamaGenerator;
pub use pipeline::{next_step, Pipeline, Step};
pub use resources::{ModelPool, OwnerToken};
pub use retry::{BatchRetry, RetryPolicy};
pub use review::DiffEngine;
pub use scheduler::SegmentScheduler;
