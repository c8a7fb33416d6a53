//! Episode state machine and the runner that drives it.
//!
//! An episode moves through a linear sequence of stages; every stage short
//! of `published` maps to exactly one step. The runner looks up the step
//! for the current stage, executes it, and re-reads the stage: if the step
//! did not advance it (failed segments, review not approved yet) the run
//! ends there without error and a later run resumes from the same place.

mod chapters;
mod download;
mod publish;
mod review;
mod translate;

use crate::backend::{AudioSlicer, MediaFetcher, Publisher, StructuredGenerator};
use crate::config::Config;
use crate::database::{Database, Episode, EpisodeStage};
use crate::error::PipelineError;
use crate::resources::{ModelPool, OwnerToken};
use crate::review::DiffEngine;
use crate::scheduler::SegmentScheduler;
use std::sync::Arc;

/// One unit of stage-advancing work. Total over non-terminal stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Download,
    Transcribe,
    Chapter,
    Translate,
    Render,
    SyncReview,
    Publish,
}

/// The step that applies at `stage`, `None` once published. Every
/// non-terminal stage maps to a step, so the runner can never strand an
/// episode in a stage it has no handler for.
pub fn next_step(stage: EpisodeStage) -> Option<Step> {
    match stage {
        EpisodeStage::Init => Some(Step::Download),
        EpisodeStage::Downloaded => Some(Step::Transcribe),
        EpisodeStage::Transcribed => Some(Step::Chapter),
        EpisodeStage::Chaptered => Some(Step::Translate),
        EpisodeStage::Translated => Some(Step::Render),
        EpisodeStage::ReadyForReview => Some(Step::SyncReview),
        EpisodeStage::Approved => Some(Step::Publish),
        EpisodeStage::Published => None,
    }
}

pub struct Pipeline {
    db: Arc<Database>,
    pool: Arc<ModelPool>,
    config: Config,
    fetcher: Arc<dyn MediaFetcher>,
    generator: Arc<dyn StructuredGenerator>,
    publisher: Arc<dyn Publisher>,
    scheduler: SegmentScheduler,
    diff: DiffEngine,
}

impl Pipeline {
    /// Build a pipeline over shared resources. Segments left in
    /// `processing` by a crashed run are reset to `pending` here, before
    /// any new work starts.
    pub fn new(
        db: Arc<Database>,
        pool: Arc<ModelPool>,
        slicer: Arc<dyn AudioSlicer>,
        fetcher: Arc<dyn MediaFetcher>,
        generator: Arc<dyn StructuredGenerator>,
        publisher: Arc<dyn Publisher>,
        config: Config,
    ) -> Result<Self, PipelineError> {
        db.reset_stuck_segments()?;

        let scheduler = SegmentScheduler::new(
            db.clone(),
            pool.clone(),
            slicer,
            config.data_dir.join("artifacts"),
            config.segment_seconds,
            config.source_language.clone(),
        );
        let diff = DiffEngine::new(db.clone(), config.review_dir.clone());

        Ok(Self {
            db,
            pool,
            config,
            fetcher,
            generator,
            publisher,
            scheduler,
            diff,
        })
    }

    /// Classifies an episode for resume: only intermediate stages carry
    /// historical progress to pick up. A fresh episode is a new task, not
    /// a resume, and a published one is already complete.
    pub fn can_resume(episode: &Episode) -> (bool, String) {
        match episode.stage {
            EpisodeStage::Init => (false, "new task".to_string()),
            EpisodeStage::Published => (false, "already published".to_string()),
            stage => (true, format!("resumable at stage {}", stage)),
        }
    }

    /// Drive one episode as far as it will go. Steps that complete without
    /// advancing the stage end the run there; the returned stage tells the
    /// caller where the episode is waiting. Step errors propagate after
    /// their per-unit state has been persisted, so a later run picks up
    /// exactly where this one stopped.
    pub async fn run(&self, episode_id: i64) -> Result<EpisodeStage, PipelineError> {
        loop {
            let episode = self.load(episode_id)?;
            let before = episode.stage;
            let Some(step) = next_step(before) else {
                return Ok(before);
            };

            log::info!("episode {}: stage {}, running {:?}", episode_id, before, step);
            self.run_step(step, &episode).await?;

            let after = self.load(episode_id)?.stage;
            if after == before {
                log::info!(
                    "episode {}: {:?} did not advance past {}, stopping here",
                    episode_id,
                    step,
                    before
                );
                return Ok(after);
            }
        }
    }

    /// Execute a single step against the episode's current state.
    pub async fn run_step(&self, step: Step, episode: &Episode) -> Result<(), PipelineError> {
        match step {
            Step::Download => self.step_download(episode).await,
            Step::Transcribe => self.step_transcribe(episode),
            Step::Chapter => self.step_chapter(episode).await,
            Step::Translate => self.step_translate(episode).await,
            Step::Render => self.step_render(episode),
            Step::SyncReview => self.step_sync_review(episode),
            Step::Publish => self.step_publish(episode),
        }
    }

    /// Transcription step: fan out (idempotent), then walk the segments in
    /// index order. The secondary alignment handle is loaded once for the
    /// whole loop and released once after it; a failing segment never stops
    /// its siblings. The scheduler advances the stage itself when the last
    /// segment completes.
    fn step_transcribe(&self, episode: &Episode) -> Result<(), PipelineError> {
        self.scheduler.fan_out(episode.id)?;

        // One span owner per pass: concurrent runs over different episodes
        // must serialize at the pool, never re-enter each other's span.
        let owner = OwnerToken::new();
        self.pool.load_secondary()?;
        let mut failures = 0usize;
        for segment in self.db.get_segments(episode.id)? {
            if let Err(e) = self.scheduler.process_segment(episode.id, &segment, &owner) {
                failures += 1;
                log::warn!(
                    "episode {} segment {}: {}",
                    episode.id,
                    segment.idx,
                    e
                );
            }
        }
        self.pool.release_secondary();

        if failures > 0 {
            log::warn!(
                "episode {}: transcription pass finished with {} failed segments",
                episode.id,
                failures
            );
        }
        Ok(())
    }

    fn load(&self, episode_id: i64) -> Result<Episode, PipelineError> {
        self.db
            .get_episode(episode_id)?
            .ok_or_else(|| PipelineError::Validation(format!("no episode {}", episode_id)))
    }
}
