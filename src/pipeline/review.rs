//! Render and sync-review steps around the human approval gate.

use super::Pipeline;
use crate::database::{Episode, EpisodeStage};
use crate::error::PipelineError;

impl Pipeline {
    /// Write one review document per target language and advance to
    /// `ready_for_review`.
    pub(super) fn step_render(&self, episode: &Episode) -> Result<(), PipelineError> {
        for language in &self.config.languages {
            self.diff.render(episode.id, language)?;
        }
        self.db
            .set_review_path(episode.id, &self.config.review_dir.to_string_lossy())?;
        self.db.advance_stage(
            episode.id,
            EpisodeStage::Translated,
            EpisodeStage::ReadyForReview,
        )?;
        Ok(())
    }

    /// Fold reviewer edits back into the store. The stage advances only
    /// when every language's document carries `approved: true`; otherwise
    /// this step completes without advancing and the runner stops here
    /// until the next run.
    pub(super) fn step_sync_review(&self, episode: &Episode) -> Result<(), PipelineError> {
        let mut all_approved = true;
        for language in &self.config.languages {
            let outcome = self.diff.sync(episode.id, language)?;
            if !outcome.approved {
                all_approved = false;
            }
        }

        if all_approved {
            self.db.advance_stage(
                episode.id,
                EpisodeStage::ReadyForReview,
                EpisodeStage::Approved,
            )?;
        } else {
            log::info!("episode {}: waiting for review approval", episode.id);
        }
        Ok(())
    }
}
