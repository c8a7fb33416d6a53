//! Download step: fetch the source media, dedup by content hash, record
//! the file and advance to `downloaded`.

use super::Pipeline;
use crate::database::{Episode, EpisodeStage};
use crate::error::PipelineError;
use crate::retry::RetryPolicy;

impl Pipeline {
    pub(super) async fn step_download(&self, episode: &Episode) -> Result<(), PipelineError> {
        let media_dir = self.config.data_dir.join("media");
        std::fs::create_dir_all(&media_dir)?;

        let policy = RetryPolicy::from(&self.config.retry);
        let url = episode.audio_url.clone();
        let media = policy
            .execute(|| self.fetcher.download(&url, &media_dir))
            .await?;

        // Dedup on content, not URL: the same recording republished under
        // a different address must not become a second episode.
        if let Some(other) = self.db.find_episode_by_hash(&media.content_hash)? {
            if other != episode.id {
                return Err(PipelineError::Validation(format!(
                    "content hash {} already belongs to episode {}",
                    media.content_hash, other
                )));
            }
        }

        // The fetcher rarely knows the duration; COALESCE in the store
        // keeps the feed-supplied value when it returns none.
        self.db.mark_downloaded(
            episode.id,
            &media.path.to_string_lossy(),
            media.duration,
            &media.content_hash,
        )?;
        self.db
            .advance_stage(episode.id, EpisodeStage::Init, EpisodeStage::Downloaded)?;
        log::info!(
            "episode {}: downloaded {} bytes, hash {}",
            episode.id,
            media.file_size,
            media.content_hash
        );
        Ok(())
    }
}
