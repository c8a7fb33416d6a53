//! Chapter step: ask the generator for a chapter outline over the full
//! transcript, validate it, and attach cues to their chapters.

use super::Pipeline;
use crate::database::{Episode, EpisodeStage, NewChapter, TranscriptCue};
use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use crate::review::format_timestamp;
use serde_json::json;

impl Pipeline {
    pub(super) async fn step_chapter(&self, episode: &Episode) -> Result<(), PipelineError> {
        let cues = self.db.get_cues(episode.id)?;
        if cues.is_empty() {
            // Nothing transcribable came out of the audio; an empty
            // chapter set is the correct outline for it.
            log::warn!("episode {}: no cues, skipping chapter extraction", episode.id);
            self.db.replace_chapters(episode.id, &[])?;
            self.db
                .advance_stage(episode.id, EpisodeStage::Transcribed, EpisodeStage::Chaptered)?;
            return Ok(());
        }

        let duration = episode.duration.unwrap_or(f64::MAX);
        let prompt = build_chapter_prompt(&episode.title, &cues);
        let schema = json!([
            {"title": "string", "start_time": 0.0, "end_time": 0.0}
        ]);

        let policy = RetryPolicy::from(&self.config.retry);
        // Validation happens inside the retried closure: a structurally
        // broken outline is retried like any transient failure.
        let chapters = policy
            .execute(|| async {
                let value = self
                    .generator
                    .generate(&prompt, None, &schema)
                    .await?;
                let chapters: Vec<NewChapter> = serde_json::from_value(value)
                    .map_err(|e| PipelineError::Validation(format!("bad chapter shape: {}", e)))?;
                validate_chapters(&chapters, duration)?;
                Ok(chapters)
            })
            .await?;

        let n = self.db.replace_chapters(episode.id, &chapters)?;
        self.db
            .advance_stage(episode.id, EpisodeStage::Transcribed, EpisodeStage::Chaptered)?;
        log::info!("episode {}: {} chapters extracted", episode.id, n);
        Ok(())
    }
}

fn build_chapter_prompt(title: &str, cues: &[TranscriptCue]) -> String {
    let mut prompt = format!(
        "Propose chapters for the episode \"{}\" from its timestamped transcript. \
         Cover the whole runtime with non-overlapping ranges in order.\n\n",
        title
    );
    for cue in cues {
        prompt.push_str(&format!(
            "[{}] {}\n",
            format_timestamp(cue.start_time),
            cue.corrected_text.as_deref().unwrap_or(&cue.text)
        ));
    }
    prompt
}

fn validate_chapters(chapters: &[NewChapter], duration: f64) -> Result<(), PipelineError> {
    let mut prev_end = 0.0f64;
    for chapter in chapters {
        if chapter.title.trim().is_empty() {
            return Err(PipelineError::Validation("chapter with empty title".into()));
        }
        if chapter.start_time >= chapter.end_time {
            return Err(PipelineError::Validation(format!(
                "chapter '{}' has empty range {}..{}",
                chapter.title, chapter.start_time, chapter.end_time
            )));
        }
        if chapter.start_time < prev_end {
            return Err(PipelineError::Validation(format!(
                "chapter '{}' overlaps the previous one",
                chapter.title
            )));
        }
        if chapter.end_time > duration {
            return Err(PipelineError::Validation(format!(
                "chapter '{}' runs past the end of the recording",
                chapter.title
            )));
        }
        prev_end = chapter.end_time;
    }
    Ok(())
}
