//! Fixed-width segment fan-out and checkpointed per-segment processing.
//!
//! Each segment is an independently retryable unit of transcription work.
//! The extracted artifact path is committed to the database *before*
//! inference starts, so a crash mid-inference resumes from the artifact
//! instead of re-extracting it.

use crate::backend::AudioSlicer;
use crate::database::{AudioSegment, Database, EpisodeStage, NewCue, WorkStatus};
use crate::error::PipelineError;
use crate::resources::{ModelPool, OwnerToken};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct SegmentScheduler {
    db: Arc<Database>,
    pool: Arc<ModelPool>,
    slicer: Arc<dyn AudioSlicer>,
    artifacts_dir: PathBuf,
    segment_seconds: f64,
    language: String,
}

impl SegmentScheduler {
    pub fn new(
        db: Arc<Database>,
        pool: Arc<ModelPool>,
        slicer: Arc<dyn AudioSlicer>,
        artifacts_dir: PathBuf,
        segment_seconds: f64,
        language: String,
    ) -> Self {
        Self {
            db,
            pool,
            slicer,
            artifacts_dir,
            segment_seconds,
            language,
        }
    }

    /// Partition the episode's timeline into fixed-width segments, the last
    /// one truncated to the recording's end. Idempotent: existing
    /// (episode, idx) rows are left untouched, so re-running after a
    /// partial insert completes the partition without duplicating units.
    pub fn fan_out(&self, episode_id: i64) -> Result<usize, PipelineError> {
        if self.segment_seconds <= 0.0 {
            return Err(PipelineError::Validation(format!(
                "non-positive segment width {}",
                self.segment_seconds
            )));
        }
        let episode = self
            .db
            .get_episode(episode_id)?
            .ok_or_else(|| PipelineError::Validation(format!("no episode {}", episode_id)))?;
        let duration = episode.duration.ok_or_else(|| {
            PipelineError::Validation(format!("episode {} has no duration", episode_id))
        })?;
        if duration <= 0.0 {
            return Err(PipelineError::Validation(format!(
                "episode {} has non-positive duration {}",
                episode_id, duration
            )));
        }

        let mut ranges = Vec::new();
        let mut idx: i64 = 0;
        let mut start = 0.0;
        while start < duration {
            let end = (start + self.segment_seconds).min(duration);
            ranges.push((idx, start, end));
            idx += 1;
            start = end;
        }

        self.db.insert_segments(episode_id, &ranges)?;
        log::info!(
            "episode {}: fanned out into {} segments of {}s",
            episode_id,
            ranges.len(),
            self.segment_seconds
        );
        Ok(ranges.len())
    }

    /// Process one segment through extract → infer → refine → persist.
    ///
    /// Completed segments are skipped; pending and failed segments are
    /// (re-)processed. On success the cues replace any partial set from an
    /// earlier attempt and the artifact is deleted. On failure the artifact
    /// is kept so the next attempt skips extraction. Episode-level stage is
    /// resynced on every terminal outcome.
    pub fn process_segment(
        &self,
        episode_id: i64,
        segment: &AudioSegment,
        owner: &OwnerToken,
    ) -> Result<usize, PipelineError> {
        if segment.status == WorkStatus::Completed {
            let n = self.db.cue_count_for_segment(segment.id)?;
            log::debug!(
                "episode {} segment {}: already completed ({} cues), skipping",
                episode_id,
                segment.idx,
                n
            );
            return Ok(n as usize);
        }

        let outcome = self.checkpoint_artifact(episode_id, segment).and_then(|artifact| {
            self.transcribe_artifact(segment, &artifact, owner)
                .map(|cues| (artifact, cues))
        });

        match outcome {
            Ok((_, cues)) if cues.is_empty() => {
                self.db
                    .mark_segment_failed(segment.id, "empty inference result", false)?;
                self.resync(episode_id)?;
                Err(PipelineError::EmptyResult {
                    segment_idx: segment.idx,
                })
            }
            Ok((artifact, cues)) => {
                let n = self.db.complete_segment(segment.id, episode_id, &cues)?;
                if let Err(e) = std::fs::remove_file(&artifact) {
                    log::warn!("could not remove artifact {}: {}", artifact.display(), e);
                }
                log::info!(
                    "episode {} segment {}: transcribed, {} cues",
                    episode_id,
                    segment.idx,
                    n
                );
                self.resync(episode_id)?;
                Ok(n)
            }
            Err(e) => {
                self.db.mark_segment_failed(segment.id, &e.to_string(), true)?;
                log::warn!(
                    "episode {} segment {}: failed: {}",
                    episode_id,
                    segment.idx,
                    e
                );
                self.resync(episode_id)?;
                Err(e)
            }
        }
    }

    /// Produce (or reuse) the segment's extracted artifact and commit the
    /// processing state. An artifact path recorded by a previous attempt is
    /// reused when the file still exists.
    fn checkpoint_artifact(
        &self,
        episode_id: i64,
        segment: &AudioSegment,
    ) -> Result<PathBuf, PipelineError> {
        if let Some(path) = &segment.artifact_path {
            let path = PathBuf::from(path);
            if path.exists() {
                log::debug!(
                    "episode {} segment {}: reusing artifact {}",
                    episode_id,
                    segment.idx,
                    path.display()
                );
                self.db.mark_segment_processing(segment.id)?;
                return Ok(path);
            }
        }

        let episode = self
            .db
            .get_episode(episode_id)?
            .ok_or_else(|| PipelineError::Validation(format!("no episode {}", episode_id)))?;
        let source = episode.audio_path.ok_or_else(|| {
            PipelineError::Validation(format!("episode {} has no audio file", episode_id))
        })?;

        let dest = self
            .artifacts_dir
            .join(format!("segment_{}_{:04}.wav", episode_id, segment.idx));
        self.slicer
            .extract(Path::new(&source), segment.start_time, segment.end_time, &dest)?;
        self.db
            .begin_segment(segment.id, &dest.to_string_lossy())?;
        Ok(dest)
    }

    /// Exclusive-span section: auxiliary handle, primary inference, and
    /// optional timestamp refinement. Cue times come back relative to the
    /// artifact and are rebased onto the episode timeline here.
    fn transcribe_artifact(
        &self,
        segment: &AudioSegment,
        artifact: &Path,
        owner: &OwnerToken,
    ) -> Result<Vec<NewCue>, PipelineError> {
        let span = self.pool.acquire(owner);
        // Re-enters the span we already hold.
        self.pool.ensure_auxiliary(owner, &self.language)?;
        let mut raw = span.infer(artifact, &self.language)?;
        span.refine(&mut raw)?;
        drop(span);

        Ok(raw
            .into_iter()
            .map(|cue| NewCue {
                start_time: segment.start_time + cue.start,
                end_time: segment.start_time + cue.end,
                speaker: cue.speaker,
                text: cue.text,
            })
            .collect())
    }

    /// Advance the episode to `transcribed` when, and only when, every
    /// segment has completed. Called after every terminal segment outcome
    /// rather than once at the end, so the stage catches up no matter which
    /// attempt ordering got the last segment done.
    pub fn resync(&self, episode_id: i64) -> Result<(), PipelineError> {
        let counts = self.db.segment_status_counts(episode_id)?;
        if counts.total() > 0 && counts.all_completed() {
            if self
                .db
                .advance_stage(episode_id, EpisodeStage::Downloaded, EpisodeStage::Transcribed)?
            {
                log::info!("episode {}: all segments completed, stage advanced", episode_id);
            }
        } else {
            log::debug!(
                "episode {}: segments {}/{} completed, {} failed, {} in flight",
                episode_id,
                counts.completed,
                counts.total(),
                counts.failed,
                counts.pending + counts.processing
            );
        }
        Ok(())
    }
}
