//! Translate step: batch the open rows of every target language through
//! the generator under the batch-degrade policy, then persist failure
//! sentinels for whatever never came back.

use super::Pipeline;
use crate::backend::StructuredGenerator;
use crate::database::{Database, Episode, EpisodeStage};
use crate::error::PipelineError;
use crate::retry::BatchRetry;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

impl Pipeline {
    pub(super) async fn step_translate(&self, episode: &Episode) -> Result<(), PipelineError> {
        for language in &self.config.languages {
            self.translate_language(episode.id, language).await?;
        }

        // Every row terminal (completed or sentinel) for every language
        // lets the stage advance; open work holds it back for a re-run.
        let mut all_terminal = true;
        for language in &self.config.languages {
            let counts = self.db.translation_status_counts(episode.id, language)?;
            if !counts.all_terminal() {
                all_terminal = false;
                log::warn!(
                    "episode {}: {} translations still open ({})",
                    episode.id,
                    counts.pending + counts.processing,
                    language
                );
            }
        }
        if all_terminal {
            self.db
                .advance_stage(episode.id, EpisodeStage::Chaptered, EpisodeStage::Translated)?;
        }
        Ok(())
    }

    async fn translate_language(
        &self,
        episode_id: i64,
        language: &str,
    ) -> Result<(), PipelineError> {
        let ensured = self.db.ensure_translations(episode_id, language)?;
        if ensured > 0 {
            log::info!(
                "episode {}: {} translation rows created ({})",
                episode_id,
                ensured,
                language
            );
        }

        let open = self.db.get_open_translations(episode_id, language)?;
        if open.is_empty() {
            return Ok(());
        }
        let sources: Arc<HashMap<i64, String>> = Arc::new(
            open.iter()
                .map(|(tid, _cue_id, text)| (*tid, text.clone()))
                .collect(),
        );
        let ids: Vec<i64> = open.iter().map(|(tid, _, _)| *tid).collect();

        let batch = BatchRetry::from(&self.config.batch);
        let batch_size = self.config.batch.batch_size.max(1);
        let db = self.db.clone();
        let generator = self.generator.clone();
        let language_owned = language.to_string();

        let outcome = batch
            .run(ids, move |subset| {
                let db = db.clone();
                let generator = generator.clone();
                let sources = sources.clone();
                let language = language_owned.clone();
                async move {
                    let mut results = Vec::new();
                    for chunk in subset.chunks(batch_size) {
                        match translate_chunk(&db, &*generator, &sources, &language, chunk).await {
                            Ok(mut chunk_results) => results.append(&mut chunk_results),
                            Err(e) => {
                                // A broken request fails the whole chunk;
                                // its items stay in the remaining set.
                                let msg = e.to_string();
                                results.extend(chunk.iter().map(|id| (*id, Err(msg.clone()))));
                            }
                        }
                    }
                    results
                }
            })
            .await;

        for (id, message) in &outcome.exhausted {
            self.db.fail_translation_sentinel(
                *id,
                outcome.rounds,
                &format!("unsucceeded after {} rounds: {}", outcome.rounds, message),
            )?;
        }
        log::info!(
            "episode {}: {} translated, {} sentinels after {} rounds ({})",
            episode_id,
            outcome.succeeded.len(),
            outcome.exhausted.len(),
            outcome.rounds,
            language
        );
        Ok(())
    }
}

/// Translate one chunk of rows in a single generator call and persist each
/// returned line immediately. Rows the response skips are simply not
/// reported, which the batch policy treats as still outstanding.
async fn translate_chunk(
    db: &Database,
    generator: &dyn StructuredGenerator,
    sources: &HashMap<i64, String>,
    language: &str,
    chunk: &[i64],
) -> Result<Vec<(i64, Result<(), String>)>, PipelineError> {
    let mut prompt = format!(
        "Translate each numbered line into the target language '{}'. \
         Keep the numbering and translate nothing else.\n\n",
        language
    );
    for id in chunk {
        if let Some(text) = sources.get(id) {
            prompt.push_str(&format!("{}: {}\n", id, text));
        }
    }
    let schema = json!([{"id": 0, "text": "string"}]);

    let value = generator.generate(&prompt, None, &schema).await?;
    let entries = value
        .as_array()
        .ok_or_else(|| PipelineError::Validation("translation response is not an array".into()))?;

    let mut results = Vec::new();
    for entry in entries {
        let Some(id) = entry.get("id").and_then(|v| v.as_i64()) else {
            continue;
        };
        let Some(text) = entry.get("text").and_then(|v| v.as_str()) else {
            continue;
        };
        // Ignore ids the model invented.
        if !chunk.contains(&id) {
            continue;
        }
        db.complete_translation(id, text)?;
        results.push((id, Ok(())));
    }
    Ok(results)
}
