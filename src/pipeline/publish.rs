//! Publish step: compose one final document per language and hand each to
//! the publishing integration.

use super::Pipeline;
use crate::database::{Chapter, Episode, EpisodeStage, ReviewRow};
use crate::error::PipelineError;
use crate::review::format_timestamp;

impl Pipeline {
    pub(super) fn step_publish(&self, episode: &Episode) -> Result<(), PipelineError> {
        let chapters = self.db.get_chapters(episode.id)?;

        let mut records = Vec::new();
        for language in &self.config.languages {
            let rows = self.db.get_review_rows(episode.id, language)?;
            let content = compose_document(&episode.title, &chapters, &rows);
            let title = format!("{} ({})", episode.title, language);
            let record = self.publisher.publish(&title, &content)?;
            log::info!(
                "episode {}: published {} as {} ({:?})",
                episode.id,
                language,
                record.id,
                record.url
            );
            records.push(record);
        }

        self.db
            .set_published_record(episode.id, &serde_json::to_string(&records)?)?;
        self.db
            .advance_stage(episode.id, EpisodeStage::Approved, EpisodeStage::Published)?;
        Ok(())
    }
}

/// Markdown document: chapter headings in order, each followed by the
/// reviewed lines whose start time falls inside it. Rows without a
/// translation (failure sentinels nobody filled in) are left out rather
/// than published untranslated.
fn compose_document(title: &str, chapters: &[Chapter], rows: &[ReviewRow]) -> String {
    let mut doc = format!("# {}\n", title);

    let emit = |doc: &mut String, row: &ReviewRow| {
        if let Some(text) = &row.current {
            doc.push_str(&format!("[{}] {}\n", format_timestamp(row.cue_start), text));
        }
    };

    if chapters.is_empty() {
        doc.push('\n');
        for row in rows {
            emit(&mut doc, row);
        }
        return doc;
    }

    for chapter in chapters {
        doc.push_str(&format!("\n## {}\n\n", chapter.title));
        for row in rows {
            if row.cue_start >= chapter.start_time && row.cue_start < chapter.end_time {
                emit(&mut doc, row);
            }
        }
    }
    doc
}
