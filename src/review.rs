//! Review document rendering, parsing, and edit backfill.
//!
//! Each language gets one Markdown document with YAML front matter and a
//! block per cue: a timestamp anchor carrying the cue id, then the current
//! translated line. Reviewers edit lines (or the front matter `approved`
//! flag) in any editor; syncing parses the document back and folds edits
//! into `current_text`, while the schema triggers keep `original_text`
//! frozen.

use crate::database::Database;
use crate::error::PipelineError;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Front matter of a review document. Extra keys are ignored so hand
/// edits to the header don't break parsing.
#[derive(Debug, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    approved: bool,
}

/// A review document parsed back from disk.
#[derive(Debug)]
pub struct ReviewDoc {
    pub language: Option<String>,
    pub approved: bool,
    /// (cue id, line text) for every anchor that had a text line.
    pub entries: Vec<(i64, String)>,
}

/// Outcome of syncing one document against the store.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub approved: bool,
    pub edits_applied: usize,
}

pub struct DiffEngine {
    db: Arc<Database>,
    review_dir: PathBuf,
}

impl DiffEngine {
    pub fn new(db: Arc<Database>, review_dir: PathBuf) -> Self {
        Self { db, review_dir }
    }

    pub fn document_path(&self, episode_id: i64, language: &str) -> PathBuf {
        self.review_dir
            .join(format!("episode_{}_{}.md", episode_id, language))
    }

    /// Write the review document for one language. Failed translations
    /// render as a comment placeholder the reviewer can replace with a
    /// hand translation.
    pub fn render(&self, episode_id: i64, language: &str) -> Result<PathBuf, PipelineError> {
        let episode = self
            .db
            .get_episode(episode_id)?
            .ok_or_else(|| PipelineError::Validation(format!("no episode {}", episode_id)))?;
        let rows = self.db.get_review_rows(episode_id, language)?;

        let mut doc = String::new();
        doc.push_str("---\n");
        doc.push_str(&format!("episode_id: {}\n", episode_id));
        doc.push_str(&format!("title: {:?}\n", episode.title));
        doc.push_str(&format!("language: {}\n", language));
        doc.push_str(&format!(
            "generated: {}\n",
            chrono::Utc::now().to_rfc3339()
        ));
        doc.push_str("approved: false\n");
        doc.push_str("---\n");

        for row in &rows {
            doc.push_str(&format!(
                "\n[{}](unit://{})\n",
                format_timestamp(row.cue_start),
                row.cue_id
            ));
            match &row.current {
                Some(text) => doc.push_str(&format!("{}\n", text)),
                None => doc.push_str("<!-- translation unavailable -->\n"),
            }
        }

        std::fs::create_dir_all(&self.review_dir)?;
        let path = self.document_path(episode_id, language);
        std::fs::write(&path, doc)?;
        log::info!(
            "episode {}: rendered {} review blocks ({}) to {}",
            episode_id,
            rows.len(),
            language,
            path.display()
        );
        Ok(path)
    }

    /// Parse a review document back. Tolerant by construction: anything
    /// that is not an anchor line is ignored, and an anchor followed by a
    /// blank line, a comment, another anchor, or end of file contributes
    /// no entry.
    pub fn parse(&self, path: &Path) -> Result<ReviewDoc, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        let anchor = Regex::new(r"^\[(?:\d{2}:)?\d{2}:\d{2}\]\(unit://(\d+)\)\s*$")
            .map_err(|e| PipelineError::Other(e.to_string()))?;

        let front = parse_front_matter(&text);
        let lines: Vec<&str> = text.lines().collect();

        let mut entries = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let Some(caps) = anchor.captures(line) else {
                continue;
            };
            let cue_id: i64 = caps[1]
                .parse()
                .map_err(|_| PipelineError::Validation(format!("bad anchor: {}", line)))?;
            let Some(next) = lines.get(i + 1) else {
                continue;
            };
            let next = next.trim();
            if next.is_empty() || next.starts_with("<!--") || anchor.is_match(next) {
                continue;
            }
            entries.push((cue_id, next.to_string()));
        }

        Ok(ReviewDoc {
            language: front.as_ref().and_then(|f| f.language.clone()),
            approved: front.map(|f| f.approved).unwrap_or(false),
            entries,
        })
    }

    /// Parse one document and fold any changed lines back into the store.
    /// Lines matching the stored current text are no-ops; everything else
    /// updates `current_text` only, letting the triggers preserve the
    /// machine original and flip the edited flag.
    pub fn sync(&self, episode_id: i64, language: &str) -> Result<SyncOutcome, PipelineError> {
        let path = self.document_path(episode_id, language);
        let doc = self.parse(&path)?;
        if let Some(doc_lang) = &doc.language {
            if doc_lang != language {
                return Err(PipelineError::Validation(format!(
                    "review document {} declares language '{}', expected '{}'",
                    path.display(),
                    doc_lang,
                    language
                )));
            }
        }

        let mut edits = 0;
        for (cue_id, text) in &doc.entries {
            let Some(tid) = self.db.find_translation_id(*cue_id, language)? else {
                log::warn!(
                    "review document {} references unknown cue {}, skipping",
                    path.display(),
                    cue_id
                );
                continue;
            };
            let stored = self
                .db
                .get_translation(tid)?
                .and_then(|t| t.current);
            if stored.as_deref() != Some(text.as_str()) {
                self.db.update_translation_current(tid, text)?;
                edits += 1;
            }
        }

        if edits > 0 {
            log::info!(
                "episode {}: applied {} review edits ({})",
                episode_id,
                edits,
                language
            );
        }
        Ok(SyncOutcome {
            approved: doc.approved,
            edits_applied: edits,
        })
    }
}

/// Truncating timestamp: `MM:SS` under an hour, `HH:MM:SS` from one hour
/// up. 65.9 renders as `01:05`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn parse_front_matter(text: &str) -> Option<FrontMatter> {
    let rest = text.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    serde_yaml::from_str(&rest[..end]).ok()
}
