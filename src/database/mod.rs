pub mod models;

#[cfg(test)]
mod tests;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use models::*;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL for concurrent reads; foreign keys on so episode deletion
        // cascades through segments, cues, chapters and translations.
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                audio_url TEXT NOT NULL,
                content_hash TEXT UNIQUE,
                stage TEXT NOT NULL DEFAULT 'init',
                duration REAL,
                audio_path TEXT,
                review_path TEXT,
                metadata_json TEXT,
                published_record TEXT,
                added_date TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_stage ON episodes(stage);

            CREATE TABLE IF NOT EXISTS audio_segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id INTEGER NOT NULL,
                idx INTEGER NOT NULL,
                start_time REAL NOT NULL,
                end_time REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                artifact_path TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE,
                UNIQUE(episode_id, idx)
            );

            CREATE INDEX IF NOT EXISTS idx_segments_episode
                ON audio_segments(episode_id, idx);
            CREATE INDEX IF NOT EXISTS idx_segments_status
                ON audio_segments(episode_id, status);

            CREATE TABLE IF NOT EXISTS transcript_cues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id INTEGER NOT NULL,
                segment_id INTEGER NOT NULL,
                start_time REAL NOT NULL,
                end_time REAL NOT NULL,
                speaker TEXT,
                text TEXT NOT NULL,
                corrected_text TEXT,
                chapter_id INTEGER,
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE,
                FOREIGN KEY (segment_id) REFERENCES audio_segments(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_cues_episode
                ON transcript_cues(episode_id, start_time);
            CREATE INDEX IF NOT EXISTS idx_cues_segment ON transcript_cues(segment_id);

            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                start_time REAL NOT NULL,
                end_time REAL NOT NULL,
                FOREIGN KEY (episode_id) REFERENCES episodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_chapters_episode
                ON chapters(episode_id, start_time);

            CREATE TABLE IF NOT EXISTS translations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cue_id INTEGER NOT NULL,
                language TEXT NOT NULL,
                original_text TEXT,
                current_text TEXT,
                edited INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                FOREIGN KEY (cue_id) REFERENCES transcript_cues(id) ON DELETE CASCADE,
                UNIQUE(cue_id, language)
            );

            CREATE INDEX IF NOT EXISTS idx_translations_cue
                ON translations(cue_id, language);
            CREATE INDEX IF NOT EXISTS idx_translations_status
                ON translations(language, status);

            -- original_text is first-write-wins, enforced here rather than
            -- in application code.
            CREATE TRIGGER IF NOT EXISTS translations_first_insert
            AFTER INSERT ON translations
            WHEN new.current_text IS NOT NULL AND new.original_text IS NULL
            BEGIN
                UPDATE translations SET original_text = new.current_text
                WHERE id = new.id;
            END;

            CREATE TRIGGER IF NOT EXISTS translations_first_set
            AFTER UPDATE OF current_text ON translations
            WHEN new.current_text IS NOT NULL AND new.original_text IS NULL
            BEGIN
                UPDATE translations SET original_text = new.current_text
                WHERE id = new.id;
            END;

            CREATE TRIGGER IF NOT EXISTS translations_original_guard
            BEFORE UPDATE OF original_text ON translations
            WHEN old.original_text IS NOT NULL
                 AND new.original_text IS NOT old.original_text
            BEGIN
                SELECT RAISE(ABORT, 'original_text is immutable once set');
            END;

            CREATE TRIGGER IF NOT EXISTS translations_mark_edited
            AFTER UPDATE OF current_text ON translations
            WHEN new.original_text IS NOT NULL
                 AND new.current_text IS NOT new.original_text
            BEGIN
                UPDATE translations SET edited = 1 WHERE id = new.id;
            END;
        "#,
        )?;

        // Migration: Add metadata_json column to episodes (idempotent)
        let _ = conn.execute("ALTER TABLE episodes ADD COLUMN metadata_json TEXT", []); // Ignore error if column already exists

        // Migration: Add corrected_text column to transcript_cues (idempotent)
        let _ = conn.execute(
            "ALTER TABLE transcript_cues ADD COLUMN corrected_text TEXT",
            [],
        ); // Ignore error if column already exists

        Ok(())
    }

    // =========================================================================
    // Episode queries
    // =========================================================================

    pub fn create_episode(
        &self,
        title: &str,
        audio_url: &str,
        duration: Option<f64>,
        metadata_json: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO episodes (title, audio_url, duration, metadata_json, stage, added_date)
             VALUES (?, ?, ?, ?, 'init', ?)",
            params![title, audio_url, duration, metadata_json, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_episode(&self, id: i64) -> Result<Option<Episode>> {
        let conn = self.conn.lock().unwrap();
        let episode = conn
            .query_row(
                "SELECT id, title, audio_url, content_hash, stage, duration, audio_path,
                        review_path, metadata_json, published_record, added_date
                 FROM episodes WHERE id = ?",
                params![id],
                |row| {
                    Ok(Episode {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        audio_url: row.get(2)?,
                        content_hash: row.get(3)?,
                        stage: row.get::<_, String>(4)?.into(),
                        duration: row.get(5)?,
                        audio_path: row.get(6)?,
                        review_path: row.get(7)?,
                        metadata_json: row.get(8)?,
                        published_record: row.get(9)?,
                        added_date: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(episode)
    }

    /// Content-hash dedup lookup: returns the id of the episode already
    /// holding this hash, if any.
    pub fn find_episode_by_hash(&self, content_hash: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM episodes WHERE content_hash = ?",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn mark_downloaded(
        &self,
        id: i64,
        audio_path: &str,
        duration: Option<f64>,
        content_hash: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE episodes SET audio_path = ?, duration = COALESCE(?, duration),
                    content_hash = ?
             WHERE id = ?",
            params![audio_path, duration, content_hash, id],
        )?;
        Ok(())
    }

    /// Advance the stage by exactly one value, compare-and-swap style: the
    /// update applies only if the row is still at `from`, which keeps the
    /// stage monotonic under concurrent writers.
    pub fn advance_stage(&self, id: i64, from: EpisodeStage, to: EpisodeStage) -> Result<bool> {
        debug_assert_eq!(from.next(), Some(to));
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE episodes SET stage = ? WHERE id = ? AND stage = ?",
            params![to.to_string(), id, from.to_string()],
        )?;
        Ok(n > 0)
    }

    /// Administrative reset — the only backward stage transition.
    pub fn reset_stage(&self, id: i64, to: EpisodeStage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE episodes SET stage = ? WHERE id = ?",
            params![to.to_string(), id],
        )?;
        log::info!("episode {} administratively reset to stage {}", id, to);
        Ok(())
    }

    pub fn set_review_path(&self, id: i64, review_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE episodes SET review_path = ? WHERE id = ?",
            params![review_path, id],
        )?;
        Ok(())
    }

    pub fn set_published_record(&self, id: i64, record_json: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE episodes SET published_record = ? WHERE id = ?",
            params![record_json, id],
        )?;
        Ok(())
    }

    pub fn delete_episode(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM episodes WHERE id = ?", params![id])?;
        Ok(())
    }

    // =========================================================================
    // Segment queries
    // =========================================================================

    /// Insert the fan-out partition for an episode. `INSERT OR IGNORE` on
    /// the (episode_id, idx) unique key makes re-running fan-out a no-op.
    pub fn insert_segments(&self, episode_id: i64, ranges: &[(i64, f64, f64)]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (idx, start, end) in ranges {
            tx.execute(
                "INSERT OR IGNORE INTO audio_segments (episode_id, idx, start_time, end_time)
                 VALUES (?, ?, ?, ?)",
                params![episode_id, idx, start, end],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_segments(&self, episode_id: i64) -> Result<Vec<AudioSegment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, episode_id, idx, start_time, end_time, status, artifact_path,
                    retry_count, error_message
             FROM audio_segments WHERE episode_id = ? ORDER BY idx ASC",
        )?;
        let segments = stmt
            .query_map(params![episode_id], |row| {
                Ok(AudioSegment {
                    id: row.get(0)?,
                    episode_id: row.get(1)?,
                    idx: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    status: row.get::<_, String>(5)?.into(),
                    artifact_path: row.get(6)?,
                    retry_count: row.get(7)?,
                    error_message: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(segments)
    }

    /// Record a freshly-extracted artifact and flip the segment to
    /// processing. This commit is the durable resume point: after a crash
    /// the artifact path survives and extraction is skipped.
    pub fn begin_segment(&self, segment_id: i64, artifact_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE audio_segments SET artifact_path = ?, status = 'processing'
             WHERE id = ?",
            params![artifact_path, segment_id],
        )?;
        Ok(())
    }

    pub fn mark_segment_processing(&self, segment_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE audio_segments SET status = 'processing' WHERE id = ?",
            params![segment_id],
        )?;
        Ok(())
    }

    /// Complete a segment in one transaction: replace its cues (handles
    /// the retry-after-partial-failure case), mark it completed, clear the
    /// artifact path. Returns the number of cues written.
    pub fn complete_segment(
        &self,
        segment_id: i64,
        episode_id: i64,
        cues: &[NewCue],
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM transcript_cues WHERE segment_id = ?",
            params![segment_id],
        )?;
        for cue in cues {
            tx.execute(
                "INSERT INTO transcript_cues
                     (episode_id, segment_id, start_time, end_time, speaker, text)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    episode_id,
                    segment_id,
                    cue.start_time,
                    cue.end_time,
                    cue.speaker,
                    cue.text
                ],
            )?;
        }
        tx.execute(
            "UPDATE audio_segments
             SET status = 'completed', artifact_path = NULL, error_message = NULL
             WHERE id = ?",
            params![segment_id],
        )?;
        tx.commit()?;
        Ok(cues.len())
    }

    /// Mark a segment failed, keeping the artifact path for resume.
    /// `count_retry` distinguishes exceptions (counted) from the terminal
    /// empty-result condition (recorded but not counted).
    pub fn mark_segment_failed(
        &self,
        segment_id: i64,
        error_message: &str,
        count_retry: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE audio_segments
             SET status = 'failed', error_message = ?,
                 retry_count = retry_count + ?
             WHERE id = ?",
            params![error_message, if count_retry { 1 } else { 0 }, segment_id],
        )?;
        Ok(())
    }

    pub fn segment_status_counts(&self, episode_id: i64) -> Result<StatusCounts> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM audio_segments WHERE episode_id = ? GROUP BY status",
        )?;
        let rows = stmt.query_map(params![episode_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, n) = row?;
            match WorkStatus::from(status) {
                WorkStatus::Pending => counts.pending = n,
                WorkStatus::Processing => counts.processing = n,
                WorkStatus::Completed => counts.completed = n,
                WorkStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    pub fn cue_count_for_segment(&self, segment_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM transcript_cues WHERE segment_id = ?",
            params![segment_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Reset any segments stuck in 'processing' from a previous run.
    /// Artifact paths are kept — they are the resume signal.
    pub fn reset_stuck_segments(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE audio_segments SET status = 'pending' WHERE status = 'processing'",
            [],
        )?;
        if count > 0 {
            log::info!("Reset {} stuck processing segments to pending", count);
        }
        Ok(count)
    }

    // =========================================================================
    // Cue queries
    // =========================================================================

    pub fn get_cues(&self, episode_id: i64) -> Result<Vec<TranscriptCue>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, episode_id, segment_id, start_time, end_time, speaker, text,
                    corrected_text, chapter_id
             FROM transcript_cues WHERE episode_id = ? ORDER BY start_time ASC",
        )?;
        let cues = stmt
            .query_map(params![episode_id], |row| {
                Ok(TranscriptCue {
                    id: row.get(0)?,
                    episode_id: row.get(1)?,
                    segment_id: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    speaker: row.get(5)?,
                    text: row.get(6)?,
                    corrected_text: row.get(7)?,
                    chapter_id: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cues)
    }

    /// Record a human correction. The raw text column is never touched.
    pub fn set_corrected_text(&self, cue_id: i64, corrected: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE transcript_cues SET corrected_text = ? WHERE id = ?",
            params![corrected, cue_id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Chapter queries
    // =========================================================================

    /// Replace the chapter set for an episode and point each cue at the
    /// chapter whose range contains its start time.
    pub fn replace_chapters(&self, episode_id: i64, chapters: &[NewChapter]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chapters WHERE episode_id = ?", params![episode_id])?;
        for chapter in chapters {
            tx.execute(
                "INSERT INTO chapters (episode_id, title, start_time, end_time)
                 VALUES (?, ?, ?, ?)",
                params![episode_id, chapter.title, chapter.start_time, chapter.end_time],
            )?;
        }
        tx.execute(
            "UPDATE transcript_cues
             SET chapter_id = (
                 SELECT c.id FROM chapters c
                 WHERE c.episode_id = transcript_cues.episode_id
                   AND transcript_cues.start_time >= c.start_time
                   AND transcript_cues.start_time < c.end_time
             )
             WHERE episode_id = ?",
            params![episode_id],
        )?;
        tx.commit()?;
        Ok(chapters.len())
    }

    pub fn get_chapters(&self, episode_id: i64) -> Result<Vec<Chapter>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, episode_id, title, start_time, end_time
             FROM chapters WHERE episode_id = ? ORDER BY start_time ASC",
        )?;
        let chapters = stmt
            .query_map(params![episode_id], |row| {
                Ok(Chapter {
                    id: row.get(0)?,
                    episode_id: row.get(1)?,
                    title: row.get(2)?,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chapters)
    }

    // =========================================================================
    // Translation queries
    // =========================================================================

    /// Insert a translation row directly. The first-insert trigger copies
    /// a non-null `current` into `original`.
    pub fn insert_translation(
        &self,
        cue_id: i64,
        language: &str,
        current: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let status = if current.is_some() {
            "completed"
        } else {
            "pending"
        };
        conn.execute(
            "INSERT INTO translations (cue_id, language, current_text, status)
             VALUES (?, ?, ?, ?)",
            params![cue_id, language, current, status],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Ensure a pending row exists for every (cue, language) pair.
    /// Idempotent via the UNIQUE(cue_id, language) key.
    pub fn ensure_translations(&self, episode_id: i64, language: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO translations (cue_id, language)
             SELECT id, ? FROM transcript_cues WHERE episode_id = ?",
            params![language, episode_id],
        )?;
        Ok(n)
    }

    pub fn get_translation(&self, id: i64) -> Result<Option<Translation>> {
        let conn = self.conn.lock().unwrap();
        let t = conn
            .query_row(
                "SELECT id, cue_id, language, original_text, current_text, edited, status,
                        retry_count, error_message
                 FROM translations WHERE id = ?",
                params![id],
                |row| {
                    Ok(Translation {
                        id: row.get(0)?,
                        cue_id: row.get(1)?,
                        language: row.get(2)?,
                        original: row.get(3)?,
                        current: row.get(4)?,
                        edited: row.get::<_, i64>(5)? == 1,
                        status: row.get::<_, String>(6)?.into(),
                        retry_count: row.get(7)?,
                        error_message: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(t)
    }

    /// Non-terminal translation rows joined with their source text, in cue
    /// order. These are the candidates for the next batch round.
    pub fn get_open_translations(
        &self,
        episode_id: i64,
        language: &str,
    ) -> Result<Vec<(i64, i64, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.cue_id, COALESCE(c.corrected_text, c.text)
             FROM translations t
             JOIN transcript_cues c ON t.cue_id = c.id
             WHERE c.episode_id = ? AND t.language = ?
               AND t.status IN ('pending', 'processing')
             ORDER BY c.start_time ASC",
        )?;
        let rows = stmt
            .query_map(params![episode_id, language], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Record a successful translation. Setting `current_text` fires the
    /// first-set trigger, which freezes `original_text`.
    pub fn complete_translation(&self, id: i64, text: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE translations
             SET current_text = ?, status = 'completed', error_message = NULL
             WHERE id = ?",
            params![text, id],
        )?;
        Ok(())
    }

    /// Persist a failure sentinel after retry exhaustion: both text fields
    /// stay null, the row is terminal and queryable.
    pub fn fail_translation_sentinel(&self, id: i64, rounds: u32, message: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE translations
             SET status = 'failed', retry_count = ?, error_message = ?
             WHERE id = ?",
            params![rounds, message, id],
        )?;
        Ok(())
    }

    /// Apply a human edit from the review document. Only `current_text`
    /// changes; the triggers freeze `original_text` and flip `edited`.
    pub fn update_translation_current(&self, id: i64, text: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE translations SET current_text = ? WHERE id = ?",
            params![text, id],
        )?;
        Ok(())
    }

    pub fn find_translation_id(&self, cue_id: i64, language: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM translations WHERE cue_id = ? AND language = ?",
                params![cue_id, language],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Rows for rendering one language's review document, in cue order.
    pub fn get_review_rows(&self, episode_id: i64, language: &str) -> Result<Vec<ReviewRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.id, t.id, c.start_time, COALESCE(c.corrected_text, c.text),
                    t.current_text
             FROM translations t
             JOIN transcript_cues c ON t.cue_id = c.id
             WHERE c.episode_id = ? AND t.language = ?
             ORDER BY c.start_time ASC",
        )?;
        let rows = stmt
            .query_map(params![episode_id, language], |row| {
                Ok(ReviewRow {
                    cue_id: row.get(0)?,
                    translation_id: row.get(1)?,
                    cue_start: row.get(2)?,
                    source_text: row.get(3)?,
                    current: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn translation_status_counts(
        &self,
        episode_id: i64,
        language: &str,
    ) -> Result<StatusCounts> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.status, COUNT(*)
             FROM translations t
             JOIN transcript_cues c ON t.cue_id = c.id
             WHERE c.episode_id = ? AND t.language = ?
             GROUP BY t.status",
        )?;
        let rows = stmt.query_map(params![episode_id, language], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, n) = row?;
            match WorkStatus::from(status) {
                WorkStatus::Pending => counts.pending = n,
                WorkStatus::Processing => counts.processing = n,
                WorkStatus::Completed => counts.completed = n,
                WorkStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}
