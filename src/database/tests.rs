use super::*;
use tempfile::TempDir;

fn setup_test_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("test.db")).unwrap();
    (dir, db)
}

fn episode_with_cue(db: &Database) -> (i64, i64) {
    let ep = db
        .create_episode("Test Episode", "https://example.com/ep.mp3", Some(600.0), None)
        .unwrap();
    db.insert_segments(ep, &[(0, 0.0, 300.0)]).unwrap();
    let seg = db.get_segments(ep).unwrap()[0].id;
    db.complete_segment(
        seg,
        ep,
        &[NewCue {
            start_time: 1.0,
            end_time: 4.0,
            speaker: Some("SPEAKER_00".into()),
            text: "hello world".into(),
        }],
    )
    .unwrap();
    let cue = db.get_cues(ep).unwrap()[0].id;
    (ep, cue)
}

#[test]
fn test_first_translation_write_freezes_original() {
    let (_dir, db) = setup_test_db();
    let (_ep, cue) = episode_with_cue(&db);

    let tid = db.insert_translation(cue, "de", None).unwrap();
    let t = db.get_translation(tid).unwrap().unwrap();
    assert!(t.original.is_none());
    assert!(t.current.is_none());

    db.complete_translation(tid, "hallo welt").unwrap();
    let t = db.get_translation(tid).unwrap().unwrap();
    assert_eq!(t.original.as_deref(), Some("hallo welt"));
    assert_eq!(t.current.as_deref(), Some("hallo welt"));
    assert!(!t.edited);

    // Later writes move current only.
    db.update_translation_current(tid, "hallo, welt!").unwrap();
    let t = db.get_translation(tid).unwrap().unwrap();
    assert_eq!(t.original.as_deref(), Some("hallo welt"));
    assert_eq!(t.current.as_deref(), Some("hallo, welt!"));
    assert!(t.edited);
}

#[test]
fn test_insert_with_text_sets_both_fields() {
    let (_dir, db) = setup_test_db();
    let (_ep, cue) = episode_with_cue(&db);

    let tid = db.insert_translation(cue, "fr", Some("bonjour le monde")).unwrap();
    let t = db.get_translation(tid).unwrap().unwrap();
    assert_eq!(t.original.as_deref(), Some("bonjour le monde"));
    assert_eq!(t.current.as_deref(), Some("bonjour le monde"));
    assert_eq!(t.status, WorkStatus::Completed);
}

#[test]
fn test_original_text_rejects_direct_update() {
    let (dir, db) = setup_test_db();
    let (_ep, cue) = episode_with_cue(&db);
    let tid = db.insert_translation(cue, "de", Some("hallo")).unwrap();

    // Bypass the API to make sure the guard lives in the schema.
    let conn = rusqlite::Connection::open(dir.path().join("test.db")).unwrap();
    let result = conn.execute(
        "UPDATE translations SET original_text = 'tampered' WHERE id = ?",
        rusqlite::params![tid],
    );
    assert!(result.is_err());
    let msg = result.unwrap_err().to_string();
    assert!(msg.contains("immutable"), "unexpected error: {}", msg);

    let t = db.get_translation(tid).unwrap().unwrap();
    assert_eq!(t.original.as_deref(), Some("hallo"));
}

#[test]
fn test_delete_episode_cascades() {
    let (_dir, db) = setup_test_db();
    let (ep, cue) = episode_with_cue(&db);
    db.replace_chapters(
        ep,
        &[NewChapter {
            title: "Intro".into(),
            start_time: 0.0,
            end_time: 300.0,
        }],
    )
    .unwrap();
    db.insert_translation(cue, "de", Some("hallo welt")).unwrap();

    db.delete_episode(ep).unwrap();

    assert!(db.get_episode(ep).unwrap().is_none());
    assert!(db.get_segments(ep).unwrap().is_empty());
    assert!(db.get_cues(ep).unwrap().is_empty());
    assert!(db.get_chapters(ep).unwrap().is_empty());
    assert!(db.find_translation_id(cue, "de").unwrap().is_none());
}

#[test]
fn test_advance_stage_is_compare_and_swap() {
    let (_dir, db) = setup_test_db();
    let ep = db
        .create_episode("CAS", "https://example.com/a.mp3", None, None)
        .unwrap();

    assert!(db
        .advance_stage(ep, EpisodeStage::Init, EpisodeStage::Downloaded)
        .unwrap());
    // Stale writer loses.
    assert!(!db
        .advance_stage(ep, EpisodeStage::Init, EpisodeStage::Downloaded)
        .unwrap());
    let stage = db.get_episode(ep).unwrap().unwrap().stage;
    assert_eq!(stage, EpisodeStage::Downloaded);
}

#[test]
fn test_reset_stuck_segments_keeps_artifact_path() {
    let (_dir, db) = setup_test_db();
    let ep = db
        .create_episode("Stuck", "https://example.com/b.mp3", Some(600.0), None)
        .unwrap();
    db.insert_segments(ep, &[(0, 0.0, 300.0), (1, 300.0, 600.0)]).unwrap();
    let segments = db.get_segments(ep).unwrap();
    db.begin_segment(segments[0].id, "/tmp/seg_0.wav").unwrap();

    let reset = db.reset_stuck_segments().unwrap();
    assert_eq!(reset, 1);

    let segments = db.get_segments(ep).unwrap();
    assert_eq!(segments[0].status, WorkStatus::Pending);
    assert_eq!(segments[0].artifact_path.as_deref(), Some("/tmp/seg_0.wav"));
    assert_eq!(segments[1].status, WorkStatus::Pending);
}

#[test]
fn test_insert_segments_is_idempotent() {
    let (_dir, db) = setup_test_db();
    let ep = db
        .create_episode("Fanout", "https://example.com/c.mp3", Some(450.0), None)
        .unwrap();
    let ranges = [(0, 0.0, 300.0), (1, 300.0, 450.0)];
    db.insert_segments(ep, &ranges).unwrap();
    db.insert_segments(ep, &ranges).unwrap();
    assert_eq!(db.get_segments(ep).unwrap().len(), 2);
}

#[test]
fn test_ensure_translations_is_idempotent() {
    let (_dir, db) = setup_test_db();
    let (ep, _cue) = episode_with_cue(&db);

    assert_eq!(db.ensure_translations(ep, "de").unwrap(), 1);
    assert_eq!(db.ensure_translations(ep, "de").unwrap(), 0);
    assert_eq!(db.ensure_translations(ep, "fr").unwrap(), 1);
}

#[test]
fn test_failure_sentinel_is_terminal_with_null_texts() {
    let (_dir, db) = setup_test_db();
    let (ep, cue) = episode_with_cue(&db);
    let tid = db.insert_translation(cue, "ja", None).unwrap();

    db.fail_translation_sentinel(tid, 5, "model unavailable").unwrap();

    let t = db.get_translation(tid).unwrap().unwrap();
    assert_eq!(t.status, WorkStatus::Failed);
    assert!(t.original.is_none());
    assert!(t.current.is_none());
    assert_eq!(t.retry_count, 5);
    assert_eq!(t.error_message.as_deref(), Some("model unavailable"));

    // Terminal rows are no longer open work.
    assert!(db.get_open_translations(ep, "ja").unwrap().is_empty());
    let counts = db.translation_status_counts(ep, "ja").unwrap();
    assert!(counts.all_terminal());
    assert!(!counts.all_completed());
}

#[test]
fn test_empty_result_failure_does_not_count_retry() {
    let (_dir, db) = setup_test_db();
    let ep = db
        .create_episode("Empty", "https://example.com/d.mp3", Some(300.0), None)
        .unwrap();
    db.insert_segments(ep, &[(0, 0.0, 300.0)]).unwrap();
    let seg = db.get_segments(ep).unwrap()[0].id;

    db.mark_segment_failed(seg, "empty inference result", false).unwrap();
    let s = &db.get_segments(ep).unwrap()[0];
    assert_eq!(s.status, WorkStatus::Failed);
    assert_eq!(s.retry_count, 0);

    db.mark_segment_failed(seg, "inference crashed", true).unwrap();
    assert_eq!(db.get_segments(ep).unwrap()[0].retry_count, 1);
}

#[test]
fn test_chapter_assignment_by_start_time() {
    let (_dir, db) = setup_test_db();
    let ep = db
        .create_episode("Chapters", "https://example.com/e.mp3", Some(600.0), None)
        .unwrap();
    db.insert_segments(ep, &[(0, 0.0, 600.0)]).unwrap();
    let seg = db.get_segments(ep).unwrap()[0].id;
    db.complete_segment(
        seg,
        ep,
        &[
            NewCue {
                start_time: 10.0,
                end_time: 15.0,
                speaker: None,
                text: "early".into(),
            },
            NewCue {
                start_time: 400.0,
                end_time: 405.0,
                speaker: None,
                text: "late".into(),
            },
        ],
    )
    .unwrap();

    db.replace_chapters(
        ep,
        &[
            NewChapter {
                title: "First Half".into(),
                start_time: 0.0,
                end_time: 300.0,
            },
            NewChapter {
                title: "Second Half".into(),
                start_time: 300.0,
                end_time: 600.0,
            },
        ],
    )
    .unwrap();

    let chapters = db.get_chapters(ep).unwrap();
    let cues = db.get_cues(ep).unwrap();
    assert_eq!(cues[0].chapter_id, Some(chapters[0].id));
    assert_eq!(cues[1].chapter_id, Some(chapters[1].id));
}

#[test]
fn test_open_translations_prefer_corrected_text() {
    let (_dir, db) = setup_test_db();
    let (ep, cue) = episode_with_cue(&db);
    db.set_corrected_text(cue, "hello, world").unwrap();
    db.ensure_translations(ep, "es").unwrap();

    let open = db.get_open_translations(ep, "es").unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].2, "hello, world");
}
