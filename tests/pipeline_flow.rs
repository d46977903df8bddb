use std::fs;

use serde_json::json;
use skiptrack::calendar::Calendar;
use skiptrack::model::{AggregateStore, PlaybackEvent};
use skiptrack::patterns::{self, SkipHistory, SkippedTrack};
use skiptrack::pipeline::Engine;
use skiptrack::queries;
use skiptrack::store::{self, StoreFile};
use tempfile::tempdir;

const MINUTE: i64 = 60_000;
// 2024-05-15 20:00:00 UTC, a Wednesday.
const EVENING: i64 = 1_715_803_200_000;

fn event(track: &str, artist: &str, at: i64, skipped: bool) -> PlaybackEvent {
    PlaybackEvent {
        track_id: track.to_string(),
        track_name: format!("Track {track}"),
        artist_id: artist.to_string(),
        artist_name: format!("Artist {artist}"),
        duration_ms: 210_000,
        was_skipped: skipped,
        played_time_ms: if skipped { 45_000 } else { 210_000 },
        device_name: Some(String::from("Kitchen")),
        device_type: Some(String::from("speaker")),
        timestamp_ms: at,
        skip_type: None,
        is_manual_skip: skipped,
    }
}

fn engine_in(dir: &tempfile::TempDir) -> Engine {
    Engine::new(
        StoreFile::at(dir.path().join("listening_stats.json")),
        Calendar::utc(),
    )
}

#[test]
fn single_play_is_counted_and_persisted() {
    let dir = tempdir().expect("tempdir");
    let mut engine = engine_in(&dir);

    assert!(engine.record(&event("t1", "a1", EVENING, false)));

    let stats = engine.snapshot().expect("snapshot");
    let daily = &stats.daily_metrics["2024-05-15"];
    assert_eq!(daily.totals.tracks_played, 1);
    assert_eq!(daily.totals.tracks_skipped, 0);
    assert_eq!(stats.total_unique_tracks, 1);
    assert_eq!(stats.device_metrics["speaker:Kitchen"].tracks_played, 1);
    assert!(stats.last_updated > 0);
}

#[test]
fn back_to_back_skips_share_a_session_and_a_sequence() {
    let dir = tempdir().expect("tempdir");
    let mut engine = engine_in(&dir);

    assert!(engine.record(&event("t1", "a1", EVENING, true)));
    assert!(engine.record(&event("t1", "a1", EVENING + MINUTE, true)));

    let stats = engine.snapshot().expect("snapshot");
    assert_eq!(stats.sessions.len(), 1);
    assert_eq!(stats.sessions[0].track_ids.len(), 2);
    let pattern = &stats.skip_patterns["2024-05-15"];
    assert_eq!(pattern.skip_sequence_count, 1);
    assert_eq!(pattern.max_consecutive_skips, 2);
    assert_eq!(stats.track_metrics["t1"].skip_count, 2);
}

#[test]
fn thirty_one_minute_gap_starts_a_new_session() {
    let dir = tempdir().expect("tempdir");
    let mut engine = engine_in(&dir);

    assert!(engine.record(&event("t1", "a1", EVENING, false)));
    assert!(engine.record(&event("t2", "a1", EVENING + 31 * MINUTE, false)));

    let stats = engine.snapshot().expect("snapshot");
    assert_eq!(stats.sessions.len(), 2);
    let recent = queries::recent_sessions(&stats, 1);
    assert_eq!(recent[0].track_ids, vec!["t2"]);
}

#[test]
fn late_event_gets_its_own_session() {
    let dir = tempdir().expect("tempdir");
    let mut engine = engine_in(&dir);
    let afternoon = EVENING - 5 * 60 * MINUTE;

    assert!(engine.record(&event("t1", "a1", EVENING, false)));
    assert!(engine.record(&event("t2", "a1", afternoon, false)));

    let stats = engine.snapshot().expect("snapshot");
    assert_eq!(stats.sessions.len(), 2);
    assert_eq!(stats.sessions[0].track_ids, vec!["t2"]);
    assert_eq!(stats.sessions[0].start_time, afternoon);
    assert_eq!(stats.sessions[1].track_ids, vec!["t1"]);
    assert_eq!(stats.sessions[1].start_time, EVENING);
    assert_eq!(stats.sessions[1].duration_ms, 0);
}

#[test]
fn late_and_early_hours_accumulate_separately() {
    let dir = tempdir().expect("tempdir");
    let mut engine = engine_in(&dir);
    let eleven_pm = EVENING + 3 * 60 * MINUTE;
    let two_am = EVENING + 6 * 60 * MINUTE;

    for n in 0..3 {
        assert!(engine.record(&event("t1", "a1", eleven_pm + n * MINUTE, true)));
    }
    assert!(engine.record(&event("t2", "a1", two_am, true)));

    let stats = engine.snapshot().expect("snapshot");
    assert_eq!(stats.hourly_distribution[23], 3);
    assert_eq!(stats.hourly_distribution[2], 1);
    assert_eq!(stats.skip_patterns["2024-05-15"].high_skip_rate_hours, vec![23]);
    assert_eq!(stats.skip_patterns["2024-05-16"].high_skip_rate_hours, vec![2]);

    let mut history = SkipHistory::new();
    history.insert(
        String::from("t1"),
        SkippedTrack {
            time_of_day: [(String::from("23"), 3), (String::from("2"), 1)]
                .into_iter()
                .collect(),
            ..SkippedTrack::default()
        },
    );
    let temporal = patterns::temporal_distribution(&history, &Calendar::utc());
    assert_eq!(temporal.peak_hours[..2], [23u8, 2]);
}

#[test]
fn clear_resets_to_default_shape() {
    let dir = tempdir().expect("tempdir");
    let mut engine = engine_in(&dir);
    assert!(engine.record(&event("t1", "a1", EVENING, true)));

    engine.clear().expect("clear");

    let stats = engine.snapshot().expect("snapshot");
    assert!(stats.daily_metrics.is_empty());
    assert!(stats.sessions.is_empty());
    assert_eq!(stats.total_unique_tracks, 0);
    assert_eq!(stats.overall_skip_rate, 0.0);
    assert_eq!(stats.hourly_distribution, vec![0_u64; 24]);
    assert_eq!(stats.daily_distribution, vec![0_u64; 7]);
    assert_eq!(stats.recent_skip_rate_trend.len(), 14);
    assert_eq!(stats.recent_listening_time_trend.len(), 14);
}

#[test]
fn failed_update_leaves_store_untouched() {
    let dir = tempdir().expect("tempdir");
    let mut engine = engine_in(&dir);
    assert!(engine.record(&event("t1", "a1", EVENING, false)));
    let before = fs::read_to_string(engine.file().path()).expect("read");

    assert!(!engine.record(&event("t2", "a1", i64::MAX, false)));

    let after = fs::read_to_string(engine.file().path()).expect("read");
    assert_eq!(before, after);
}

#[test]
fn legacy_file_is_repaired_before_updating() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("listening_stats.json");
    let legacy = json!({
        "daily_metrics": {
            "2024-05-15": { "tracks_played": 2, "unique_tracks": { "t9": true } }
        },
        "track_metrics": { "t9": { "id": "t9", "play_count": 2 } },
        "total_unique_tracks": 50,
        "hourly_distribution": [0, 1]
    });
    fs::write(&path, legacy.to_string()).expect("write legacy");
    let mut engine = Engine::new(StoreFile::at(&path), Calendar::utc());

    assert!(engine.record(&event("t1", "a1", EVENING, false)));

    let stats = engine.snapshot().expect("snapshot");
    let daily = &stats.daily_metrics["2024-05-15"];
    assert_eq!(daily.totals.tracks_played, 3);
    assert!(daily.totals.unique_tracks.contains("t9"));
    assert!(daily.totals.unique_tracks.contains("t1"));
    assert_eq!(stats.total_unique_tracks, 2);
    assert_eq!(stats.hourly_distribution.len(), 24);
    assert_eq!(stats.hourly_distribution[1], 1);
    assert_eq!(stats.hourly_distribution[20], 1);
}

#[test]
fn export_round_trips_through_repair() {
    let dir = tempdir().expect("tempdir");
    let mut engine = engine_in(&dir);
    assert!(engine.record(&event("t1", "a1", EVENING, true)));
    assert!(engine.record(&event("t2", "a2", EVENING + MINUTE, false)));
    let stats = engine.snapshot().expect("snapshot");

    let exported = dir.path().join("export.json");
    store::export_to(&stats, &exported).expect("export");
    let raw = fs::read_to_string(&exported).expect("read export");
    let reloaded: AggregateStore =
        store::repair(serde_json::from_str(&raw).expect("valid json"));

    assert_eq!(reloaded, stats);
    let skipped = queries::top_skipped_artists(&reloaded, 5);
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].id, "a1");
}
