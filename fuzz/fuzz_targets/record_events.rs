#![no_main]

use libfuzzer_sys::fuzz_target;
use skiptrack::calendar::Calendar;
use skiptrack::model::{AggregateStore, PlaybackEvent};
use skiptrack::pipeline::apply_event;
use skiptrack::session::MAX_SESSIONS;

fuzz_target!(|data: &[u8]| {
    let mut store = AggregateStore::default();
    let calendar = Calendar::utc();
    let mut timestamp_ms: i64 = 1_700_000_000_000;

    for chunk in data.chunks(4) {
        let [track, gap, played, flags] = match *chunk {
            [a, b, c, d] => [a, b, c, d],
            _ => break,
        };
        timestamp_ms += i64::from(gap) * 60_000;
        let event = PlaybackEvent {
            track_id: format!("t{}", track % 16),
            track_name: String::new(),
            artist_id: format!("a{}", track % 5),
            artist_name: String::new(),
            duration_ms: 180_000,
            was_skipped: flags & 1 == 1,
            played_time_ms: u64::from(played) * 1_000,
            device_name: (flags & 2 == 2).then(|| String::from("Desk")),
            device_type: None,
            timestamp_ms,
            skip_type: None,
            is_manual_skip: flags & 4 == 4,
        };
        if apply_event(&mut store, &event, &calendar).is_err() {
            return;
        }

        assert_eq!(store.total_unique_tracks, store.track_metrics.len() as u64);
        assert!(store.sessions.len() <= MAX_SESSIONS);
        assert_eq!(store.recent_skip_rate_trend.len(), 14);
    }
});
