#![no_main]

use libfuzzer_sys::fuzz_target;
use skiptrack::store::repair;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let store = repair(value);
    assert_eq!(store.hourly_distribution.len(), 24);
    assert_eq!(store.daily_distribution.len(), 7);
    assert_eq!(store.total_unique_artists, store.artist_metrics.len() as u64);
});
