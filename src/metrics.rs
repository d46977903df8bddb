//! Global summary figures, recomputed from the keyed collections after every
//! update. Unique counts are always rebuilt from the maps rather than kept as
//! running counters.

use crate::calendar::{self, day_key};
use crate::model::{AggregateStore, TREND_DAYS, ratio};
use std::collections::BTreeMap;
use time::Date;

pub const TOP_ARTISTS: usize = 10;
pub const DISCOVERY_WINDOW_DAYS: i64 = 30;

pub fn recompute(store: &mut AggregateStore, reference: Date) {
    refresh_unique_totals(store);
    store.overall_skip_rate = overall_skip_rate(store);
    refresh_recent_trends(store);
    store.top_artist_ids = top_artist_ids(store, TOP_ARTISTS);
    store.discovery_rate = discovery_rate(store, reference);
    refresh_session_averages(store);
}

pub fn refresh_unique_totals(store: &mut AggregateStore) {
    store.total_unique_tracks = store.track_metrics.len() as u64;
    store.total_unique_artists = store.artist_metrics.len() as u64;
}

pub fn overall_skip_rate(store: &AggregateStore) -> f64 {
    let (skipped, played) = store
        .daily_metrics
        .values()
        .fold((0_u64, 0_u64), |(skipped, played), daily| {
            (
                skipped.saturating_add(daily.totals.tracks_skipped),
                played.saturating_add(daily.totals.tracks_played),
            )
        });
    ratio(skipped, played)
}

/// Last 14 days that have data, oldest first, padded with zeros in front.
pub fn refresh_recent_trends(store: &mut AggregateStore) {
    let recent: Vec<_> = store.daily_metrics.values().rev().take(TREND_DAYS).collect();
    let padding = TREND_DAYS - recent.len();

    let mut skip_rates = vec![0.0; padding];
    let mut listening = vec![0; padding];
    for daily in recent.into_iter().rev() {
        skip_rates.push(daily.totals.skip_rate());
        listening.push(daily.totals.listening_time_ms);
    }

    store.recent_skip_rate_trend = skip_rates;
    store.recent_listening_time_trend = listening;
}

pub fn top_artist_ids(store: &AggregateStore, limit: usize) -> Vec<String> {
    let mut artists: Vec<_> = store.artist_metrics.values().collect();
    artists.sort_by(|a, b| {
        b.listening_time_ms
            .cmp(&a.listening_time_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
    artists
        .into_iter()
        .take(limit)
        .map(|artist| artist.id.clone())
        .collect()
}

/// Earliest day key each artist shows up in a daily window.
pub fn first_seen_days(store: &AggregateStore) -> BTreeMap<&str, &str> {
    let mut first_seen = BTreeMap::new();
    // Day keys sort chronologically, so the first hit is the earliest.
    for (day, daily) in &store.daily_metrics {
        for artist in &daily.totals.unique_artists {
            first_seen.entry(artist.as_str()).or_insert(day.as_str());
        }
    }
    first_seen
}

pub fn first_seen_day(store: &AggregateStore, artist_id: &str) -> Option<String> {
    store
        .daily_metrics
        .iter()
        .find(|(_, daily)| daily.totals.unique_artists.contains(artist_id))
        .map(|(day, _)| day.clone())
}

pub fn discovery_cutoff(reference: Date) -> String {
    day_key(calendar::window_start(reference, DISCOVERY_WINDOW_DAYS))
}

/// Share of known artists first heard within the discovery window.
pub fn discovery_rate(store: &AggregateStore, reference: Date) -> f64 {
    let cutoff = discovery_cutoff(reference);
    let first_seen = first_seen_days(store);
    let discovered = store
        .artist_metrics
        .keys()
        .filter(|id| {
            first_seen
                .get(id.as_str())
                .is_some_and(|day| *day >= cutoff.as_str())
        })
        .count() as u64;
    ratio(discovered, store.artist_metrics.len() as u64)
}

pub fn refresh_session_averages(store: &mut AggregateStore) {
    let sessions = &store.sessions;
    store.avg_session_duration_ms = if sessions.is_empty() {
        0.0
    } else {
        sessions.iter().map(|s| s.duration_ms as f64).sum::<f64>() / sessions.len() as f64
    };

    let (repeated, total) = sessions.iter().fold((0_u64, 0_u64), |(repeated, total), s| {
        (
            repeated.saturating_add(s.repeated_tracks),
            total.saturating_add(s.track_ids.len() as u64),
        )
    });
    store.repeat_listening_rate = ratio(repeated, total);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtistMetric, DailyMetric, Session, TrackMetric};
    use time::macros::date;

    fn daily(played: u64, skipped: u64, listening: u64, artists: &[&str]) -> DailyMetric {
        let mut metric = DailyMetric::default();
        metric.totals.tracks_played = played;
        metric.totals.tracks_skipped = skipped;
        metric.totals.listening_time_ms = listening;
        for artist in artists {
            metric.totals.unique_artists.insert(*artist);
        }
        metric
    }

    fn artist(id: &str, listening: u64) -> ArtistMetric {
        ArtistMetric {
            id: id.to_string(),
            listening_time_ms: listening,
            ..ArtistMetric::default()
        }
    }

    #[test]
    fn trends_are_left_padded_and_ordered() {
        let mut store = AggregateStore::default();
        store
            .daily_metrics
            .insert("2024-05-01".into(), daily(4, 1, 100, &[]));
        store
            .daily_metrics
            .insert("2024-05-03".into(), daily(2, 2, 300, &[]));

        refresh_recent_trends(&mut store);

        assert_eq!(store.recent_skip_rate_trend.len(), TREND_DAYS);
        assert_eq!(store.recent_listening_time_trend.len(), TREND_DAYS);
        assert_eq!(store.recent_skip_rate_trend[12], 0.25);
        assert_eq!(store.recent_skip_rate_trend[13], 1.0);
        assert_eq!(store.recent_listening_time_trend[..12], [0u64; 12]);
        assert_eq!(store.recent_listening_time_trend[13], 300);
    }

    #[test]
    fn trends_keep_only_the_latest_fourteen_days() {
        let mut store = AggregateStore::default();
        for day in 1..=20 {
            store
                .daily_metrics
                .insert(format!("2024-05-{day:02}"), daily(1, 0, day, &[]));
        }

        refresh_recent_trends(&mut store);

        assert_eq!(store.recent_listening_time_trend[0], 7);
        assert_eq!(store.recent_listening_time_trend[13], 20);
    }

    #[test]
    fn overall_skip_rate_is_guarded() {
        let mut store = AggregateStore::default();
        assert_eq!(overall_skip_rate(&store), 0.0);
        store
            .daily_metrics
            .insert("2024-05-01".into(), daily(3, 1, 0, &[]));
        store
            .daily_metrics
            .insert("2024-05-02".into(), daily(1, 1, 0, &[]));
        assert_eq!(overall_skip_rate(&store), 0.5);
    }

    #[test]
    fn top_artists_sorted_by_listening_time_then_id() {
        let mut store = AggregateStore::default();
        for (id, listening) in [("b", 10), ("a", 10), ("c", 50)] {
            store.artist_metrics.insert(id.into(), artist(id, listening));
        }
        for n in 0..12 {
            let id = format!("z{n:02}");
            store.artist_metrics.insert(id.clone(), artist(&id, 1));
        }

        let top = top_artist_ids(&store, TOP_ARTISTS);

        assert_eq!(top.len(), TOP_ARTISTS);
        assert_eq!(top[..3], ["c", "a", "b"]);
    }

    #[test]
    fn discovery_rate_counts_recent_first_listens() {
        let mut store = AggregateStore::default();
        store
            .daily_metrics
            .insert("2024-01-01".into(), daily(1, 0, 0, &["old"]));
        store
            .daily_metrics
            .insert("2024-05-20".into(), daily(2, 0, 0, &["old", "new"]));
        store.artist_metrics.insert("old".into(), artist("old", 1));
        store.artist_metrics.insert("new".into(), artist("new", 1));

        assert_eq!(discovery_rate(&store, date!(2024 - 05 - 25)), 0.5);
        assert_eq!(
            first_seen_day(&store, "old").as_deref(),
            Some("2024-01-01")
        );
    }

    #[test]
    fn unique_totals_follow_map_sizes() {
        let mut store = AggregateStore {
            total_unique_tracks: 40,
            ..AggregateStore::default()
        };
        store.track_metrics.insert("t1".into(), TrackMetric::default());
        store.artist_metrics.insert("a1".into(), artist("a1", 0));

        recompute(&mut store, date!(2024 - 05 - 25));

        assert_eq!(store.total_unique_tracks, 1);
        assert_eq!(store.total_unique_artists, 1);
    }

    #[test]
    fn session_averages() {
        let mut store = AggregateStore::default();
        store.sessions.push(Session {
            duration_ms: 1_000,
            track_ids: vec!["t1".into(), "t1".into()],
            repeated_tracks: 1,
            ..Session::default()
        });
        store.sessions.push(Session {
            duration_ms: 3_000,
            track_ids: vec!["t2".into(), "t3".into()],
            ..Session::default()
        });

        refresh_session_averages(&mut store);

        assert_eq!(store.avg_session_duration_ms, 2_000.0);
        assert_eq!(store.repeat_listening_rate, 0.25);
    }
}
