//! Read-only views over a loaded store.

use crate::calendar::Calendar;
use crate::model::{AggregateStore, ArtistMetric, Session, TrackMetric};
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkipSummary {
    pub today_skips: u64,
    pub week_skips: u64,
    pub month_skips: u64,
    pub overall_skip_percent: f64,
    /// Mean listening time before a skip, weighted by each artist's skips.
    pub avg_skip_time_ms: f64,
    pub total_unique_tracks: u64,
    pub total_unique_artists: u64,
}

pub fn summary(store: &AggregateStore, calendar: &Calendar, now_ms: i64) -> Result<SkipSummary> {
    let keys = calendar.keys(now_ms)?;

    let today_skips = store
        .daily_metrics
        .get(&keys.day)
        .map(|daily| daily.totals.tracks_skipped)
        .unwrap_or(0);
    let week_skips = store
        .weekly_metrics
        .get(&keys.week)
        .map(|weekly| weekly.totals.tracks_skipped)
        .unwrap_or(0);
    let month_skips = store
        .monthly_metrics
        .get(&keys.month)
        .map(|monthly| monthly.totals.tracks_skipped)
        .unwrap_or(0);

    let (weighted, skips) = store
        .artist_metrics
        .values()
        .fold((0.0, 0_u64), |(weighted, skips), artist| {
            (
                weighted + artist.avg_listening_before_skip_ms * artist.skip_count as f64,
                skips.saturating_add(artist.skip_count),
            )
        });
    let avg_skip_time_ms = if skips == 0 {
        0.0
    } else {
        weighted / skips as f64
    };

    Ok(SkipSummary {
        today_skips,
        week_skips,
        month_skips,
        overall_skip_percent: store.overall_skip_rate * 100.0,
        avg_skip_time_ms,
        total_unique_tracks: store.total_unique_tracks,
        total_unique_artists: store.total_unique_artists,
    })
}

/// Tracks with at least one skip, most recently played first.
pub fn recent_skipped_tracks(store: &AggregateStore, limit: usize) -> Vec<&TrackMetric> {
    let mut tracks: Vec<_> = store
        .track_metrics
        .values()
        .filter(|track| track.skip_count > 0)
        .collect();
    tracks.sort_by(|a, b| {
        b.last_played
            .cmp(&a.last_played)
            .then_with(|| a.id.cmp(&b.id))
    });
    tracks.truncate(limit);
    tracks
}

pub fn top_skipped_artists(store: &AggregateStore, limit: usize) -> Vec<&ArtistMetric> {
    let mut artists: Vec<_> = store
        .artist_metrics
        .values()
        .filter(|artist| artist.skip_count > 0)
        .collect();
    artists.sort_by(|a, b| {
        b.skip_count
            .cmp(&a.skip_count)
            .then_with(|| b.skip_rate.total_cmp(&a.skip_rate))
            .then_with(|| a.id.cmp(&b.id))
    });
    artists.truncate(limit);
    artists
}

pub fn recent_sessions(store: &AggregateStore, limit: usize) -> Vec<&Session> {
    let mut sessions: Vec<_> = store.sessions.iter().collect();
    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    sessions.truncate(limit);
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DailyMetric, MonthlyMetric, WeeklyMetric};
    use time::macros::datetime;

    fn artist(id: &str, skips: u64, rate: f64, before_skip: f64) -> ArtistMetric {
        ArtistMetric {
            id: id.to_string(),
            skip_count: skips,
            skip_rate: rate,
            avg_listening_before_skip_ms: before_skip,
            ..ArtistMetric::default()
        }
    }

    fn track(id: &str, skips: u64, last_played: i64) -> TrackMetric {
        TrackMetric {
            id: id.to_string(),
            play_count: skips.max(1),
            skip_count: skips,
            last_played,
            ..TrackMetric::default()
        }
    }

    #[test]
    fn summary_reads_current_windows() {
        let now = (datetime!(2024-05-15 12:00 UTC).unix_timestamp_nanos() / 1_000_000) as i64;
        let mut store = AggregateStore::default();
        let mut daily = DailyMetric::default();
        daily.totals.tracks_skipped = 2;
        store.daily_metrics.insert("2024-05-15".into(), daily);
        let mut weekly = WeeklyMetric::default();
        weekly.totals.tracks_skipped = 5;
        store.weekly_metrics.insert("2024-W20".into(), weekly);
        let mut monthly = MonthlyMetric::default();
        monthly.totals.tracks_skipped = 9;
        store.monthly_metrics.insert("2024-05".into(), monthly);
        store.overall_skip_rate = 0.25;
        store.artist_metrics.insert("a1".into(), artist("a1", 1, 1.0, 10_000.0));
        store.artist_metrics.insert("a2".into(), artist("a2", 3, 0.5, 30_000.0));

        let summary = summary(&store, &Calendar::utc(), now).expect("summary");

        assert_eq!(summary.today_skips, 2);
        assert_eq!(summary.week_skips, 5);
        assert_eq!(summary.month_skips, 9);
        assert_eq!(summary.overall_skip_percent, 25.0);
        assert_eq!(summary.avg_skip_time_ms, 25_000.0);
    }

    #[test]
    fn empty_store_summary_is_zeroed() {
        let summary = summary(&AggregateStore::default(), &Calendar::utc(), 0).expect("summary");
        assert_eq!(summary.today_skips, 0);
        assert_eq!(summary.avg_skip_time_ms, 0.0);
    }

    #[test]
    fn skipped_tracks_latest_first() {
        let mut store = AggregateStore::default();
        for (id, skips, at) in [("old", 1, 10), ("never", 0, 99), ("new", 2, 50)] {
            store.track_metrics.insert(id.into(), track(id, skips, at));
        }

        let ids: Vec<_> = recent_skipped_tracks(&store, 10)
            .into_iter()
            .map(|t| t.id.as_str())
            .collect();

        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn skipped_artists_rank_by_count_then_rate() {
        let mut store = AggregateStore::default();
        store.artist_metrics.insert("a".into(), artist("a", 4, 0.2, 0.0));
        store.artist_metrics.insert("b".into(), artist("b", 4, 0.8, 0.0));
        store.artist_metrics.insert("c".into(), artist("c", 7, 0.1, 0.0));
        store.artist_metrics.insert("d".into(), artist("d", 0, 0.0, 0.0));

        let ids: Vec<_> = top_skipped_artists(&store, 2)
            .into_iter()
            .map(|a| a.id.as_str())
            .collect();

        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn sessions_newest_first() {
        let mut store = AggregateStore::default();
        for start in [100, 300, 200] {
            store.sessions.push(Session {
                id: format!("session-{start}"),
                start_time: start,
                ..Session::default()
            });
        }

        let starts: Vec<_> = recent_sessions(&store, 2)
            .into_iter()
            .map(|s| s.start_time)
            .collect();

        assert_eq!(starts, vec![300, 200]);
    }
}
