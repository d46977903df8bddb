//! The one way the aggregate store changes.
//!
//! [`Engine`] owns the store file; recording takes `&mut self`, so a host that
//! shares an engine has to serialize writers itself. Each update loads the
//! whole store, applies one event and writes the result back. A failure at
//! any step leaves the file untouched.

use crate::calendar::{self, Calendar, WindowKeys, day_key, parse_day_key, week_key};
use crate::config::Settings;
use crate::metrics;
use crate::model::{
    AggregateStore, ArtistMetric, DeviceMetric, HOURS_PER_DAY, PlaybackEvent, SkipType,
    TrackMetric, WindowTotals,
};
use crate::session::{self, Placement};
use crate::store::StoreFile;
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use time::Duration;

/// How far back in the session a skip streak is traced.
pub const SKIP_LOOKBACK: usize = 10;
pub const MAX_RECENT_DISCOVERIES: usize = 50;
pub const MAX_HIGH_SKIP_HOURS: usize = 5;

#[derive(Debug)]
pub struct Engine {
    file: StoreFile,
    calendar: Calendar,
}

impl Engine {
    pub fn new(file: StoreFile, calendar: Calendar) -> Self {
        Self { file, calendar }
    }

    /// Engine over the store in the configured data directory.
    pub fn open_default(settings: &Settings) -> Result<Self> {
        Ok(Self::new(StoreFile::default_location()?, settings.calendar()))
    }

    pub fn file(&self) -> &StoreFile {
        &self.file
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn snapshot(&self) -> Result<AggregateStore> {
        self.file.load()
    }

    /// Records one event. Failures are logged and reported as `false`.
    pub fn record(&mut self, event: &PlaybackEvent) -> bool {
        match self.try_record(event) {
            Ok(_) => true,
            Err(err) => {
                log::error!(
                    "failed to record playback of {} at {}: {err:#}",
                    event.track_id,
                    event.timestamp_ms
                );
                false
            }
        }
    }

    pub fn try_record(&mut self, event: &PlaybackEvent) -> Result<AggregateStore> {
        let mut store = self.file.load()?;
        apply_event(&mut store, event, &self.calendar)?;
        self.file.save(&store)?;
        log::debug!(
            "recorded {} by {} (skipped: {}), {} tracks known",
            event.track_id,
            event.artist_id,
            event.was_skipped,
            store.total_unique_tracks
        );
        Ok(store)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.file.clear()?;
        log::info!("cleared stats store at {}", self.file.path().display());
        Ok(())
    }
}

/// Folds one event into `store`. On error `store` may be partially updated
/// and must be discarded by the caller.
pub fn apply_event(
    store: &mut AggregateStore,
    event: &PlaybackEvent,
    calendar: &Calendar,
) -> Result<()> {
    let keys = calendar.keys(event.timestamp_ms)?;
    let placement = session::place(&store.sessions, event.timestamp_ms);
    let repeated = session::is_repeat(&store.sessions, placement, &event.track_id);
    let skip_type = event.resolved_skip_type();

    update_windows(store, event, skip_type, &keys);
    refresh_most_active_day(store, &keys);
    refresh_month(store, &keys);
    update_artist(store, event, &keys);
    update_device(store, event, &keys);
    update_track(store, event, repeated);
    update_skip_pattern(store, event, placement, &keys);

    session::apply(&mut store.sessions, placement, event, &store.track_metrics);
    refresh_week_sessions(store, calendar, &keys);
    update_distributions(store, event, &keys);
    metrics::recompute(store, keys.date);
    store.last_updated = calendar::now_epoch_ms();
    Ok(())
}

fn record_totals(totals: &mut WindowTotals, event: &PlaybackEvent, skip_type: SkipType) {
    totals.listening_time_ms = totals.listening_time_ms.saturating_add(event.played_time_ms);
    totals.tracks_played = totals.tracks_played.saturating_add(1);
    if event.was_skipped {
        totals.tracks_skipped = totals.tracks_skipped.saturating_add(1);
        totals.skip_types.record(skip_type);
        if event.is_manual_skip {
            totals.manual_skips = totals.manual_skips.saturating_add(1);
        } else {
            totals.auto_skips = totals.auto_skips.saturating_add(1);
        }
    }
    totals.unique_artists.insert(event.artist_id.as_str());
    totals.unique_tracks.insert(event.track_id.as_str());
}

fn update_windows(
    store: &mut AggregateStore,
    event: &PlaybackEvent,
    skip_type: SkipType,
    keys: &WindowKeys,
) {
    let hour = usize::from(keys.hour);

    let daily = store.daily_metrics.entry(keys.day.clone()).or_default();
    record_totals(&mut daily.totals, event, skip_type);
    bump(&mut daily.hourly_plays, hour, 1);
    let peak = usize::from(daily.peak_hour);
    if daily.hourly_plays[hour] > daily.hourly_plays.get(peak).copied().unwrap_or(0) {
        daily.peak_hour = keys.hour;
    }

    let weekly = store.weekly_metrics.entry(keys.week.clone()).or_default();
    record_totals(&mut weekly.totals, event, skip_type);

    let monthly = store.monthly_metrics.entry(keys.month.clone()).or_default();
    record_totals(&mut monthly.totals, event, skip_type);
}

/// Day of the event's ISO week with the most plays. Days are scanned Monday
/// first and the first maximum wins.
fn refresh_most_active_day(store: &mut AggregateStore, keys: &WindowKeys) {
    let monday = keys
        .date
        .checked_sub(Duration::days(i64::from(keys.weekday)))
        .unwrap_or(keys.date);

    let mut best: Option<(String, u64)> = None;
    for offset in 0..7 {
        let Some(date) = monday.checked_add(Duration::days(offset)) else {
            break;
        };
        let key = day_key(date);
        let Some(daily) = store.daily_metrics.get(&key) else {
            continue;
        };
        let plays = daily.totals.tracks_played;
        if best.as_ref().is_none_or(|(_, most)| plays > *most) {
            best = Some((key, plays));
        }
    }

    if let Some(weekly) = store.weekly_metrics.get_mut(&keys.week) {
        weekly.most_active_day = best.map(|(day, _)| day);
    }
}

fn refresh_month(store: &mut AggregateStore, keys: &WindowKeys) {
    let prefix = format!("{}-", keys.month);
    let mut per_week: BTreeMap<String, u64> = BTreeMap::new();
    for (day, daily) in store
        .daily_metrics
        .range(prefix.clone()..)
        .take_while(|(day, _)| day.starts_with(&prefix))
    {
        let Some(date) = parse_day_key(day) else {
            continue;
        };
        let plays = per_week.entry(week_key(date)).or_insert(0);
        *plays = plays.saturating_add(daily.totals.tracks_played);
    }

    let previous_rate = store
        .monthly_metrics
        .get(&keys.previous_month)
        .map(|month| month.totals.skip_rate())
        .unwrap_or(0.0);

    if let Some(monthly) = store.monthly_metrics.get_mut(&keys.month) {
        monthly.weekly_trend = per_week.into_values().collect();
        let current_rate = monthly.totals.skip_rate();
        monthly.skip_rate_change = if current_rate == 0.0 || previous_rate == 0.0 {
            0.0
        } else {
            (current_rate - previous_rate) / previous_rate * 100.0
        };
    }
}

/// The artist's most played and most skipped tracks across session history
/// plus this event. Ties go to the track seen first.
fn favourite_tracks(
    store: &AggregateStore,
    event: &PlaybackEvent,
) -> (Option<String>, Option<String>) {
    let mut order: Vec<&str> = Vec::new();
    let mut plays: HashMap<&str, u64> = HashMap::new();

    let history = store
        .sessions
        .iter()
        .flat_map(|session| session.track_ids.iter().map(String::as_str));
    for id in history.chain(std::iter::once(event.track_id.as_str())) {
        let belongs = id == event.track_id
            || store
                .track_metrics
                .get(id)
                .is_some_and(|track| track.artist_id == event.artist_id);
        if !belongs {
            continue;
        }
        let count = plays.entry(id).or_insert(0);
        if *count == 0 {
            order.push(id);
        }
        *count += 1;
    }

    let skips_of = |id: &str| {
        let recorded = store
            .track_metrics
            .get(id)
            .map(|track| track.skip_count)
            .unwrap_or(0);
        if id == event.track_id && event.was_skipped {
            recorded + 1
        } else {
            recorded
        }
    };

    let mut most_played: Option<(&str, u64)> = None;
    let mut most_skipped: Option<(&str, u64)> = None;
    for id in order {
        let played = plays.get(id).copied().unwrap_or(0);
        if most_played.is_none_or(|(_, best)| played > best) {
            most_played = Some((id, played));
        }
        let skipped = skips_of(id);
        if skipped > 0 && most_skipped.is_none_or(|(_, best)| skipped > best) {
            most_skipped = Some((id, skipped));
        }
    }

    (
        most_played.map(|(id, _)| id.to_string()),
        most_skipped.map(|(id, _)| id.to_string()),
    )
}

fn update_artist(store: &mut AggregateStore, event: &PlaybackEvent, keys: &WindowKeys) {
    let (most_played, most_skipped) = favourite_tracks(store, event);
    let first_time = !store.artist_metrics.contains_key(&event.artist_id);
    let first_seen = metrics::first_seen_day(store, &event.artist_id);
    let cutoff = metrics::discovery_cutoff(keys.date);

    let artist = store
        .artist_metrics
        .entry(event.artist_id.clone())
        .or_insert_with(|| ArtistMetric {
            id: event.artist_id.clone(),
            ..ArtistMetric::default()
        });
    if !event.artist_name.is_empty() {
        artist.name = event.artist_name.clone();
    }

    artist.listening_time_ms = artist.listening_time_ms.saturating_add(event.played_time_ms);
    artist.tracks_played = artist.tracks_played.saturating_add(1);
    let n = artist.tracks_played as f64;
    let old_rate = artist.skip_rate;
    let skipped = if event.was_skipped { 1.0 } else { 0.0 };
    artist.skip_rate = (old_rate * (n - 1.0) + skipped) / n;
    if event.was_skipped {
        let prior_skips = (old_rate * (n - 1.0)).round();
        artist.avg_listening_before_skip_ms = (artist.avg_listening_before_skip_ms * prior_skips
            + event.played_time_ms as f64)
            / (prior_skips + 1.0);
        artist.skip_count = artist.skip_count.saturating_add(1);
    }
    artist.most_played_track_id = most_played;
    if most_skipped.is_some() {
        artist.most_skipped_track_id = most_skipped;
    }

    let today = artist.recent_plays.entry(keys.day.clone()).or_insert(0);
    *today = today.saturating_add(1);
    artist.recent_plays.retain(|day, _| day.as_str() >= cutoff.as_str());
    artist.recent_listen_count = artist.recent_plays.values().sum();

    artist.is_new_discovery = first_seen
        .as_deref()
        .is_some_and(|day| day >= cutoff.as_str());
    artist.first_seen = first_seen;

    if first_time {
        let id = event.artist_id.clone();
        store.recent_discoveries.retain(|known| known != &id);
        store.recent_discoveries.insert(0, id);
        store.recent_discoveries.truncate(MAX_RECENT_DISCOVERIES);
    }
}

fn update_device(store: &mut AggregateStore, event: &PlaybackEvent, keys: &WindowKeys) {
    let device = store
        .device_metrics
        .entry(event.device_key())
        .or_insert_with(|| DeviceMetric {
            device_name: event.device_name.clone().unwrap_or_else(|| "unknown".into()),
            device_type: event.device_type.clone().unwrap_or_else(|| "unknown".into()),
            ..DeviceMetric::default()
        });

    device.listening_time_ms = device.listening_time_ms.saturating_add(event.played_time_ms);
    device.tracks_played = device.tracks_played.saturating_add(1);
    let n = device.tracks_played as f64;
    let skipped = if event.was_skipped { 1.0 } else { 0.0 };
    device.skip_rate = (device.skip_rate * (n - 1.0) + skipped) / n;
    bump(&mut device.hourly_usage, usize::from(keys.hour), 1);
    device.peak_usage_hour = first_max_index(&device.hourly_usage);
}

fn update_track(store: &mut AggregateStore, event: &PlaybackEvent, repeated: bool) {
    let track = store
        .track_metrics
        .entry(event.track_id.clone())
        .or_insert_with(|| TrackMetric {
            id: event.track_id.clone(),
            ..TrackMetric::default()
        });
    if !event.track_name.is_empty() {
        track.name = event.track_name.clone();
    }
    if !event.artist_name.is_empty() {
        track.artist_name = event.artist_name.clone();
    }
    track.artist_id = event.artist_id.clone();

    track.play_count = track.play_count.saturating_add(1);
    if event.was_skipped {
        track.skip_count = track.skip_count.saturating_add(1);
    }
    let n = track.play_count as f64;
    track.avg_completion_percent =
        (track.avg_completion_percent * (n - 1.0) + event.completion_percent()) / n;
    track.last_played = event.timestamp_ms;
    track.has_been_repeated = repeated;
}

fn update_skip_pattern(
    store: &mut AggregateStore,
    event: &PlaybackEvent,
    placement: Placement,
    keys: &WindowKeys,
) {
    if !event.was_skipped {
        return;
    }

    let earlier = session::trailing_skip_run(
        session::joined(&store.sessions, placement),
        &store.track_metrics,
        SKIP_LOOKBACK,
    );
    let streak = earlier + 1;

    let pattern = store.skip_patterns.entry(keys.day.clone()).or_default();
    bump(&mut pattern.hourly_skips, usize::from(keys.hour), 1);
    pattern.max_consecutive_skips = pattern.max_consecutive_skips.max(streak);
    if streak >= 2 {
        pattern.skip_sequence_count = pattern.skip_sequence_count.saturating_add(1);
        let n = pattern.skip_sequence_count as f64;
        pattern.avg_skips_per_sequence =
            (pattern.avg_skips_per_sequence * (n - 1.0) + streak as f64) / n;
        if let Some(daily) = store.daily_metrics.get_mut(&keys.day) {
            daily.sequential_skips = daily.sequential_skips.saturating_add(1);
        }
    }
    pattern.high_skip_rate_hours = top_hours(&pattern.hourly_skips, MAX_HIGH_SKIP_HOURS);
}

/// Mean length of retained sessions that started in the event's ISO week.
fn refresh_week_sessions(store: &mut AggregateStore, calendar: &Calendar, keys: &WindowKeys) {
    let durations: Vec<f64> = store
        .sessions
        .iter()
        .filter(|session| {
            calendar
                .keys(session.start_time)
                .is_ok_and(|start| start.week == keys.week)
        })
        .map(|session| session.duration_ms as f64)
        .collect();

    if let Some(weekly) = store.weekly_metrics.get_mut(&keys.week) {
        weekly.avg_session_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };
    }
}

fn update_distributions(store: &mut AggregateStore, event: &PlaybackEvent, keys: &WindowKeys) {
    let hour = usize::from(keys.hour);
    store.total_listening_time_ms = store
        .total_listening_time_ms
        .saturating_add(event.played_time_ms);
    bump(&mut store.hourly_distribution, hour, 1);
    bump(&mut store.daily_distribution, usize::from(keys.weekday), 1);
    bump(&mut store.hourly_listening_time, hour, event.played_time_ms);
}

fn bump(buckets: &mut Vec<u64>, index: usize, amount: u64) {
    if buckets.len() <= index {
        buckets.resize(index + 1, 0);
    }
    buckets[index] = buckets[index].saturating_add(amount);
}

fn first_max_index(buckets: &[u64]) -> u8 {
    let mut best = 0;
    for (index, value) in buckets.iter().enumerate().take(HOURS_PER_DAY) {
        if *value > buckets[best] {
            best = index;
        }
    }
    best as u8
}

/// Busiest hours with at least one entry, returned in ascending hour order.
fn top_hours(buckets: &[u64], limit: usize) -> Vec<u8> {
    let mut ranked: Vec<(usize, u64)> = buckets
        .iter()
        .copied()
        .enumerate()
        .take(HOURS_PER_DAY)
        .filter(|(_, count)| *count > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut hours: Vec<u8> = ranked
        .into_iter()
        .take(limit)
        .map(|(hour, _)| hour as u8)
        .collect();
    hours.sort_unstable();
    hours
}
