use crate::id_set::IdSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

pub const HOURS_PER_DAY: usize = 24;
pub const DAYS_PER_WEEK: usize = 7;
pub const TREND_DAYS: usize = 14;

const PREVIEW_MAX_MS: u64 = 30_000;
const PREVIEW_MAX_PERCENT: f64 = 10.0;
const NEAR_END_MIN_PERCENT: f64 = 80.0;
const SHORT_TRACK_MS: u64 = 2 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SkipType {
    Preview,
    #[default]
    Standard,
    NearEnd,
}

impl SkipType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Standard => "standard",
            Self::NearEnd => "near_end",
        }
    }

    /// Lenient parse; anything unrecognized counts as a standard skip.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "preview" => Self::Preview,
            "near_end" | "near-end" | "nearend" => Self::NearEnd,
            _ => Self::Standard,
        }
    }

    /// Classifies a skip from how far into the track it happened.
    pub fn classify(played_time_ms: u64, duration_ms: u64) -> Self {
        let percent = completion_percent(played_time_ms, duration_ms);
        if played_time_ms < PREVIEW_MAX_MS || percent < PREVIEW_MAX_PERCENT {
            Self::Preview
        } else if percent >= NEAR_END_MIN_PERCENT {
            Self::NearEnd
        } else {
            Self::Standard
        }
    }
}

impl Serialize for SkipType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SkipType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// A track moving on before the listener was done with it: under half of a
/// short track (two minutes or less), under a third of anything longer.
pub fn is_early_skip(progress_ms: u64, duration_ms: u64) -> bool {
    if duration_ms <= SHORT_TRACK_MS {
        progress_ms.saturating_mul(2) < duration_ms
    } else {
        progress_ms.saturating_mul(3) < duration_ms
    }
}

pub fn completion_percent(played_time_ms: u64, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        return 0.0;
    }
    (played_time_ms as f64 / duration_ms as f64 * 100.0).clamp(0.0, 100.0)
}

/// `numerator / denominator`, or 0 when there is nothing to divide by.
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

/// One "track played or skipped" report from the playback monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub track_id: String,
    #[serde(default)]
    pub track_name: String,
    pub artist_id: String,
    #[serde(default)]
    pub artist_name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub was_skipped: bool,
    #[serde(default)]
    pub played_time_ms: u64,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub skip_type: Option<SkipType>,
    #[serde(default)]
    pub is_manual_skip: bool,
}

impl PlaybackEvent {
    pub fn resolved_skip_type(&self) -> SkipType {
        self.skip_type
            .unwrap_or_else(|| SkipType::classify(self.played_time_ms, self.duration_ms))
    }

    pub fn completion_percent(&self) -> f64 {
        completion_percent(self.played_time_ms, self.duration_ms)
    }

    pub fn device_key(&self) -> String {
        device_key(
            self.device_type.as_deref().unwrap_or("unknown"),
            self.device_name.as_deref().unwrap_or("unknown"),
        )
    }
}

pub fn device_key(device_type: &str, device_name: &str) -> String {
    format!("{device_type}:{device_name}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipTypeCounts {
    pub preview: u64,
    pub standard: u64,
    pub near_end: u64,
}

impl SkipTypeCounts {
    pub fn record(&mut self, skip_type: SkipType) {
        let slot = match skip_type {
            SkipType::Preview => &mut self.preview,
            SkipType::Standard => &mut self.standard,
            SkipType::NearEnd => &mut self.near_end,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Counters shared by daily, weekly and monthly windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowTotals {
    pub listening_time_ms: u64,
    pub tracks_played: u64,
    pub tracks_skipped: u64,
    pub skip_types: SkipTypeCounts,
    pub manual_skips: u64,
    pub auto_skips: u64,
    pub unique_artists: IdSet,
    pub unique_tracks: IdSet,
}

impl WindowTotals {
    pub fn skip_rate(&self) -> f64 {
        ratio(self.tracks_skipped, self.tracks_played)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyMetric {
    #[serde(flatten)]
    pub totals: WindowTotals,
    pub hourly_plays: Vec<u64>,
    pub peak_hour: u8,
    pub sequential_skips: u64,
}

impl Default for DailyMetric {
    fn default() -> Self {
        Self {
            totals: WindowTotals::default(),
            hourly_plays: vec![0; HOURS_PER_DAY],
            peak_hour: 0,
            sequential_skips: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklyMetric {
    #[serde(flatten)]
    pub totals: WindowTotals,
    pub most_active_day: Option<String>,
    pub avg_session_duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlyMetric {
    #[serde(flatten)]
    pub totals: WindowTotals,
    pub weekly_trend: Vec<u64>,
    /// Percent change of the skip rate against the previous calendar month.
    pub skip_rate_change: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtistMetric {
    pub id: String,
    pub name: String,
    pub listening_time_ms: u64,
    pub skip_rate: f64,
    pub tracks_played: u64,
    pub skip_count: u64,
    pub avg_listening_before_skip_ms: f64,
    pub most_played_track_id: Option<String>,
    pub most_skipped_track_id: Option<String>,
    pub recent_listen_count: u64,
    /// Plays per day key, trimmed to the discovery window.
    pub recent_plays: BTreeMap<String, u64>,
    pub is_new_discovery: bool,
    pub first_seen: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackMetric {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub play_count: u64,
    pub skip_count: u64,
    pub avg_completion_percent: f64,
    pub last_played: i64,
    pub has_been_repeated: bool,
}

impl TrackMetric {
    /// Never once played to the end.
    pub fn always_skipped(&self) -> bool {
        self.play_count > 0 && self.skip_count == self.play_count
    }

    pub fn skip_dominant(&self) -> bool {
        self.skip_count.saturating_mul(2) > self.play_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMetric {
    pub device_name: String,
    pub device_type: String,
    pub listening_time_ms: u64,
    pub tracks_played: u64,
    pub skip_rate: f64,
    pub peak_usage_hour: u8,
    pub hourly_usage: Vec<u64>,
}

impl Default for DeviceMetric {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            device_type: String::new(),
            listening_time_ms: 0,
            tracks_played: 0,
            skip_rate: 0.0,
            peak_usage_hour: 0,
            hourly_usage: vec![0; HOURS_PER_DAY],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: u64,
    pub track_ids: Vec<String>,
    pub skipped_tracks: u64,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub repeated_tracks: u64,
    pub longest_non_skip_streak: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipPatternMetric {
    pub max_consecutive_skips: u64,
    pub skip_sequence_count: u64,
    pub avg_skips_per_sequence: f64,
    pub hourly_skips: Vec<u64>,
    pub high_skip_rate_hours: Vec<u8>,
}

impl Default for SkipPatternMetric {
    fn default() -> Self {
        Self {
            max_consecutive_skips: 0,
            skip_sequence_count: 0,
            avg_skips_per_sequence: 0.0,
            hourly_skips: vec![0; HOURS_PER_DAY],
            high_skip_rate_hours: Vec::new(),
        }
    }
}

/// Root of everything the engine persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateStore {
    pub last_updated: i64,
    pub daily_metrics: BTreeMap<String, DailyMetric>,
    pub weekly_metrics: BTreeMap<String, WeeklyMetric>,
    pub monthly_metrics: BTreeMap<String, MonthlyMetric>,
    pub artist_metrics: BTreeMap<String, ArtistMetric>,
    pub track_metrics: BTreeMap<String, TrackMetric>,
    pub device_metrics: BTreeMap<String, DeviceMetric>,
    pub skip_patterns: BTreeMap<String, SkipPatternMetric>,
    pub sessions: Vec<Session>,
    pub recent_discoveries: Vec<String>,
    pub total_unique_tracks: u64,
    pub total_unique_artists: u64,
    pub overall_skip_rate: f64,
    pub discovery_rate: f64,
    pub total_listening_time_ms: u64,
    pub top_artist_ids: Vec<String>,
    pub hourly_distribution: Vec<u64>,
    pub daily_distribution: Vec<u64>,
    pub avg_session_duration_ms: f64,
    pub hourly_listening_time: Vec<u64>,
    pub repeat_listening_rate: f64,
    pub recent_skip_rate_trend: Vec<f64>,
    pub recent_listening_time_trend: Vec<u64>,
}

impl Default for AggregateStore {
    fn default() -> Self {
        Self {
            last_updated: 0,
            daily_metrics: BTreeMap::new(),
            weekly_metrics: BTreeMap::new(),
            monthly_metrics: BTreeMap::new(),
            artist_metrics: BTreeMap::new(),
            track_metrics: BTreeMap::new(),
            device_metrics: BTreeMap::new(),
            skip_patterns: BTreeMap::new(),
            sessions: Vec::new(),
            recent_discoveries: Vec::new(),
            total_unique_tracks: 0,
            total_unique_artists: 0,
            overall_skip_rate: 0.0,
            discovery_rate: 0.0,
            total_listening_time_ms: 0,
            top_artist_ids: Vec::new(),
            hourly_distribution: vec![0; HOURS_PER_DAY],
            daily_distribution: vec![0; DAYS_PER_WEEK],
            avg_session_duration_ms: 0.0,
            hourly_listening_time: vec![0; HOURS_PER_DAY],
            repeat_listening_rate: 0.0,
            recent_skip_rate_trend: vec![0.0; TREND_DAYS],
            recent_listening_time_trend: vec![0; TREND_DAYS],
        }
    }
}

impl AggregateStore {
    pub fn with_timestamp(last_updated: i64) -> Self {
        Self {
            last_updated,
            ..Self::default()
        }
    }

    /// Forces every fixed-width array back to its documented length.
    pub fn normalize_shape(&mut self) {
        fit(&mut self.hourly_distribution, HOURS_PER_DAY, 0);
        fit(&mut self.daily_distribution, DAYS_PER_WEEK, 0);
        fit(&mut self.hourly_listening_time, HOURS_PER_DAY, 0);
        fit_trend(&mut self.recent_skip_rate_trend, 0.0);
        fit_trend(&mut self.recent_listening_time_trend, 0);
        for daily in self.daily_metrics.values_mut() {
            fit(&mut daily.hourly_plays, HOURS_PER_DAY, 0);
            if usize::from(daily.peak_hour) >= HOURS_PER_DAY {
                daily.peak_hour = 0;
            }
        }
        for device in self.device_metrics.values_mut() {
            fit(&mut device.hourly_usage, HOURS_PER_DAY, 0);
            if usize::from(device.peak_usage_hour) >= HOURS_PER_DAY {
                device.peak_usage_hour = 0;
            }
        }
        for pattern in self.skip_patterns.values_mut() {
            fit(&mut pattern.hourly_skips, HOURS_PER_DAY, 0);
            pattern
                .high_skip_rate_hours
                .retain(|hour| usize::from(*hour) < HOURS_PER_DAY);
            pattern.high_skip_rate_hours.sort_unstable();
            pattern.high_skip_rate_hours.dedup();
            pattern.high_skip_rate_hours.truncate(5);
        }
    }
}

fn fit<T: Clone>(values: &mut Vec<T>, len: usize, fill: T) {
    values.resize(len, fill);
}

/// Trends keep the newest entries, so trimming drops from the front.
fn fit_trend<T: Clone>(values: &mut Vec<T>, fill: T) {
    if values.len() > TREND_DAYS {
        let excess = values.len() - TREND_DAYS;
        values.drain(0..excess);
    }
    while values.len() < TREND_DAYS {
        values.insert(0, fill.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_skip_type_is_standard() {
        let parsed: SkipType = serde_json::from_str(r#""fast_forward""#).expect("parse");
        assert_eq!(parsed, SkipType::Standard);
        let parsed: SkipType = serde_json::from_str(r#""near_end""#).expect("parse");
        assert_eq!(parsed, SkipType::NearEnd);
    }

    #[test]
    fn classifies_skip_by_progress() {
        assert_eq!(SkipType::classify(5_000, 200_000), SkipType::Preview);
        assert_eq!(SkipType::classify(60_000, 200_000), SkipType::Standard);
        assert_eq!(SkipType::classify(170_000, 200_000), SkipType::NearEnd);
        assert_eq!(SkipType::classify(40_000, 0), SkipType::Preview);
    }

    #[test]
    fn early_skip_depends_on_track_length() {
        assert!(is_early_skip(59_000, 120_000));
        assert!(!is_early_skip(60_000, 120_000));
        assert!(is_early_skip(99_000, 300_000));
        assert!(!is_early_skip(100_000, 300_000));
    }

    #[test]
    fn completion_is_guarded_and_clamped() {
        assert_eq!(completion_percent(1_000, 0), 0.0);
        assert_eq!(completion_percent(300_000, 200_000), 100.0);
        assert_eq!(completion_percent(50_000, 200_000), 25.0);
    }

    #[test]
    fn event_deserializes_with_missing_optionals() {
        let event: PlaybackEvent = serde_json::from_str(
            r#"{"track_id":"t1","artist_id":"a1","timestamp_ms":1000,"skip_type":"weird"}"#,
        )
        .expect("event");
        assert_eq!(event.skip_type, Some(SkipType::Standard));
        assert_eq!(event.device_key(), "unknown:unknown");
        assert!(!event.was_skipped);
    }

    #[test]
    fn normalize_shape_pads_trends_at_the_front() {
        let mut store = AggregateStore {
            recent_listening_time_trend: vec![5, 6],
            hourly_distribution: vec![1; 30],
            ..AggregateStore::default()
        };
        store.normalize_shape();
        assert_eq!(store.recent_listening_time_trend.len(), TREND_DAYS);
        assert_eq!(store.recent_listening_time_trend[12], 5);
        assert_eq!(store.recent_listening_time_trend[13], 6);
        assert_eq!(store.hourly_distribution.len(), HOURS_PER_DAY);
    }
}
