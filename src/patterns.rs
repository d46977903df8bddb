//! Read-side skip analytics over the skipped-tracks history file.
//!
//! The history is written by the playback monitor, not by this crate, so
//! every field is optional and records that no longer decode are dropped.

use crate::calendar::{Calendar, MS_PER_DAY};
use crate::model::{HOURS_PER_DAY, ratio};
use crate::moment::{SkipMoment, lenient_moment, lenient_moments};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use time::Weekday;

pub const TOP_CONTEXTS_PER_TYPE: usize = 5;
pub const RANKED_HOURS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkippedTrack {
    pub name: String,
    pub artist: String,
    pub skipped: u64,
    pub not_skipped: u64,
    #[serde(deserialize_with = "lenient_moment")]
    pub last_skipped: Option<SkipMoment>,
    #[serde(deserialize_with = "lenient_moments")]
    pub skipped_dates: Vec<SkipMoment>,
    pub manual_skips: u64,
    pub automatic_skips: u64,
    /// Hour of day ("0".."23") to skip count.
    pub time_of_day: BTreeMap<String, u64>,
    pub contexts: Vec<SkipContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    pub count: u64,
}

/// Track id to skip record.
pub type SkipHistory = BTreeMap<String, SkippedTrack>;

pub fn skip_ratio(track: &SkippedTrack) -> f64 {
    ratio(track.skipped, track.skipped.saturating_add(track.not_skipped))
}

impl SkippedTrack {
    fn hourly_counts(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.time_of_day.iter().filter_map(|(hour, count)| {
            let hour: usize = hour.trim().parse().ok()?;
            (hour < HOURS_PER_DAY).then_some((hour, *count))
        })
    }

    fn manual_share(&self) -> f64 {
        ratio(
            self.manual_skips,
            self.manual_skips.saturating_add(self.automatic_skips),
        )
    }
}

/// Missing file reads as an empty history.
pub fn load_skip_history(path: &Path) -> Result<SkipHistory> {
    if !path.exists() {
        return Ok(SkipHistory::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("{} is not valid JSON ({err}), ignoring it", path.display());
            return Ok(SkipHistory::new());
        }
    };
    Ok(parse_skip_history(parsed))
}

pub fn parse_skip_history(value: Value) -> SkipHistory {
    let Value::Object(entries) = value else {
        return SkipHistory::new();
    };
    let mut history = SkipHistory::new();
    for (track_id, record) in entries {
        match serde_json::from_value::<SkippedTrack>(record) {
            Ok(track) => {
                history.insert(track_id, track);
            }
            Err(err) => log::warn!("dropping skip record for {track_id}: {err}"),
        }
    }
    history
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualSkipAnalysis {
    pub manual: u64,
    pub automatic: u64,
    pub manual_ratio: f64,
    /// Estimated split: each track's overall manual share is spread over
    /// its per-hour counts.
    pub hourly_manual: Vec<f64>,
    pub hourly_automatic: Vec<f64>,
}

pub fn manual_vs_automatic(history: &SkipHistory) -> ManualSkipAnalysis {
    let mut analysis = ManualSkipAnalysis {
        manual: 0,
        automatic: 0,
        manual_ratio: 0.0,
        hourly_manual: vec![0.0; HOURS_PER_DAY],
        hourly_automatic: vec![0.0; HOURS_PER_DAY],
    };

    for track in history.values() {
        analysis.manual = analysis.manual.saturating_add(track.manual_skips);
        analysis.automatic = analysis.automatic.saturating_add(track.automatic_skips);
        let share = track.manual_share();
        for (hour, count) in track.hourly_counts() {
            let count = count as f64;
            analysis.hourly_manual[hour] += count * share;
            analysis.hourly_automatic[hour] += count * (1.0 - share);
        }
    }

    analysis.manual_ratio = ratio(
        analysis.manual,
        analysis.manual.saturating_add(analysis.automatic),
    );
    analysis
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSkipAnalysis {
    /// Context type to its most skipped contexts, highest count first.
    pub by_type: BTreeMap<String, Vec<SkipContext>>,
    pub most_skipped: Option<SkipContext>,
}

pub fn context_skips(history: &SkipHistory) -> ContextSkipAnalysis {
    let mut totals: BTreeMap<(String, String), SkipContext> = BTreeMap::new();
    for context in history.values().flat_map(|track| &track.contexts) {
        let entry = totals
            .entry((context.kind.clone(), context.id.clone()))
            .or_insert_with(|| SkipContext {
                count: 0,
                ..context.clone()
            });
        if entry.name.is_empty() {
            entry.name = context.name.clone();
        }
        entry.count = entry.count.saturating_add(context.count);
    }

    let mut most_skipped: Option<SkipContext> = None;
    let mut by_type: BTreeMap<String, Vec<SkipContext>> = BTreeMap::new();
    for ((kind, _), context) in totals {
        if most_skipped
            .as_ref()
            .is_none_or(|best| context.count > best.count)
        {
            most_skipped = Some(context.clone());
        }
        by_type.entry(kind).or_default().push(context);
    }

    for contexts in by_type.values_mut() {
        // Stable sort keeps id order among equal counts.
        contexts.sort_by(|a, b| b.count.cmp(&a.count));
        contexts.truncate(TOP_CONTEXTS_PER_TYPE);
    }

    ContextSkipAnalysis {
        by_type,
        most_skipped,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeBands {
    /// 05:00 to 11:59.
    pub morning: u64,
    /// 12:00 to 16:59.
    pub afternoon: u64,
    /// 17:00 to 21:59.
    pub evening: u64,
    /// 22:00 to 04:59.
    pub night: u64,
}

impl TimeBands {
    fn add(&mut self, hour: usize, count: u64) {
        let band = match hour {
            5..=11 => &mut self.morning,
            12..=16 => &mut self.afternoon,
            17..=21 => &mut self.evening,
            _ => &mut self.night,
        };
        *band = band.saturating_add(count);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemporalSkipAnalysis {
    pub hourly: Vec<u64>,
    pub bands: TimeBands,
    pub peak_hours: Vec<u8>,
    pub low_hours: Vec<u8>,
    pub weekday: u64,
    pub weekend: u64,
}

/// Hour histogram from each record's `time_of_day` counts. Records without
/// them fall back to the hours of their individual skip timestamps.
pub fn temporal_distribution(history: &SkipHistory, calendar: &Calendar) -> TemporalSkipAnalysis {
    let mut hourly = vec![0_u64; HOURS_PER_DAY];
    let mut weekday = 0_u64;
    let mut weekend = 0_u64;

    for track in history.values() {
        let mut counted_hours = false;
        for (hour, count) in track.hourly_counts() {
            hourly[hour] = hourly[hour].saturating_add(count);
            counted_hours = true;
        }

        for &skipped_at in &track.skipped_dates {
            let Ok(moment) = skipped_at.resolve(calendar) else {
                log::debug!("ignoring out of range skip time {skipped_at:?}");
                continue;
            };
            if matches!(moment.weekday(), Weekday::Saturday | Weekday::Sunday) {
                weekend += 1;
            } else {
                weekday += 1;
            }
            if !counted_hours {
                let hour = usize::from(moment.hour());
                hourly[hour] = hourly[hour].saturating_add(1);
            }
        }
    }

    let mut bands = TimeBands::default();
    for (hour, count) in hourly.iter().enumerate() {
        bands.add(hour, *count);
    }

    let mut ranked: Vec<(usize, u64)> = hourly.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let peak_hours = ranked
        .iter()
        .take(RANKED_HOURS)
        .map(|(hour, _)| *hour as u8)
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    let low_hours = ranked
        .iter()
        .take(RANKED_HOURS)
        .map(|(hour, _)| *hour as u8)
        .collect();

    TemporalSkipAnalysis {
        hourly,
        bands,
        peak_hours,
        low_hours,
        weekday,
        weekend,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipCandidate {
    pub track_id: String,
    pub name: String,
    pub artist: String,
    pub recent_skips: u64,
}

/// Tracks skipped at least `threshold` times in the last `window_days`,
/// most skipped first.
pub fn threshold_candidates(
    history: &SkipHistory,
    calendar: &Calendar,
    threshold: u32,
    window_days: u32,
    now_ms: i64,
) -> Vec<SkipCandidate> {
    let since = now_ms.saturating_sub(i64::from(window_days).saturating_mul(MS_PER_DAY));
    let mut candidates: Vec<SkipCandidate> = history
        .iter()
        .filter_map(|(track_id, track)| {
            let recent_skips = track
                .skipped_dates
                .iter()
                .map(|moment| moment.epoch_ms(calendar))
                .filter(|at| *at >= since && *at <= now_ms)
                .count() as u64;
            (recent_skips > 0 && recent_skips >= u64::from(threshold)).then(|| SkipCandidate {
                track_id: track_id.clone(),
                name: track.name.clone(),
                artist: track.artist.clone(),
                recent_skips,
            })
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.recent_skips
            .cmp(&a.recent_skips)
            .then_with(|| a.track_id.cmp(&b.track_id))
    });
    candidates
}
