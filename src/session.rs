//! Groups playback events into listening sessions.
//!
//! An event joins a session when it lands within [`SESSION_GAP_MS`] of that
//! session's span. There is no explicit close event; a larger gap simply
//! starts another session. Sessions are kept ordered by start time, so an
//! event delivered late opens its own session in the right place.

use crate::model::{PlaybackEvent, Session, TrackMetric};
use std::collections::BTreeMap;

pub const SESSION_GAP_MS: i64 = 30 * 60 * 1000;
pub const MAX_SESSIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Join { index: usize },
    Open,
}

/// Decides where an event at `timestamp_ms` belongs without touching the list.
/// The most recent session whose span, widened by the gap on both sides,
/// contains the event wins.
pub fn place(sessions: &[Session], timestamp_ms: i64) -> Placement {
    sessions
        .iter()
        .rposition(|session| {
            timestamp_ms >= session.start_time.saturating_sub(SESSION_GAP_MS)
                && timestamp_ms <= session.end_time.saturating_add(SESSION_GAP_MS)
        })
        .map_or(Placement::Open, |index| Placement::Join { index })
}

/// The session an event joins, if it joins one.
pub fn joined<'a>(sessions: &'a [Session], placement: Placement) -> Option<&'a Session> {
    match placement {
        Placement::Join { index } => sessions.get(index),
        Placement::Open => None,
    }
}

pub fn is_repeat(sessions: &[Session], placement: Placement, track_id: &str) -> bool {
    joined(sessions, placement)
        .is_some_and(|session| session.track_ids.iter().any(|id| id == track_id))
}

/// Records the event in its session, opening one when needed, and evicts the
/// oldest sessions beyond [`MAX_SESSIONS`]. `tracks` must already include the
/// event's own track counts.
pub fn apply(
    sessions: &mut Vec<Session>,
    placement: Placement,
    event: &PlaybackEvent,
    tracks: &BTreeMap<String, TrackMetric>,
) {
    let index = match placement {
        Placement::Join { index } if index < sessions.len() => index,
        _ => {
            let index =
                sessions.partition_point(|session| session.start_time <= event.timestamp_ms);
            sessions.insert(
                index,
                Session {
                    id: format!("session-{}", event.timestamp_ms),
                    start_time: event.timestamp_ms,
                    end_time: event.timestamp_ms,
                    ..Session::default()
                },
            );
            index
        }
    };

    let session = &mut sessions[index];
    if session.track_ids.iter().any(|id| id == &event.track_id) {
        session.repeated_tracks = session.repeated_tracks.saturating_add(1);
    }
    session.start_time = session.start_time.min(event.timestamp_ms);
    session.end_time = session.end_time.max(event.timestamp_ms);
    session.duration_ms = u64::try_from(session.end_time.saturating_sub(session.start_time))
        .unwrap_or(0);
    session.track_ids.push(event.track_id.clone());
    if event.was_skipped {
        session.skipped_tracks = session.skipped_tracks.saturating_add(1);
    }
    if event.device_name.is_some() {
        session.device_name = event.device_name.clone();
    }
    if event.device_type.is_some() {
        session.device_type = event.device_type.clone();
    }
    let streak = non_skip_streak(&session.track_ids, tracks);
    session.longest_non_skip_streak = session.longest_non_skip_streak.max(streak);

    if sessions.len() > MAX_SESSIONS {
        let drop_count = sessions.len() - MAX_SESSIONS;
        sessions.drain(0..drop_count);
    }
}

/// Length of the run at the end of `track_ids` whose tracks are not mostly skipped.
fn non_skip_streak(track_ids: &[String], tracks: &BTreeMap<String, TrackMetric>) -> u64 {
    track_ids
        .iter()
        .rev()
        .take_while(|id| tracks.get(id.as_str()).is_some_and(|track| !track.skip_dominant()))
        .count() as u64
}

/// Trailing run of the session's previous tracks that were never played
/// through, looking back at most `limit` entries.
pub fn trailing_skip_run(
    session: Option<&Session>,
    tracks: &BTreeMap<String, TrackMetric>,
    limit: usize,
) -> u64 {
    let Some(session) = session else {
        return 0;
    };
    session
        .track_ids
        .iter()
        .rev()
        .take(limit)
        .take_while(|id| tracks.get(id.as_str()).is_some_and(TrackMetric::always_skipped))
        .count() as u64
}
