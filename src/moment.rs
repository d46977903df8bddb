use crate::calendar::Calendar;
use anyhow::Result;
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const LOCAL_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// When a skip happened, as the skipped-tracks history recorded it.
///
/// The playback monitor writes wall-clock strings like `2024-05-20T10:00:00`
/// with no offset; those are read in the calendar's offset. Epoch
/// milliseconds are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipMoment {
    EpochMs(i64),
    Local(PrimitiveDateTime),
}

impl SkipMoment {
    /// Integers are epoch milliseconds. Fractional seconds are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(ms) = raw.parse::<i64>() {
            return Some(Self::EpochMs(ms));
        }
        let whole = raw.split_once('.').map_or(raw, |(whole, _)| whole);
        PrimitiveDateTime::parse(whole, LOCAL_FORMAT)
            .ok()
            .map(Self::Local)
    }

    pub fn resolve(self, calendar: &Calendar) -> Result<OffsetDateTime> {
        match self {
            Self::EpochMs(ms) => calendar.datetime(ms),
            Self::Local(at) => Ok(at.assume_offset(calendar.offset())),
        }
    }

    pub fn epoch_ms(self, calendar: &Calendar) -> i64 {
        match self {
            Self::EpochMs(ms) => ms,
            Self::Local(at) => {
                let nanos = at.assume_offset(calendar.offset()).unix_timestamp_nanos();
                (nanos / 1_000_000) as i64
            }
        }
    }
}

impl Serialize for SkipMoment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::EpochMs(ms) => serializer.serialize_i64(*ms),
            Self::Local(at) => {
                let text = at.format(LOCAL_FORMAT).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&text)
            }
        }
    }
}

/// `"N/A"`, empty strings and other junk read as no moment.
pub fn lenient_moment<'de, D>(deserializer: D) -> Result<Option<SkipMoment>, D::Error>
where
    D: Deserializer<'de>,
{
    RawMoment::deserialize(deserializer).map(|RawMoment(moment)| moment)
}

/// Unreadable entries are dropped; anything but a list reads as empty.
pub fn lenient_moments<'de, D>(deserializer: D) -> Result<Vec<SkipMoment>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(MomentsVisitor)
}

struct MomentsVisitor;

impl<'de> Visitor<'de> for MomentsVisitor {
    type Value = Vec<SkipMoment>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a list of skip times")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut moments = Vec::new();
        while let Some(RawMoment(moment)) = seq.next_element()? {
            moments.extend(moment);
        }
        Ok(moments)
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(Vec::new())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }
}

struct RawMoment(Option<SkipMoment>);

impl<'de> Deserialize<'de> for RawMoment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(RawMomentVisitor)
    }
}

struct RawMomentVisitor;

impl<'de> Visitor<'de> for RawMomentVisitor {
    type Value = RawMoment;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a skip time")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(RawMoment(SkipMoment::parse(value)))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(RawMoment(Some(SkipMoment::EpochMs(value))))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(RawMoment(i64::try_from(value).ok().map(SkipMoment::EpochMs)))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        Ok(RawMoment(
            value.is_finite().then(|| SkipMoment::EpochMs(value as i64)),
        ))
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(RawMoment(None))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(RawMoment(None))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(RawMoment(None))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(RawMoment(None))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(RawMoment(None))
    }
}
