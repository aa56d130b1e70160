//! Typed key values and tick conversions.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta};
use once_cell::sync::Lazy;
use uuid::Uuid;

use super::{Error, ShardKeyType};

/// Ticks are 100ns units counted from 0001-01-01T00:00:00.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

static TICK_EPOCH: Lazy<NaiveDateTime> = Lazy::new(|| {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
});

fn tick_epoch() -> NaiveDateTime {
    *TICK_EPOCH
}

/// Convert a timestamp to ticks. Fails for instants before year 1.
pub fn datetime_ticks(value: &NaiveDateTime) -> Result<i64, Error> {
    let span = *value - tick_epoch();
    delta_ticks(&span).and_then(|ticks| {
        if ticks < 0 {
            Err(Error::TimestampOutOfRange)
        } else {
            Ok(ticks)
        }
    })
}

pub fn ticks_datetime(ticks: i64) -> Result<NaiveDateTime, Error> {
    let secs = TimeDelta::try_seconds(ticks / TICKS_PER_SECOND).ok_or(Error::TimestampOutOfRange)?;
    let nanos = TimeDelta::nanoseconds((ticks % TICKS_PER_SECOND) * 100);
    tick_epoch()
        .checked_add_signed(secs)
        .and_then(|dt| dt.checked_add_signed(nanos))
        .ok_or(Error::TimestampOutOfRange)
}

/// Convert a duration to ticks, rounding sub-tick precision away.
pub fn delta_ticks(value: &TimeDelta) -> Result<i64, Error> {
    let secs = value.num_seconds();
    let nanos = value.subsec_nanos() as i64;
    secs.checked_mul(TICKS_PER_SECOND)
        .and_then(|t| t.checked_add(nanos / 100))
        .ok_or(Error::TimestampOutOfRange)
}

pub fn ticks_delta(ticks: i64) -> Result<TimeDelta, Error> {
    let secs = TimeDelta::try_seconds(ticks / TICKS_PER_SECOND).ok_or(Error::TimestampOutOfRange)?;
    secs.checked_add(&TimeDelta::nanoseconds((ticks % TICKS_PER_SECOND) * 100))
        .ok_or(Error::TimestampOutOfRange)
}

/// A shard key value of any supported type.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardKeyValue {
    Int32(i32),
    Int64(i64),
    Guid(Uuid),
    Binary(Bytes),
    DateTime(NaiveDateTime),
    TimeSpan(TimeDelta),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl ShardKeyValue {
    pub fn kind(&self) -> ShardKeyType {
        match self {
            Self::Int32(_) => ShardKeyType::Int32,
            Self::Int64(_) => ShardKeyType::Int64,
            Self::Guid(_) => ShardKeyType::Guid,
            Self::Binary(_) => ShardKeyType::Binary,
            Self::DateTime(_) => ShardKeyType::DateTime,
            Self::TimeSpan(_) => ShardKeyType::TimeSpan,
            Self::DateTimeOffset(_) => ShardKeyType::DateTimeOffset,
        }
    }
}

/// Rust types usable as shard keys on typed shard maps.
pub trait Key: Clone + Send + Sync + 'static {
    const TYPE: ShardKeyType;

    fn into_value(self) -> ShardKeyValue;
    fn from_value(value: ShardKeyValue) -> Option<Self>;
}

impl Key for i32 {
    const TYPE: ShardKeyType = ShardKeyType::Int32;

    fn into_value(self) -> ShardKeyValue {
        ShardKeyValue::Int32(self)
    }

    fn from_value(value: ShardKeyValue) -> Option<Self> {
        match value {
            ShardKeyValue::Int32(v) => Some(v),
            _ => None,
        }
    }
}

impl Key for i64 {
    const TYPE: ShardKeyType = ShardKeyType::Int64;

    fn into_value(self) -> ShardKeyValue {
        ShardKeyValue::Int64(self)
    }

    fn from_value(value: ShardKeyValue) -> Option<Self> {
        match value {
            ShardKeyValue::Int64(v) => Some(v),
            _ => None,
        }
    }
}

impl Key for Uuid {
    const TYPE: ShardKeyType = ShardKeyType::Guid;

    fn into_value(self) -> ShardKeyValue {
        ShardKeyValue::Guid(self)
    }

    fn from_value(value: ShardKeyValue) -> Option<Self> {
        match value {
            ShardKeyValue::Guid(v) => Some(v),
            _ => None,
        }
    }
}

impl Key for Bytes {
    const TYPE: ShardKeyType = ShardKeyType::Binary;

    fn into_value(self) -> ShardKeyValue {
        ShardKeyValue::Binary(self)
    }

    fn from_value(value: ShardKeyValue) -> Option<Self> {
        match value {
            ShardKeyValue::Binary(v) => Some(v),
            _ => None,
        }
    }
}

impl Key for NaiveDateTime {
    const TYPE: ShardKeyType = ShardKeyType::DateTime;

    fn into_value(self) -> ShardKeyValue {
        ShardKeyValue::DateTime(self)
    }

    fn from_value(value: ShardKeyValue) -> Option<Self> {
        match value {
            ShardKeyValue::DateTime(v) => Some(v),
            _ => None,
        }
    }
}

impl Key for TimeDelta {
    const TYPE: ShardKeyType = ShardKeyType::TimeSpan;

    fn into_value(self) -> ShardKeyValue {
        ShardKeyValue::TimeSpan(self)
    }

    fn from_value(value: ShardKeyValue) -> Option<Self> {
        match value {
            ShardKeyValue::TimeSpan(v) => Some(v),
            _ => None,
        }
    }
}

impl Key for DateTime<FixedOffset> {
    const TYPE: ShardKeyType = ShardKeyType::DateTimeOffset;

    fn into_value(self) -> ShardKeyValue {
        ShardKeyValue::DateTimeOffset(self)
    }

    fn from_value(value: ShardKeyValue) -> Option<Self> {
        match value {
            ShardKeyValue::DateTimeOffset(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i32> for ShardKeyValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for ShardKeyValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<Uuid> for ShardKeyValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<Bytes> for ShardKeyValue {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for ShardKeyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value.into())
    }
}

impl From<NaiveDateTime> for ShardKeyValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<TimeDelta> for ShardKeyValue {
    fn from(value: TimeDelta) -> Self {
        Self::TimeSpan(value)
    }
}

impl From<DateTime<FixedOffset>> for ShardKeyValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::DateTimeOffset(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tick_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_milli_opt(13, 37, 1, 250)
            .unwrap();
        let ticks = datetime_ticks(&dt).unwrap();
        assert_eq!(ticks_datetime(ticks).unwrap(), dt);
    }

    #[test]
    fn test_epoch_is_zero() {
        let epoch = NaiveDate::from_ymd_opt(1, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(datetime_ticks(&epoch).unwrap(), 0);
    }

    #[test]
    fn test_negative_delta_ticks() {
        let delta = TimeDelta::try_seconds(-3).unwrap();
        assert_eq!(delta_ticks(&delta).unwrap(), -3 * TICKS_PER_SECOND);
        assert_eq!(ticks_delta(-3 * TICKS_PER_SECOND).unwrap(), delta);
    }
}
