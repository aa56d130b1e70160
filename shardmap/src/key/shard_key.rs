//! Normalized shard keys.
//!
//! Every key value maps to a canonical byte string such that lexicographic
//! byte comparison matches the natural order of the type. Two sentinels
//! frame the space: the empty byte string is the per-type minimum and the
//! absent byte string is the per-type maximum (+inf).

use std::fmt::Display;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use chrono::FixedOffset;

use super::value::{datetime_ticks, delta_ticks, ticks_datetime, ticks_delta, TICKS_PER_SECOND};
use super::{Error, Key, ShardKeyType, ShardKeyValue, MAX_BINARY_LEN};

/// A shard key: a type tag plus the canonical normalized bytes.
///
/// `raw == None` is the +inf sentinel, `raw == Some(empty)` the minimum.
#[derive(Debug, Clone)]
pub struct ShardKey {
    kind: ShardKeyType,
    raw: Option<Bytes>,
}

impl ShardKey {
    /// Build a key from a typed value.
    pub fn new(value: impl Into<ShardKeyValue>) -> Result<Self, Error> {
        let value = value.into();
        let kind = value.kind();
        let raw = normalize(&value)?;

        Ok(Self {
            kind,
            raw: Some(raw),
        })
    }

    /// Build a key from normalized bytes.
    pub fn from_raw(kind: ShardKeyType, raw: impl Into<Bytes>) -> Result<Self, Error> {
        let raw: Bytes = raw.into();
        check_raw_len(kind, &raw)?;

        let raw = if kind == ShardKeyType::Binary {
            trim_trailing_zeros(&raw)
        } else {
            raw
        };

        Ok(Self {
            kind,
            raw: Some(raw),
        })
    }

    /// Rehydrate a key from its stored form. `None` is +inf.
    pub(crate) fn from_stored(kind: ShardKeyType, raw: Option<Bytes>) -> Result<Self, Error> {
        match raw {
            Some(raw) => Self::from_raw(kind, raw),
            None => Ok(Self::max(kind)),
        }
    }

    /// The smallest key of the type (-inf).
    pub fn min(kind: ShardKeyType) -> Self {
        Self {
            kind,
            raw: Some(Bytes::new()),
        }
    }

    /// The +inf sentinel of the type.
    pub fn max(kind: ShardKeyType) -> Self {
        Self { kind, raw: None }
    }

    pub fn kind(&self) -> ShardKeyType {
        self.kind
    }

    pub fn is_min(&self) -> bool {
        matches!(&self.raw, Some(raw) if raw.is_empty())
    }

    pub fn is_max(&self) -> bool {
        self.raw.is_none()
    }

    /// Normalized bytes; `None` for +inf.
    pub fn raw_value(&self) -> Option<&Bytes> {
        self.raw.as_ref()
    }

    pub(crate) fn into_stored(self) -> Option<Bytes> {
        self.raw
    }

    /// The typed value of the key. +inf carries no value.
    pub fn value(&self) -> Result<ShardKeyValue, Error> {
        let raw = self.raw.as_ref().ok_or(Error::MaxHasNoValue)?;
        denormalize(self.kind, raw)
    }

    /// The typed value, converted to a concrete key type.
    pub fn typed<K: Key>(&self) -> Result<K, Error> {
        if K::TYPE != self.kind {
            return Err(Error::WrongValueType {
                requested: K::TYPE,
                actual: self.kind,
            });
        }
        K::from_value(self.value()?).ok_or(Error::WrongValueType {
            requested: K::TYPE,
            actual: self.kind,
        })
    }

    /// The next encodable key of the type. Overflow saturates at +inf,
    /// and the successor of +inf is +inf.
    pub fn next_key(&self) -> Self {
        let Some(raw) = &self.raw else {
            return self.clone();
        };

        match self.kind {
            ShardKeyType::Int32 => match denorm_i32(raw).checked_add(1) {
                Some(next) => Self {
                    kind: self.kind,
                    raw: Some(norm_i32(next)),
                },
                None => Self::max(self.kind),
            },
            ShardKeyType::Int64 | ShardKeyType::TimeSpan => {
                match denorm_i64(raw).checked_add(1) {
                    Some(next) => Self {
                        kind: self.kind,
                        raw: Some(norm_i64(next)),
                    },
                    None => Self::max(self.kind),
                }
            }
            ShardKeyType::DateTime => {
                // Timestamp ticks start at zero, not i64::MIN.
                let ticks = if raw.is_empty() { 0 } else { denorm_i64(raw) };
                match ticks.checked_add(1) {
                    Some(next) => Self {
                        kind: self.kind,
                        raw: Some(norm_i64_full(next)),
                    },
                    None => Self::max(self.kind),
                }
            }
            ShardKeyType::Guid => {
                let mut bytes = [0u8; 16];
                bytes[..raw.len()].copy_from_slice(raw);
                match increment(&mut bytes) {
                    true => Self {
                        kind: self.kind,
                        raw: Some(Bytes::copy_from_slice(&bytes)),
                    },
                    false => Self::max(self.kind),
                }
            }
            ShardKeyType::Binary => {
                let mut bytes = [0u8; MAX_BINARY_LEN];
                bytes[..raw.len()].copy_from_slice(raw);
                match increment(&mut bytes) {
                    true => Self {
                        kind: self.kind,
                        raw: Some(trim_trailing_zeros(&Bytes::copy_from_slice(&bytes))),
                    },
                    false => Self::max(self.kind),
                }
            }
            ShardKeyType::DateTimeOffset => {
                // Successor of the instant; the offset component rides along.
                let mut offset = [0x80u8, 0, 0, 0, 0, 0, 0, 0];
                let ticks = if raw.len() == 16 {
                    let mut utc = [0u8; 8];
                    utc.copy_from_slice(&raw[..8]);
                    offset.copy_from_slice(&raw[8..]);
                    i64::from_be_bytes(utc) ^ i64::MIN
                } else {
                    0
                };
                match ticks.checked_add(1) {
                    Some(next) => {
                        let mut bytes = Vec::with_capacity(16);
                        bytes.extend_from_slice(&(next ^ i64::MIN).to_be_bytes());
                        bytes.extend_from_slice(&offset);
                        Self {
                            kind: self.kind,
                            raw: Some(bytes.into()),
                        }
                    }
                    None => Self::max(self.kind),
                }
            }
        }
    }

    /// Total order over keys of the same type.
    pub fn compare(&self, other: &Self) -> Result<std::cmp::Ordering, Error> {
        if self.kind != other.kind {
            return Err(Error::TypeMismatch(self.kind, other.kind));
        }

        Ok(match (self.ordering_bytes(), other.ordering_bytes()) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(_), None) => std::cmp::Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        })
    }

    // Bytes that participate in ordering and hashing. DateTimeOffset
    // compares by the UTC instant alone, so the offset half is excluded.
    fn ordering_bytes(&self) -> Option<&[u8]> {
        let raw = self.raw.as_ref()?;
        match self.kind {
            ShardKeyType::DateTimeOffset => Some(&raw[..raw.len().min(8)]),
            _ => Some(raw),
        }
    }
}

/// Equality is consistent with [`ShardKey::compare`]; keys of different
/// types are unequal.
impl PartialEq for ShardKey {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.ordering_bytes() == other.ordering_bytes()
    }
}

impl Eq for ShardKey {}

impl Hash for ShardKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.ordering_bytes().hash(state);
    }
}

impl Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value() {
            Err(_) => write!(f, "+inf"),
            Ok(value) => match value {
                ShardKeyValue::Int32(v) => write!(f, "{}", v),
                ShardKeyValue::Int64(v) => write!(f, "{}", v),
                ShardKeyValue::Guid(v) => write!(f, "{}", v),
                ShardKeyValue::Binary(v) => {
                    for byte in v.iter() {
                        write!(f, "{:02x}", byte)?;
                    }
                    Ok(())
                }
                ShardKeyValue::DateTime(v) => write!(f, "{}", v),
                ShardKeyValue::TimeSpan(v) => write!(f, "{}", v),
                ShardKeyValue::DateTimeOffset(v) => write!(f, "{}", v),
            },
        }
    }
}

fn check_raw_len(kind: ShardKeyType, raw: &Bytes) -> Result<(), Error> {
    let len = raw.len();
    let ok = match kind {
        ShardKeyType::Int32 => len == 0 || len == 4,
        ShardKeyType::Int64 | ShardKeyType::DateTime | ShardKeyType::TimeSpan => {
            len == 0 || len == 8
        }
        ShardKeyType::Guid => len == 0 || len == 16,
        ShardKeyType::DateTimeOffset => len == 0 || len == 16,
        ShardKeyType::Binary => {
            if len > MAX_BINARY_LEN {
                return Err(Error::BinaryTooLong(len));
            }
            true
        }
    };

    if ok {
        Ok(())
    } else {
        Err(Error::InvalidRawLength { kind, len })
    }
}

fn normalize(value: &ShardKeyValue) -> Result<Bytes, Error> {
    Ok(match value {
        ShardKeyValue::Int32(v) => norm_i32(*v),
        ShardKeyValue::Int64(v) => norm_i64(*v),
        ShardKeyValue::Guid(v) => {
            if v.is_nil() {
                Bytes::new()
            } else {
                Bytes::copy_from_slice(&reorder_guid(v.to_bytes_le()))
            }
        }
        ShardKeyValue::Binary(v) => {
            if v.len() > MAX_BINARY_LEN {
                return Err(Error::BinaryTooLong(v.len()));
            }
            trim_trailing_zeros(v)
        }
        ShardKeyValue::DateTime(v) => {
            let ticks = datetime_ticks(v)?;
            if ticks == 0 {
                Bytes::new()
            } else {
                norm_i64_full(ticks)
            }
        }
        ShardKeyValue::TimeSpan(v) => norm_i64(delta_ticks(v)?),
        ShardKeyValue::DateTimeOffset(v) => {
            let utc_ticks = datetime_ticks(&v.naive_utc())?;
            let offset_ticks = v.offset().local_minus_utc() as i64 * TICKS_PER_SECOND;
            if utc_ticks == 0 && offset_ticks == 0 {
                Bytes::new()
            } else {
                let mut bytes = Vec::with_capacity(16);
                bytes.extend_from_slice(&(utc_ticks ^ i64::MIN).to_be_bytes());
                bytes.extend_from_slice(&(offset_ticks ^ i64::MIN).to_be_bytes());
                bytes.into()
            }
        }
    })
}

fn denormalize(kind: ShardKeyType, raw: &Bytes) -> Result<ShardKeyValue, Error> {
    Ok(match kind {
        ShardKeyType::Int32 => ShardKeyValue::Int32(denorm_i32(raw)),
        ShardKeyType::Int64 => ShardKeyValue::Int64(denorm_i64(raw)),
        ShardKeyType::Guid => {
            if raw.is_empty() {
                ShardKeyValue::Guid(uuid::Uuid::nil())
            } else {
                let mut csharp = [0u8; 16];
                unorder_guid(raw, &mut csharp);
                ShardKeyValue::Guid(uuid::Uuid::from_bytes_le(csharp))
            }
        }
        ShardKeyType::Binary => ShardKeyValue::Binary(raw.clone()),
        ShardKeyType::DateTime => {
            let ticks = if raw.is_empty() { 0 } else { denorm_i64(raw) };
            ShardKeyValue::DateTime(ticks_datetime(ticks)?)
        }
        ShardKeyType::TimeSpan => ShardKeyValue::TimeSpan(ticks_delta(denorm_i64(raw))?),
        ShardKeyType::DateTimeOffset => {
            let (utc_ticks, offset_ticks) = if raw.is_empty() {
                (0, 0)
            } else {
                let mut utc = [0u8; 8];
                let mut offset = [0u8; 8];
                utc.copy_from_slice(&raw[..8]);
                offset.copy_from_slice(&raw[8..]);
                (
                    i64::from_be_bytes(utc) ^ i64::MIN,
                    i64::from_be_bytes(offset) ^ i64::MIN,
                )
            };
            let utc = ticks_datetime(utc_ticks)?;
            let offset = FixedOffset::east_opt((offset_ticks / TICKS_PER_SECOND) as i32)
                .ok_or(Error::TimestampOutOfRange)?;
            ShardKeyValue::DateTimeOffset(
                chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(utc, chrono::Utc)
                    .with_timezone(&offset),
            )
        }
    })
}

// Signed integers: big-endian with the sign bit flipped. The type minimum
// collapses to the empty string so it sorts below every other value.
fn norm_i32(value: i32) -> Bytes {
    if value == i32::MIN {
        Bytes::new()
    } else {
        Bytes::copy_from_slice(&((value as u32) ^ 0x8000_0000).to_be_bytes())
    }
}

fn denorm_i32(raw: &Bytes) -> i32 {
    if raw.is_empty() {
        i32::MIN
    } else {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(raw);
        (u32::from_be_bytes(bytes) ^ 0x8000_0000) as i32
    }
}

fn norm_i64(value: i64) -> Bytes {
    if value == i64::MIN {
        Bytes::new()
    } else {
        norm_i64_full(value)
    }
}

fn norm_i64_full(value: i64) -> Bytes {
    Bytes::copy_from_slice(&(value ^ i64::MIN).to_be_bytes())
}

fn denorm_i64(raw: &Bytes) -> i64 {
    if raw.is_empty() {
        i64::MIN
    } else {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        i64::from_be_bytes(bytes) ^ i64::MIN
    }
}

// GUID bytes rearranged into the order the server compares them:
// bytes 10..16 are the most significant, then 8..10, 6..8, 4..6, 0..4.
// Input is the mixed-endian wire layout (`Uuid::to_bytes_le`).
fn reorder_guid(wire: [u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..6].copy_from_slice(&wire[10..16]);
    out[6..8].copy_from_slice(&wire[8..10]);
    out[8..10].copy_from_slice(&wire[6..8]);
    out[10..12].copy_from_slice(&wire[4..6]);
    out[12..16].copy_from_slice(&wire[0..4]);
    out
}

fn unorder_guid(normalized: &[u8], wire: &mut [u8; 16]) {
    wire[10..16].copy_from_slice(&normalized[0..6]);
    wire[8..10].copy_from_slice(&normalized[6..8]);
    wire[6..8].copy_from_slice(&normalized[8..10]);
    wire[4..6].copy_from_slice(&normalized[10..12]);
    wire[0..4].copy_from_slice(&normalized[12..16]);
}

// Big-endian increment with carry. Returns false on overflow.
fn increment(bytes: &mut [u8]) -> bool {
    for byte in bytes.iter_mut().rev() {
        let (next, overflow) = byte.overflowing_add(1);
        *byte = next;
        if !overflow {
            return true;
        }
    }
    false
}

fn trim_trailing_zeros(raw: &Bytes) -> Bytes {
    let end = raw
        .iter()
        .rposition(|byte| *byte != 0)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    raw.slice(..end)
}
