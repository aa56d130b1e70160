//! Half-open key ranges.

use std::fmt::Display;

use super::{Error, ShardKey, ShardKeyType};

/// A half-open range `[low, high)` of shard keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardRange {
    low: ShardKey,
    high: ShardKey,
}

impl ShardRange {
    /// Create a range. Bounds must share the key type and satisfy
    /// `low < high`.
    pub fn new(low: ShardKey, high: ShardKey) -> Result<Self, Error> {
        if low.compare(&high)? != std::cmp::Ordering::Less {
            return Err(Error::InvalidRange);
        }

        Ok(Self { low, high })
    }

    /// The full key space of a type: `[-inf, +inf)`.
    pub fn full(kind: ShardKeyType) -> Self {
        Self {
            low: ShardKey::min(kind),
            high: ShardKey::max(kind),
        }
    }

    /// The single-key range `[key, successor(key))`.
    pub fn unit(key: ShardKey) -> Result<Self, Error> {
        let high = key.next_key();
        Self::new(key, high)
    }

    /// Convenience constructor from typed values.
    pub fn from_values(
        low: impl Into<super::ShardKeyValue>,
        high: impl Into<super::ShardKeyValue>,
    ) -> Result<Self, Error> {
        Self::new(ShardKey::new(low)?, ShardKey::new(high)?)
    }

    pub fn low(&self) -> &ShardKey {
        &self.low
    }

    pub fn high(&self) -> &ShardKey {
        &self.high
    }

    pub fn kind(&self) -> ShardKeyType {
        self.low.kind()
    }

    /// `low <= key < high`.
    pub fn contains(&self, key: &ShardKey) -> Result<bool, Error> {
        Ok(self.low.compare(key)? != std::cmp::Ordering::Greater
            && key.compare(&self.high)? == std::cmp::Ordering::Less)
    }

    /// Half-open ranges intersect iff each starts before the other ends.
    pub fn intersects(&self, other: &Self) -> Result<bool, Error> {
        Ok(self.low.compare(&other.high)? == std::cmp::Ordering::Less
            && other.low.compare(&self.high)? == std::cmp::Ordering::Less)
    }

    /// The tighter common range, or `None` when disjoint.
    pub fn intersect(&self, other: &Self) -> Result<Option<Self>, Error> {
        if !self.intersects(other)? {
            return Ok(None);
        }

        let low = if self.low.compare(&other.low)? == std::cmp::Ordering::Less {
            other.low.clone()
        } else {
            self.low.clone()
        };
        let high = if self.high.compare(&other.high)? == std::cmp::Ordering::Less {
            self.high.clone()
        } else {
            other.high.clone()
        };

        Ok(Some(Self { low, high }))
    }
}

impl Display for ShardRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn range(low: i32, high: i32) -> ShardRange {
        ShardRange::new(
            ShardKey::new(low).unwrap(),
            ShardKey::new(high).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_bounds_must_be_ordered() {
        let low = ShardKey::new(10i32).unwrap();
        let high = ShardKey::new(10i32).unwrap();
        assert_eq!(ShardRange::new(low, high).unwrap_err(), Error::InvalidRange);

        let low = ShardKey::new(20i32).unwrap();
        let high = ShardKey::new(10i32).unwrap();
        assert_eq!(ShardRange::new(low, high).unwrap_err(), Error::InvalidRange);
    }

    #[test]
    fn test_contains_is_half_open() {
        let r = range(10, 20);
        assert!(r.contains(&ShardKey::new(10i32).unwrap()).unwrap());
        assert!(r.contains(&ShardKey::new(15i32).unwrap()).unwrap());
        assert!(!r.contains(&ShardKey::new(20i32).unwrap()).unwrap());
        assert!(!r.contains(&ShardKey::new(9i32).unwrap()).unwrap());
    }

    #[test]
    fn test_full_range_contains_everything_but_max() {
        let full = ShardRange::full(ShardKeyType::Int32);
        assert!(full.contains(&ShardKey::new(i32::MIN).unwrap()).unwrap());
        assert!(full.contains(&ShardKey::new(i32::MAX).unwrap()).unwrap());
        assert!(!full.contains(&ShardKey::max(ShardKeyType::Int32)).unwrap());
    }

    #[test]
    fn test_intersection() {
        let a = range(10, 20);
        let b = range(15, 30);
        let c = range(20, 30);

        assert!(a.intersects(&b).unwrap());
        assert_eq!(a.intersect(&b).unwrap().unwrap(), range(15, 20));

        // Touching ranges don't intersect.
        assert!(!a.intersects(&c).unwrap());
        assert!(a.intersect(&c).unwrap().is_none());
    }

    #[test]
    fn test_unit_range() {
        let unit = ShardRange::unit(ShardKey::new(5i32).unwrap()).unwrap();
        assert!(unit.contains(&ShardKey::new(5i32).unwrap()).unwrap());
        assert!(!unit.contains(&ShardKey::new(6i32).unwrap()).unwrap());
    }

    #[test]
    fn test_cross_type_bounds_fail() {
        let low = ShardKey::new(1i32).unwrap();
        let high = ShardKey::new(2i64).unwrap();
        assert!(matches!(
            ShardRange::new(low, high).unwrap_err(),
            Error::TypeMismatch(_, _)
        ));
    }
}
