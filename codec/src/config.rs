//! Types for use as [crate::Read::Cfg].

use core::ops::{Bound, RangeBounds};

/// Configuration for limiting the length of a variable-length value.
///
/// ```
/// use arbiter_codec::RangeCfg;
///
/// let cfg = RangeCfg::from(0..=1024);
/// assert!(cfg.contains(500));
/// assert!(!cfg.contains(2000));
///
/// let exact = RangeCfg::exact(32);
/// assert!(exact.contains(32));
/// assert!(!exact.contains(31));
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RangeCfg {
    start: Bound<usize>,
    end: Bound<usize>,
}

impl RangeCfg {
    /// Creates a new [RangeCfg] from any range of lengths.
    pub fn new(range: impl RangeBounds<usize>) -> Self {
        Self {
            start: range.start_bound().cloned(),
            end: range.end_bound().cloned(),
        }
    }

    /// Accepts exactly `len`.
    pub fn exact(len: usize) -> Self {
        Self::new(len..=len)
    }

    /// Returns `true` if `len` falls within the range.
    pub fn contains(&self, len: usize) -> bool {
        (self.start, self.end).contains(&len)
    }
}

impl Default for RangeCfg {
    fn default() -> Self {
        Self::new(..)
    }
}

macro_rules! impl_from_range {
    ($($range:ty),*) => {
        $(
            impl From<$range> for RangeCfg {
                fn from(range: $range) -> Self {
                    Self::new(range)
                }
            }
        )*
    };
}

impl_from_range!(
    core::ops::Range<usize>,
    core::ops::RangeInclusive<usize>,
    core::ops::RangeFrom<usize>,
    core::ops::RangeTo<usize>,
    core::ops::RangeToInclusive<usize>,
    core::ops::RangeFull
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let cfg = RangeCfg::from(1..4);
        assert!(!cfg.contains(0));
        assert!(cfg.contains(1));
        assert!(cfg.contains(3));
        assert!(!cfg.contains(4));

        let cfg = RangeCfg::from(..=2);
        assert!(cfg.contains(0));
        assert!(cfg.contains(2));
        assert!(!cfg.contains(3));

        assert!(RangeCfg::default().contains(usize::MAX));
    }
}
