//! Signed revision indexes.
//!
//! Non-negative values count from the oldest completed revision of a name,
//! negative values from the newest: `0` is the first upload, `-1` the latest.

use crate::store::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Revision(i64);

impl Revision {
    pub const FIRST: Revision = Revision(0);
    pub const LATEST: Revision = Revision(-1);

    pub fn new(index: i64) -> Self {
        Self(index)
    }

    pub fn index(&self) -> i64 {
        self.0
    }

    /// Direction in which revisions are walked by completion time.
    pub fn order(&self) -> Order {
        if self.0 >= 0 { Order::Asc } else { Order::Desc }
    }

    /// Position of the revision in [`Revision::order`].
    pub fn offset(&self) -> usize {
        if self.0 >= 0 {
            self.0 as usize
        } else {
            // -1 -> 0, -2 -> 1, without overflowing at i64::MIN
            (-(self.0 + 1)) as usize
        }
    }
}

impl From<i64> for Revision {
    fn from(index: i64) -> Self {
        Self(index)
    }
}
