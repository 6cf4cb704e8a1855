//! Ordered sets of half-open intervals.

use std::fmt;

/// A set of disjoint `[start, end)` intervals kept in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranges<T> {
    ranges: Vec<(T, T)>,
}

impl<T> Default for Ranges<T> {
    fn default() -> Self {
        Self { ranges: Vec::new() }
    }
}

impl<T: Ord + Copy> Ranges<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `[start, end)`, merging it with every interval it overlaps or
    /// touches. Empty intervals are ignored.
    pub fn add(&mut self, start: T, end: T) {
        if start >= end {
            return;
        }
        let first = self.ranges.partition_point(|&(_, e)| e < start);
        let last = self.ranges.partition_point(|&(s, _)| s <= end);
        if first == last {
            self.ranges.insert(first, (start, end));
            return;
        }
        let merged_start = start.min(self.ranges[first].0);
        let merged_end = end.max(self.ranges[last - 1].1);
        self.ranges.splice(first..last, [(merged_start, merged_end)]);
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn start(&self, index: usize) -> T {
        self.ranges[index].0
    }

    pub fn end(&self, index: usize) -> T {
        self.ranges[index].1
    }

    pub fn first(&self) -> Option<(T, T)> {
        self.ranges.first().copied()
    }

    pub fn last(&self) -> Option<(T, T)> {
        self.ranges.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (T, T)> + '_ {
        self.ranges.iter().copied()
    }

    /// Whether `point` lies inside one of the intervals.
    pub fn contains(&self, point: T) -> bool {
        let i = self.ranges.partition_point(|&(_, e)| e <= point);
        self.ranges.get(i).is_some_and(|&(s, _)| s <= point)
    }

    /// Points covered by both sets.
    pub fn intersection_with(&self, other: &Ranges<T>) -> Ranges<T> {
        let mut out = Ranges::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a_start, a_end) = self.ranges[i];
            let (b_start, b_end) = other.ranges[j];
            let start = a_start.max(b_start);
            let end = a_end.min(b_end);
            if start < end {
                out.ranges.push((start, end));
            }
            if a_end < b_end {
                i += 1;
            } else {
                j += 1;
            }
        }
        out
    }

    /// Moves the end of the last interval, as long as it stays non-empty.
    pub(crate) fn set_last_end(&mut self, end: T) {
        if let Some(last) = self.ranges.last_mut()
            && end > last.0
        {
            last.1 = end;
        }
    }

    /// Trims every interval to end no later than `limit`.
    pub(crate) fn clamp_end(&mut self, limit: T) {
        self.ranges.retain(|&(s, _)| s < limit);
        if let Some(last) = self.ranges.last_mut()
            && last.1 > limit
        {
            last.1 = limit;
        }
    }

    /// Appends an interval known to start after every existing one.
    pub(crate) fn push_sorted(&mut self, start: T, end: T) {
        debug_assert!(self.ranges.last().is_none_or(|&(_, e)| e <= start));
        if start < end {
            self.ranges.push((start, end));
        }
    }
}

impl<T: Ord + Copy> FromIterator<(T, T)> for Ranges<T> {
    fn from_iter<I: IntoIterator<Item = (T, T)>>(iter: I) -> Self {
        let mut ranges = Ranges::new();
        for (start, end) in iter {
            ranges.add(start, end);
        }
        ranges
    }
}

impl<T: fmt::Display> fmt::Display for Ranges<T> {
    /// `{ [0,46) [150,219) }`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for (start, end) in &self.ranges {
            write!(f, "[{start},{end}) ")?;
        }
        f.write_str("}")
    }
}
