//! Bounded sample history for the chart and the readings table.

use std::collections::VecDeque;

use super::sample::Sample;
use super::watchdog::Connectivity;

/// Default number of samples plotted on the chart.
pub const CHART_CAPACITY: usize = 50;

/// Default number of rows kept in the readings table.
pub const TABLE_CAPACITY: usize = 20;

/// Where new items go and which end gets evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Append at the tail, evict from the head.
    Fifo,
    /// Insert at the head, evict from the tail.
    NewestFirst,
}

/// A capacity-bounded ordered sequence.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    order: Order,
}

impl<T> HistoryBuffer<T> {
    pub fn new(capacity: usize, order: Order) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            order,
        }
    }

    pub fn fifo(capacity: usize) -> Self {
        Self::new(capacity, Order::Fifo)
    }

    pub fn newest_first(capacity: usize) -> Self {
        Self::new(capacity, Order::NewestFirst)
    }

    /// Add an item, returning the one evicted to stay within capacity.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        match self.order {
            Order::Fifo => {
                self.items.push_back(item);
                if self.items.len() > self.capacity {
                    return self.items.pop_front();
                }
            }
            Order::NewestFirst => {
                self.items.push_front(item);
                if self.items.len() > self.capacity {
                    return self.items.pop_back();
                }
            }
        }
        None
    }

    /// The most recently pushed item.
    pub fn newest(&self) -> Option<&T> {
        match self.order {
            Order::Fifo => self.items.back(),
            Order::NewestFirst => self.items.front(),
        }
    }

    /// Items in storage order (oldest first for FIFO, newest first otherwise).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn order(&self) -> Order {
        self.order
    }
}

impl<T: Clone> HistoryBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Chart and table buffers fed by live samples.
#[derive(Debug, Clone)]
pub struct History {
    chart: HistoryBuffer<Sample>,
    table: HistoryBuffer<Sample>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(CHART_CAPACITY, TABLE_CAPACITY)
    }
}

impl History {
    pub fn new(chart_capacity: usize, table_capacity: usize) -> Self {
        Self {
            chart: HistoryBuffer::fifo(chart_capacity),
            table: HistoryBuffer::newest_first(table_capacity),
        }
    }

    /// Append to the chart if the stream is live. Returns whether it did.
    pub fn push_chart(&mut self, sample: &Sample, connectivity: Connectivity) -> bool {
        if !connectivity.is_live() {
            return false;
        }
        self.chart.push(sample.clone());
        true
    }

    /// Prepend to the table if the stream is live. Returns whether it did.
    pub fn push_table(&mut self, sample: &Sample, connectivity: Connectivity) -> bool {
        if !connectivity.is_live() {
            return false;
        }
        self.table.push(sample.clone());
        true
    }

    /// Record a sample in both buffers.
    pub fn record(&mut self, sample: &Sample, connectivity: Connectivity) -> bool {
        let charted = self.push_chart(sample, connectivity);
        let tabled = self.push_table(sample, connectivity);
        charted && tabled
    }

    pub fn latest_table_entry(&self) -> Option<&Sample> {
        self.table.newest()
    }

    /// Whether `sample` repeats the newest table row.
    pub fn is_duplicate_of_latest(&self, sample: &Sample) -> bool {
        self.latest_table_entry()
            .is_some_and(|latest| latest.same_observation(sample))
    }

    pub fn chart(&self) -> &HistoryBuffer<Sample> {
        &self.chart
    }

    pub fn table(&self) -> &HistoryBuffer<Sample> {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::normalize;
    use crate::source::{RawTimestamp, ReadingPayload};
    use chrono::Utc;

    fn sample(n: i64) -> Sample {
        let raw = ReadingPayload {
            device_name: Some("a".to_string()),
            temperature: Some(n as f64),
            timestamp: Some(RawTimestamp::Millis(1_700_000_000_000 + n * 1000)),
            ..Default::default()
        };
        normalize(&raw, None, Utc::now()).unwrap()
    }

    #[test]
    fn test_fifo_evicts_oldest() {
        let mut buf = HistoryBuffer::fifo(3);
        for i in 0..3 {
            assert_eq!(buf.push(i), None);
        }
        assert_eq!(buf.push(3), Some(0));
        assert_eq!(buf.to_vec(), vec![1, 2, 3]);
        assert_eq!(buf.newest(), Some(&3));
    }

    #[test]
    fn test_newest_first_evicts_from_tail() {
        let mut buf = HistoryBuffer::newest_first(3);
        for i in 0..3 {
            buf.push(i);
        }
        assert_eq!(buf.push(3), Some(0));
        assert_eq!(buf.to_vec(), vec![3, 2, 1]);
        assert_eq!(buf.newest(), Some(&3));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut buf = HistoryBuffer::fifo(0);
        assert_eq!(buf.push(1), Some(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_buffers_stay_bounded() {
        let mut history = History::default();
        for i in 0..200 {
            history.record(&sample(i), Connectivity::Live);
            assert!(history.chart().len() <= CHART_CAPACITY);
            assert!(history.table().len() <= TABLE_CAPACITY);
        }
        assert_eq!(history.chart().len(), CHART_CAPACITY);
        assert_eq!(history.table().len(), TABLE_CAPACITY);

        // Chart is oldest first, table newest first.
        let chart = history.chart().to_vec();
        assert_eq!(chart[0].readings().temperature, Some(150.0));
        assert_eq!(chart[49].readings().temperature, Some(199.0));
        let table = history.table().to_vec();
        assert_eq!(table[0].readings().temperature, Some(199.0));
        assert_eq!(table[19].readings().temperature, Some(180.0));
    }

    #[test]
    fn test_full_chart_evicts_exactly_one() {
        let mut history = History::new(2, 2);
        history.record(&sample(1), Connectivity::Live);
        history.record(&sample(2), Connectivity::Live);
        history.record(&sample(3), Connectivity::Live);

        let temps: Vec<_> =
            history.chart().iter().map(|s| s.readings().temperature).collect();
        assert_eq!(temps, vec![Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_stale_samples_are_not_recorded() {
        let mut history = History::default();
        assert!(!history.record(&sample(1), Connectivity::Stale));
        assert!(!history.push_chart(&sample(1), Connectivity::Stale));
        assert!(!history.push_table(&sample(1), Connectivity::Stale));
        assert!(history.chart().is_empty());
        assert!(history.table().is_empty());
    }

    #[test]
    fn test_duplicate_of_latest() {
        let mut history = History::default();
        assert!(!history.is_duplicate_of_latest(&sample(1)));

        history.record(&sample(1), Connectivity::Live);
        assert!(history.is_duplicate_of_latest(&sample(1)));
        assert!(!history.is_duplicate_of_latest(&sample(2)));
    }
}
