//! Merged cursor over the ranges of one split
//!
//! Each range owns a progress interval proportional to its cardinality
//! estimate, assigned in consumption order:
//!
//! ```text
//! start_j = Σ_{i<j} c_i / Σ c_i        end_j = start_{j+1},  end_last = 1.0
//! ```
//!
//! Within a range, progress interpolates the current row key between the
//! range's start and end keys. A zero total estimate reports 0 until the
//! reader is exhausted and 1 afterwards. A reader stopped early, by a range
//! failure or by `close`, keeps the last value it reported.

use crate::index::{ByteArrayId, ByteArrayRange};
use crate::scan::{
    InputKey, InputSplit, KeyValueStore, RangeLocationPair, ScanEntry, ScanIterator, ScanResult,
};

/// Key bytes considered when interpolating within a range
const PROGRESS_DEPTH: usize = 16;

/// Marker emitted before the first entry of each range
#[derive(Debug, Clone, PartialEq)]
pub struct RangeTransition {
    /// Position of the range in consumption order
    pub ordinal: usize,
    pub index_id: String,
    pub range: ByteArrayRange,
    /// Progress at the start of the range
    pub start_progress: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Transition(RangeTransition),
    Entry(ScanEntry),
}

struct RangeScan {
    index_id: String,
    pair: RangeLocationPair,
    iter: Option<Box<dyn ScanIterator>>,
    start: f64,
    end: f64,
}

/// One sequential cursor over several range scans
pub struct MergedRangeReader {
    ranges: Vec<RangeScan>,
    /// Range currently being pulled from
    cursor: usize,
    /// Range whose entries are being yielded
    active: Option<usize>,
    peeked: Option<(usize, ScanEntry)>,
    current_key: Option<InputKey>,
    total_cardinality: f64,
    keys_read: u64,
    /// No further entries will be yielded
    exhausted: bool,
    /// Every range was read to its end
    completed: bool,
}

impl MergedRangeReader {
    /// Ranges are consumed in the given order
    pub fn new(scans: Vec<(String, RangeLocationPair, Box<dyn ScanIterator>)>) -> Self {
        let total: f64 = scans.iter().map(|(_, p, _)| weight(p)).sum();
        let count = scans.len();

        let mut cumulative = 0.0;
        let ranges = scans
            .into_iter()
            .enumerate()
            .map(|(i, (index_id, pair, iter))| {
                let start = if total > 0.0 { cumulative / total } else { 0.0 };
                cumulative += weight(&pair);
                let end = if i + 1 == count {
                    1.0
                } else if total > 0.0 {
                    cumulative / total
                } else {
                    0.0
                };
                RangeScan {
                    index_id,
                    pair,
                    iter: Some(iter),
                    start,
                    end,
                }
            })
            .collect();

        Self {
            ranges,
            cursor: 0,
            active: None,
            peeked: None,
            current_key: None,
            total_cardinality: total,
            keys_read: 0,
            exhausted: count == 0,
            completed: count == 0,
        }
    }

    /// Pull forward until one entry is buffered or every range is done
    fn fill(&mut self) -> ScanResult<()> {
        if self.peeked.is_some() || self.exhausted {
            return Ok(());
        }
        while self.cursor < self.ranges.len() {
            let idx = self.cursor;
            let next = match self.ranges[idx].iter.as_mut() {
                Some(iter) => iter.next(),
                None => None,
            };
            match next {
                Some(Ok(entry)) => {
                    self.peeked = Some((idx, entry));
                    return Ok(());
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        range = %self.ranges[idx].pair.range,
                        error = %e,
                        "Range scan failed"
                    );
                    self.exhausted = true;
                    // Failure to close is logged; the scan error takes precedence
                    let _ = self.close();
                    return Err(e);
                }
                None => {
                    close_range(&mut self.ranges[idx]);
                    self.cursor += 1;
                }
            }
        }
        self.exhausted = true;
        self.completed = true;
        Ok(())
    }

    /// True if another entry is available; repeated calls do not advance
    pub fn has_next(&mut self) -> ScanResult<bool> {
        self.fill()?;
        Ok(self.peeked.is_some())
    }

    /// Next entry, preceded by a transition marker whenever a new range
    /// starts yielding
    pub fn next_event(&mut self) -> Option<ScanResult<ScanEvent>> {
        if let Err(e) = self.fill() {
            return Some(Err(e));
        }
        let idx = self.peeked.as_ref()?.0;

        if self.active != Some(idx) {
            self.active = Some(idx);
            self.current_key = None;
            let scan = &self.ranges[idx];
            tracing::debug!(
                ordinal = idx,
                index = %scan.index_id,
                range = %scan.pair.range,
                "Range transition"
            );
            return Some(Ok(ScanEvent::Transition(RangeTransition {
                ordinal: idx,
                index_id: scan.index_id.clone(),
                range: scan.pair.range.clone(),
                start_progress: scan.start,
            })));
        }

        let (_, entry) = self.peeked.take()?;
        self.keys_read += 1;
        self.current_key = Some(entry.key.clone());
        Some(Ok(ScanEvent::Entry(entry)))
    }

    /// Range whose entries are currently being yielded
    pub fn current_range(&self) -> Option<(&str, &ByteArrayRange)> {
        self.active.map(|i| {
            let scan = &self.ranges[i];
            (scan.index_id.as_str(), &scan.pair.range)
        })
    }

    pub fn current_key(&self) -> Option<&InputKey> {
        self.current_key.as_ref()
    }

    pub fn keys_read(&self) -> u64 {
        self.keys_read
    }

    pub fn total_cardinality(&self) -> f64 {
        self.total_cardinality
    }

    /// Completion fraction in `[0, 1]`, non-decreasing across the scan
    pub fn progress(&self) -> f64 {
        if self.completed && self.peeked.is_none() {
            return 1.0;
        }
        if self.total_cardinality <= 0.0 {
            return 0.0;
        }
        let Some(idx) = self.active else {
            return 0.0;
        };
        let scan = &self.ranges[idx];
        let within = match &self.current_key {
            Some(key) => interpolate(&scan.pair.range, &key.insertion_id),
            None => 0.0,
        };
        scan.start + within * (scan.end - scan.start)
    }

    /// Close every range scan not yet closed
    ///
    /// Every iterator is closed even if some fail; the first failure is
    /// returned.
    pub fn close(&mut self) -> ScanResult<()> {
        self.exhausted = true;
        self.peeked = None;
        let mut first_error = None;
        for scan in &mut self.ranges {
            if let Some(mut iter) = scan.iter.take() {
                if let Err(e) = iter.close() {
                    tracing::warn!(
                        range = %scan.pair.range,
                        error = %e,
                        "Failed to close range scan"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Iterator for MergedRangeReader {
    type Item = ScanResult<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_event()? {
                Ok(ScanEvent::Transition(_)) => continue,
                Ok(ScanEvent::Entry(entry)) => return Some(Ok(entry)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Drop for MergedRangeReader {
    fn drop(&mut self) {
        // Failures are already logged by close
        let _ = self.close();
    }
}

fn weight(pair: &RangeLocationPair) -> f64 {
    if pair.cardinality.is_finite() {
        pair.cardinality.max(0.0)
    } else {
        0.0
    }
}

fn close_range(scan: &mut RangeScan) {
    if let Some(mut iter) = scan.iter.take() {
        if let Err(e) = iter.close() {
            tracing::warn!(range = %scan.pair.range, error = %e, "Failed to close range scan");
        }
    }
}

/// Big-endian integer value of the first `PROGRESS_DEPTH` bytes, padded
/// with `fill`
fn key_value(bytes: &[u8], fill: u8) -> u128 {
    (0..PROGRESS_DEPTH).fold(0u128, |acc, i| {
        (acc << 8) | bytes.get(i).copied().unwrap_or(fill) as u128
    })
}

/// Position of `key` between the range's start and end keys, in `[0, 1]`
fn interpolate(range: &ByteArrayRange, key: &ByteArrayId) -> f64 {
    let start = key_value(range.start().as_bytes(), 0x00);
    // End is inclusive as a prefix, so it extends over every suffix
    let end = key_value(range.end().as_bytes(), 0xFF);
    let current = key_value(key.as_bytes(), 0x00);
    if end <= start {
        return 0.0;
    }
    let fraction = current.saturating_sub(start) as f64 / (end - start) as f64;
    fraction.clamp(0.0, 1.0)
}

/// Record reader for one split
///
/// Opens every range scan of the split up front, then exposes the merged
/// cursor one key/value at a time.
pub struct RangeRecordReader {
    reader: MergedRangeReader,
    current: Option<ScanEntry>,
}

impl RangeRecordReader {
    pub fn open(
        store: &dyn KeyValueStore,
        split: &InputSplit,
        adapter_ids: &[ByteArrayId],
    ) -> ScanResult<Self> {
        let mut scans: Vec<(String, RangeLocationPair, Box<dyn ScanIterator>)> =
            Vec::with_capacity(split.range_count());
        for (index_id, pair) in split.iter() {
            match store.scan(index_id, &pair.range, adapter_ids) {
                Ok(iter) => scans.push((index_id.to_string(), pair.clone(), iter)),
                Err(e) => {
                    for (_, pair, mut iter) in scans {
                        if let Err(close_err) = iter.close() {
                            tracing::warn!(
                                range = %pair.range,
                                error = %close_err,
                                "Failed to close range scan"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!(
            location = %split.location,
            ranges = split.range_count(),
            "Opened split"
        );
        Ok(Self {
            reader: MergedRangeReader::new(scans),
            current: None,
        })
    }

    /// Advance to the next entry; false once the split is exhausted
    pub fn next_key_value(&mut self) -> ScanResult<bool> {
        match self.reader.next() {
            Some(Ok(entry)) => {
                self.current = Some(entry);
                Ok(true)
            }
            Some(Err(e)) => {
                self.current = None;
                Err(e)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    pub fn current_key(&self) -> Option<&InputKey> {
        self.current.as_ref().map(|e| &e.key)
    }

    pub fn current_value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|e| e.value.as_slice())
    }

    pub fn progress(&self) -> f64 {
        self.reader.progress()
    }

    pub fn keys_read(&self) -> u64 {
        self.reader.keys_read()
    }

    pub fn close(&mut self) -> ScanResult<()> {
        self.current = None;
        self.reader.close()
    }

    pub fn into_inner(self) -> MergedRangeReader {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::testing::{entry, VecScanIterator};
    use crate::scan::{ScanError, SqliteStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pair(start: &[u8], end: &[u8], cardinality: f64) -> RangeLocationPair {
        RangeLocationPair::new(
            ByteArrayRange::new(start.into(), end.into()),
            "local",
            cardinality,
        )
    }

    fn scan(
        start: u8,
        cardinality: f64,
        rows: &[(&[u8], &str)],
    ) -> (String, RangeLocationPair, Box<dyn ScanIterator>) {
        (
            "idx".to_string(),
            pair(&[start], &[start], cardinality),
            Box::new(VecScanIterator::entries(rows)),
        )
    }

    fn counted(
        start: u8,
        rows: &[(&[u8], &str)],
    ) -> (
        (String, RangeLocationPair, Box<dyn ScanIterator>),
        Arc<AtomicUsize>,
    ) {
        let iter = VecScanIterator::entries(rows);
        let closes = Arc::clone(&iter.closes);
        (
            ("idx".to_string(), pair(&[start], &[start], 1.0), Box::new(iter)),
            closes,
        )
    }

    #[test]
    fn test_concatenates_in_input_order() {
        let mut reader = MergedRangeReader::new(vec![
            scan(2, 1.0, &[(&[2, 0], "a"), (&[2, 1], "b")]),
            scan(1, 1.0, &[]),
            scan(0, 1.0, &[(&[0, 5], "c")]),
        ]);

        let ids: Vec<String> = reader
            .by_ref()
            .map(|e| String::from_utf8(e.unwrap().value).unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(reader.keys_read(), 3);
    }

    #[test]
    fn test_transition_precedes_first_entry_of_each_range() {
        let mut reader = MergedRangeReader::new(vec![
            scan(0, 1.0, &[(&[0], "a"), (&[0, 1], "b")]),
            scan(1, 1.0, &[]),
            scan(2, 1.0, &[(&[2], "c")]),
        ]);

        let mut events = Vec::new();
        while let Some(event) = reader.next_event() {
            events.push(match event.unwrap() {
                ScanEvent::Transition(t) => format!("T{}", t.ordinal),
                ScanEvent::Entry(e) => String::from_utf8(e.value).unwrap(),
            });
        }
        assert_eq!(events, vec!["T0", "a", "b", "T2", "c"]);
    }

    #[test]
    fn test_has_next_is_idempotent() {
        let mut reader = MergedRangeReader::new(vec![
            scan(0, 1.0, &[]),
            scan(1, 1.0, &[(&[1], "only")]),
        ]);

        for _ in 0..5 {
            assert!(reader.has_next().unwrap());
        }
        assert_eq!(reader.keys_read(), 0);
        assert!(reader.next().is_some());
        assert!(!reader.has_next().unwrap());
        assert!(!reader.has_next().unwrap());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_progress_starts_each_range_at_cumulative_share() {
        let mut reader = MergedRangeReader::new(vec![
            scan(0, 40.0, &[(&[0], "a")]),
            scan(1, 10.0, &[(&[1], "b")]),
            scan(2, 50.0, &[(&[2], "c")]),
        ]);

        let mut starts = Vec::new();
        let mut last = 0.0;
        while let Some(event) = reader.next_event() {
            if let ScanEvent::Transition(t) = event.unwrap() {
                starts.push(t.start_progress);
                assert_eq!(reader.progress(), t.start_progress);
            }
            let progress = reader.progress();
            assert!(progress >= last);
            last = progress;
        }
        assert_eq!(starts, vec![0.0, 0.4, 0.5]);
        assert_eq!(reader.progress(), 1.0);
    }

    #[test]
    fn test_progress_within_range_interpolates_key() {
        let mut reader = MergedRangeReader::new(vec![(
            "idx".to_string(),
            pair(&[0x00], &[0x0F], 10.0),
            Box::new(VecScanIterator::entries(&[
                (&[0x02], "a"),
                (&[0x08], "b"),
                (&[0x0F, 0x80], "c"),
            ])) as Box<dyn ScanIterator>,
        )]);

        let mut seen = Vec::new();
        while let Some(entry) = reader.next() {
            entry.unwrap();
            seen.push(reader.progress());
        }
        assert!(seen[0] > 0.0 && seen[0] < seen[1]);
        assert!(seen[1] < seen[2] && seen[2] <= 1.0);
        assert_eq!(reader.progress(), 1.0);
    }

    #[test]
    fn test_zero_cardinality_reports_zero_then_one() {
        let mut reader = MergedRangeReader::new(vec![
            scan(0, 0.0, &[(&[0], "a")]),
            scan(1, 0.0, &[(&[1], "b")]),
        ]);

        assert_eq!(reader.progress(), 0.0);
        reader.next().unwrap().unwrap();
        assert_eq!(reader.progress(), 0.0);
        reader.next().unwrap().unwrap();
        assert_eq!(reader.progress(), 0.0);
        assert!(reader.next().is_none());
        assert_eq!(reader.progress(), 1.0);
    }

    #[test]
    fn test_empty_reader_is_done() {
        let mut reader = MergedRangeReader::new(Vec::new());
        assert!(!reader.has_next().unwrap());
        assert_eq!(reader.progress(), 1.0);
        assert!(reader.close().is_ok());
    }

    #[test]
    fn test_close_mid_iteration_closes_each_once() {
        let (s0, c0) = counted(0, &[(&[0], "a"), (&[0, 1], "b")]);
        let (s1, c1) = counted(1, &[(&[1], "c")]);
        let (s2, c2) = counted(2, &[]);

        let mut reader = MergedRangeReader::new(vec![s0, s1, s2]);
        reader.next().unwrap().unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        drop(reader);

        for closes in [c0, c1, c2] {
            assert_eq!(closes.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_exhausted_ranges_closed_once_through_drop() {
        let (s0, c0) = counted(0, &[(&[0], "a")]);
        let (s1, c1) = counted(1, &[(&[1], "b")]);

        let mut reader = MergedRangeReader::new(vec![s0, s1]);
        assert_eq!(reader.by_ref().count(), 2);
        drop(reader);

        assert_eq!(c0.load(Ordering::SeqCst), 1);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_closes_everything_and_propagates_once() {
        let failing = VecScanIterator::new(vec![
            Ok(entry(&[1], "ok")),
            Err(ScanError::RangeFailed {
                range: "[01, 01]".to_string(),
                reason: "server gone".to_string(),
            }),
        ]);
        let failing_closes = Arc::clone(&failing.closes);
        let (s0, c0) = counted(0, &[(&[0], "a")]);
        let (s2, c2) = counted(2, &[(&[2], "never")]);

        let mut reader = MergedRangeReader::new(vec![
            s0,
            ("idx".to_string(), pair(&[1], &[1], 1.0), Box::new(failing) as Box<dyn ScanIterator>),
            s2,
        ]);

        let results: Vec<ScanResult<ScanEntry>> = reader.by_ref().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(ScanError::RangeFailed { .. })));
        assert!(reader.next().is_none());

        for closes in [c0, failing_closes, c2] {
            assert_eq!(closes.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_progress_holds_after_early_stop() {
        let mut closed = MergedRangeReader::new(vec![
            scan(0, 1.0, &[(&[0], "a")]),
            scan(1, 1.0, &[(&[1], "b")]),
        ]);
        closed.next().unwrap().unwrap();
        let before = closed.progress();
        closed.close().unwrap();
        assert_eq!(closed.progress(), before);
        assert!(closed.progress() < 1.0);

        let failing = VecScanIterator::new(vec![
            Ok(entry(&[1], "ok")),
            Err(ScanError::RangeFailed {
                range: "[01, 01]".to_string(),
                reason: "server gone".to_string(),
            }),
        ]);
        let mut failed = MergedRangeReader::new(vec![
            scan(0, 1.0, &[(&[0], "a")]),
            ("idx".to_string(), pair(&[1], &[1], 1.0), Box::new(failing) as Box<dyn ScanIterator>),
            scan(2, 1.0, &[(&[2], "never")]),
        ]);
        failed.next().unwrap().unwrap();
        failed.next().unwrap().unwrap();
        let before = failed.progress();
        assert!(failed.next().unwrap().is_err());
        assert!(failed.next().is_none());
        assert_eq!(failed.progress(), before);
        assert!((before - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_failure_is_reported_after_closing_all() {
        let mut bad = VecScanIterator::entries(&[]);
        bad.fail_close = true;
        let bad_closes = Arc::clone(&bad.closes);
        let (s1, c1) = counted(1, &[(&[1], "x")]);

        let mut reader = MergedRangeReader::new(vec![
            ("idx".to_string(), pair(&[0], &[0], 1.0), Box::new(bad) as Box<dyn ScanIterator>),
            s1,
        ]);
        assert!(reader.close().is_err());
        assert_eq!(bad_closes.load(Ordering::SeqCst), 1);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_record_reader_over_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        let adapter = ByteArrayId::from(b"roads".as_slice());
        for (row, data) in [(0x01u8, "a"), (0x02, "b"), (0x05, "c")] {
            let key = InputKey::new(
                adapter.clone(),
                ByteArrayId::from(data.as_bytes()),
                ByteArrayId::new(vec![row]),
            );
            store.write("idx", &key, data.as_bytes()).unwrap();
        }

        let mut split = InputSplit::new("worker-0");
        split.add("idx", pair(&[0x05], &[0x05], 1.0));
        split.add("idx", pair(&[0x01], &[0x02], 2.0));

        let mut reader = RangeRecordReader::open(&store, &split, &[adapter]).unwrap();
        let mut values = Vec::new();
        while reader.next_key_value().unwrap() {
            values.push(reader.current_value().unwrap().to_vec());
            assert!(reader.current_key().is_some());
        }
        assert_eq!(values, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(reader.keys_read(), 3);
        assert_eq!(reader.progress(), 1.0);
        assert!(reader.current_key().is_none());
        reader.close().unwrap();
    }
}
