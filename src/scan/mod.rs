//! Distributed scan execution
//!
//! - **KeyValueStore / ScanIterator**: the ordered store's scan and write
//!   primitives; `SqliteStore` is the reference implementation
//! - **InputSplit**: the ranges assigned to one worker, grouped by index,
//!   each with a cardinality estimate
//! - **MergedRangeReader**: one sequential cursor over all ranges of a split,
//!   reporting weighted progress
//! - **ScanCoordinator**: runs splits as independent tasks
//! - **IndexWriter**: writes values under every insertion id
//!
//! # Progress
//!
//! ```text
//! cardinality:   40        10     50
//! ranges:      [ r0      | r1  | r2         ]
//! progress:    0.0     0.4   0.5          1.0
//! ```

mod coordinator;
mod error;
mod reader;
mod store;
mod writer;

pub use coordinator::{ScanCoordinator, SplitReport};
pub use error::{ScanError, ScanResult};
pub use reader::{MergedRangeReader, RangeRecordReader, RangeTransition, ScanEvent};
pub use store::SqliteStore;
pub use writer::IndexWriter;

use crate::index::{ByteArrayId, ByteArrayRange};
use std::collections::BTreeMap;

/// Identity of one stored entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputKey {
    /// Column family of the entry's data type
    pub adapter_id: ByteArrayId,
    pub data_id: ByteArrayId,
    /// Row key produced by the index strategy
    pub insertion_id: ByteArrayId,
}

impl InputKey {
    pub fn new(adapter_id: ByteArrayId, data_id: ByteArrayId, insertion_id: ByteArrayId) -> Self {
        Self {
            adapter_id,
            data_id,
            insertion_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    pub key: InputKey,
    pub value: Vec<u8>,
}

/// One entry per (adapter, data id), ordered by data id then adapter
///
/// Extents are stored once per covered cell, so a scan can return the same
/// data several times under different insertion ids. The first occurrence
/// is kept.
pub fn distinct_entries(entries: Vec<ScanEntry>) -> Vec<ScanEntry> {
    let mut distinct: BTreeMap<(ByteArrayId, ByteArrayId), ScanEntry> = BTreeMap::new();
    for entry in entries {
        let key = (entry.key.data_id.clone(), entry.key.adapter_id.clone());
        distinct.entry(key).or_insert(entry);
    }
    distinct.into_values().collect()
}

/// One-pass cursor over a single range scan
pub trait ScanIterator: Iterator<Item = ScanResult<ScanEntry>> + Send {
    /// Release the scan's resources; called exactly once by the owner
    fn close(&mut self) -> ScanResult<()>;
}

/// Ordered key-value store collaborator
pub trait KeyValueStore: Send + Sync {
    /// Sorted scan of `range` in index `index_id`, restricted to
    /// `adapter_ids` when non-empty
    fn scan(
        &self,
        index_id: &str,
        range: &ByteArrayRange,
        adapter_ids: &[ByteArrayId],
    ) -> ScanResult<Box<dyn ScanIterator>>;

    fn write(&self, index_id: &str, key: &InputKey, value: &[u8]) -> ScanResult<()>;

    /// Approximate number of entries in `range`
    fn estimate_cardinality(&self, index_id: &str, range: &ByteArrayRange) -> ScanResult<f64>;
}

/// A key range with where it lives and how large it is expected to be
#[derive(Debug, Clone, PartialEq)]
pub struct RangeLocationPair {
    pub range: ByteArrayRange,
    pub location: String,
    pub cardinality: f64,
}

impl RangeLocationPair {
    pub fn new(range: ByteArrayRange, location: impl Into<String>, cardinality: f64) -> Self {
        Self {
            range,
            location: location.into(),
            cardinality,
        }
    }
}

/// Ranges assigned to one worker, grouped by index in insertion order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputSplit {
    pub location: String,
    ranges: Vec<(String, Vec<RangeLocationPair>)>,
}

impl InputSplit {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ranges: Vec::new(),
        }
    }

    pub fn add(&mut self, index_id: &str, pair: RangeLocationPair) {
        match self.ranges.iter_mut().find(|(id, _)| id == index_id) {
            Some((_, pairs)) => pairs.push(pair),
            None => self.ranges.push((index_id.to_string(), vec![pair])),
        }
    }

    /// Every (index id, range) pair in consumption order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RangeLocationPair)> {
        self.ranges
            .iter()
            .flat_map(|(id, pairs)| pairs.iter().map(move |p| (id.as_str(), p)))
    }

    pub fn index_ids(&self) -> impl Iterator<Item = &str> {
        self.ranges.iter().map(|(id, _)| id.as_str())
    }

    pub fn range_count(&self) -> usize {
        self.ranges.iter().map(|(_, pairs)| pairs.len()).sum()
    }

    pub fn total_cardinality(&self) -> f64 {
        self.iter().map(|(_, p)| p.cardinality.max(0.0)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.range_count() == 0
    }
}
