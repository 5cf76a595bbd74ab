//! Index strategies
//!
//! An index strategy turns multi-dimensional data into one-dimensional sort
//! keys for an ordered key-value store, and turns query regions into the key
//! ranges that must be scanned:
//!
//! - **TieredSfcIndexStrategy**: bins, normalizes and interleaves the data on a
//!   Z-order curve at several resolutions (the data-bearing strategy)
//! - **RoundRobinKeyIndexStrategy**: spreads writes over a fixed pool of key
//!   prefixes, trading read selectivity for write balance
//! - **HashKeyIndexStrategy**: same pool, prefix chosen by a hash of the data
//! - **CompoundIndexStrategy**: a partitioning strategy in front of a
//!   data-bearing one
//!
//! # Key layout
//!
//! ```text
//! compound key:  ┌─────────┬──────┬───────────────┬──────────────┐
//!                │ pool    │ tier │ composite bin │ z-order cell │
//!                │ prefix  │ (1B) │ id            │ (BE, fixed)  │
//!                └─────────┴──────┴───────────────┴──────────────┘
//! ```

mod compound;
mod dimensionality;
mod error;
mod hash;
mod metadata;
mod round_robin;
mod sfc;

pub use compound::CompoundIndexStrategy;
pub use dimensionality::DimensionalityType;
pub use error::{IndexError, IndexResult};
pub use hash::HashKeyIndexStrategy;
pub use metadata::{IndexMetaData, TierIndexMetaData};
pub use round_robin::{RoundRobinKeyIndexStrategy, DEFAULT_POOL_SIZE, MAX_POOL_SIZE};
pub use sfc::{TieredSfcIndexStrategy, ZOrderCurve, DEFAULT_MAX_DUPLICATES};

use crate::codec::{BinaryReader, BinaryWriter, CodecError, CodecResult, Persistable};
use crate::dimension::DimensionDefinition;
use crate::numeric::BasicNumericDataset;
use std::collections::BTreeSet;
use std::fmt;

/// Range budget used when a caller does not supply one
pub const DEFAULT_MAX_RANGES: usize = 1024;

/// Opaque sort key
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteArrayId(Vec<u8>);

impl ByteArrayId {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `self ‖ other`
    pub fn concat(&self, other: &ByteArrayId) -> Self {
        let mut bytes = Vec::with_capacity(self.0.len() + other.0.len());
        bytes.extend_from_slice(&self.0);
        bytes.extend_from_slice(&other.0);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ByteArrayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<Vec<u8>> for ByteArrayId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ByteArrayId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for ByteArrayId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Smallest key greater than every key starting with `bytes`
///
/// Trailing `0xFF` bytes are dropped and the last remaining byte is
/// incremented. Returns None when no such key exists (empty input or all
/// `0xFF`), meaning the scan is unbounded above.
pub fn next_prefix(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut next = bytes.to_vec();
    while let Some(last) = next.pop() {
        if last < 0xFF {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

/// Inclusive key range
///
/// The end key is inclusive as a prefix: every key starting with `end` is in
/// range, so `[p, p]` scans everything under prefix `p`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ByteArrayRange {
    start: ByteArrayId,
    end: ByteArrayId,
}

impl ByteArrayRange {
    pub fn new(start: ByteArrayId, end: ByteArrayId) -> Self {
        Self { start, end }
    }

    /// Range covering every key with the given prefix
    pub fn prefix(prefix: ByteArrayId) -> Self {
        Self::new(prefix.clone(), prefix)
    }

    pub fn start(&self) -> &ByteArrayId {
        &self.start
    }

    pub fn end(&self) -> &ByteArrayId {
        &self.end
    }

    pub fn is_single_value(&self) -> bool {
        self.start == self.end
    }

    /// Exclusive stop key for store APIs; None means unbounded
    pub fn stop_key(&self) -> Option<Vec<u8>> {
        next_prefix(self.end.as_bytes())
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if key < self.start.as_bytes() {
            return false;
        }
        match self.stop_key() {
            Some(stop) => key < stop.as_slice(),
            None => true,
        }
    }

    /// Sort ranges by start key and merge any that overlap or touch
    pub fn merge_intersections(mut ranges: Vec<ByteArrayRange>) -> Vec<ByteArrayRange> {
        if ranges.len() < 2 {
            return ranges;
        }
        ranges.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.end.cmp(&b.end)));

        let mut merged: Vec<ByteArrayRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(current) = merged.last_mut() {
                let current_stop = current.stop_key();
                let touches = match &current_stop {
                    Some(stop) => range.start.as_bytes() <= stop.as_slice(),
                    None => true,
                };
                if touches {
                    let extends = match (&current_stop, range.stop_key()) {
                        (None, _) => false,
                        (Some(_), None) => true,
                        (Some(stop), Some(next)) => next > *stop,
                    };
                    if extends {
                        current.end = range.end;
                    }
                    continue;
                }
            }
            merged.push(range);
        }
        merged
    }
}

impl fmt::Display for ByteArrayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Mapping between multi-dimensional data and sort keys
pub trait NumericIndexStrategy: Send + Sync {
    /// Stable identifier, distinct for distinct configurations
    fn id(&self) -> String;

    /// Keys to write `data` under; more than one only when duplication is
    /// intentional
    fn insertion_ids(&self, data: &BasicNumericDataset) -> IndexResult<Vec<ByteArrayId>>;

    /// Key ranges covering every insertion id of every point in `region`,
    /// using at most roughly `max_ranges` ranges
    fn query_ranges_with_limit(
        &self,
        region: &BasicNumericDataset,
        max_ranges: Option<usize>,
        hints: &[IndexMetaData],
    ) -> IndexResult<Vec<ByteArrayRange>>;

    fn query_ranges(
        &self,
        region: &BasicNumericDataset,
        hints: &[IndexMetaData],
    ) -> IndexResult<Vec<ByteArrayRange>> {
        self.query_ranges_with_limit(region, None, hints)
    }

    /// Dimension definitions in the order data must be supplied
    fn ordered_dimensions(&self) -> &[DimensionDefinition];

    /// Approximate raw region a key was produced from
    fn range_for_id(&self, id: &ByteArrayId) -> BasicNumericDataset;

    /// Candidate pre-split points for the store
    fn natural_split_points(&self) -> BTreeSet<ByteArrayId>;

    /// Length of any prefix written before the dimensional part of a key
    fn byte_offset_from_dimensional_index(&self) -> usize;

    /// Fresh statistics objects for a writer to maintain
    fn create_metadata(&self) -> Vec<IndexMetaData>;
}

/// Closed set of strategies that can be persisted
#[derive(Debug, Clone, PartialEq)]
pub enum IndexStrategy {
    Sfc(TieredSfcIndexStrategy),
    RoundRobin(RoundRobinKeyIndexStrategy),
    Hash(HashKeyIndexStrategy),
    Compound(Box<CompoundIndexStrategy>),
}

impl IndexStrategy {
    fn inner(&self) -> &dyn NumericIndexStrategy {
        match self {
            IndexStrategy::Sfc(s) => s,
            IndexStrategy::RoundRobin(s) => s,
            IndexStrategy::Hash(s) => s,
            IndexStrategy::Compound(s) => s.as_ref(),
        }
    }
}

impl NumericIndexStrategy for IndexStrategy {
    fn id(&self) -> String {
        self.inner().id()
    }

    fn insertion_ids(&self, data: &BasicNumericDataset) -> IndexResult<Vec<ByteArrayId>> {
        self.inner().insertion_ids(data)
    }

    fn query_ranges_with_limit(
        &self,
        region: &BasicNumericDataset,
        max_ranges: Option<usize>,
        hints: &[IndexMetaData],
    ) -> IndexResult<Vec<ByteArrayRange>> {
        self.inner().query_ranges_with_limit(region, max_ranges, hints)
    }

    fn ordered_dimensions(&self) -> &[DimensionDefinition] {
        self.inner().ordered_dimensions()
    }

    fn range_for_id(&self, id: &ByteArrayId) -> BasicNumericDataset {
        self.inner().range_for_id(id)
    }

    fn natural_split_points(&self) -> BTreeSet<ByteArrayId> {
        self.inner().natural_split_points()
    }

    fn byte_offset_from_dimensional_index(&self) -> usize {
        self.inner().byte_offset_from_dimensional_index()
    }

    fn create_metadata(&self) -> Vec<IndexMetaData> {
        self.inner().create_metadata()
    }
}

impl Persistable for IndexStrategy {
    fn write_to(&self, writer: &mut BinaryWriter) {
        match self {
            IndexStrategy::Sfc(s) => {
                writer.put_u8(0);
                writer.put_entity(s);
            }
            IndexStrategy::RoundRobin(s) => {
                writer.put_u8(1);
                writer.put_entity(s);
            }
            IndexStrategy::Hash(s) => {
                writer.put_u8(2);
                writer.put_entity(s);
            }
            IndexStrategy::Compound(s) => {
                writer.put_u8(3);
                writer.put_entity(s.as_ref());
            }
        }
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        match reader.get_u8()? {
            0 => Ok(IndexStrategy::Sfc(reader.get_entity()?)),
            1 => Ok(IndexStrategy::RoundRobin(reader.get_entity()?)),
            2 => Ok(IndexStrategy::Hash(reader.get_entity()?)),
            3 => Ok(IndexStrategy::Compound(Box::new(reader.get_entity()?))),
            tag => Err(CodecError::UnknownTag {
                kind: "index strategy",
                tag,
            }),
        }
    }
}

impl From<TieredSfcIndexStrategy> for IndexStrategy {
    fn from(s: TieredSfcIndexStrategy) -> Self {
        IndexStrategy::Sfc(s)
    }
}

impl From<RoundRobinKeyIndexStrategy> for IndexStrategy {
    fn from(s: RoundRobinKeyIndexStrategy) -> Self {
        IndexStrategy::RoundRobin(s)
    }
}

impl From<HashKeyIndexStrategy> for IndexStrategy {
    fn from(s: HashKeyIndexStrategy) -> Self {
        IndexStrategy::Hash(s)
    }
}

impl From<CompoundIndexStrategy> for IndexStrategy {
    fn from(s: CompoundIndexStrategy) -> Self {
        IndexStrategy::Compound(Box::new(s))
    }
}
