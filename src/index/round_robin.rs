//! Round-robin key prefix pool
//!
//! Writes are spread over `N` prefixes in strict rotation regardless of the
//! data, so consecutive inserts land on different physical partitions. Every
//! query has to scan the whole pool.
//!
//! ```text
//! N <= 256:  [0x00] [0x01] ... [N-1]           (1 byte)
//! N  > 256:  [00 00 00 00] ... [BE u32 N-1]    (4 bytes)
//! ```
//!
//! Pools hold at most `MAX_POOL_SIZE` prefixes.

use crate::codec::{BinaryReader, BinaryWriter, CodecError, CodecResult, Persistable};
use crate::dimension::DimensionDefinition;
use crate::index::{
    ByteArrayId, ByteArrayRange, IndexError, IndexMetaData, IndexResult, NumericIndexStrategy,
};
use crate::numeric::BasicNumericDataset;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pool size used when none is configured
pub const DEFAULT_POOL_SIZE: usize = 3;

/// Largest pool; every query scans one range per prefix
pub const MAX_POOL_SIZE: usize = 1 << 16;

/// Build the prefix pool for `size` partitions
pub(crate) fn prefix_pool(size: usize) -> IndexResult<Vec<ByteArrayId>> {
    if size == 0 || size > MAX_POOL_SIZE {
        return Err(IndexError::InvalidConfig(format!(
            "partition pool size must be between 1 and {}, got {}",
            MAX_POOL_SIZE, size
        )));
    }
    Ok((0..size)
        .map(|i| {
            if size <= 256 {
                ByteArrayId::new(vec![i as u8])
            } else {
                ByteArrayId::new((i as u32).to_be_bytes().to_vec())
            }
        })
        .collect())
}

/// One prefix range per pool entry
pub(crate) fn pool_ranges(pool: &[ByteArrayId]) -> Vec<ByteArrayRange> {
    pool.iter()
        .map(|prefix| ByteArrayRange::prefix(prefix.clone()))
        .collect()
}

pub(crate) fn read_pool_size(
    reader: &mut BinaryReader<'_>,
) -> CodecResult<(usize, Vec<ByteArrayId>)> {
    let size = reader.get_u32()? as usize;
    let pool = prefix_pool(size).map_err(|e| CodecError::Invalid(e.to_string()))?;
    Ok((size, pool))
}

/// Balancing strategy handing out pool prefixes in rotation
#[derive(Debug)]
pub struct RoundRobinKeyIndexStrategy {
    size: usize,
    pool: Vec<ByteArrayId>,
    position: AtomicUsize,
}

impl RoundRobinKeyIndexStrategy {
    pub fn new(size: usize) -> IndexResult<Self> {
        Ok(Self {
            size,
            pool: prefix_pool(size)?,
            position: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn prefixes(&self) -> &[ByteArrayId] {
        &self.pool
    }

    /// Claim the next pool slot
    fn next_slot(&self) -> usize {
        // fetch_update yields the value before the increment
        match self
            .position
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                Some((p + 1) % self.size)
            }) {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

impl Default for RoundRobinKeyIndexStrategy {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            pool: (0..DEFAULT_POOL_SIZE)
                .map(|i| ByteArrayId::new(vec![i as u8]))
                .collect(),
            position: AtomicUsize::new(0),
        }
    }
}

impl Clone for RoundRobinKeyIndexStrategy {
    fn clone(&self) -> Self {
        Self {
            size: self.size,
            pool: self.pool.clone(),
            position: AtomicUsize::new(self.position.load(Ordering::Acquire)),
        }
    }
}

impl PartialEq for RoundRobinKeyIndexStrategy {
    /// Configuration equality; the cursor is not part of it
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
    }
}

impl NumericIndexStrategy for RoundRobinKeyIndexStrategy {
    fn id(&self) -> String {
        format!("ROUND_ROBIN_{}", self.size)
    }

    fn insertion_ids(&self, _data: &BasicNumericDataset) -> IndexResult<Vec<ByteArrayId>> {
        Ok(vec![self.pool[self.next_slot()].clone()])
    }

    fn query_ranges_with_limit(
        &self,
        _region: &BasicNumericDataset,
        _max_ranges: Option<usize>,
        _hints: &[IndexMetaData],
    ) -> IndexResult<Vec<ByteArrayRange>> {
        Ok(pool_ranges(&self.pool))
    }

    fn ordered_dimensions(&self) -> &[DimensionDefinition] {
        &[]
    }

    fn range_for_id(&self, _id: &ByteArrayId) -> BasicNumericDataset {
        BasicNumericDataset::empty()
    }

    fn natural_split_points(&self) -> BTreeSet<ByteArrayId> {
        self.pool.iter().cloned().collect()
    }

    fn byte_offset_from_dimensional_index(&self) -> usize {
        self.pool.first().map(|p| p.len()).unwrap_or(0)
    }

    fn create_metadata(&self) -> Vec<IndexMetaData> {
        Vec::new()
    }
}

impl Persistable for RoundRobinKeyIndexStrategy {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_u32(self.size as u32);
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let (size, pool) = read_pool_size(reader)?;
        Ok(Self {
            size,
            pool,
            position: AtomicUsize::new(0),
        })
    }
}
