//! Hash partitioning over the same prefix pool as round-robin
//!
//! The prefix is `crc32(encoded data) % N`, so the same data always lands on
//! the same partition and no cursor is shared between writers.

use crate::codec::{BinaryReader, BinaryWriter, CodecResult, Persistable};
use crate::dimension::DimensionDefinition;
use crate::index::round_robin::{pool_ranges, prefix_pool, read_pool_size};
use crate::index::{ByteArrayId, ByteArrayRange, IndexMetaData, IndexResult, NumericIndexStrategy};
use crate::numeric::BasicNumericDataset;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct HashKeyIndexStrategy {
    size: usize,
    pool: Vec<ByteArrayId>,
}

impl HashKeyIndexStrategy {
    pub fn new(size: usize) -> IndexResult<Self> {
        Ok(Self {
            size,
            pool: prefix_pool(size)?,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn slot_for(&self, data: &BasicNumericDataset) -> usize {
        crc32fast::hash(&data.to_binary()) as usize % self.size
    }
}

impl NumericIndexStrategy for HashKeyIndexStrategy {
    fn id(&self) -> String {
        format!("HASH_{}", self.size)
    }

    fn insertion_ids(&self, data: &BasicNumericDataset) -> IndexResult<Vec<ByteArrayId>> {
        Ok(vec![self.pool[self.slot_for(data)].clone()])
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

impl Persistable for HashKeyIndexStrategy {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_u32(self.size as u32);
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let (size, pool) = read_pool_size(reader)?;
        Ok(Self { size, pool })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_data_same_prefix() {
        let strategy = HashKeyIndexStrategy::new(8).unwrap();
        let point = BasicNumericDataset::point(&[-77.03, 38.89]);

        let first = strategy.insertion_ids(&point).unwrap();
        let second = strategy.insertion_ids(&point).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].len(), 1);
    }

    #[test]
    fn test_spreads_distinct_points() {
        let strategy = HashKeyIndexStrategy::new(4).unwrap();
        let used: BTreeSet<ByteArrayId> = (0..200)
            .flat_map(|i| {
                strategy
                    .insertion_ids(&BasicNumericDataset::point(&[i as f64, -(i as f64)]))
                    .unwrap()
            })
            .collect();

        assert_eq!(used, strategy.natural_split_points());
    }

    #[test]
    fn test_query_and_roundtrip() {
        let strategy = HashKeyIndexStrategy::new(3).unwrap();
        assert_eq!(
            strategy
                .query_ranges(&BasicNumericDataset::empty(), &[])
                .unwrap()
                .len(),
            3
        );

        let restored = HashKeyIndexStrategy::from_binary(&strategy.to_binary()).unwrap();
        assert_eq!(restored, strategy);
        assert_eq!(restored.id(), "HASH_3");
    }
}
