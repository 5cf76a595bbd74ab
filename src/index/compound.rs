//! Composition of two strategies into one key space
//!
//! The first strategy owns the first `n1` dimensions (usually none, for a
//! partitioning strategy) and the second owns the rest. Keys are the
//! concatenation of one key from each side, so the leading strategy must
//! produce fixed-length keys.

use crate::codec::{BinaryReader, BinaryWriter, CodecResult, Persistable};
use crate::dimension::DimensionDefinition;
use crate::index::{
    ByteArrayId, ByteArrayRange, IndexError, IndexMetaData, IndexResult, IndexStrategy,
    NumericIndexStrategy,
};
use crate::numeric::{BasicNumericDataset, MultiDimensionalNumericData};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundIndexStrategy {
    first: IndexStrategy,
    second: IndexStrategy,
    dimensions: Vec<DimensionDefinition>,
}

impl CompoundIndexStrategy {
    pub fn new(first: impl Into<IndexStrategy>, second: impl Into<IndexStrategy>) -> Self {
        let first = first.into();
        let second = second.into();
        let dimensions = first
            .ordered_dimensions()
            .iter()
            .chain(second.ordered_dimensions())
            .cloned()
            .collect();
        Self {
            first,
            second,
            dimensions,
        }
    }

    pub fn first(&self) -> &IndexStrategy {
        &self.first
    }

    pub fn second(&self) -> &IndexStrategy {
        &self.second
    }

    fn split(
        &self,
        data: &BasicNumericDataset,
    ) -> IndexResult<(BasicNumericDataset, BasicNumericDataset)> {
        if data.dimension_count() != self.dimensions.len() {
            return Err(IndexError::DimensionMismatch {
                strategy: self.id(),
                expected: self.dimensions.len(),
                actual: data.dimension_count(),
            });
        }
        let n1 = self.first.ordered_dimensions().len();
        // Dimension-agnostic partitioners see the whole point so hash
        // partitioning spreads by value
        let head = if n1 == 0 {
            data.clone()
        } else {
            data.slice(0, n1)
        };
        Ok((head, data.slice(n1, data.dimension_count())))
    }

    fn prefix_len(&self) -> usize {
        self.first.byte_offset_from_dimensional_index()
    }
}

impl NumericIndexStrategy for CompoundIndexStrategy {
    fn id(&self) -> String {
        format!("{}_{}", self.first.id(), self.second.id())
    }

    fn insertion_ids(&self, data: &BasicNumericDataset) -> IndexResult<Vec<ByteArrayId>> {
        let (head, tail) = self.split(data)?;
        let second = self.second.insertion_ids(&tail)?;
        if second.is_empty() {
            return Ok(Vec::new());
        }
        let first = self.first.insertion_ids(&head)?;

        let mut ids = Vec::with_capacity(first.len() * second.len());
        for a in &first {
            for b in &second {
                ids.push(a.concat(b));
            }
        }
        Ok(ids)
    }

    fn query_ranges_with_limit(
        &self,
        region: &BasicNumericDataset,
        max_ranges: Option<usize>,
        hints: &[IndexMetaData],
    ) -> IndexResult<Vec<ByteArrayRange>> {
        let (head, tail) = self.split(region)?;
        let first = self.first.query_ranges_with_limit(&head, max_ranges, hints)?;

        // Hints were produced against full keys; move them back in front of
        // the second strategy's key
        let shift = -(self.prefix_len() as isize);
        let second_hints: Vec<IndexMetaData> = hints.iter().map(|h| h.shifted(shift)).collect();
        let second_budget = max_ranges.map(|m| (m / first.len().max(1)).max(1));
        let second = self
            .second
            .query_ranges_with_limit(&tail, second_budget, &second_hints)?;

        let mut ranges = Vec::with_capacity(first.len() * second.len());
        for a in &first {
            for b in &second {
                ranges.push(ByteArrayRange::new(
                    a.start().concat(b.start()),
                    a.end().concat(b.end()),
                ));
            }
        }
        Ok(ranges)
    }

    fn ordered_dimensions(&self) -> &[DimensionDefinition] {
        &self.dimensions
    }

    fn range_for_id(&self, id: &ByteArrayId) -> BasicNumericDataset {
        let split_at = self.prefix_len().min(id.len());
        let (prefix, rest) = id.as_bytes().split_at(split_at);
        let head = self.first.range_for_id(&ByteArrayId::from(prefix));
        let tail = self.second.range_for_id(&ByteArrayId::from(rest));
        head.concat(&tail)
    }

    fn natural_split_points(&self) -> BTreeSet<ByteArrayId> {
        let first = self.first.natural_split_points();
        let second = self.second.natural_split_points();
        if first.is_empty() {
            return second;
        }
        if second.is_empty() {
            return first;
        }
        first
            .iter()
            .flat_map(|a| second.iter().map(move |b| a.concat(b)))
            .collect()
    }

    fn byte_offset_from_dimensional_index(&self) -> usize {
        self.prefix_len() + self.second.byte_offset_from_dimensional_index()
    }

    fn create_metadata(&self) -> Vec<IndexMetaData> {
        let shift = self.prefix_len() as isize;
        self.first
            .create_metadata()
            .into_iter()
            .chain(
                self.second
                    .create_metadata()
                    .into_iter()
                    .map(|m| m.shifted(shift)),
            )
            .collect()
    }
}

impl Persistable for CompoundIndexStrategy {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_entity(&self.first);
        writer.put_entity(&self.second);
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let first = reader.get_entity::<IndexStrategy>()?;
        let second = reader.get_entity::<IndexStrategy>()?;
        Ok(Self::new(first, second))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{
        RoundRobinKeyIndexStrategy, TierIndexMetaData, TieredSfcIndexStrategy,
        DEFAULT_MAX_DUPLICATES,
    };
    use crate::numeric::NumericRange;

    fn partitioned(pool: usize) -> CompoundIndexStrategy {
        let sfc = TieredSfcIndexStrategy::new(
            vec![DimensionDefinition::longitude(), DimensionDefinition::latitude()],
            12,
            DEFAULT_MAX_DUPLICATES,
        )
        .unwrap();
        CompoundIndexStrategy::new(RoundRobinKeyIndexStrategy::new(pool).unwrap(), sfc)
    }

    fn query() -> BasicNumericDataset {
        BasicNumericDataset::new(vec![
            NumericRange::new(-10.0, 10.0),
            NumericRange::new(-10.0, 10.0),
        ])
    }

    #[test]
    fn test_ids_are_prefixed() {
        let strategy = partitioned(3);
        let point = BasicNumericDataset::point(&[1.0, 2.0]);

        let prefixes: Vec<u8> = (0..4)
            .map(|_| strategy.insertion_ids(&point).unwrap()[0].as_bytes()[0])
            .collect();
        assert_eq!(prefixes, vec![0, 1, 2, 0]);

        let id = &strategy.insertion_ids(&point).unwrap()[0];
        // prefix + tier + 3 bytes of z
        assert_eq!(id.len(), 1 + 1 + 3);
        assert_eq!(id.as_bytes()[1], 12);
    }

    #[test]
    fn test_query_ranges_cover_every_partition() {
        let strategy = partitioned(3);
        let ranges = strategy.query_ranges(&query(), &[]).unwrap();

        for _ in 0..3 {
            let ids = strategy
                .insertion_ids(&BasicNumericDataset::point(&[2.5, -3.5]))
                .unwrap();
            assert!(ids
                .iter()
                .all(|id| ranges.iter().any(|r| r.contains(id.as_bytes()))));
        }
        let starts: BTreeSet<u8> = ranges.iter().map(|r| r.start().as_bytes()[0]).collect();
        assert_eq!(starts, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_metadata_offset_is_shifted() {
        let strategy = partitioned(300);
        let metadata = strategy.create_metadata();

        assert_eq!(metadata.len(), 1);
        let IndexMetaData::Tier(tier) = &metadata[0];
        assert_eq!(tier.byte_offset(), 4);
        assert_eq!(strategy.byte_offset_from_dimensional_index(), 4);
    }

    #[test]
    fn test_hints_reach_second_strategy() {
        let strategy = partitioned(2);
        let mut hints = strategy.create_metadata();
        let ids = strategy
            .insertion_ids(&BasicNumericDataset::point(&[1.0, 1.0]))
            .unwrap();
        hints[0].insertion_ids_added(&ids);

        let ranges = strategy.query_ranges(&query(), &hints).unwrap();
        assert!(!ranges.is_empty());
        // Only the finest tier holds data
        assert!(ranges.iter().all(|r| r.start().as_bytes()[1] == 12));

        let empty = vec![IndexMetaData::Tier(TierIndexMetaData::new(1))];
        assert!(strategy.query_ranges(&query(), &empty).unwrap().is_empty());
    }

    #[test]
    fn test_range_for_id_strips_prefix() {
        let strategy = partitioned(3);
        let ids = strategy
            .insertion_ids(&BasicNumericDataset::point(&[45.0, -45.0]))
            .unwrap();
        let region = strategy.range_for_id(&ids[0]);

        assert_eq!(region.dimension_count(), 2);
        assert!(region.ranges()[0].contains(45.0));
        assert!(region.ranges()[1].contains(-45.0));
    }

    #[test]
    fn test_natural_splits_and_roundtrip() {
        let strategy = partitioned(4);
        assert_eq!(strategy.natural_split_points().len(), 4);
        assert_eq!(strategy.ordered_dimensions().len(), 2);

        let restored = CompoundIndexStrategy::from_binary(&strategy.to_binary()).unwrap();
        assert_eq!(restored, strategy);
        assert_eq!(restored.id(), strategy.id());
    }
}
