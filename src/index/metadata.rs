//! Strategy-specific index statistics
//!
//! Writers update metadata as insertion ids are produced; queries read it as
//! hints. Metadata from independent writers is combined with `merge`.

use crate::codec::{BinaryReader, BinaryWriter, CodecError, CodecResult, Persistable};
use crate::index::ByteArrayId;
use std::collections::{BTreeMap, BTreeSet};

/// Persisted statistics attached to an index
#[derive(Debug, Clone, PartialEq)]
pub enum IndexMetaData {
    Tier(TierIndexMetaData),
}

impl IndexMetaData {
    pub fn insertion_ids_added(&mut self, ids: &[ByteArrayId]) {
        match self {
            IndexMetaData::Tier(m) => m.insertion_ids_added(ids),
        }
    }

    pub fn insertion_ids_removed(&mut self, ids: &[ByteArrayId]) {
        match self {
            IndexMetaData::Tier(m) => m.insertion_ids_removed(ids),
        }
    }

    /// Combine with metadata of the same kind; mismatched kinds are ignored
    pub fn merge(&mut self, other: &IndexMetaData) {
        match (self, other) {
            (IndexMetaData::Tier(a), IndexMetaData::Tier(b)) => a.merge(b),
        }
    }

    /// Copy with the tier byte position moved by `delta` bytes
    pub fn shifted(&self, delta: isize) -> IndexMetaData {
        match self {
            IndexMetaData::Tier(m) => IndexMetaData::Tier(m.shifted(delta)),
        }
    }
}

impl Persistable for IndexMetaData {
    fn write_to(&self, writer: &mut BinaryWriter) {
        match self {
            IndexMetaData::Tier(m) => {
                writer.put_u8(0);
                writer.put_entity(m);
            }
        }
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        match reader.get_u8()? {
            0 => Ok(IndexMetaData::Tier(reader.get_entity()?)),
            tag => Err(CodecError::UnknownTag {
                kind: "index metadata",
                tag,
            }),
        }
    }
}

/// Insertion counts per SFC tier
///
/// `byte_offset` is the position of the tier byte within an insertion id;
/// it is non-zero when a partitioning prefix precedes the SFC key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierIndexMetaData {
    byte_offset: usize,
    counts: BTreeMap<u8, u64>,
}

impl TierIndexMetaData {
    pub fn new(byte_offset: usize) -> Self {
        Self {
            byte_offset,
            counts: BTreeMap::new(),
        }
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn count(&self, tier: u8) -> u64 {
        self.counts.get(&tier).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Tiers holding at least one entry
    pub fn non_empty_tiers(&self) -> BTreeSet<u8> {
        self.counts
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(&tier, _)| tier)
            .collect()
    }

    pub fn insertion_ids_added(&mut self, ids: &[ByteArrayId]) {
        for id in ids {
            if let Some(&tier) = id.as_bytes().get(self.byte_offset) {
                *self.counts.entry(tier).or_insert(0) += 1;
            }
        }
    }

    pub fn insertion_ids_removed(&mut self, ids: &[ByteArrayId]) {
        for id in ids {
            if let Some(&tier) = id.as_bytes().get(self.byte_offset) {
                if let Some(count) = self.counts.get_mut(&tier) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    pub fn merge(&mut self, other: &TierIndexMetaData) {
        for (&tier, &count) in &other.counts {
            *self.counts.entry(tier).or_insert(0) += count;
        }
    }

    pub fn shifted(&self, delta: isize) -> Self {
        Self {
            byte_offset: self.byte_offset.saturating_add_signed(delta),
            counts: self.counts.clone(),
        }
    }
}

impl Persistable for TierIndexMetaData {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_u32(self.byte_offset as u32);
        writer.put_u32(self.counts.len() as u32);
        for (&tier, &count) in &self.counts {
            writer.put_u8(tier);
            writer.put_u64(count);
        }
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let byte_offset = reader.get_u32()? as usize;
        let entries = reader.get_u32()? as usize;
        if entries > reader.remaining() / 9 {
            return Err(CodecError::Invalid(format!(
                "tier count {} exceeds input size",
                entries
            )));
        }
        let mut counts = BTreeMap::new();
        for _ in 0..entries {
            let tier = reader.get_u8()?;
            let count = reader.get_u64()?;
            counts.insert(tier, count);
        }
        Ok(Self {
            byte_offset,
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(tiers: &[u8], offset: usize) -> Vec<ByteArrayId> {
        tiers
            .iter()
            .map(|&t| {
                let mut bytes = vec![0xAB; offset];
                bytes.push(t);
                bytes.push(0x00);
                ByteArrayId::new(bytes)
            })
            .collect()
    }

    #[test]
    fn test_counts_by_tier() {
        let mut meta = TierIndexMetaData::new(0);
        meta.insertion_ids_added(&ids(&[3, 3, 7], 0));

        assert_eq!(meta.count(3), 2);
        assert_eq!(meta.count(7), 1);
        assert_eq!(meta.non_empty_tiers(), BTreeSet::from([3, 7]));

        meta.insertion_ids_removed(&ids(&[7, 7], 0));
        assert_eq!(meta.non_empty_tiers(), BTreeSet::from([3]));
    }

    #[test]
    fn test_offset_skips_prefix() {
        let mut meta = TierIndexMetaData::new(1);
        meta.insertion_ids_added(&ids(&[5], 1));
        assert_eq!(meta.count(5), 1);
        assert_eq!(meta.count(0xAB), 0);
    }

    #[test]
    fn test_merge_adds_counts() {
        let mut a = TierIndexMetaData::new(0);
        let mut b = TierIndexMetaData::new(0);
        a.insertion_ids_added(&ids(&[1, 2], 0));
        b.insertion_ids_added(&ids(&[2, 4], 0));

        let mut merged = IndexMetaData::Tier(a);
        merged.merge(&IndexMetaData::Tier(b));

        let IndexMetaData::Tier(merged) = merged;
        assert_eq!(merged.total(), 4);
        assert_eq!(merged.count(2), 2);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut meta = TierIndexMetaData::new(4);
        meta.insertion_ids_added(&ids(&[0, 9, 9], 4));
        let wrapped = IndexMetaData::Tier(meta);

        let restored = IndexMetaData::from_binary(&wrapped.to_binary()).unwrap();
        assert_eq!(restored, wrapped);
    }
}
