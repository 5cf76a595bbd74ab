//! Tiered Z-order space-filling-curve strategy
//!
//! Each binned, normalized rectangle is mapped onto a grid of `2^t` cells per
//! dimension and the cell coordinates are bit-interleaved into a Z-order
//! value. Tier `t` runs from 0 (one cell) to `bits_per_dimension` (finest).
//!
//! ```text
//! key:  ┌──────┬──────────────────┬──────────────────────────────┐
//!       │ tier │ composite bin id │ z value, ceil(dims*t/8) bytes│
//!       └──────┴──────────────────┴──────────────────────────────┘
//! ```
//!
//! Points are written at the finest tier. Extents are written at the finest
//! tier where they cover at most `max_duplicates` cells, once per cell.
//! Queries search every tier (or only tiers known to hold data) and
//! decompose the query box into z-ranges breadth-first until the range
//! budget is spent; cells still partially covered at that point are scanned
//! whole.

use crate::codec::{BinaryReader, BinaryWriter, CodecError, CodecResult, Persistable};
use crate::dimension::{
    apply_bins, BinnedNumericDataset, DimensionDefinition, NumericDimensionDefinition,
};
use crate::index::{
    ByteArrayId, ByteArrayRange, IndexError, IndexMetaData, IndexResult, NumericIndexStrategy,
    TierIndexMetaData, DEFAULT_MAX_RANGES,
};
use crate::numeric::{BasicNumericDataset, MultiDimensionalNumericData, NumericRange};
use std::collections::BTreeSet;

/// Cell budget for a single extent before it moves to a coarser tier
pub const DEFAULT_MAX_DUPLICATES: u64 = 16;

const MAX_DIMENSIONS: usize = 8;
const MAX_BITS_PER_DIMENSION: u8 = 32;

/// Z-order curve over `dimensions` axes with `bits` bits each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZOrderCurve {
    dimensions: usize,
    bits: u32,
}

impl ZOrderCurve {
    /// Caller guarantees `dimensions * bits <= 64` and `bits <= 32`
    pub fn new(dimensions: usize, bits: u32) -> Self {
        Self { dimensions, bits }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn cells_per_dimension(&self) -> u64 {
        1u64 << self.bits
    }

    /// Bytes needed to hold one z value
    pub fn byte_len(&self) -> usize {
        (self.dimensions * self.bits as usize + 7) / 8
    }

    /// Grid cell holding a normalized `[0, 1]` value
    pub fn cell_of(&self, normalized: f64) -> u64 {
        let cells = self.cells_per_dimension();
        let scaled = (normalized.clamp(0.0, 1.0) * cells as f64).floor() as u64;
        scaled.min(cells - 1)
    }

    /// Inclusive cell bounds of a normalized range
    pub fn cell_bounds(&self, range: &NumericRange) -> (u64, u64) {
        (self.cell_of(range.min()), self.cell_of(range.max()))
    }

    pub fn interleave(&self, cells: &[u64]) -> u64 {
        let mut z = 0u64;
        for bit in (0..self.bits).rev() {
            for &cell in cells {
                z = (z << 1) | ((cell >> bit) & 1);
            }
        }
        z
    }

    pub fn deinterleave(&self, z: u64) -> Vec<u64> {
        let mut cells = vec![0u64; self.dimensions];
        let total = self.dimensions as u32 * self.bits;
        for i in 0..total {
            let bit = (z >> (total - 1 - i)) & 1;
            let dim = i as usize % self.dimensions;
            cells[dim] = (cells[dim] << 1) | bit;
        }
        cells
    }

    /// Fixed-length big-endian encoding
    pub fn encode(&self, z: u64) -> Vec<u8> {
        z.to_be_bytes()[8 - self.byte_len()..].to_vec()
    }

    pub fn decode(&self, bytes: &[u8]) -> Option<u64> {
        if bytes.len() != self.byte_len() {
            return None;
        }
        Some(bytes.iter().fold(0u64, |z, &b| (z << 8) | b as u64))
    }

    /// Z-ranges covering the cell box `[lo, hi]`
    ///
    /// Exact when the budget allows; otherwise partially covered quadrants
    /// at the last level reached are returned whole, so the result always
    /// covers the box.
    pub fn decompose(&self, lo: &[u64], hi: &[u64], max_ranges: usize) -> Vec<(u64, u64)> {
        let n = self.dimensions as u32;
        let fanout = 1u64 << n;
        let mut ranges: Vec<(u64, u64)> = Vec::new();
        let mut frontier: Vec<u64> = vec![0];

        for level in 0..=self.bits {
            let coarse = ZOrderCurve::new(self.dimensions, level);
            let shift = self.bits - level;
            let mut partial = Vec::new();

            for prefix in frontier {
                let cells = coarse.deinterleave(prefix);
                let mut inside = true;
                let mut disjoint = false;
                for d in 0..self.dimensions {
                    let box_lo = cells[d] << shift;
                    let box_hi = box_lo + ((1u64 << shift) - 1);
                    if box_hi < lo[d] || box_lo > hi[d] {
                        disjoint = true;
                        break;
                    }
                    if box_lo < lo[d] || box_hi > hi[d] {
                        inside = false;
                    }
                }
                if disjoint {
                    continue;
                }
                if inside {
                    ranges.push(span(prefix, n * shift));
                } else {
                    partial.push(prefix);
                }
            }

            if partial.is_empty() {
                break;
            }
            if level == self.bits || ranges.len() + partial.len() * fanout as usize > max_ranges {
                ranges.extend(partial.into_iter().map(|p| span(p, n * shift)));
                break;
            }
            frontier = partial
                .into_iter()
                .flat_map(|p| (0..fanout).map(move |child| (p << n) | child))
                .collect();
        }

        ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            if let Some(last) = merged.last_mut() {
                if start <= last.1.saturating_add(1) {
                    last.1 = last.1.max(end);
                    continue;
                }
            }
            merged.push((start, end));
        }
        merged
    }
}

/// Full z-range of a prefix with `free_bits` unspecified low bits
fn span(prefix: u64, free_bits: u32) -> (u64, u64) {
    let start = (prefix as u128) << free_bits;
    let end = ((prefix as u128 + 1) << free_bits) - 1;
    (start as u64, end as u64)
}

/// Whole-bin ranges for queries with more bin and tier pairs than `budget`
///
/// Composite bin ids sort in bin order, so runs of consecutive bins in one
/// tier collapse into a single range from the first bin's prefix to the
/// last's. Tiers themselves are grouped once there are more tiers than
/// budget, or when a bin covers a whole unbounded dimension.
fn coalesce_bins(
    binned: &[BinnedNumericDataset],
    tiers: &[usize],
    budget: usize,
) -> Vec<ByteArrayRange> {
    if tiers.len() > budget || binned.iter().any(|b| b.is_full_extent()) {
        let per_group = (tiers.len() + budget - 1) / budget;
        return tiers
            .chunks(per_group)
            .map(|group| {
                ByteArrayRange::new(
                    ByteArrayId::new(vec![group[0] as u8]),
                    ByteArrayId::new(vec![group[group.len() - 1] as u8]),
                )
            })
            .collect();
    }

    let mut bin_ids: Vec<&[u8]> = binned.iter().map(|b| b.bin_id()).collect();
    bin_ids.sort_unstable();
    bin_ids.dedup();
    let runs_per_tier = budget / tiers.len();
    let per_run = (bin_ids.len() + runs_per_tier - 1) / runs_per_tier;

    let mut ranges = Vec::with_capacity(tiers.len() * runs_per_tier);
    for &tier in tiers {
        for run in bin_ids.chunks(per_run) {
            let bound = |bin_id: &[u8]| {
                let mut bytes = Vec::with_capacity(1 + bin_id.len());
                bytes.push(tier as u8);
                bytes.extend_from_slice(bin_id);
                ByteArrayId::new(bytes)
            };
            ranges.push(ByteArrayRange::new(bound(run[0]), bound(run[run.len() - 1])));
        }
    }
    ranges
}

/// Data-bearing strategy over binned, normalized dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct TieredSfcIndexStrategy {
    dimensions: Vec<DimensionDefinition>,
    bits_per_dimension: u8,
    max_duplicates: u64,
    curves: Vec<ZOrderCurve>,
    bin_id_len: usize,
}

impl TieredSfcIndexStrategy {
    pub fn new(
        dimensions: Vec<DimensionDefinition>,
        bits_per_dimension: u8,
        max_duplicates: u64,
    ) -> IndexResult<Self> {
        if dimensions.is_empty() || dimensions.len() > MAX_DIMENSIONS {
            return Err(IndexError::InvalidConfig(format!(
                "SFC strategy needs 1 to {} dimensions, got {}",
                MAX_DIMENSIONS,
                dimensions.len()
            )));
        }
        if bits_per_dimension == 0
            || bits_per_dimension > MAX_BITS_PER_DIMENSION
            || dimensions.len() * bits_per_dimension as usize > 64
        {
            return Err(IndexError::InvalidConfig(format!(
                "{} bits per dimension does not fit {} dimensions in 64 bits",
                bits_per_dimension,
                dimensions.len()
            )));
        }
        if max_duplicates == 0 {
            return Err(IndexError::InvalidConfig(
                "max_duplicates must be at least 1".to_string(),
            ));
        }

        let curves = (0..=bits_per_dimension as u32)
            .map(|tier| ZOrderCurve::new(dimensions.len(), tier))
            .collect();
        let bin_id_len = dimensions.iter().map(|d| d.bin_id_len()).sum();
        Ok(Self {
            dimensions,
            bits_per_dimension,
            max_duplicates,
            curves,
            bin_id_len,
        })
    }

    pub fn bits_per_dimension(&self) -> u8 {
        self.bits_per_dimension
    }

    pub fn max_duplicates(&self) -> u64 {
        self.max_duplicates
    }

    fn check_dimensions(&self, data: &BasicNumericDataset) -> IndexResult<()> {
        if data.dimension_count() != self.dimensions.len() {
            return Err(IndexError::DimensionMismatch {
                strategy: self.id(),
                expected: self.dimensions.len(),
                actual: data.dimension_count(),
            });
        }
        Ok(())
    }

    fn key(&self, tier: usize, bin_id: &[u8], z: u64) -> ByteArrayId {
        let curve = &self.curves[tier];
        let mut bytes = Vec::with_capacity(1 + bin_id.len() + curve.byte_len());
        bytes.push(tier as u8);
        bytes.extend_from_slice(bin_id);
        bytes.extend_from_slice(&curve.encode(z));
        ByteArrayId::new(bytes)
    }

    fn cell_box(&self, tier: usize, binned: &BinnedNumericDataset) -> (Vec<u64>, Vec<u64>) {
        let curve = &self.curves[tier];
        binned
            .data_per_dimension()
            .iter()
            .map(|range| curve.cell_bounds(range))
            .unzip()
    }

    fn binned_insertion_ids(&self, binned: &BinnedNumericDataset) -> Vec<ByteArrayId> {
        let finest = self.bits_per_dimension as usize;
        for tier in (0..=finest).rev() {
            let (lo, hi) = self.cell_box(tier, binned);
            let cells = lo
                .iter()
                .zip(&hi)
                .try_fold(1u64, |acc, (l, h)| acc.checked_mul(h - l + 1));
            match cells {
                Some(count) if count <= self.max_duplicates => {
                    return self.enumerate_cells(tier, binned.bin_id(), &lo, &hi);
                }
                _ => continue,
            }
        }
        // Tier 0 is a single cell, so the loop always returns
        Vec::new()
    }

    fn enumerate_cells(
        &self,
        tier: usize,
        bin_id: &[u8],
        lo: &[u64],
        hi: &[u64],
    ) -> Vec<ByteArrayId> {
        let curve = &self.curves[tier];
        let mut ids = Vec::new();
        let mut cursor = lo.to_vec();
        loop {
            ids.push(self.key(tier, bin_id, curve.interleave(&cursor)));
            let mut dim = cursor.len();
            loop {
                if dim == 0 {
                    return ids;
                }
                dim -= 1;
                if cursor[dim] < hi[dim] {
                    cursor[dim] += 1;
                    break;
                }
                cursor[dim] = lo[dim];
            }
        }
    }

    fn query_tiers(&self, hints: &[IndexMetaData]) -> Vec<usize> {
        let mut known: Option<BTreeSet<u8>> = None;
        for hint in hints {
            let IndexMetaData::Tier(meta) = hint;
            known
                .get_or_insert_with(BTreeSet::new)
                .extend(meta.non_empty_tiers());
        }
        match known {
            Some(tiers) => tiers
                .into_iter()
                .filter(|&t| t <= self.bits_per_dimension)
                .map(|t| t as usize)
                .collect(),
            None => (0..=self.bits_per_dimension as usize).collect(),
        }
    }
}

impl NumericIndexStrategy for TieredSfcIndexStrategy {
    fn id(&self) -> String {
        let dims: Vec<String> = self.dimensions.iter().map(|d| d.label()).collect();
        format!(
            "SFC_{}_B{}_D{}",
            dims.join("-"),
            self.bits_per_dimension,
            self.max_duplicates
        )
    }

    fn insertion_ids(&self, data: &BasicNumericDataset) -> IndexResult<Vec<ByteArrayId>> {
        self.check_dimensions(data)?;
        let mut ids = Vec::new();
        for binned in apply_bins(data, &self.dimensions) {
            if binned.is_full_extent() {
                tracing::warn!(
                    strategy = %self.id(),
                    "Data spans an entire unbounded dimension, not indexed"
                );
                continue;
            }
            ids.extend(self.binned_insertion_ids(&binned));
        }
        Ok(ids)
    }

    fn query_ranges_with_limit(
        &self,
        region: &BasicNumericDataset,
        max_ranges: Option<usize>,
        hints: &[IndexMetaData],
    ) -> IndexResult<Vec<ByteArrayRange>> {
        self.check_dimensions(region)?;
        let tiers = self.query_tiers(hints);
        let binned = apply_bins(region, &self.dimensions);
        if binned.is_empty() || tiers.is_empty() {
            return Ok(Vec::new());
        }

        let budget = max_ranges.unwrap_or(DEFAULT_MAX_RANGES).max(1);
        let decompositions = binned.len().saturating_mul(tiers.len());
        if decompositions > budget {
            let coalesced = coalesce_bins(&binned, &tiers, budget);
            let merged = ByteArrayRange::merge_intersections(coalesced);
            tracing::debug!(
                strategy = %self.id(),
                bins = binned.len(),
                tiers = tiers.len(),
                ranges = merged.len(),
                "Coalesced whole bins to fit the range budget"
            );
            return Ok(merged);
        }
        let per_decomposition = budget / decompositions;

        let mut ranges = Vec::new();
        for dataset in &binned {
            for &tier in &tiers {
                if dataset.is_full_extent() {
                    ranges.push(ByteArrayRange::prefix(ByteArrayId::new(vec![tier as u8])));
                    continue;
                }
                let (lo, hi) = self.cell_box(tier, dataset);
                for (start, end) in self.curves[tier].decompose(&lo, &hi, per_decomposition) {
                    ranges.push(ByteArrayRange::new(
                        self.key(tier, dataset.bin_id(), start),
                        self.key(tier, dataset.bin_id(), end),
                    ));
                }
            }
        }

        let merged = ByteArrayRange::merge_intersections(ranges);
        tracing::debug!(
            strategy = %self.id(),
            bins = binned.len(),
            tiers = tiers.len(),
            ranges = merged.len(),
            "Decomposed query region"
        );
        Ok(merged)
    }

    fn ordered_dimensions(&self) -> &[DimensionDefinition] {
        &self.dimensions
    }

    fn range_for_id(&self, id: &ByteArrayId) -> BasicNumericDataset {
        let bytes = id.as_bytes();
        let Some((&tier, rest)) = bytes.split_first() else {
            return BasicNumericDataset::empty();
        };
        let Some(curve) = self.curves.get(tier as usize) else {
            return BasicNumericDataset::empty();
        };
        if rest.len() != self.bin_id_len + curve.byte_len() {
            return BasicNumericDataset::empty();
        }
        let (bin_id, z_bytes) = rest.split_at(self.bin_id_len);
        let Some(z) = curve.decode(z_bytes) else {
            return BasicNumericDataset::empty();
        };

        let cell_width = 1.0 / curve.cells_per_dimension() as f64;
        let mut offset = 0;
        let mut ranges = Vec::with_capacity(self.dimensions.len());
        for (dim, cell) in self.dimensions.iter().zip(curve.deinterleave(z)) {
            let dim_bin = &bin_id[offset..offset + dim.bin_id_len()];
            offset += dim.bin_id_len();
            let normalized = NumericRange::new(
                cell as f64 * cell_width,
                ((cell + 1) as f64 * cell_width).min(1.0),
            );
            match dim.denormalize(dim_bin, &normalized) {
                Some(raw) => ranges.push(raw),
                None => return BasicNumericDataset::empty(),
            }
        }
        BasicNumericDataset::new(ranges)
    }

    fn natural_split_points(&self) -> BTreeSet<ByteArrayId> {
        BTreeSet::new()
    }

    fn byte_offset_from_dimensional_index(&self) -> usize {
        0
    }

    fn create_metadata(&self) -> Vec<IndexMetaData> {
        vec![IndexMetaData::Tier(TierIndexMetaData::new(0))]
    }
}

impl Persistable for TieredSfcIndexStrategy {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_u32(self.dimensions.len() as u32);
        for dim in &self.dimensions {
            writer.put_entity(dim);
        }
        writer.put_u8(self.bits_per_dimension);
        writer.put_u64(self.max_duplicates);
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let count = reader.get_u32()? as usize;
        if count > MAX_DIMENSIONS {
            return Err(CodecError::Invalid(format!(
                "SFC strategy with {} dimensions",
                count
            )));
        }
        let mut dimensions = Vec::with_capacity(count);
        for _ in 0..count {
            dimensions.push(reader.get_entity::<DimensionDefinition>()?);
        }
        let bits = reader.get_u8()?;
        let max_duplicates = reader.get_u64()?;
        Self::new(dimensions, bits, max_duplicates).map_err(|e| CodecError::Invalid(e.to_string()))
    }
}
