//! Cartesian binning of multi-dimensional data

use crate::codec::{BinaryReader, BinaryWriter, CodecResult, Persistable};
use crate::dimension::{BinRange, DimensionDefinition, NumericDimensionDefinition};
use crate::numeric::{BasicNumericDataset, MultiDimensionalNumericData, NumericRange};

/// Normalized ranges for one combination of per-dimension bins
///
/// The composite bin id is the concatenation of every dimension's bin id in
/// dimension order, with no delimiter. Each dimension's bin ids have a fixed
/// length, so the concatenation is unambiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedNumericDataset {
    bin_id: Vec<u8>,
    data: BasicNumericDataset,
    full_extent: bool,
}

impl BinnedNumericDataset {
    pub fn new(bin_id: Vec<u8>, data: BasicNumericDataset, full_extent: bool) -> Self {
        Self {
            bin_id,
            data,
            full_extent,
        }
    }

    pub fn bin_id(&self) -> &[u8] {
        &self.bin_id
    }

    /// Bin-local normalized ranges, one per dimension
    pub fn data(&self) -> &BasicNumericDataset {
        &self.data
    }

    /// At least one dimension covers every bin
    pub fn is_full_extent(&self) -> bool {
        self.full_extent
    }

    fn from_combination(bins: &[&BinRange]) -> Self {
        let mut bin_id = Vec::new();
        let mut ranges: Vec<NumericRange> = Vec::with_capacity(bins.len());
        let mut full_extent = false;
        for bin in bins {
            bin_id.extend_from_slice(bin.bin_id());
            ranges.push(bin.normalized());
            full_extent |= bin.is_full_extent();
        }
        Self::new(bin_id, BasicNumericDataset::new(ranges), full_extent)
    }
}

impl MultiDimensionalNumericData for BinnedNumericDataset {
    fn data_per_dimension(&self) -> &[NumericRange] {
        self.data.ranges()
    }
}

impl Persistable for BinnedNumericDataset {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_block(&self.bin_id);
        writer.put_entity(&self.data);
        writer.put_u8(self.full_extent as u8);
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let bin_id = reader.get_block()?.to_vec();
        let data = reader.get_entity::<BasicNumericDataset>()?;
        let full_extent = reader.get_u8()? != 0;
        Ok(Self::new(bin_id, data, full_extent))
    }
}

/// Most bin combinations a single dataset expands to
pub const MAX_BIN_COMBINATIONS: usize = 1 << 16;

/// Bin `data` against `dimensions`, one output per bin combination
///
/// Combinations are enumerated with the last dimension varying fastest. No
/// dimensions, a dimension-count mismatch, or any dimension without coverage
/// yields no output. While the product exceeds `MAX_BIN_COMBINATIONS`, the
/// dimension with the most bins falls back to a single full-extent bin.
pub fn apply_bins<D>(data: &D, dimensions: &[DimensionDefinition]) -> Vec<BinnedNumericDataset>
where
    D: MultiDimensionalNumericData + ?Sized,
{
    if dimensions.is_empty() {
        return Vec::new();
    }
    let ranges = data.data_per_dimension();
    if ranges.len() != dimensions.len() {
        tracing::debug!(
            data_dims = ranges.len(),
            index_dims = dimensions.len(),
            "Dimension count mismatch, nothing to bin"
        );
        return Vec::new();
    }

    let mut per_dim: Vec<Vec<BinRange>> = dimensions
        .iter()
        .zip(ranges)
        .map(|(dim, range)| dim.normalized_ranges(range))
        .collect();
    if per_dim.iter().any(|bins| bins.is_empty()) {
        return Vec::new();
    }
    while combinations(&per_dim).map_or(true, |n| n > MAX_BIN_COMBINATIONS) {
        let widest = per_dim
            .iter()
            .enumerate()
            .max_by_key(|(_, bins)| bins.len())
            .map(|(dim, bins)| (dim, bins.len()));
        let Some((widest, bins)) = widest else {
            break;
        };
        tracing::debug!(
            dimension = widest,
            bins,
            "Too many bin combinations, using full extent"
        );
        per_dim[widest] = vec![BinRange::full_extent()];
    }

    if per_dim.iter().all(|bins| bins.len() == 1) {
        let single: Vec<&BinRange> = per_dim.iter().map(|bins| &bins[0]).collect();
        return vec![BinnedNumericDataset::from_combination(&single)];
    }

    let mut output = Vec::with_capacity(combinations(&per_dim).unwrap_or(0));
    let mut cursor = vec![0usize; per_dim.len()];
    loop {
        let combination: Vec<&BinRange> = cursor
            .iter()
            .zip(&per_dim)
            .map(|(&i, bins)| &bins[i])
            .collect();
        output.push(BinnedNumericDataset::from_combination(&combination));

        // Advance the odometer; done once the first dimension wraps
        let mut dim = per_dim.len();
        loop {
            if dim == 0 {
                return output;
            }
            dim -= 1;
            cursor[dim] += 1;
            if cursor[dim] < per_dim[dim].len() {
                break;
            }
            cursor[dim] = 0;
        }
    }
}

fn combinations(per_dim: &[Vec<BinRange>]) -> Option<usize> {
    per_dim
        .iter()
        .try_fold(1usize, |acc, bins| acc.checked_mul(bins.len()))
}
