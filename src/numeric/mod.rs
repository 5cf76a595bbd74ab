//! Numeric range model
//!
//! Immutable hyper-rectangles over an ordered list of dimensions:
//!
//! - **NumericRange**: a `[min, max]` interval on one dimension (a point when
//!   `min == max`)
//! - **BasicNumericDataset**: one `NumericRange` per dimension, in the order
//!   the index strategy declares its dimensions
//! - **MultiDimensionalNumericData**: the read-only view shared by plain and
//!   binned datasets; centroid, min and max vectors are derived on demand

use crate::codec::{BinaryReader, BinaryWriter, CodecError, CodecResult, Persistable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed interval on a single dimension
///
/// `min <= max` always holds and neither bound is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    min: f64,
    max: f64,
}

impl NumericRange {
    /// Create a new range
    ///
    /// # Panics
    /// Panics if `min > max` or either bound is NaN
    pub fn new(min: f64, max: f64) -> Self {
        assert!(
            min <= max,
            "NumericRange: min must be less than or equal to max"
        );
        Self { min, max }
    }

    /// Create a range, returning None if the bounds are inverted or NaN
    pub fn try_new(min: f64, max: f64) -> Option<Self> {
        if min <= max {
            Some(Self { min, max })
        } else {
            None
        }
    }

    /// A degenerate range holding a single value
    pub fn value(value: f64) -> Self {
        Self::new(value, value)
    }

    /// `[-inf, +inf]`
    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn centroid(&self) -> f64 {
        if self.is_point() {
            return self.min;
        }
        (self.min + self.max) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn is_point(&self) -> bool {
        self.min == self.max
    }

    /// Both bounds are finite
    pub fn is_bounded(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn overlaps(&self, other: &NumericRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// Intersection with another range, if any
    pub fn intersection(&self, other: &NumericRange) -> Option<Self> {
        Self::try_new(self.min.max(other.min), self.max.min(other.max))
    }

    /// Clamp both bounds into `bounds`; None if disjoint
    pub fn clamp_to(&self, bounds: &NumericRange) -> Option<Self> {
        self.intersection(bounds)
    }
}

impl fmt::Display for NumericRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_point() {
            write!(f, "{}", self.min)
        } else {
            write!(f, "[{}, {}]", self.min, self.max)
        }
    }
}

impl Persistable for NumericRange {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_f64(self.min);
        writer.put_f64(self.max);
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let min = reader.get_f64()?;
        let max = reader.get_f64()?;
        Self::try_new(min, max)
            .ok_or_else(|| CodecError::Invalid(format!("inverted range [{}, {}]", min, max)))
    }
}

/// Read-only view over per-dimension ranges
pub trait MultiDimensionalNumericData {
    /// Ranges in dimension order
    fn data_per_dimension(&self) -> &[NumericRange];

    fn dimension_count(&self) -> usize {
        self.data_per_dimension().len()
    }

    /// True iff there are zero dimensions
    fn is_empty(&self) -> bool {
        self.data_per_dimension().is_empty()
    }

    fn min_values_per_dimension(&self) -> Vec<f64> {
        self.data_per_dimension().iter().map(|r| r.min()).collect()
    }

    fn max_values_per_dimension(&self) -> Vec<f64> {
        self.data_per_dimension().iter().map(|r| r.max()).collect()
    }

    fn centroid_per_dimension(&self) -> Vec<f64> {
        self.data_per_dimension()
            .iter()
            .map(|r| r.centroid())
            .collect()
    }
}

/// Plain ordered list of per-dimension ranges
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicNumericDataset {
    ranges: Vec<NumericRange>,
}

impl BasicNumericDataset {
    pub fn new(ranges: Vec<NumericRange>) -> Self {
        Self { ranges }
    }

    /// Dataset with zero dimensions
    pub fn empty() -> Self {
        Self::default()
    }

    /// A point given one value per dimension
    pub fn point(values: &[f64]) -> Self {
        Self::new(values.iter().map(|&v| NumericRange::value(v)).collect())
    }

    pub fn ranges(&self) -> &[NumericRange] {
        &self.ranges
    }

    pub fn into_ranges(self) -> Vec<NumericRange> {
        self.ranges
    }

    /// Sub-dataset covering dimensions `[start, end)`
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.ranges.len());
        let start = start.min(end);
        Self::new(self.ranges[start..end].to_vec())
    }

    /// Concatenate the dimensions of two datasets
    pub fn concat(&self, other: &BasicNumericDataset) -> Self {
        let mut ranges = Vec::with_capacity(self.ranges.len() + other.ranges.len());
        ranges.extend_from_slice(&self.ranges);
        ranges.extend_from_slice(&other.ranges);
        Self::new(ranges)
    }
}

impl MultiDimensionalNumericData for BasicNumericDataset {
    fn data_per_dimension(&self) -> &[NumericRange] {
        &self.ranges
    }
}

impl From<Vec<NumericRange>> for BasicNumericDataset {
    fn from(ranges: Vec<NumericRange>) -> Self {
        Self::new(ranges)
    }
}

impl Persistable for BasicNumericDataset {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_u32(self.ranges.len() as u32);
        for range in &self.ranges {
            writer.put_entity(range);
        }
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let count = reader.get_u32()? as usize;
        // Each entry needs at least its 4-byte length prefix
        if count > reader.remaining() / 4 {
            return Err(CodecError::Invalid(format!(
                "dimension count {} exceeds input size",
                count
            )));
        }
        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            ranges.push(reader.get_entity::<NumericRange>()?);
        }
        Ok(Self { ranges })
    }
}
