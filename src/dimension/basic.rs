//! Bounded dimensions (longitude, latitude, custom)

use crate::codec::{BinaryReader, BinaryWriter, CodecError, CodecResult, Persistable};
use crate::dimension::{BinRange, DimensionKind, NumericDimensionDefinition};
use crate::numeric::NumericRange;

/// A dimension with fixed finite bounds and a single implicit bin
#[derive(Debug, Clone, PartialEq)]
pub struct BasicDimensionDefinition {
    kind: DimensionKind,
    bounds: NumericRange,
}

impl BasicDimensionDefinition {
    /// # Panics
    /// Panics if `bounds` is unbounded or has zero width
    pub fn new(kind: DimensionKind, bounds: NumericRange) -> Self {
        assert!(
            bounds.is_bounded() && bounds.width() > 0.0,
            "BasicDimensionDefinition: bounds must be finite with positive width"
        );
        Self { kind, bounds }
    }

    pub fn longitude() -> Self {
        Self::new(DimensionKind::Longitude, NumericRange::new(-180.0, 180.0))
    }

    pub fn latitude() -> Self {
        Self::new(DimensionKind::Latitude, NumericRange::new(-90.0, 90.0))
    }

    pub fn bounds(&self) -> NumericRange {
        self.bounds
    }

    fn normalize(&self, value: f64) -> f64 {
        ((value - self.bounds.min()) / self.bounds.width()).clamp(0.0, 1.0)
    }
}

impl NumericDimensionDefinition for BasicDimensionDefinition {
    fn kind(&self) -> &DimensionKind {
        &self.kind
    }

    fn full_range(&self) -> NumericRange {
        self.bounds
    }

    fn normalized_ranges(&self, range: &NumericRange) -> Vec<BinRange> {
        // Out-of-bounds portions are clamped away; a disjoint range has no coverage
        match range.clamp_to(&self.bounds) {
            Some(clamped) => vec![BinRange::new(
                Vec::new(),
                NumericRange::new(self.normalize(clamped.min()), self.normalize(clamped.max())),
            )],
            None => Vec::new(),
        }
    }

    fn denormalize(&self, bin_id: &[u8], normalized: &NumericRange) -> Option<NumericRange> {
        if !bin_id.is_empty() {
            return None;
        }
        let min = self.bounds.min();
        let width = self.bounds.width();
        NumericRange::try_new(min + normalized.min() * width, min + normalized.max() * width)
    }

    fn bin_id_len(&self) -> usize {
        0
    }
}

impl Persistable for BasicDimensionDefinition {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_entity(&self.kind);
        writer.put_entity(&self.bounds);
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let kind = reader.get_entity::<DimensionKind>()?;
        let bounds = reader.get_entity::<NumericRange>()?;
        if !bounds.is_bounded() || bounds.width() <= 0.0 {
            return Err(CodecError::Invalid(format!(
                "bounded dimension {} has bounds {}",
                kind, bounds
            )));
        }
        Ok(Self { kind, bounds })
    }
}
