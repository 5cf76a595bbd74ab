//! Dimension definitions and the binning engine
//!
//! A dimension definition normalizes raw values on one axis into a bin-local
//! `[0, 1]` space. Bounded axes (longitude, latitude, custom bounded ranges)
//! have a single implicit bin with an empty identifier. Unbounded axes, time
//! in particular, are cut into calendar bins so they become finitely
//! addressable:
//!
//! ```text
//! query time: 2005-12-15 ──────────── 2006-01-15
//!                  │                        │
//! yearly bins:  [2005: 0.953 .. 1.0]  [2006: 0.0 .. 0.038]
//! ```
//!
//! [`apply_bins`] takes the cartesian product of every dimension's bin
//! ranges, producing one [`BinnedNumericDataset`] per combination.

mod basic;
mod binned;
mod temporal;

pub use basic::BasicDimensionDefinition;
pub use binned::{apply_bins, BinnedNumericDataset, MAX_BIN_COMBINATIONS};
pub use temporal::{TemporalUnit, TimeDefinition, MAX_QUERY_BINS};

use crate::codec::{BinaryReader, BinaryWriter, CodecError, CodecResult, Persistable};
use crate::numeric::NumericRange;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic identity of a dimension, independent of how it is binned
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    Longitude,
    Latitude,
    Time,
    Custom(String),
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionKind::Longitude => write!(f, "longitude"),
            DimensionKind::Latitude => write!(f, "latitude"),
            DimensionKind::Time => write!(f, "time"),
            DimensionKind::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

impl Persistable for DimensionKind {
    fn write_to(&self, writer: &mut BinaryWriter) {
        match self {
            DimensionKind::Longitude => writer.put_u8(0),
            DimensionKind::Latitude => writer.put_u8(1),
            DimensionKind::Time => writer.put_u8(2),
            DimensionKind::Custom(name) => {
                writer.put_u8(3);
                writer.put_block(name.as_bytes());
            }
        }
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        match reader.get_u8()? {
            0 => Ok(DimensionKind::Longitude),
            1 => Ok(DimensionKind::Latitude),
            2 => Ok(DimensionKind::Time),
            3 => {
                let name = std::str::from_utf8(reader.get_block()?)
                    .map_err(|e| CodecError::Invalid(e.to_string()))?;
                Ok(DimensionKind::Custom(name.to_string()))
            }
            tag => Err(CodecError::UnknownTag {
                kind: "dimension kind",
                tag,
            }),
        }
    }
}

/// One dimension's raw range restricted to a single bin
#[derive(Debug, Clone, PartialEq)]
pub struct BinRange {
    bin_id: Vec<u8>,
    normalized: NumericRange,
    full_extent: bool,
}

impl BinRange {
    pub fn new(bin_id: Vec<u8>, normalized: NumericRange) -> Self {
        Self {
            bin_id,
            normalized,
            full_extent: false,
        }
    }

    /// Covers every bin of the dimension; used when the range cannot be
    /// enumerated bin by bin
    pub fn full_extent() -> Self {
        Self {
            bin_id: Vec::new(),
            normalized: NumericRange::new(0.0, 1.0),
            full_extent: true,
        }
    }

    pub fn bin_id(&self) -> &[u8] {
        &self.bin_id
    }

    /// Bin-local `[0, 1]` range
    pub fn normalized(&self) -> NumericRange {
        self.normalized
    }

    pub fn is_full_extent(&self) -> bool {
        self.full_extent
    }
}

/// Per-dimension normalization policy
pub trait NumericDimensionDefinition {
    /// Semantic identity used for compatibility checks
    fn kind(&self) -> &DimensionKind;

    /// Raw bounds used when a query leaves this dimension unconstrained
    fn full_range(&self) -> NumericRange;

    /// Bin ranges covering `range`, in bin order
    ///
    /// An empty result means the range has no coverage on this dimension.
    fn normalized_ranges(&self, range: &NumericRange) -> Vec<BinRange>;

    /// Map a bin-local normalized range back into raw values
    fn denormalize(&self, bin_id: &[u8], normalized: &NumericRange) -> Option<NumericRange>;

    /// Byte length of every bin id this dimension produces
    fn bin_id_len(&self) -> usize;

    /// Same semantic dimension, regardless of binning parameters
    fn is_compatible(&self, other: &dyn NumericDimensionDefinition) -> bool {
        self.kind() == other.kind()
    }
}

/// Closed set of dimension definitions that can be persisted
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionDefinition {
    Bounded(BasicDimensionDefinition),
    Time(TimeDefinition),
}

impl DimensionDefinition {
    pub fn longitude() -> Self {
        DimensionDefinition::Bounded(BasicDimensionDefinition::longitude())
    }

    pub fn latitude() -> Self {
        DimensionDefinition::Bounded(BasicDimensionDefinition::latitude())
    }

    pub fn time(unit: TemporalUnit) -> Self {
        DimensionDefinition::Time(TimeDefinition::new(unit))
    }

    /// A bounded custom dimension
    pub fn custom(name: impl Into<String>, min: f64, max: f64) -> Self {
        DimensionDefinition::Bounded(BasicDimensionDefinition::new(
            DimensionKind::Custom(name.into()),
            NumericRange::new(min, max),
        ))
    }

    /// Short label including binning parameters, used in strategy ids
    pub fn label(&self) -> String {
        match self {
            DimensionDefinition::Bounded(def) => def.kind().to_string(),
            DimensionDefinition::Time(def) => format!("time:{}", def.unit()),
        }
    }

    fn inner(&self) -> &dyn NumericDimensionDefinition {
        match self {
            DimensionDefinition::Bounded(def) => def,
            DimensionDefinition::Time(def) => def,
        }
    }
}

impl NumericDimensionDefinition for DimensionDefinition {
    fn kind(&self) -> &DimensionKind {
        self.inner().kind()
    }

    fn full_range(&self) -> NumericRange {
        self.inner().full_range()
    }

    fn normalized_ranges(&self, range: &NumericRange) -> Vec<BinRange> {
        self.inner().normalized_ranges(range)
    }

    fn denormalize(&self, bin_id: &[u8], normalized: &NumericRange) -> Option<NumericRange> {
        self.inner().denormalize(bin_id, normalized)
    }

    fn bin_id_len(&self) -> usize {
        self.inner().bin_id_len()
    }
}

impl Persistable for DimensionDefinition {
    fn write_to(&self, writer: &mut BinaryWriter) {
        match self {
            DimensionDefinition::Bounded(def) => {
                writer.put_u8(0);
                writer.put_entity(def);
            }
            DimensionDefinition::Time(def) => {
                writer.put_u8(1);
                writer.put_entity(def);
            }
        }
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        match reader.get_u8()? {
            0 => Ok(DimensionDefinition::Bounded(reader.get_entity()?)),
            1 => Ok(DimensionDefinition::Time(reader.get_entity()?)),
            tag => Err(CodecError::UnknownTag {
                kind: "dimension definition",
                tag,
            }),
        }
    }
}
