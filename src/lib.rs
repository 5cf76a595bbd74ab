//! # gridkey
//!
//! Multi-dimensional indexing for ordered key-value stores. Values with a
//! position in several numeric dimensions (longitude, latitude, time, ...)
//! are written under one-dimensional sort keys, and query regions are turned
//! into the small set of key ranges that must be scanned.
//!
//! ## Modules
//!
//! - [`numeric`]: ranges and multi-dimensional datasets
//! - [`dimension`]: dimension definitions and the binning engine
//! - [`index`]: index strategies (space-filling curve, partitioning, compound)
//! - [`query`]: constraint composition and query planning
//! - [`scan`]: reference store, split readers with progress, coordinator
//! - [`codec`]: binary encoding shared by every persisted entity
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridkey::index::{CompoundIndexStrategy, DimensionalityType, RoundRobinKeyIndexStrategy};
//! use gridkey::numeric::BasicNumericDataset;
//! use gridkey::query::{Constraints, QueryPlanner};
//! use gridkey::NumericIndexStrategy;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sfc = DimensionalityType::Spatial.create_strategy(20, 16)?;
//!     let strategy = CompoundIndexStrategy::new(RoundRobinKeyIndexStrategy::new(4)?, sfc);
//!
//!     // Keys for a point
//!     let ids = strategy.insertion_ids(&BasicNumericDataset::point(&[-77.03, 38.88]))?;
//!     println!("{} insertion ids", ids.len());
//!
//!     // Ranges for a bounding box
//!     let constraints = Constraints::from_bbox(-78.0, 38.0, -76.0, 39.5)?;
//!     let plan = QueryPlanner::default().plan(&strategy, &constraints, &[])?;
//!     println!("{} ranges", plan.ranges.len());
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dimension;
pub mod index;
pub mod numeric;
pub mod query;
pub mod scan;

// Re-export top-level types for convenience
pub use codec::{CodecError, CodecResult, Persistable};

pub use numeric::{BasicNumericDataset, MultiDimensionalNumericData, NumericRange};

pub use dimension::{
    apply_bins, BinnedNumericDataset, DimensionDefinition, DimensionKind,
    NumericDimensionDefinition, TemporalUnit,
};

pub use index::{
    ByteArrayId, ByteArrayRange, CompoundIndexStrategy, DimensionalityType, HashKeyIndexStrategy,
    IndexError, IndexMetaData, IndexResult, IndexStrategy, NumericIndexStrategy,
    RoundRobinKeyIndexStrategy, TieredSfcIndexStrategy,
};

pub use query::{Constraints, QueryError, QueryPlan, QueryPlanner, QueryResult, TemporalConstraints};

pub use scan::{
    IndexWriter, InputSplit, KeyValueStore, MergedRangeReader, RangeLocationPair,
    RangeRecordReader, ScanCoordinator, ScanError, ScanResult, SqliteStore,
};

pub use config::{Config, ConfigError, IndexConfig, LoggingConfig, PartitionStrategy};
