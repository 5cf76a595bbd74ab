//! Turns constraints into scan ranges for one index

use crate::index::{ByteArrayRange, IndexMetaData, NumericIndexStrategy, DEFAULT_MAX_RANGES};
use crate::numeric::BasicNumericDataset;
use crate::query::{Constraints, QueryResult};

/// Ranges to scan for one index, plus the regions they were derived from
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub index_id: String,
    pub regions: Vec<BasicNumericDataset>,
    pub ranges: Vec<ByteArrayRange>,
}

impl QueryPlan {
    /// Nothing can match
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Query planner
///
/// Rejects unsupported indices before any range is produced, then
/// decomposes each constraint region and merges the resulting ranges.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    max_ranges: usize,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self {
            max_ranges: DEFAULT_MAX_RANGES,
        }
    }
}

impl QueryPlanner {
    pub fn new(max_ranges: usize) -> Self {
        Self {
            max_ranges: max_ranges.max(1),
        }
    }

    pub fn max_ranges(&self) -> usize {
        self.max_ranges
    }

    pub fn plan(
        &self,
        strategy: &dyn NumericIndexStrategy,
        constraints: &Constraints,
        hints: &[IndexMetaData],
    ) -> QueryResult<QueryPlan> {
        let regions = constraints.index_constraints(strategy)?;
        let per_region = (self.max_ranges / regions.len().max(1)).max(1);

        let mut ranges = Vec::new();
        for region in &regions {
            ranges.extend(strategy.query_ranges_with_limit(region, Some(per_region), hints)?);
        }
        let ranges = ByteArrayRange::merge_intersections(ranges);

        tracing::debug!(
            index = %strategy.id(),
            regions = regions.len(),
            ranges = ranges.len(),
            "Planned query"
        );

        Ok(QueryPlan {
            index_id: strategy.id(),
            regions,
            ranges,
        })
    }
}
