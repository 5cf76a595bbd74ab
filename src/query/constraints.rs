//! Per-dimension query constraints
//!
//! A constraint set maps each constrained dimension to a list of candidate
//! ranges. Ranges within one dimension are alternatives (OR); dimensions
//! combine with AND. Expanding the set yields one hyper-rectangle per
//! combination of alternatives.

use crate::dimension::{DimensionKind, NumericDimensionDefinition};
use crate::index::NumericIndexStrategy;
use crate::numeric::{BasicNumericDataset, NumericRange};
use crate::query::{QueryError, QueryResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    per_dimension: BTreeMap<DimensionKind, Vec<NumericRange>>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alternative range on `kind`
    pub fn with_range(mut self, kind: DimensionKind, range: NumericRange) -> Self {
        self.per_dimension.entry(kind).or_default().push(range);
        self
    }

    pub fn with_ranges(mut self, kind: DimensionKind, ranges: Vec<NumericRange>) -> Self {
        self.per_dimension.entry(kind).or_default().extend(ranges);
        self
    }

    /// Declare `kind` present but unrestricted; the index resolves it to its
    /// own default bounds
    pub fn with_unbounded(self, kind: DimensionKind) -> Self {
        self.with_range(kind, NumericRange::unbounded())
    }

    /// Longitude/latitude box; a box with `west > east` crosses the
    /// antimeridian and becomes two longitude alternatives
    pub fn from_bbox(west: f64, south: f64, east: f64, north: f64) -> QueryResult<Self> {
        let latitude = NumericRange::try_new(south, north).ok_or_else(|| {
            QueryError::InvalidConstraint(format!("south {} above north {}", south, north))
        })?;
        let longitudes = match NumericRange::try_new(west, east) {
            Some(range) => vec![range],
            None if west.is_finite() && east.is_finite() => vec![
                NumericRange::new(west, 180.0_f64.max(west)),
                NumericRange::new((-180.0_f64).min(east), east),
            ],
            None => {
                return Err(QueryError::InvalidConstraint(format!(
                    "invalid longitude bounds {} .. {}",
                    west, east
                )))
            }
        };
        Ok(Self::new()
            .with_ranges(DimensionKind::Longitude, longitudes)
            .with_range(DimensionKind::Latitude, latitude))
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &DimensionKind> {
        self.per_dimension.keys()
    }

    pub fn ranges(&self, kind: &DimensionKind) -> Option<&[NumericRange]> {
        self.per_dimension.get(kind).map(|r| r.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.per_dimension.is_empty()
    }

    /// Combine two independently derived constraint sets
    ///
    /// A dimension constrained by one side keeps that side's ranges. A
    /// dimension constrained by both keeps the non-empty pairwise
    /// intersections, which may leave it with no alternatives at all.
    pub fn merge(&self, other: &Constraints) -> Constraints {
        let mut per_dimension = self.per_dimension.clone();
        for (kind, theirs) in &other.per_dimension {
            match per_dimension.get_mut(kind) {
                Some(ours) => {
                    let intersections = ours
                        .iter()
                        .flat_map(|a| theirs.iter().filter_map(move |b| a.intersection(b)))
                        .collect();
                    *ours = intersections;
                }
                None => {
                    per_dimension.insert(kind.clone(), theirs.clone());
                }
            }
        }
        Constraints { per_dimension }
    }

    /// Check every dimension the strategy declares is constrained
    pub fn is_supported(&self, strategy: &dyn NumericIndexStrategy) -> QueryResult<()> {
        let missing: Vec<String> = strategy
            .ordered_dimensions()
            .iter()
            .filter(|dim| !self.per_dimension.contains_key(dim.kind()))
            .map(|dim| dim.kind().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(QueryError::IndexNotSupported {
                index: strategy.id(),
                missing,
            })
        }
    }

    /// Expand into hyper-rectangles in the strategy's dimension order
    ///
    /// Each range is clipped to the dimension's default bounds; alternatives
    /// that fall entirely outside them are dropped.
    pub fn index_constraints(
        &self,
        strategy: &dyn NumericIndexStrategy,
    ) -> QueryResult<Vec<BasicNumericDataset>> {
        self.is_supported(strategy)?;

        let mut per_dim: Vec<Vec<NumericRange>> = Vec::new();
        for dim in strategy.ordered_dimensions() {
            let bounds = dim.full_range();
            let clipped: Vec<NumericRange> = self
                .per_dimension
                .get(dim.kind())
                .map(|ranges| ranges.iter().filter_map(|r| r.intersection(&bounds)).collect())
                .unwrap_or_default();
            if clipped.is_empty() {
                return Ok(Vec::new());
            }
            per_dim.push(clipped);
        }

        // Dimension-agnostic strategies still get one (empty) region
        let mut regions: Vec<Vec<NumericRange>> = vec![Vec::new()];
        for alternatives in &per_dim {
            regions = regions
                .iter()
                .flat_map(|prefix| {
                    alternatives.iter().map(move |range| {
                        let mut next = prefix.clone();
                        next.push(*range);
                        next
                    })
                })
                .collect();
        }
        Ok(regions.into_iter().map(BasicNumericDataset::new).collect())
    }
}

/// A closed interval of instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TemporalRange {
    /// None if `start > end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Epoch-millisecond range on the time dimension
    pub fn to_numeric(&self) -> NumericRange {
        NumericRange::new(
            self.start.timestamp_millis() as f64,
            self.end.timestamp_millis() as f64,
        )
    }
}

/// Alternative time ranges for one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporalConstraints {
    ranges: Vec<TemporalRange>,
}

impl TemporalConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, range: TemporalRange) {
        self.ranges.push(range);
    }

    pub fn with(mut self, range: TemporalRange) -> Self {
        self.add(range);
        self
    }

    pub fn ranges(&self) -> &[TemporalRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Earliest start across all ranges
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.ranges.iter().map(|r| r.start).min()
    }

    /// Latest end across all ranges
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.ranges.iter().map(|r| r.end).max()
    }

    /// Empty temporal constraints leave time unconstrained
    pub fn to_constraints(&self) -> Constraints {
        self.ranges.iter().fold(Constraints::new(), |c, r| {
            c.with_range(DimensionKind::Time, r.to_numeric())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionDefinition;
    use crate::index::{DimensionalityType, RoundRobinKeyIndexStrategy, DEFAULT_MAX_DUPLICATES};
    use crate::numeric::MultiDimensionalNumericData;
    use chrono::TimeZone;

    fn instant(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_merge_takes_either_side() {
        let spatial = Constraints::from_bbox(-78.0, 38.0, -77.0, 39.0).unwrap();
        let temporal = TemporalConstraints::new()
            .with(TemporalRange::new(instant(2005, 12, 15), instant(2006, 1, 15)).unwrap())
            .to_constraints();

        let merged = spatial.merge(&temporal);
        let kinds: Vec<&DimensionKind> = merged.dimensions().collect();
        assert_eq!(
            kinds,
            vec![
                &DimensionKind::Longitude,
                &DimensionKind::Latitude,
                &DimensionKind::Time
            ]
        );
        assert_eq!(
            merged.ranges(&DimensionKind::Longitude),
            Some(&[NumericRange::new(-78.0, -77.0)][..])
        );
    }

    #[test]
    fn test_merge_intersects_shared_dimension() {
        let a = Constraints::new()
            .with_range(DimensionKind::Latitude, NumericRange::new(0.0, 10.0))
            .with_range(DimensionKind::Latitude, NumericRange::new(20.0, 30.0));
        let b =
            Constraints::new().with_range(DimensionKind::Latitude, NumericRange::new(5.0, 25.0));

        let merged = a.merge(&b);
        assert_eq!(
            merged.ranges(&DimensionKind::Latitude).unwrap(),
            &[NumericRange::new(5.0, 10.0), NumericRange::new(20.0, 25.0)]
        );

        let disjoint =
            Constraints::new().with_range(DimensionKind::Latitude, NumericRange::new(50.0, 60.0));
        assert!(a.merge(&disjoint).ranges(&DimensionKind::Latitude).unwrap().is_empty());
    }

    #[test]
    fn test_spatial_only_rejected_by_temporal_index() {
        let strategy = DimensionalityType::SpatialTemporalYear
            .create_strategy(12, DEFAULT_MAX_DUPLICATES)
            .unwrap();
        let spatial = Constraints::from_bbox(-1.0, -1.0, 1.0, 1.0).unwrap();

        match spatial.is_supported(&strategy) {
            Err(QueryError::IndexNotSupported { missing, .. }) => {
                assert_eq!(missing, vec!["time".to_string()])
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        let explicit = spatial.with_unbounded(DimensionKind::Time);
        assert!(explicit.is_supported(&strategy).is_ok());
    }

    #[test]
    fn test_index_constraints_follow_strategy_order() {
        let strategy = DimensionalityType::SpatialTemporalYear
            .create_strategy(12, DEFAULT_MAX_DUPLICATES)
            .unwrap();
        let constraints = TemporalConstraints::new()
            .with(TemporalRange::new(instant(2001, 1, 1), instant(2001, 2, 1)).unwrap())
            .with(TemporalRange::new(instant(2003, 1, 1), instant(2003, 2, 1)).unwrap())
            .to_constraints()
            .merge(&Constraints::from_bbox(170.0, -5.0, -170.0, 5.0).unwrap());

        let regions = constraints.index_constraints(&strategy).unwrap();
        // 2 longitude alternatives (antimeridian) x 1 latitude x 2 times
        assert_eq!(regions.len(), 4);
        for region in &regions {
            assert_eq!(region.dimension_count(), 3);
            assert_eq!(region.ranges()[1], NumericRange::new(-5.0, 5.0));
        }
        assert_eq!(regions[0].ranges()[0], NumericRange::new(170.0, 180.0));
        assert_eq!(regions[2].ranges()[0], NumericRange::new(-180.0, -170.0));
    }

    #[test]
    fn test_unbounded_resolves_to_dimension_bounds() {
        let strategy = DimensionalityType::Spatial
            .create_strategy(8, DEFAULT_MAX_DUPLICATES)
            .unwrap();
        let constraints = Constraints::new()
            .with_unbounded(DimensionKind::Longitude)
            .with_range(DimensionKind::Latitude, NumericRange::new(-100.0, 0.0));

        let regions = constraints.index_constraints(&strategy).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ranges()[0], NumericRange::new(-180.0, 180.0));
        assert_eq!(regions[0].ranges()[1], NumericRange::new(-90.0, 0.0));
    }

    #[test]
    fn test_dimension_agnostic_strategy_gets_one_region() {
        let strategy = RoundRobinKeyIndexStrategy::new(3).unwrap();
        let regions = Constraints::new().index_constraints(&strategy).unwrap();

        assert_eq!(regions.len(), 1);
        assert!(regions[0].is_empty());
    }

    #[test]
    fn test_custom_dimension_matched_by_kind() {
        let strategy = crate::index::TieredSfcIndexStrategy::new(
            vec![DimensionDefinition::custom("depth", 0.0, 100.0)],
            8,
            DEFAULT_MAX_DUPLICATES,
        )
        .unwrap();
        let constraints = Constraints::new()
            .with_range(DimensionKind::Custom("depth".into()), NumericRange::new(10.0, 20.0));
        assert_eq!(constraints.index_constraints(&strategy).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_bbox() {
        assert!(Constraints::from_bbox(0.0, 10.0, 1.0, -10.0).is_err());
        assert!(Constraints::from_bbox(f64::NAN, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_temporal_extent() {
        let temporal = TemporalConstraints::new()
            .with(TemporalRange::new(instant(2010, 5, 1), instant(2010, 6, 1)).unwrap())
            .with(TemporalRange::new(instant(2009, 1, 1), instant(2009, 2, 1)).unwrap());

        assert_eq!(temporal.start(), Some(instant(2009, 1, 1)));
        assert_eq!(temporal.end(), Some(instant(2010, 6, 1)));
        assert!(TemporalRange::new(instant(2010, 1, 2), instant(2010, 1, 1)).is_none());
        assert!(TemporalConstraints::new().to_constraints().is_empty());
    }
}
