//! Predefined dimension layouts

use crate::dimension::{DimensionDefinition, NumericDimensionDefinition, TemporalUnit};
use crate::index::{IndexResult, NumericIndexStrategy, TieredSfcIndexStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named dimension layouts an index can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionalityType {
    /// Longitude, latitude
    Spatial,
    /// Longitude, latitude, time binned by year
    SpatialTemporalYear,
    SpatialTemporalMonth,
    SpatialTemporalDay,
}

impl DimensionalityType {
    pub const ALL: [DimensionalityType; 4] = [
        DimensionalityType::Spatial,
        DimensionalityType::SpatialTemporalYear,
        DimensionalityType::SpatialTemporalMonth,
        DimensionalityType::SpatialTemporalDay,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DimensionalityType::Spatial => "spatial",
            DimensionalityType::SpatialTemporalYear => "spatial_temporal_year",
            DimensionalityType::SpatialTemporalMonth => "spatial_temporal_month",
            DimensionalityType::SpatialTemporalDay => "spatial_temporal_day",
        }
    }

    pub fn dimensions(&self) -> Vec<DimensionDefinition> {
        let mut dims = vec![DimensionDefinition::longitude(), DimensionDefinition::latitude()];
        match self {
            DimensionalityType::Spatial => {}
            DimensionalityType::SpatialTemporalYear => {
                dims.push(DimensionDefinition::time(TemporalUnit::Year))
            }
            DimensionalityType::SpatialTemporalMonth => {
                dims.push(DimensionDefinition::time(TemporalUnit::Month))
            }
            DimensionalityType::SpatialTemporalDay => {
                dims.push(DimensionDefinition::time(TemporalUnit::Day))
            }
        }
        dims
    }

    pub fn create_strategy(
        &self,
        bits_per_dimension: u8,
        max_duplicates: u64,
    ) -> IndexResult<TieredSfcIndexStrategy> {
        TieredSfcIndexStrategy::new(self.dimensions(), bits_per_dimension, max_duplicates)
    }

    /// Same dimension count and every dimension of this layout is matched
    /// by a compatible strategy dimension
    pub fn is_compatible(&self, strategy: &dyn NumericIndexStrategy) -> bool {
        let expected = self.dimensions();
        let actual = strategy.ordered_dimensions();
        expected.len() == actual.len()
            && expected
                .iter()
                .all(|e| actual.iter().any(|a| e.is_compatible(a)))
    }
}

impl fmt::Display for DimensionalityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DimensionalityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        DimensionalityType::ALL
            .into_iter()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| format!("unknown dimensionality type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CompoundIndexStrategy, RoundRobinKeyIndexStrategy};

    #[test]
    fn test_temporal_layouts_are_compatible_across_units() {
        let monthly = DimensionalityType::SpatialTemporalMonth
            .create_strategy(10, 4)
            .unwrap();

        assert!(DimensionalityType::SpatialTemporalYear.is_compatible(&monthly));
        assert!(DimensionalityType::SpatialTemporalDay.is_compatible(&monthly));
        assert!(!DimensionalityType::Spatial.is_compatible(&monthly));
    }

    #[test]
    fn test_compound_strategy_is_checked_by_its_dimensions() {
        let sfc = DimensionalityType::Spatial.create_strategy(16, 4).unwrap();
        let compound =
            CompoundIndexStrategy::new(RoundRobinKeyIndexStrategy::new(3).unwrap(), sfc);

        assert!(DimensionalityType::Spatial.is_compatible(&compound));
        assert!(!DimensionalityType::SpatialTemporalYear.is_compatible(&compound));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "spatial-temporal-year".parse::<DimensionalityType>(),
            Ok(DimensionalityType::SpatialTemporalYear)
        );
        for t in DimensionalityType::ALL {
            assert_eq!(t.to_string().parse::<DimensionalityType>(), Ok(t));
        }
        assert!("planar".parse::<DimensionalityType>().is_err());
    }
}
