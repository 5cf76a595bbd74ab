//! Calendar binning for the time dimension
//!
//! Raw time values are milliseconds since the Unix epoch (UTC). Each
//! [`TemporalUnit`] maps a timestamp to a signed bin index; the bin id is
//! that index as a sign-flipped big-endian `i32` so lexicographic byte order
//! matches chronological order.

use crate::codec::{BinaryReader, BinaryWriter, CodecError, CodecResult, Persistable};
use crate::dimension::{BinRange, DimensionKind, NumericDimensionDefinition};
use crate::numeric::NumericRange;
use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Queries spanning more bins than this are answered with a single
/// full-extent bin range
pub const MAX_QUERY_BINS: i64 = 4096;

const BIN_ID_LEN: usize = 4;

const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;
const MILLIS_PER_WEEK: i64 = 7 * MILLIS_PER_DAY;

/// Width of one time bin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalUnit {
    Hour,
    Day,
    /// Seven-day blocks counted from the epoch
    Week,
    Month,
    Year,
    Decade,
}

impl TemporalUnit {
    fn tag(self) -> u8 {
        match self {
            TemporalUnit::Hour => 0,
            TemporalUnit::Day => 1,
            TemporalUnit::Week => 2,
            TemporalUnit::Month => 3,
            TemporalUnit::Year => 4,
            TemporalUnit::Decade => 5,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(TemporalUnit::Hour),
            1 => Some(TemporalUnit::Day),
            2 => Some(TemporalUnit::Week),
            3 => Some(TemporalUnit::Month),
            4 => Some(TemporalUnit::Year),
            5 => Some(TemporalUnit::Decade),
            _ => None,
        }
    }

    fn fixed_width(self) -> Option<i64> {
        match self {
            TemporalUnit::Hour => Some(MILLIS_PER_HOUR),
            TemporalUnit::Day => Some(MILLIS_PER_DAY),
            TemporalUnit::Week => Some(MILLIS_PER_WEEK),
            _ => None,
        }
    }

    /// Bin index containing `millis`
    fn bin_index(self, millis: i64) -> Option<i64> {
        if let Some(width) = self.fixed_width() {
            return Some(millis.div_euclid(width));
        }
        let dt = Utc.timestamp_millis_opt(millis).single()?;
        let year = dt.year() as i64;
        Some(match self {
            TemporalUnit::Month => year * 12 + dt.month0() as i64,
            TemporalUnit::Year => year,
            _ => year.div_euclid(10),
        })
    }

    /// `[start, end)` of a bin in epoch millis
    fn bin_bounds(self, index: i64) -> Option<(i64, i64)> {
        if let Some(width) = self.fixed_width() {
            let start = index.checked_mul(width)?;
            return Some((start, start.checked_add(width)?));
        }
        let (start, end) = match self {
            TemporalUnit::Month => {
                let next = index + 1;
                (
                    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1),
                    (next.div_euclid(12), next.rem_euclid(12) as u32 + 1),
                )
            }
            TemporalUnit::Year => ((index, 1), (index + 1, 1)),
            _ => ((index * 10, 1), (index * 10 + 10, 1)),
        };
        Some((month_start(start.0, start.1)?, month_start(end.0, end.1)?))
    }
}

fn month_start(year: i64, month: u32) -> Option<i64> {
    let year = i32::try_from(year).ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

fn encode_bin(index: i64) -> Option<Vec<u8>> {
    let index = i32::try_from(index).ok()?;
    Some(((index as u32) ^ 0x8000_0000).to_be_bytes().to_vec())
}

fn decode_bin(bin_id: &[u8]) -> Option<i64> {
    let bytes: [u8; BIN_ID_LEN] = bin_id.try_into().ok()?;
    Some((u32::from_be_bytes(bytes) ^ 0x8000_0000) as i32 as i64)
}

impl fmt::Display for TemporalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TemporalUnit::Hour => "hour",
            TemporalUnit::Day => "day",
            TemporalUnit::Week => "week",
            TemporalUnit::Month => "month",
            TemporalUnit::Year => "year",
            TemporalUnit::Decade => "decade",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TemporalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" => Ok(TemporalUnit::Hour),
            "day" => Ok(TemporalUnit::Day),
            "week" => Ok(TemporalUnit::Week),
            "month" => Ok(TemporalUnit::Month),
            "year" => Ok(TemporalUnit::Year),
            "decade" => Ok(TemporalUnit::Decade),
            other => Err(format!("unknown temporal unit: {}", other)),
        }
    }
}

/// The time dimension, binned by calendar unit
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDefinition {
    kind: DimensionKind,
    unit: TemporalUnit,
}

impl TimeDefinition {
    pub fn new(unit: TemporalUnit) -> Self {
        Self {
            kind: DimensionKind::Time,
            unit,
        }
    }

    pub fn unit(&self) -> TemporalUnit {
        self.unit
    }

    fn bin_range(&self, index: i64, range: &NumericRange) -> Option<BinRange> {
        let (start, end) = self.unit.bin_bounds(index)?;
        let width = (end - start) as f64;
        let lo = ((range.min().max(start as f64) - start as f64) / width).clamp(0.0, 1.0);
        let hi = ((range.max().min(end as f64) - start as f64) / width).clamp(0.0, 1.0);
        Some(BinRange::new(encode_bin(index)?, NumericRange::try_new(lo, hi)?))
    }
}

impl NumericDimensionDefinition for TimeDefinition {
    fn kind(&self) -> &DimensionKind {
        &self.kind
    }

    fn full_range(&self) -> NumericRange {
        NumericRange::unbounded()
    }

    fn normalized_ranges(&self, range: &NumericRange) -> Vec<BinRange> {
        if !range.is_bounded() {
            return vec![BinRange::full_extent()];
        }

        let first = self.unit.bin_index(range.min().floor() as i64);
        let last = self.unit.bin_index(range.max().floor() as i64);
        let (first, last) = match (first, last) {
            (Some(first), Some(last)) => (first, last),
            _ => return vec![BinRange::full_extent()],
        };
        if last - first + 1 > MAX_QUERY_BINS {
            tracing::debug!(
                unit = %self.unit,
                bins = last - first + 1,
                "Time range spans too many bins, using full extent"
            );
            return vec![BinRange::full_extent()];
        }

        let mut bins = Vec::with_capacity((last - first + 1) as usize);
        for index in first..=last {
            match self.bin_range(index, range) {
                Some(bin) => bins.push(bin),
                None => return vec![BinRange::full_extent()],
            }
        }
        bins
    }

    fn denormalize(&self, bin_id: &[u8], normalized: &NumericRange) -> Option<NumericRange> {
        if bin_id.is_empty() {
            return Some(NumericRange::unbounded());
        }
        let (start, end) = self.unit.bin_bounds(decode_bin(bin_id)?)?;
        let width = (end - start) as f64;
        NumericRange::try_new(
            start as f64 + normalized.min() * width,
            start as f64 + normalized.max() * width,
        )
    }

    fn bin_id_len(&self) -> usize {
        BIN_ID_LEN
    }
}

impl Persistable for TimeDefinition {
    fn write_to(&self, writer: &mut BinaryWriter) {
        writer.put_u8(self.unit.tag());
    }

    fn read_from(reader: &mut BinaryReader<'_>) -> CodecResult<Self> {
        let tag = reader.get_u8()?;
        let unit = TemporalUnit::from_tag(tag).ok_or(CodecError::UnknownTag {
            kind: "temporal unit",
            tag,
        })?;
        Ok(Self::new(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(y: i32, m: u32, d: u32) -> f64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis() as f64
    }

    #[test]
    fn test_yearly_range_spans_two_bins() {
        let def = TimeDefinition::new(TemporalUnit::Year);
        let range = NumericRange::new(millis(2005, 12, 15), millis(2006, 1, 15));
        let bins = def.normalized_ranges(&range);

        assert_eq!(bins.len(), 2);
        assert_eq!(decode_bin(bins[0].bin_id()), Some(2005));
        assert_eq!(decode_bin(bins[1].bin_id()), Some(2006));
        assert_eq!(bins[0].normalized().max(), 1.0);
        assert_eq!(bins[1].normalized().min(), 0.0);
        assert!(bins[0].normalized().min() > 0.95);
        assert!(bins[1].normalized().max() < 0.05);
    }

    #[test]
    fn test_bin_ids_sort_chronologically() {
        let def = TimeDefinition::new(TemporalUnit::Year);
        let range = NumericRange::new(millis(1965, 6, 1), millis(1972, 6, 1));
        let ids: Vec<Vec<u8>> = def
            .normalized_ranges(&range)
            .into_iter()
            .map(|b| b.bin_id().to_vec())
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn test_month_bins_cover_leap_february() {
        let def = TimeDefinition::new(TemporalUnit::Month);
        let range = NumericRange::new(millis(2024, 2, 15), millis(2024, 3, 1));
        let bins = def.normalized_ranges(&range);

        assert_eq!(bins.len(), 2);
        // Feb 15 is day 14 of a 29-day month
        let expected = 14.0 / 29.0;
        assert!((bins[0].normalized().min() - expected).abs() < 1e-9);
        assert_eq!(bins[1].normalized(), NumericRange::value(0.0));
    }

    #[test]
    fn test_pre_epoch_days() {
        let def = TimeDefinition::new(TemporalUnit::Day);
        let bins = def.normalized_ranges(&NumericRange::value(-1.0));

        assert_eq!(bins.len(), 1);
        assert_eq!(decode_bin(bins[0].bin_id()), Some(-1));
    }

    #[test]
    fn test_unbounded_range_is_full_extent() {
        let def = TimeDefinition::new(TemporalUnit::Day);
        let bins = def.normalized_ranges(&NumericRange::new(0.0, f64::INFINITY));

        assert_eq!(bins.len(), 1);
        assert!(bins[0].is_full_extent());
    }

    #[test]
    fn test_too_many_bins_is_full_extent() {
        let def = TimeDefinition::new(TemporalUnit::Hour);
        let range = NumericRange::new(millis(2000, 1, 1), millis(2010, 1, 1));
        let bins = def.normalized_ranges(&range);

        assert_eq!(bins.len(), 1);
        assert!(bins[0].is_full_extent());
    }

    #[test]
    fn test_denormalize_recovers_bin_bounds() {
        let def = TimeDefinition::new(TemporalUnit::Week);
        let value = millis(2020, 5, 5) + 1234.0;
        let bins = def.normalized_ranges(&NumericRange::value(value));
        let raw = def
            .denormalize(bins[0].bin_id(), &bins[0].normalized())
            .unwrap();

        assert!((raw.min() - value).abs() < 1e-3);
    }

    #[test]
    fn test_unit_parse() {
        assert_eq!("Month".parse::<TemporalUnit>(), Ok(TemporalUnit::Month));
        assert!("fortnight".parse::<TemporalUnit>().is_err());
    }
}
