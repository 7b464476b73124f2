//! Helpers over daily series: year derivation, selectable years, value range.

use chrono::{Datelike, NaiveDate};

use crate::types::DataPoint;

/// Calendar year of an ISO `YYYY-MM-DD` date.
pub fn year_of(date: &str) -> Option<i32> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

/// All selectable years, inclusive.
pub fn year_options(min_year: i32, max_year: i32) -> Vec<i32> {
    (min_year..=max_year).collect()
}

/// Minimum and maximum value of a series, for axis scaling.
pub fn value_range(points: &[DataPoint]) -> Option<(f64, f64)> {
    points.iter().map(|p| p.value).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((min, max)) => Some((min.min(v), max.max(v))),
    })
}
