use crate::core::frame288::{Frame288, Mask288};
use crate::core::units::period_hours;
use crate::errors::{InvalidSequenceError, MixedPeriodError};
use anyhow::{anyhow, bail};
use chrono::{Datelike, NaiveDateTime, TimeDelta, Timelike};
use indexmap::IndexMap;
use itertools::Itertools;
use std::collections::{BTreeSet, HashMap};
use strum_macros::Display;

pub const POWER_COLUMN: &str = "kw";
pub const ENERGY_COLUMN: &str = "kwh";
/// Optional gas usage column supplied by meters that also record gas.
pub const THERMS_COLUMN: &str = "therms";

/// Number of leading rows sampled when inferring a series period.
const PERIOD_SAMPLE_ROWS: usize = 96;

/// Reducer applied when bucketing interval rows, e.g. on resampling or
/// month-hour summarization. Mean suits power readings, Sum energy.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum AggFunc {
    Mean,
    Sum,
    Max,
    Min,
    Count,
}

impl AggFunc {
    pub fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            AggFunc::Mean => {
                if values.is_empty() {
                    0.
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            }
            AggFunc::Sum => values.iter().sum(),
            AggFunc::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggFunc::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggFunc::Count => values.len() as f64,
        }
    }
}

/// An ordered, time-indexed table of named numeric columns - the container
/// every simulation and billing computation operates over. Timestamps are
/// timezone-naive and strictly increasing; all rows share a single inferred
/// period. Operations return new frames rather than mutating in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntervalFrame {
    index: Vec<NaiveDateTime>,
    columns: IndexMap<String, Vec<f64>>,
}

impl IntervalFrame {
    /// Arguments:
    /// * `index` - row timestamps, strictly increasing
    /// * `columns` - named numeric columns, each the same length as the index
    pub fn new(
        index: Vec<NaiveDateTime>,
        columns: IndexMap<String, Vec<f64>>,
    ) -> anyhow::Result<Self> {
        for (name, values) in &columns {
            if values.len() != index.len() {
                bail!(
                    "Column {name} has {} values for {} timestamps",
                    values.len(),
                    index.len()
                );
            }
        }
        for (previous, next) in index.iter().tuple_windows() {
            if next <= previous {
                return Err(InvalidSequenceError {
                    previous: *previous,
                    next: *next,
                }
                .into());
            }
        }
        Ok(Self { index, columns })
    }

    /// Boundary constructor for the externally supplied meter series of
    /// (timestamp, kW) pairs.
    pub fn from_power_readings(
        readings: impl IntoIterator<Item = (NaiveDateTime, f64)>,
    ) -> anyhow::Result<Self> {
        let (index, kw): (Vec<_>, Vec<_>) = readings.into_iter().unzip();
        Self::new(index, IndexMap::from([(POWER_COLUMN.to_string(), kw)]))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.last().copied()
    }

    /// Value in the final row of the named column, used for state
    /// continuity between simulation intervals.
    pub fn latest_value(&self, name: &str) -> Option<f64> {
        self.columns.get(name).and_then(|values| values.last()).copied()
    }

    /// Number of distinct calendar dates covered by the index.
    pub fn days(&self) -> usize {
        self.index.iter().map(|ts| ts.date()).dedup().count()
    }

    /// The series period: the mode of the spacings between consecutive
    /// timestamps over the leading sample. A tie between two or more
    /// spacings means the series has no single period.
    pub fn period(&self) -> anyhow::Result<TimeDelta> {
        self.period_from_sample(PERIOD_SAMPLE_ROWS)
    }

    pub fn period_from_sample(&self, sample_rows: usize) -> anyhow::Result<TimeDelta> {
        if self.index.len() < 2 {
            bail!("A period cannot be inferred from a series of fewer than two rows");
        }
        let counts = self
            .index
            .iter()
            .take(sample_rows.max(2))
            .tuple_windows()
            .map(|(previous, next)| *next - *previous)
            .counts();
        let highest = counts.values().copied().max().expect("at least one delta");
        let mut modes: Vec<TimeDelta> = counts
            .into_iter()
            .filter(|(_, count)| *count == highest)
            .map(|(delta, _)| delta)
            .collect();
        modes.sort();
        if modes.len() > 1 {
            return Err(MixedPeriodError { modes }.into());
        }
        Ok(modes[0])
    }

    /// Converts the series to a different period. Coarser targets bucket
    /// rows on a wall-clock grid and reduce with `aggfunc`; finer targets
    /// forward-fill, extending the final bucket so the last original
    /// interval is not truncated. Series of fewer than two rows are
    /// returned unchanged.
    pub fn resample(&self, target: TimeDelta, aggfunc: AggFunc) -> anyhow::Result<Self> {
        if target <= TimeDelta::zero() {
            bail!("Resample target period must be positive, got {target:?}");
        }
        if self.index.len() < 2 {
            return Ok(self.clone());
        }
        let period = self.period()?;
        if target == period {
            Ok(self.clone())
        } else if target > period {
            self.downsample(target, aggfunc)
        } else {
            self.upsample(period, target)
        }
    }

    fn downsample(&self, target: TimeDelta, aggfunc: AggFunc) -> anyhow::Result<Self> {
        let origin = self.index[0]
            .date()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time");
        let mut index = Vec::new();
        let mut columns: IndexMap<String, Vec<f64>> = self
            .columns
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        for (bucket, rows) in &self
            .index
            .iter()
            .enumerate()
            .chunk_by(|(_, ts)| floor_to_grid(**ts, origin, target))
        {
            let row_ids: Vec<usize> = rows.map(|(row_id, _)| row_id).collect();
            index.push(bucket);
            for (name, values) in &self.columns {
                let bucket_values: Vec<f64> = row_ids.iter().map(|&row_id| values[row_id]).collect();
                columns[name].push(aggfunc.reduce(&bucket_values));
            }
        }
        Self::new(index, columns)
    }

    fn upsample(&self, period: TimeDelta, target: TimeDelta) -> anyhow::Result<Self> {
        let mut index = Vec::new();
        let mut columns: IndexMap<String, Vec<f64>> = self
            .columns
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        for (row_id, ts) in self.index.iter().enumerate() {
            let mut offset = TimeDelta::zero();
            while offset < period {
                index.push(*ts + offset);
                for (name, values) in &self.columns {
                    columns[name].push(values[row_id]);
                }
                offset += target;
            }
        }
        Self::new(index, columns)
    }

    /// Pointwise addition of two series. A fully-empty operand is the
    /// identity; otherwise periods are aligned by forward-filling the
    /// coarser side to the finer, rows are unioned with missing values
    /// treated as zero, and the columns common to both sides are added.
    pub fn add(&self, other: &IntervalFrame) -> anyhow::Result<Self> {
        if self.is_empty() {
            return Ok(other.clone());
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        let (left, right) = if self.len() >= 2 && other.len() >= 2 {
            let own_period = self.period()?;
            let other_period = other.period()?;
            if own_period < other_period {
                (self.clone(), other.resample(own_period, AggFunc::Mean)?)
            } else if other_period < own_period {
                (self.resample(other_period, AggFunc::Mean)?, other.clone())
            } else {
                (self.clone(), other.clone())
            }
        } else {
            (self.clone(), other.clone())
        };

        let index: Vec<NaiveDateTime> = left
            .index
            .iter()
            .chain(right.index.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let left_rows: HashMap<NaiveDateTime, usize> =
            left.index.iter().enumerate().map(|(i, ts)| (*ts, i)).collect();
        let right_rows: HashMap<NaiveDateTime, usize> =
            right.index.iter().enumerate().map(|(i, ts)| (*ts, i)).collect();

        let mut columns: IndexMap<String, Vec<f64>> = IndexMap::new();
        for (name, left_values) in &left.columns {
            let Some(right_values) = right.columns.get(name) else {
                continue;
            };
            let values = index
                .iter()
                .map(|ts| {
                    let left_value = left_rows.get(ts).map_or(0., |&i| left_values[i]);
                    let right_value = right_rows.get(ts).map_or(0., |&i| right_values[i]);
                    left_value + right_value
                })
                .collect();
            columns.insert(name.clone(), values);
        }
        Self::new(index, columns)
    }

    fn filter_rows(&self, predicate: impl Fn(&NaiveDateTime) -> bool) -> Self {
        let keep: Vec<usize> = self
            .index
            .iter()
            .enumerate()
            .filter(|(_, ts)| predicate(ts))
            .map(|(row_id, _)| row_id)
            .collect();
        Self {
            index: keep.iter().map(|&row_id| self.index[row_id]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| {
                    (
                        name.clone(),
                        keep.iter().map(|&row_id| values[row_id]).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Rows within the half-open range `[start, end_exclusive)`. A `None`
    /// bound is unbounded on that side.
    pub fn filter_by_datetime(
        &self,
        start: Option<NaiveDateTime>,
        end_exclusive: Option<NaiveDateTime>,
    ) -> Self {
        self.filter_rows(|ts| {
            start.map_or(true, |start| *ts >= start)
                && end_exclusive.map_or(true, |end| *ts < end)
        })
    }

    pub fn filter_by_weekday(&self) -> Self {
        self.filter_rows(|ts| ts.weekday().num_days_from_monday() < 5)
    }

    pub fn filter_by_weekend(&self) -> Self {
        self.filter_rows(|ts| ts.weekday().num_days_from_monday() >= 5)
    }

    pub fn filter_by_months(&self, months: &BTreeSet<u32>) -> Self {
        self.filter_rows(|ts| months.contains(&ts.month()))
    }

    /// Summarizes one column into a month-hour table, bucketing rows by
    /// (hour-of-day, month) and reducing with `aggfunc`. Buckets with no
    /// rows are 0 rather than not-a-number so that downstream arithmetic
    /// stays total-preserving.
    pub fn to_288(&self, column: &str, aggfunc: AggFunc) -> anyhow::Result<Frame288> {
        let values = self
            .column(column)
            .ok_or_else(|| anyhow!("No column named {column} in frame"))?;
        let mut buckets: [[Vec<f64>; 12]; 24] =
            std::array::from_fn(|_| std::array::from_fn(|_| Vec::new()));
        for (ts, value) in self.index.iter().zip(values) {
            buckets[ts.hour() as usize][ts.month() as usize - 1].push(*value);
        }
        Ok(Frame288::from_fn(|month, hour| {
            let bucket = &buckets[hour as usize][month as usize - 1];
            if bucket.is_empty() {
                0.
            } else {
                aggfunc.reduce(bucket)
            }
        }))
    }

    /// Replaces the power column with its energy equivalent,
    /// `kwh = kw x period_hours`. Lossless only while the period is constant.
    pub fn power_to_energy(&self) -> anyhow::Result<Self> {
        self.convert_column(POWER_COLUMN, ENERGY_COLUMN, period_hours(self.period()?))
    }

    pub fn energy_to_power(&self) -> anyhow::Result<Self> {
        self.convert_column(ENERGY_COLUMN, POWER_COLUMN, 1. / period_hours(self.period()?))
    }

    fn convert_column(&self, from: &str, to: &str, factor: f64) -> anyhow::Result<Self> {
        if !self.columns.contains_key(from) {
            bail!("No column named {from} in frame");
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                if name == from {
                    (to.to_string(), values.iter().map(|v| v * factor).collect())
                } else {
                    (name.clone(), values.clone())
                }
            })
            .collect();
        Ok(Self {
            index: self.index.clone(),
            columns,
        })
    }

    /// Total energy in kWh over rows whose (month, hour) cell is selected
    /// by the mask. The period is passed in so that filtered frames reuse
    /// the period of the series they were cut from.
    pub fn masked_energy(&self, mask: &Mask288, period: TimeDelta) -> anyhow::Result<f64> {
        let kw = self
            .column(POWER_COLUMN)
            .ok_or_else(|| anyhow!("No column named {POWER_COLUMN} in frame"))?;
        Ok(self
            .index
            .iter()
            .zip(kw)
            .filter(|(ts, _)| mask.get(ts.month(), ts.hour()))
            .map(|(_, value)| value * period_hours(period))
            .sum())
    }

    /// Maximum power reading over rows selected by the mask, `None` when no
    /// row matches.
    pub fn masked_peak(&self, mask: &Mask288) -> anyhow::Result<Option<f64>> {
        let kw = self
            .column(POWER_COLUMN)
            .ok_or_else(|| anyhow!("No column named {POWER_COLUMN} in frame"))?;
        Ok(self
            .index
            .iter()
            .zip(kw)
            .filter(|(ts, _)| mask.get(ts.month(), ts.hour()))
            .map(|(_, value)| *value)
            .fold(None, |peak, value| {
                Some(peak.map_or(value, |p: f64| p.max(value)))
            }))
    }

    /// Number of distinct calendar dates containing at least one row
    /// selected by the mask.
    pub fn masked_days(&self, mask: &Mask288) -> usize {
        self.index
            .iter()
            .filter(|ts| mask.get(ts.month(), ts.hour()))
            .map(|ts| ts.date())
            .dedup()
            .count()
    }
}

fn floor_to_grid(ts: NaiveDateTime, origin: NaiveDateTime, grid: TimeDelta) -> NaiveDateTime {
    let offset_seconds = (ts - origin).num_seconds();
    let steps = offset_seconds.div_euclid(grid.num_seconds());
    origin + TimeDelta::seconds(steps * grid.num_seconds())
}
