use anyhow::bail;
use std::collections::BTreeSet;

/// A 24-row (hour 0-23) by 12-column (month 1-12) summary matrix, the
/// month-hour shape shared by control schedules, time-of-use lookups and
/// cost signals. Months are 1-based throughout the API.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame288 {
    values: [[f64; 12]; 24],
}

impl Frame288 {
    pub fn new(values: [[f64; 12]; 24]) -> Self {
        Self { values }
    }

    pub fn uniform(value: f64) -> Self {
        Self {
            values: [[value; 12]; 24],
        }
    }

    pub fn zeroes() -> Self {
        Self::default()
    }

    /// Arguments:
    /// * `f` - cell constructor called with (month 1-12, hour 0-23)
    pub fn from_fn(mut f: impl FnMut(u32, u32) -> f64) -> Self {
        let mut values = [[0.; 12]; 24];
        for (hour, row) in values.iter_mut().enumerate() {
            for (month_idx, cell) in row.iter_mut().enumerate() {
                *cell = f(month_idx as u32 + 1, hour as u32);
            }
        }
        Self { values }
    }

    pub fn get(&self, month: u32, hour: u32) -> f64 {
        self.values[hour as usize][month as usize - 1]
    }

    pub fn set(&mut self, month: u32, hour: u32, value: f64) {
        self.values[hour as usize][month as usize - 1] = value;
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::from_fn(|month, hour| f(self.get(month, hour)))
    }

    /// The 24 hourly values of one month column.
    pub fn month_values(&self, month: u32) -> [f64; 24] {
        std::array::from_fn(|hour| self.get(month, hour as u32))
    }

    /// Boolean table of cells equal to `key`.
    pub fn mask_eq(&self, key: f64) -> Mask288 {
        Mask288::from_fn(|month, hour| self.get(month, hour) == key)
    }
}

/// Boolean counterpart of [`Frame288`], used to select rows of an interval
/// series by (month, hour) cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mask288 {
    values: [[bool; 12]; 24],
}

impl Mask288 {
    pub fn from_fn(mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut values = [[false; 12]; 24];
        for (hour, row) in values.iter_mut().enumerate() {
            for (month_idx, cell) in row.iter_mut().enumerate() {
                *cell = f(month_idx as u32 + 1, hour as u32);
            }
        }
        Self { values }
    }

    pub fn get(&self, month: u32, hour: u32) -> bool {
        self.values[hour as usize][month as usize - 1]
    }

    /// Months with at least one selected hour.
    pub fn months(&self) -> BTreeSet<u32> {
        (1..=12)
            .filter(|&month| (0..24).any(|hour| self.get(month, hour)))
            .collect()
    }
}

/// Month-hour table of integer time-of-use period ids, as carried by the
/// weekday/weekend schedules of a rate specification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TouSchedule288 {
    values: [[u32; 12]; 24],
}

impl TouSchedule288 {
    /// Builds from the month-major 12x24 integer matrix used by the OpenEI
    /// rate format.
    pub fn from_month_major(rows: &[Vec<u32>]) -> anyhow::Result<Self> {
        if rows.len() != 12 {
            bail!(
                "A time-of-use schedule requires 12 month rows, got {}",
                rows.len()
            );
        }
        let mut values = [[0; 12]; 24];
        for (month_idx, hours) in rows.iter().enumerate() {
            if hours.len() != 24 {
                bail!(
                    "A time-of-use schedule requires 24 hour entries per month, got {} for month {}",
                    hours.len(),
                    month_idx + 1
                );
            }
            for (hour, &period_id) in hours.iter().enumerate() {
                values[hour][month_idx] = period_id;
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, month: u32, hour: u32) -> u32 {
        self.values[hour as usize][month as usize - 1]
    }

    /// Cells assigned to the given time-of-use period.
    pub fn mask(&self, period_id: u32) -> Mask288 {
        Mask288::from_fn(|month, hour| self.get(month, hour) == period_id)
    }

    /// The distinct period ids present anywhere in the schedule.
    pub fn period_ids(&self) -> BTreeSet<u32> {
        self.values.iter().flatten().copied().collect()
    }
}
