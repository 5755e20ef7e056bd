use chrono::TimeDelta;

pub const HOURS_PER_DAY: u32 = 24;
pub const MONTHS_PER_YEAR: u32 = 12;
pub const MINUTES_PER_HOUR: u32 = 60;
pub const SECONDS_PER_HOUR: u32 = 3_600;
pub const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
pub const WATTS_PER_KILOWATT: u32 = 1_000;
/// Energy content of one therm of natural gas.
pub const KWH_PER_THERM: f64 = 29.3001;

/// Length of a period expressed in hours, the unit the kW/kWh conversions
/// are defined over.
pub fn period_hours(period: TimeDelta) -> f64 {
    period.num_seconds() as f64 / SECONDS_PER_HOUR as f64
}

/// `energy = power x period_hours`. Lossless only while the period is
/// constant across the series.
pub fn power_to_energy(kw: f64, period: TimeDelta) -> f64 {
    kw * period_hours(period)
}

pub fn energy_to_power(kwh: f64, period: TimeDelta) -> f64 {
    kwh / period_hours(period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn should_express_periods_in_hours() {
        assert_eq!(period_hours(TimeDelta::minutes(15)), 0.25);
        assert_eq!(period_hours(TimeDelta::hours(1)), 1.0);
        assert_eq!(period_hours(TimeDelta::hours(24)), 24.0);
    }

    #[rstest]
    fn should_convert_power_to_energy_and_back() {
        let period = TimeDelta::minutes(15);
        assert_eq!(power_to_energy(8.0, period), 2.0);
        assert_eq!(energy_to_power(2.0, period), 8.0);
        for kw in [-5.0, 0.0, 0.4, 12.5] {
            assert_eq!(energy_to_power(power_to_energy(kw, period), period), kw);
        }
    }

    #[rstest]
    fn month_lengths_should_cover_a_year() {
        assert_eq!(DAYS_IN_MONTH.iter().sum::<u32>(), 365);
    }
}
