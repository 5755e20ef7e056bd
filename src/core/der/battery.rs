use crate::core::der::{DerOperator, Interval, SimulationState};
use crate::core::frame288::Frame288;
use crate::core::optimization::optimize_schedule;
use crate::core::units::period_hours;
use crate::errors::{ChargeOutOfRangeError, PowerOutOfRangeError, ValidationError};
use chrono::{Datelike, NaiveDateTime, TimeDelta, Timelike};

/// Tolerance for floating-point drift when checking hard physical bounds.
const BOUND_EPSILON: f64 = 1e-9;

const CHARGE_COLUMN: &str = "charge";
const CAPACITY_COLUMN: &str = "capacity";

/// An object to represent a stationary battery energy storage system.
///
/// Arguments:
/// * `rating` - maximum charge/discharge power (kW)
/// * `discharge_duration` - time the battery can sustain its rating from
///   full, which together with the rating defines capacity
/// * `efficiency` - round trip efficiency (between 0 and 1], applied as a
///   loss on the charge leg only
#[derive(Clone, Copy, Debug)]
pub struct Battery {
    rating: f64,
    discharge_duration: TimeDelta,
    efficiency: f64,
}

impl Battery {
    pub fn new(
        rating: f64,
        discharge_duration: TimeDelta,
        efficiency: f64,
    ) -> Result<Self, ValidationError> {
        if rating < 0. {
            return Err(ValidationError::new(format!(
                "Battery rating must be non-negative, got {rating}kW"
            )));
        }
        if discharge_duration < TimeDelta::zero() {
            return Err(ValidationError::new(
                "Battery discharge duration must be non-negative",
            ));
        }
        if !(0. ..=1.).contains(&efficiency) || efficiency == 0. {
            return Err(ValidationError::new(format!(
                "Battery efficiency must be within (0, 1], got {efficiency}"
            )));
        }
        Ok(Self {
            rating,
            discharge_duration,
            efficiency,
        })
    }

    pub fn rating(&self) -> f64 {
        self.rating
    }

    /// Maximum energy the battery can store (kWh).
    pub fn capacity(&self) -> f64 {
        self.rating * period_hours(self.discharge_duration)
    }

    /// The power required to move from `current_charge` to `target_charge`
    /// over `duration`, limited to the battery's rating. Charging pays the
    /// round-trip loss, so reaching a target requires proportionally more
    /// input power.
    pub fn get_target_power(
        &self,
        duration: TimeDelta,
        current_charge: f64,
        target_charge: f64,
    ) -> Result<f64, PowerOutOfRangeError> {
        let hours = period_hours(duration);
        if hours == 0. {
            return Ok(0.);
        }
        let power = if target_charge >= current_charge {
            ((target_charge - current_charge) / (hours * self.efficiency)).min(self.rating)
        } else {
            ((target_charge - current_charge) / hours).max(-self.rating)
        };
        self.validate_power(power)
    }

    /// The stored energy after operating at `power` for `duration`.
    /// Charging multiplies the elapsed energy by the efficiency; discharge
    /// applies no loss.
    pub fn get_next_charge(
        &self,
        power: f64,
        duration: TimeDelta,
        current_charge: f64,
    ) -> Result<f64, ChargeOutOfRangeError> {
        let hours = period_hours(duration);
        let next_charge = if power >= 0. {
            current_charge + power * hours * self.efficiency
        } else {
            current_charge + power * hours
        };
        self.validate_charge(next_charge)
    }

    fn validate_power(&self, power: f64) -> Result<f64, PowerOutOfRangeError> {
        if power < -self.rating - BOUND_EPSILON || power > self.rating + BOUND_EPSILON {
            return Err(PowerOutOfRangeError {
                power,
                rating: self.rating,
            });
        }
        Ok(power.clamp(-self.rating, self.rating))
    }

    fn validate_charge(&self, charge: f64) -> Result<f64, ChargeOutOfRangeError> {
        let capacity = self.capacity();
        if charge < -BOUND_EPSILON || charge > capacity + BOUND_EPSILON {
            return Err(ChargeOutOfRangeError { charge, capacity });
        }
        Ok(charge.clamp(0., capacity))
    }
}

/// Threshold-based battery control: charge whenever the meter reading is
/// below the charge threshold for the (month, hour) slot, discharge
/// whenever it is above the discharge threshold.
#[derive(Clone, Debug)]
pub struct BatteryStrategy {
    charge_schedule: Frame288,
    discharge_schedule: Frame288,
}

impl BatteryStrategy {
    pub fn new(
        charge_schedule: Frame288,
        discharge_schedule: Frame288,
    ) -> Result<Self, ValidationError> {
        for month in 1..=12 {
            for hour in 0..24 {
                if charge_schedule.get(month, hour) > discharge_schedule.get(month, hour) {
                    return Err(ValidationError::new(format!(
                        "Charge threshold exceeds discharge threshold for month {month} hour \
                         {hour}: a reading could trigger both"
                    )));
                }
            }
        }
        Ok(Self {
            charge_schedule,
            discharge_schedule,
        })
    }

    /// Derives a full strategy from a cost-signal month-hour table (a rate,
    /// GHG or system-peak signal): charge thresholds in the `charge_level`
    /// best-cost hours, discharge thresholds in the `discharge_level`
    /// worst-cost hours.
    pub fn from_cost_signal(
        cost: &Frame288,
        charge_level: i32,
        discharge_level: i32,
        charge_threshold: f64,
        discharge_threshold: f64,
        minimize: bool,
    ) -> Result<Self, ValidationError> {
        let charge_schedule = optimize_schedule(cost, charge_level, true, minimize, charge_threshold);
        let discharge_schedule =
            optimize_schedule(cost, discharge_level, false, !minimize, discharge_threshold);
        Self::new(charge_schedule, discharge_schedule)
    }

    pub fn charge_schedule(&self) -> &Frame288 {
        &self.charge_schedule
    }

    pub fn discharge_schedule(&self) -> &Frame288 {
        &self.discharge_schedule
    }

    /// The power the strategy asks for at a timestamp given the meter
    /// reading, rounded toward zero.
    pub fn get_target_power(&self, start: NaiveDateTime, meter_reading_kw: f64) -> f64 {
        let (month, hour) = (start.month(), start.hour());
        let charge_threshold = self.charge_schedule.get(month, hour);
        let discharge_threshold = self.discharge_schedule.get(month, hour);
        if meter_reading_kw < charge_threshold {
            (charge_threshold - meter_reading_kw).floor()
        } else if meter_reading_kw > discharge_threshold {
            (discharge_threshold - meter_reading_kw).ceil()
        } else {
            0.
        }
    }
}

/// Pairs a battery with its threshold strategy; the resulting power for an
/// interval is the one feasible under both, i.e. the minimum magnitude in
/// the requested direction.
#[derive(Clone, Debug)]
pub struct BatteryOperator {
    device: Battery,
    strategy: BatteryStrategy,
}

impl BatteryOperator {
    pub fn new(device: Battery, strategy: BatteryStrategy) -> Self {
        Self { device, strategy }
    }

    pub fn device(&self) -> &Battery {
        &self.device
    }
}

impl DerOperator for BatteryOperator {
    fn columns(&self) -> &'static [&'static str] {
        &["kw", CHARGE_COLUMN, CAPACITY_COLUMN]
    }

    fn operate(&self, interval: &Interval, state: &SimulationState) -> anyhow::Result<Vec<f64>> {
        let charge = state.latest(CHARGE_COLUMN).unwrap_or(0.);
        let requested = self
            .strategy
            .get_target_power(interval.start, interval.load_kw);
        let power = if requested > 0. {
            requested.min(self.device.get_target_power(
                interval.duration,
                charge,
                self.device.capacity(),
            )?)
        } else if requested < 0. {
            requested.max(self.device.get_target_power(interval.duration, charge, 0.)?)
        } else {
            0.
        };
        let next_charge = self.device.get_next_charge(power, interval.duration, charge)?;
        Ok(vec![power, next_charge, self.device.capacity()])
    }

    fn noop(&self, state: &SimulationState) -> Vec<f64> {
        vec![
            0.,
            state.latest(CHARGE_COLUMN).unwrap_or(0.),
            self.device.capacity(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::der::DerSimulationBuilder;
    use crate::core::interval_frame::{IntervalFrame, POWER_COLUMN};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn timestamp(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[fixture]
    fn battery() -> Battery {
        Battery::new(5., TimeDelta::hours(2), 0.5).unwrap()
    }

    #[rstest]
    fn should_reject_invalid_parameters() {
        assert!(Battery::new(-1., TimeDelta::hours(2), 0.5).is_err());
        assert!(Battery::new(5., TimeDelta::hours(-1), 0.5).is_err());
        assert!(Battery::new(5., TimeDelta::hours(2), 0.).is_err());
        assert!(Battery::new(5., TimeDelta::hours(2), 1.1).is_err());
    }

    #[rstest]
    fn capacity_should_be_rating_times_duration(battery: Battery) {
        assert_eq!(battery.capacity(), 10.);
    }

    #[rstest]
    fn target_power_should_respect_rating_and_efficiency(battery: Battery) {
        // reaching full from empty in one hour is rating-limited
        assert_eq!(
            battery
                .get_target_power(TimeDelta::hours(1), 0., 10.)
                .unwrap(),
            5.
        );
        // a small top-up pays the round-trip loss on the way in
        assert_relative_eq!(
            battery
                .get_target_power(TimeDelta::hours(1), 9., 10.)
                .unwrap(),
            2.
        );
        // discharge pays no loss
        assert_relative_eq!(
            battery
                .get_target_power(TimeDelta::hours(1), 10., 8.)
                .unwrap(),
            -2.
        );
        assert_eq!(
            battery
                .get_target_power(TimeDelta::hours(1), 10., 0.)
                .unwrap(),
            -5.
        );
        // a zero-length interval asks for nothing
        assert_eq!(
            battery
                .get_target_power(TimeDelta::zero(), 0., 10.)
                .unwrap(),
            0.
        );
    }

    #[rstest]
    fn next_charge_should_respect_bounds(battery: Battery) {
        assert_relative_eq!(
            battery
                .get_next_charge(5., TimeDelta::hours(1), 0.)
                .unwrap(),
            2.5
        );
        assert_relative_eq!(
            battery
                .get_next_charge(-5., TimeDelta::hours(1), 10.)
                .unwrap(),
            5.
        );
        assert!(battery
            .get_next_charge(5., TimeDelta::hours(10), 5.)
            .is_err());
        assert!(battery
            .get_next_charge(-5., TimeDelta::hours(2), 5.)
            .is_err());
    }

    #[rstest]
    fn strategy_should_reject_crossed_thresholds() {
        assert!(BatteryStrategy::new(Frame288::uniform(6.), Frame288::uniform(5.)).is_err());
        assert!(BatteryStrategy::new(Frame288::uniform(5.), Frame288::uniform(5.)).is_ok());
    }

    #[rstest]
    fn strategy_should_round_requests_toward_zero() {
        let strategy =
            BatteryStrategy::new(Frame288::uniform(0.), Frame288::uniform(5.)).unwrap();
        assert_eq!(strategy.get_target_power(timestamp(0), -2.7), 2.);
        assert_eq!(strategy.get_target_power(timestamp(0), 7.3), -2.);
        assert_eq!(strategy.get_target_power(timestamp(0), 3.), 0.);
    }

    #[rstest]
    fn strategy_from_cost_signal_should_charge_cheap_and_discharge_expensive() {
        // cheap overnight, expensive evening peak
        let cost = Frame288::from_fn(|_, hour| match hour {
            0..=5 => 1.,
            18..=21 => 9.,
            _ => 5.,
        });
        let strategy = BatteryStrategy::from_cost_signal(&cost, 1, 1, 20., 0., true).unwrap();
        assert_eq!(strategy.charge_schedule().get(1, 2), 20.);
        assert_eq!(strategy.charge_schedule().get(1, 12), f64::NEG_INFINITY);
        assert_eq!(strategy.discharge_schedule().get(1, 19), 0.);
        assert_eq!(strategy.discharge_schedule().get(1, 12), f64::INFINITY);
    }

    #[rstest]
    fn should_reproduce_documented_charge_cycle(battery: Battery) {
        // flat -5kW for 6 hours then +10kW for 6 hours; always charge on a
        // negative reading, always discharge above 5kW
        let strategy =
            BatteryStrategy::new(Frame288::uniform(0.), Frame288::uniform(5.)).unwrap();
        let meter = IntervalFrame::from_power_readings((0..12).map(|hour| {
            let load = if hour < 6 { -5. } else { 10. };
            (timestamp(hour), load)
        }))
        .unwrap();

        let builder = DerSimulationBuilder::new(BatteryOperator::new(battery, strategy));
        let product = builder.run(&meter).unwrap();

        let expected_kw = [5., 5., 5., 5., 0., 0., -5., -5., 0., 0., 0., 0.];
        let expected_charge = [2.5, 5., 7.5, 10., 10., 10., 5., 0., 0., 0., 0., 0.];
        let kw = product.effect.column(POWER_COLUMN).unwrap();
        let charge = product.effect.column(CHARGE_COLUMN).unwrap();
        for hour in 0..12 {
            assert_relative_eq!(kw[hour], expected_kw[hour]);
            assert_relative_eq!(charge[hour], expected_charge[hour]);
        }
        assert!(product
            .effect
            .column(CAPACITY_COLUMN)
            .unwrap()
            .iter()
            .all(|&capacity| capacity == 10.));
        assert_eq!(product.effect.latest_value(CHARGE_COLUMN), Some(0.));
    }

    #[rstest]
    fn charge_should_stay_within_bounds_for_any_load(battery: Battery) {
        let strategy =
            BatteryStrategy::new(Frame288::uniform(1.), Frame288::uniform(4.)).unwrap();
        // a deliberately erratic load series
        let meter = IntervalFrame::from_power_readings((0..96).map(|i| {
            let load = ((i as f64) * 0.7).sin() * 20. + ((i % 7) as f64) - 3.;
            (
                NaiveDate::from_ymd_opt(2020, 3, 1 + i / 24)
                    .unwrap()
                    .and_hms_opt(i % 24, 0, 0)
                    .unwrap(),
                load,
            )
        }))
        .unwrap();

        let builder = DerSimulationBuilder::new(BatteryOperator::new(battery, strategy));
        let product = builder.run(&meter).unwrap();
        for &charge in product.effect.column(CHARGE_COLUMN).unwrap() {
            assert!((0. ..=battery.capacity()).contains(&charge));
        }
    }
}
