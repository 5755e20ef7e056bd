use crate::core::der::{DerOperator, Interval, SimulationState};
use crate::core::frame288::Frame288;
use crate::core::units::period_hours;
use crate::errors::{ChargeOutOfRangeError, ValidationError};
use chrono::{Datelike, Timelike};

const BOUND_EPSILON: f64 = 1e-9;

const CHARGE_COLUMN: &str = "charge";
const CAPACITY_COLUMN: &str = "capacity";
const DISTANCE_COLUMN: &str = "distance";

/// A fleet of `ev_count` electric vehicles served by `evse_count` chargers.
///
/// Arguments:
/// * `ev_count` - vehicles in the fleet
/// * `ev_km_per_kwh` - kilometres each vehicle travels per kWh of charge
/// * `evse_count` - chargers installed
/// * `evse_rating` - power of a single charger (kW)
/// * `utilization` - fraction of the fleet in service (between 0 and 1]
#[derive(Clone, Copy, Debug)]
pub struct EvseFleet {
    ev_count: u32,
    ev_km_per_kwh: f64,
    evse_count: u32,
    evse_rating: f64,
    utilization: f64,
}

impl EvseFleet {
    pub fn new(
        ev_count: u32,
        ev_km_per_kwh: f64,
        evse_count: u32,
        evse_rating: f64,
        utilization: f64,
    ) -> Result<Self, ValidationError> {
        if ev_count == 0 || evse_count == 0 {
            return Err(ValidationError::new(
                "A fleet requires at least one vehicle and one charger",
            ));
        }
        if ev_km_per_kwh <= 0. {
            return Err(ValidationError::new(format!(
                "Vehicle efficiency must be positive, got {ev_km_per_kwh}km/kWh"
            )));
        }
        if evse_rating < 0. {
            return Err(ValidationError::new(format!(
                "Charger rating must be non-negative, got {evse_rating}kW"
            )));
        }
        if !(0. ..=1.).contains(&utilization) || utilization == 0. {
            return Err(ValidationError::new(format!(
                "Utilization must be within (0, 1], got {utilization}"
            )));
        }
        Ok(Self {
            ev_count,
            ev_km_per_kwh,
            evse_count,
            evse_rating,
            utilization,
        })
    }

    pub fn evse_total_rating(&self) -> f64 {
        self.evse_rating * self.evse_count as f64
    }

    /// Usable fleet capacity (kWh). Derived rather than configured: the
    /// energy needed to drive the strategy's daily round trip at the
    /// fleet's efficiency, scaled by utilization.
    pub fn total_capacity(&self, strategy: &EvseStrategy) -> f64 {
        strategy.max_daily_distance() / self.ev_km_per_kwh
            * self.ev_count as f64
            * self.utilization
    }
}

/// Month-hour control for an EV fleet: a charge-threshold table (charge
/// whenever the meter reading is below the threshold) and a drive-distance
/// table (kilometres each vehicle travels during the hour slot). A slot
/// instructing both is a configuration error.
#[derive(Clone, Debug)]
pub struct EvseStrategy {
    charge_schedule: Frame288,
    drive_schedule: Frame288,
}

impl EvseStrategy {
    pub fn new(
        charge_schedule: Frame288,
        drive_schedule: Frame288,
    ) -> Result<Self, ValidationError> {
        for month in 1..=12 {
            for hour in 0..24 {
                let distance = drive_schedule.get(month, hour);
                if distance < 0. {
                    return Err(ValidationError::new(format!(
                        "Drive distance must be non-negative, got {distance} for month {month} \
                         hour {hour}"
                    )));
                }
                if distance > 0. && charge_schedule.get(month, hour) > f64::NEG_INFINITY {
                    return Err(ValidationError::new(format!(
                        "Month {month} hour {hour} instructs both driving and charging"
                    )));
                }
            }
        }
        Ok(Self {
            charge_schedule,
            drive_schedule,
        })
    }

    pub fn charge_schedule(&self) -> &Frame288 {
        &self.charge_schedule
    }

    pub fn drive_schedule(&self) -> &Frame288 {
        &self.drive_schedule
    }

    /// Kilometres one vehicle drives across a whole day of the month.
    pub fn daily_distance(&self, month: u32) -> f64 {
        self.drive_schedule.month_values(month).iter().sum()
    }

    /// The largest daily distance across the year, which sizes the fleet's
    /// usable capacity.
    pub fn max_daily_distance(&self) -> f64 {
        (1..=12)
            .map(|month| self.daily_distance(month))
            .fold(0., f64::max)
    }
}

/// Pairs a fleet with its strategy. Per interval the fleet draws charging
/// power bounded by charger rating and remaining capacity, and spends
/// charge on driving bounded by the charge available.
#[derive(Clone, Debug)]
pub struct EvseOperator {
    device: EvseFleet,
    strategy: EvseStrategy,
    capacity: f64,
}

impl EvseOperator {
    pub fn new(device: EvseFleet, strategy: EvseStrategy) -> Self {
        let capacity = device.total_capacity(&strategy);
        Self {
            device,
            strategy,
            capacity,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

impl DerOperator for EvseOperator {
    fn columns(&self) -> &'static [&'static str] {
        &["kw", CHARGE_COLUMN, CAPACITY_COLUMN, DISTANCE_COLUMN]
    }

    fn operate(&self, interval: &Interval, state: &SimulationState) -> anyhow::Result<Vec<f64>> {
        let hours = period_hours(interval.duration);
        if hours == 0. {
            return Ok(self.noop(state));
        }
        let charge = state.latest(CHARGE_COLUMN).unwrap_or(0.);
        let (month, hour) = (interval.start.month(), interval.start.hour());

        // distance for the slot, scaled by the elapsed fraction of an hour
        let fleet_distance = self.strategy.drive_schedule.get(month, hour)
            * hours
            * self.device.ev_count as f64
            * self.device.utilization;
        let drive_energy = (fleet_distance / self.device.ev_km_per_kwh).min(charge);
        let drive_power = -drive_energy / hours;

        let charge_threshold = self.strategy.charge_schedule.get(month, hour);
        let charge_power = if interval.load_kw < charge_threshold {
            (charge_threshold - interval.load_kw)
                .min(self.device.evse_total_rating())
                .min((self.capacity - charge) / hours)
                .max(0.)
        } else {
            0.
        };

        let next_charge = charge + (charge_power + drive_power) * hours;
        if next_charge < -BOUND_EPSILON || next_charge > self.capacity + BOUND_EPSILON {
            return Err(ChargeOutOfRangeError {
                charge: next_charge,
                capacity: self.capacity,
            }
            .into());
        }
        Ok(vec![
            charge_power + drive_power,
            next_charge.clamp(0., self.capacity),
            self.capacity,
            drive_energy * self.device.ev_km_per_kwh,
        ])
    }

    fn noop(&self, state: &SimulationState) -> Vec<f64> {
        vec![
            0.,
            state.latest(CHARGE_COLUMN).unwrap_or(0.),
            self.capacity,
            0.,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::der::DerSimulationBuilder;
    use crate::core::interval_frame::{IntervalFrame, POWER_COLUMN};
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, NaiveDateTime};
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn timestamp(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[fixture]
    fn fleet() -> EvseFleet {
        EvseFleet::new(2, 4., 2, 10., 1.).unwrap()
    }

    fn commuter_strategy(km_per_slot: f64) -> EvseStrategy {
        // charge overnight, drive at 8am
        let mut charge_schedule = Frame288::uniform(f64::NEG_INFINITY);
        let mut drive_schedule = Frame288::zeroes();
        for month in 1..=12 {
            for hour in 0..6 {
                charge_schedule.set(month, hour, 50.);
            }
            drive_schedule.set(month, 8, km_per_slot);
        }
        EvseStrategy::new(charge_schedule, drive_schedule).unwrap()
    }

    #[rstest]
    fn should_reject_invalid_fleet_parameters() {
        assert!(EvseFleet::new(0, 4., 2, 10., 1.).is_err());
        assert!(EvseFleet::new(2, 0., 2, 10., 1.).is_err());
        assert!(EvseFleet::new(2, 4., 2, -1., 1.).is_err());
        assert!(EvseFleet::new(2, 4., 2, 10., 0.).is_err());
        assert!(EvseFleet::new(2, 4., 2, 10., 1.5).is_err());
    }

    #[rstest]
    fn should_reject_driving_while_charging() {
        let mut charge_schedule = Frame288::uniform(f64::NEG_INFINITY);
        charge_schedule.set(1, 8, 50.);
        let mut drive_schedule = Frame288::zeroes();
        drive_schedule.set(1, 8, 10.);
        assert!(EvseStrategy::new(charge_schedule, drive_schedule).is_err());
    }

    #[rstest]
    fn capacity_should_derive_from_drive_distance(fleet: EvseFleet) {
        let strategy = commuter_strategy(20.);
        // 20km/day at 4km/kWh for 2 vehicles
        assert_relative_eq!(fleet.total_capacity(&strategy), 10.);

        let half_used = EvseFleet::new(2, 4., 2, 10., 0.5).unwrap();
        assert_relative_eq!(half_used.total_capacity(&strategy), 5.);
    }

    #[rstest]
    fn should_charge_overnight_and_spend_on_driving(fleet: EvseFleet) {
        let operator = EvseOperator::new(fleet, commuter_strategy(20.));
        let meter =
            IntervalFrame::from_power_readings((0..10).map(|hour| (timestamp(hour), 0.)))
                .unwrap();
        let product = DerSimulationBuilder::new(operator).run(&meter).unwrap();

        let kw = product.effect.column(POWER_COLUMN).unwrap();
        let charge = product.effect.column(CHARGE_COLUMN).unwrap();
        let distance = product.effect.column(DISTANCE_COLUMN).unwrap();
        // the fleet fills its 10kWh overnight, limited by capacity headroom
        assert_relative_eq!(kw[0], 10.);
        assert_relative_eq!(charge[0], 10.);
        assert_relative_eq!(kw[1], 0.);
        assert_relative_eq!(charge[5], 10.);
        // the 8am commute drains it: 40 fleet-km at 4km/kWh
        assert_relative_eq!(kw[8], -10.);
        assert_relative_eq!(charge[8], 0.);
        assert_relative_eq!(distance[8], 40.);
        assert_relative_eq!(kw[9], 0.);
    }

    #[rstest]
    fn driving_should_be_bounded_by_available_charge(fleet: EvseFleet) {
        // ask for a commute the overnight charge cannot cover
        let strategy = commuter_strategy(40.);
        let capacity = fleet.total_capacity(&strategy);
        let operator = EvseOperator::new(fleet, strategy);
        let meter = IntervalFrame::from_power_readings(
            (6..10).map(|hour| (timestamp(hour), 0.)),
        )
        .unwrap();
        let product = DerSimulationBuilder::new(operator).run(&meter).unwrap();

        let charge = product.effect.column(CHARGE_COLUMN).unwrap();
        let distance = product.effect.column(DISTANCE_COLUMN).unwrap();
        // nothing was charged, so nothing can be driven
        assert_relative_eq!(charge[2], 0.);
        assert_relative_eq!(distance[2], 0.);
        assert!(capacity > 0.);
    }
}
