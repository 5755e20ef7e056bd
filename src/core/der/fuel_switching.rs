use crate::core::der::{DerOperator, Interval, SimulationState};
use crate::core::frame288::Frame288;
use crate::core::interval_frame::{IntervalFrame, THERMS_COLUMN};
use crate::core::units::{period_hours, KWH_PER_THERM};
use crate::errors::ValidationError;
use chrono::{Datelike, Timelike};
use tracing::warn;

/// Electrification of a gas appliance: the heat it delivered is re-served
/// by a heat pump.
///
/// Arguments:
/// * `appliance_efficiency` - fraction of the displaced gas that was
///   delivered as useful heat (between 0 and 1]
/// * `heat_pump_cop` - coefficient of performance of the replacement heat
///   pump
#[derive(Clone, Copy, Debug)]
pub struct FuelSwitchEquipment {
    appliance_efficiency: f64,
    heat_pump_cop: f64,
}

impl FuelSwitchEquipment {
    pub fn new(appliance_efficiency: f64, heat_pump_cop: f64) -> Result<Self, ValidationError> {
        if !(0. ..=1.).contains(&appliance_efficiency) || appliance_efficiency == 0. {
            return Err(ValidationError::new(format!(
                "Appliance efficiency must be within (0, 1], got {appliance_efficiency}"
            )));
        }
        if heat_pump_cop <= 0. {
            return Err(ValidationError::new(format!(
                "Heat pump COP must be positive, got {heat_pump_cop}"
            )));
        }
        Ok(Self {
            appliance_efficiency,
            heat_pump_cop,
        })
    }
}

/// Month-hour share of the metered gas usage that is switched to the heat
/// pump, each cell in [0, 1].
#[derive(Clone, Debug)]
pub struct FuelSwitchStrategy {
    switch_share: Frame288,
}

impl FuelSwitchStrategy {
    pub fn new(switch_share: Frame288) -> Result<Self, ValidationError> {
        for month in 1..=12 {
            for hour in 0..24 {
                let share = switch_share.get(month, hour);
                if !(0. ..=1.).contains(&share) {
                    return Err(ValidationError::new(format!(
                        "Switch share must be within [0, 1], got {share} for month {month} hour \
                         {hour}"
                    )));
                }
            }
        }
        Ok(Self { switch_share })
    }
}

/// The fuel-switching effect row carries both the added electric load and
/// the displaced gas as a negative therms column, so that frame addition
/// leaves the residual gas usage in the post series.
#[derive(Clone, Debug)]
pub struct FuelSwitchOperator {
    device: FuelSwitchEquipment,
    strategy: FuelSwitchStrategy,
}

impl FuelSwitchOperator {
    pub fn new(device: FuelSwitchEquipment, strategy: FuelSwitchStrategy) -> Self {
        Self { device, strategy }
    }
}

impl DerOperator for FuelSwitchOperator {
    fn columns(&self) -> &'static [&'static str] {
        &["kw", THERMS_COLUMN]
    }

    fn check_meter(&self, meter: &IntervalFrame) -> anyhow::Result<()> {
        if meter.column(THERMS_COLUMN).is_none() {
            warn!("Meter series has no {THERMS_COLUMN} column; gas usage defaults to zero");
        }
        Ok(())
    }

    fn operate(&self, interval: &Interval, _state: &SimulationState) -> anyhow::Result<Vec<f64>> {
        let hours = period_hours(interval.duration);
        let share = self
            .strategy
            .switch_share
            .get(interval.start.month(), interval.start.hour());
        let displaced_therms = interval.therms.unwrap_or(0.) * share;
        let heat_kwh = displaced_therms * KWH_PER_THERM * self.device.appliance_efficiency;
        let electric_kwh = heat_kwh / self.device.heat_pump_cop;
        let power = if hours == 0. { 0. } else { electric_kwh / hours };
        Ok(vec![power, -displaced_therms])
    }

    fn noop(&self, _state: &SimulationState) -> Vec<f64> {
        vec![0., 0.]
    }
}
