use crate::core::der::{DerOperator, Interval, SimulationState};
use crate::core::frame288::Frame288;
use crate::errors::ValidationError;
use chrono::{Datelike, Timelike};

/// A photovoltaic array, characterised by its nameplate rating alone; the
/// production shape lives in [`SolarShape`].
#[derive(Clone, Copy, Debug)]
pub struct SolarArray {
    rating: f64,
}

impl SolarArray {
    pub fn new(rating: f64) -> Result<Self, ValidationError> {
        if rating < 0. {
            return Err(ValidationError::new(format!(
                "Array rating must be non-negative, got {rating}kW"
            )));
        }
        Ok(Self { rating })
    }

    pub fn rating(&self) -> f64 {
        self.rating
    }
}

/// Normalised month-hour production shape: mean kW produced per kW of
/// nameplate for each (month, hour) slot.
#[derive(Clone, Debug)]
pub struct SolarShape {
    production: Frame288,
}

impl SolarShape {
    pub fn new(production: Frame288) -> Result<Self, ValidationError> {
        for month in 1..=12 {
            for hour in 0..24 {
                let output = production.get(month, hour);
                if !output.is_finite() || output < 0. {
                    return Err(ValidationError::new(format!(
                        "Normalised production must be finite and non-negative, got {output} for \
                         month {month} hour {hour}"
                    )));
                }
            }
        }
        Ok(Self { production })
    }

    pub fn production_at(&self, month: u32, hour: u32) -> f64 {
        self.production.get(month, hour)
    }
}

/// Stateless production offset: the array's effect is the negated scaled
/// shape, independent of the meter reading.
#[derive(Clone, Debug)]
pub struct SolarOperator {
    device: SolarArray,
    shape: SolarShape,
}

impl SolarOperator {
    pub fn new(device: SolarArray, shape: SolarShape) -> Self {
        Self { device, shape }
    }
}

impl DerOperator for SolarOperator {
    fn columns(&self) -> &'static [&'static str] {
        &["kw"]
    }

    fn operate(&self, interval: &Interval, _state: &SimulationState) -> anyhow::Result<Vec<f64>> {
        let production = self
            .shape
            .production_at(interval.start.month(), interval.start.hour());
        Ok(vec![-(self.device.rating() * production)])
    }

    fn noop(&self, _state: &SimulationState) -> Vec<f64> {
        vec![0.]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::der::DerSimulationBuilder;
    use crate::core::interval_frame::{IntervalFrame, POWER_COLUMN};
    use approx::assert_relative_eq;
    use chrono::{NaiveDate, NaiveDateTime};
    use rstest::*;

    fn timestamp(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[fixture]
    fn midday_shape() -> SolarShape {
        SolarShape::new(Frame288::from_fn(|_, hour| match hour {
            10..=14 => 0.5,
            _ => 0.,
        }))
        .unwrap()
    }

    #[rstest]
    fn should_reject_invalid_parameters() {
        assert!(SolarArray::new(-1.).is_err());
        assert!(SolarShape::new(Frame288::uniform(-0.1)).is_err());
        assert!(SolarShape::new(Frame288::uniform(f64::INFINITY)).is_err());
    }

    #[rstest]
    fn production_should_offset_the_meter(midday_shape: SolarShape) {
        let operator = SolarOperator::new(SolarArray::new(4.).unwrap(), midday_shape);
        let meter =
            IntervalFrame::from_power_readings((0..24).map(|hour| (timestamp(hour), 3.)))
                .unwrap();
        let product = DerSimulationBuilder::new(operator).run(&meter).unwrap();

        let effect = product.effect.column(POWER_COLUMN).unwrap();
        let post = product.post.column(POWER_COLUMN).unwrap();
        assert_relative_eq!(effect[12], -2.);
        assert_relative_eq!(post[12], 1.);
        assert_relative_eq!(effect[0], 0.);
        assert_relative_eq!(post[0], 3.);
    }
}
