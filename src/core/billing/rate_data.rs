use crate::core::frame288::TouSchedule288;
use anyhow::{anyhow, bail};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use serde_valid::Validate;

/// One usage bracket within a rate: a per-unit price, an optional adjuster,
/// an optional per-day usage cap and the unit it is expressed in.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RateTier {
    pub rate: f64,
    #[serde(default)]
    pub adj: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl RateTier {
    pub fn total_rate(&self) -> f64 {
        self.rate + self.adj.unwrap_or(0.)
    }
}

/// An ordered list of tiers for one time-of-use period. The surrounding
/// structure list is indexed by TOU period id.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RateStructure {
    #[serde(
        rename = "tiers",
        alias = "energyRateTiers",
        alias = "demandRateTiers",
        alias = "flatDemandTiers",
        alias = "fixedRateTiers"
    )]
    pub tiers: Vec<RateTier>,
}

/// An additional named flat charge or per-kWh rider carried alongside the
/// structured rates.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct KeyVal {
    pub key: String,
    pub val: f64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum FixedRateUnit {
    #[default]
    #[serde(rename = "$/month")]
    PerMonth,
    #[serde(rename = "$/day")]
    PerDay,
}

/// Which of the four time-of-use schedules to read off a rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouKey {
    EnergyWeekday,
    EnergyWeekend,
    DemandWeekday,
    DemandWeekend,
}

/// A utility rate specification in the shape published by the OpenEI
/// Utility Rate Database. The import format is treated as opaque: callers
/// go through the typed accessors, never the raw matrices.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RateData {
    #[serde(default)]
    pub rate_name: Option<String>,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(minimum = 0.)]
    pub fixed_charge_first_meter: Option<f64>,
    #[serde(default)]
    pub fixed_charge_units: Option<FixedRateUnit>,
    #[serde(default)]
    pub fixed_key_vals: Vec<KeyVal>,
    #[serde(default)]
    pub energy_rate_strux: Vec<RateStructure>,
    #[serde(default)]
    pub energy_key_vals: Vec<KeyVal>,
    #[serde(default)]
    pub energy_weekday_sched: Vec<Vec<u32>>,
    #[serde(default)]
    pub energy_weekend_sched: Vec<Vec<u32>>,
    #[serde(default)]
    pub demand_rate_strux: Vec<RateStructure>,
    #[serde(default)]
    pub demand_weekday_sched: Vec<Vec<u32>>,
    #[serde(default)]
    pub demand_weekend_sched: Vec<Vec<u32>>,
    #[serde(default)]
    pub flat_demand_strux: Vec<RateStructure>,
    #[serde(default)]
    pub flat_demand_months: Vec<u32>,
}

impl RateData {
    /// Deserializes and eagerly validates a rate: numeric ranges, schedule
    /// shapes (12x24) and the flat-demand month array (12 entries).
    pub fn from_json(value: Value) -> anyhow::Result<Self> {
        let rate_data: RateData = serde_json::from_value(value)?;
        rate_data
            .validate()
            .map_err(|errors| anyhow!(errors.to_string()))?;
        for key in [
            TouKey::EnergyWeekday,
            TouKey::EnergyWeekend,
            TouKey::DemandWeekday,
            TouKey::DemandWeekend,
        ] {
            rate_data.get_tou_schedule(key)?;
        }
        rate_data.flat_demand_month_ids()?;
        Ok(rate_data)
    }

    /// Named fixed charges: the first-meter charge, then any keyed extras.
    pub fn fixed_rates(&self) -> Vec<(String, f64)> {
        let mut rates = Vec::new();
        if let Some(charge) = self.fixed_charge_first_meter {
            rates.push(("first meter".to_string(), charge));
        }
        for key_val in &self.fixed_key_vals {
            rates.push((key_val.key.clone(), key_val.val));
        }
        rates
    }

    pub fn fixed_rate_unit(&self) -> FixedRateUnit {
        self.fixed_charge_units.unwrap_or_default()
    }

    /// The requested schedule as a month-hour table, `None` when the rate
    /// does not carry it.
    pub fn get_tou_schedule(&self, key: TouKey) -> anyhow::Result<Option<TouSchedule288>> {
        let rows = match key {
            TouKey::EnergyWeekday => &self.energy_weekday_sched,
            TouKey::EnergyWeekend => &self.energy_weekend_sched,
            TouKey::DemandWeekday => &self.demand_weekday_sched,
            TouKey::DemandWeekend => &self.demand_weekend_sched,
        };
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(TouSchedule288::from_month_major(rows)?))
    }

    pub fn energy_structure(&self, period_id: u32) -> Option<&RateStructure> {
        self.energy_rate_strux.get(period_id as usize)
    }

    pub fn demand_structure(&self, period_id: u32) -> Option<&RateStructure> {
        self.demand_rate_strux.get(period_id as usize)
    }

    pub fn flat_demand_structure(&self, period_id: u32) -> Option<&RateStructure> {
        self.flat_demand_strux.get(period_id as usize)
    }

    /// The per-month flat-demand period ids, `None` when the rate has no
    /// seasonal demand charges.
    pub fn flat_demand_month_ids(&self) -> anyhow::Result<Option<&[u32]>> {
        if self.flat_demand_months.is_empty() {
            return Ok(None);
        }
        if self.flat_demand_months.len() != 12 {
            bail!(
                "flatDemandMonths requires 12 entries, got {}",
                self.flat_demand_months.len()
            );
        }
        Ok(Some(&self.flat_demand_months))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use serde_json::json;

    pub fn flat_sched(period_id: u32) -> Vec<Vec<u32>> {
        vec![vec![period_id; 24]; 12]
    }

    #[fixture]
    fn rate_json() -> Value {
        json!({
            "rateName": "E-1 Residential",
            "effectiveDate": "2020-01-01",
            "fixedChargeFirstMeter": 10.0,
            "fixedChargeUnits": "$/month",
            "fixedKeyVals": [{"key": "meter surcharge", "val": 1.5}],
            "energyRateStrux": [
                {"energyRateTiers": [
                    {"rate": 0.2, "max": 100.0, "unit": "kWh daily"},
                    {"rate": 0.3}
                ]},
                {"energyRateTiers": [{"rate": 0.4, "adj": 0.01}]}
            ],
            "energyWeekdaySched": flat_sched(1),
            "energyWeekendSched": flat_sched(0),
            "demandRateStrux": [{"demandRateTiers": [{"rate": 15.0}]}],
            "demandWeekdaySched": flat_sched(0),
            "demandWeekendSched": flat_sched(0),
            "flatDemandStrux": [{"flatDemandTiers": [{"rate": 8.0}]}],
            "flatDemandMonths": [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        })
    }

    #[rstest]
    fn should_ingest_the_wire_shape(rate_json: Value) {
        let rate_data = RateData::from_json(rate_json).unwrap();
        assert_eq!(rate_data.rate_name.as_deref(), Some("E-1 Residential"));
        assert_eq!(
            rate_data.effective_date,
            NaiveDate::from_ymd_opt(2020, 1, 1)
        );
        assert_eq!(rate_data.fixed_rate_unit(), FixedRateUnit::PerMonth);
        assert_eq!(
            rate_data.fixed_rates(),
            vec![
                ("first meter".to_string(), 10.),
                ("meter surcharge".to_string(), 1.5)
            ]
        );
        let schedule = rate_data
            .get_tou_schedule(TouKey::EnergyWeekday)
            .unwrap()
            .unwrap();
        assert_eq!(schedule.get(3, 12), 1);
        assert_eq!(rate_data.energy_structure(1).unwrap().tiers[0].total_rate(), 0.41);
        assert_eq!(rate_data.energy_structure(0).unwrap().tiers[0].max, Some(100.));
        assert_eq!(rate_data.flat_demand_month_ids().unwrap().unwrap().len(), 12);
    }

    #[rstest]
    fn missing_sections_should_read_as_none() {
        let rate_data = RateData::from_json(json!({"fixedChargeFirstMeter": 5.0})).unwrap();
        assert!(rate_data
            .get_tou_schedule(TouKey::EnergyWeekday)
            .unwrap()
            .is_none());
        assert!(rate_data.flat_demand_month_ids().unwrap().is_none());
        assert_eq!(rate_data.energy_structure(0), None);
    }

    #[rstest]
    fn should_reject_bad_shapes(mut rate_json: Value) {
        rate_json["energyWeekdaySched"] = json!(vec![vec![0u32; 24]; 11]);
        assert!(RateData::from_json(rate_json.clone()).is_err());

        rate_json["energyWeekdaySched"] = json!(flat_sched(0));
        rate_json["flatDemandMonths"] = json!([0, 0, 0]);
        assert!(RateData::from_json(rate_json).is_err());
    }

    #[rstest]
    fn should_reject_negative_fixed_charges() {
        assert!(RateData::from_json(json!({"fixedChargeFirstMeter": -1.0})).is_err());
    }
}
