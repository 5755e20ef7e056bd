use crate::core::billing::rate_data::{FixedRateUnit, RateData, RateStructure, TouKey};
use crate::core::interval_frame::IntervalFrame;
use anyhow::anyhow;
use chrono::TimeDelta;
use std::collections::BTreeSet;
use strum_macros::Display;
use tracing::warn;

/// Bills are defined over roughly one cycle; longer spans are allowed but
/// flagged as likely to be inaccurate.
const MAX_EXPECTED_BILLING_DAYS: usize = 35;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ChargeCategory {
    #[strum(serialize = "fixed")]
    Fixed,
    #[strum(serialize = "energy")]
    Energy,
    #[strum(serialize = "demand")]
    Demand,
    #[strum(serialize = "flat demand")]
    FlatDemand,
}

/// One line of a bill: a billed count of units at a rate.
#[derive(Clone, Debug, PartialEq)]
pub struct ChargeLineItem {
    pub category: ChargeCategory,
    pub description: String,
    pub count: f64,
    pub rate: f64,
}

impl ChargeLineItem {
    pub fn total(&self) -> f64 {
        self.count * self.rate
    }
}

/// An ordered list of charge line items; the bill total is their sum.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bill {
    line_items: Vec<ChargeLineItem>,
}

impl Bill {
    pub fn line_items(&self) -> &[ChargeLineItem] {
        &self.line_items
    }

    pub fn total(&self) -> f64 {
        self.line_items.iter().map(ChargeLineItem::total).sum()
    }
}

/// Bills across multiple co-effective rate components (e.g. an energy rate
/// plus a surcharge rate) or multiple calendar-month spans: totals sum and
/// line items concatenate.
#[derive(Clone, Debug, Default)]
pub struct BillingCollection {
    bills: Vec<Bill>,
}

impl BillingCollection {
    pub fn new(bills: Vec<Bill>) -> Self {
        Self { bills }
    }

    /// One bill per rate component over the same power series.
    pub fn generate(
        rate_components: &[RateData],
        power: &IntervalFrame,
    ) -> anyhow::Result<Self> {
        rate_components
            .iter()
            .map(|rate_data| compute_bill(rate_data, power))
            .collect()
    }

    pub fn push(&mut self, bill: Bill) {
        self.bills.push(bill);
    }

    pub fn bills(&self) -> &[Bill] {
        &self.bills
    }

    pub fn line_items(&self) -> impl Iterator<Item = &ChargeLineItem> {
        self.bills.iter().flat_map(|bill| bill.line_items.iter())
    }

    pub fn total(&self) -> f64 {
        self.bills.iter().map(Bill::total).sum()
    }
}

impl FromIterator<Bill> for BillingCollection {
    fn from_iter<T: IntoIterator<Item = Bill>>(iter: T) -> Self {
        Self {
            bills: iter.into_iter().collect(),
        }
    }
}

/// Computes a tiered fixed/energy/demand bill for one rate over one power
/// series.
pub fn compute_bill(rate_data: &RateData, power: &IntervalFrame) -> anyhow::Result<Bill> {
    let period = power.period()?;
    let days = power.days();
    if days > MAX_EXPECTED_BILLING_DAYS {
        warn!(
            days,
            "billing span exceeds a typical cycle and is likely to be inaccurate"
        );
    }

    let mut line_items = Vec::new();
    line_items.extend(fixed_line_items(rate_data, days));
    line_items.extend(energy_line_items(rate_data, power, period, days)?);
    line_items.extend(demand_line_items(rate_data, days, power)?);
    line_items.extend(flat_demand_line_items(rate_data, days, power)?);
    Ok(Bill { line_items })
}

fn fixed_line_items(rate_data: &RateData, days: usize) -> Vec<ChargeLineItem> {
    let count = match rate_data.fixed_rate_unit() {
        FixedRateUnit::PerMonth => 1.,
        FixedRateUnit::PerDay => days as f64,
    };
    rate_data
        .fixed_rates()
        .into_iter()
        .map(|(description, rate)| ChargeLineItem {
            category: ChargeCategory::Fixed,
            description,
            count,
            rate,
        })
        .collect()
}

fn energy_line_items(
    rate_data: &RateData,
    power: &IntervalFrame,
    period: TimeDelta,
    days: usize,
) -> anyhow::Result<Vec<ChargeLineItem>> {
    let (Some(weekday_sched), Some(weekend_sched)) = (
        rate_data.get_tou_schedule(TouKey::EnergyWeekday)?,
        rate_data.get_tou_schedule(TouKey::EnergyWeekend)?,
    ) else {
        return Ok(Vec::new());
    };
    let weekday = power.filter_by_weekday();
    let weekend = power.filter_by_weekend();

    let mut line_items = Vec::new();
    let mut billed_kwh = 0.;
    let period_ids: BTreeSet<u32> = weekday_sched
        .period_ids()
        .union(&weekend_sched.period_ids())
        .copied()
        .collect();
    for period_id in period_ids {
        let kwh = weekday.masked_energy(&weekday_sched.mask(period_id), period)?
            + weekend.masked_energy(&weekend_sched.mask(period_id), period)?;
        billed_kwh += kwh;
        let structure = rate_data
            .energy_structure(period_id)
            .ok_or_else(|| anyhow!("No energy rate structure for TOU period {period_id}"))?;
        line_items.extend(allocate_energy_tiers(period_id, structure, kwh, days));
    }
    for key_val in &rate_data.energy_key_vals {
        line_items.push(ChargeLineItem {
            category: ChargeCategory::Energy,
            description: key_val.key.clone(),
            count: billed_kwh,
            rate: key_val.val,
        });
    }
    Ok(line_items)
}

/// Allocates a period's energy descending through its ordered tiers, each
/// capped at `max x days`, carrying the remainder forward; a net-negative
/// (export) total is billed entirely at the first tier.
fn allocate_energy_tiers(
    period_id: u32,
    structure: &RateStructure,
    total_kwh: f64,
    days: usize,
) -> Vec<ChargeLineItem> {
    let line_item = |tier_id: usize, count: f64, rate: f64| ChargeLineItem {
        category: ChargeCategory::Energy,
        description: format!("period {period_id} tier {tier_id}"),
        count,
        rate,
    };
    let Some(first_tier) = structure.tiers.first() else {
        return Vec::new();
    };
    if total_kwh < 0. {
        return vec![line_item(0, total_kwh, first_tier.total_rate())];
    }

    let mut line_items = Vec::new();
    let mut remaining = total_kwh;
    let final_tier = structure.tiers.len() - 1;
    for (tier_id, tier) in structure.tiers.iter().enumerate() {
        let count = match tier.max {
            // the final tier absorbs any remainder beyond its cap
            Some(max) if tier_id < final_tier => remaining.min(max * days as f64),
            _ => remaining,
        };
        if count > 0. {
            line_items.push(line_item(tier_id, count, tier.total_rate()));
        }
        remaining -= count;
        if remaining <= 0. {
            break;
        }
    }
    line_items
}

fn demand_line_items(
    rate_data: &RateData,
    days: usize,
    power: &IntervalFrame,
) -> anyhow::Result<Vec<ChargeLineItem>> {
    let (Some(weekday_sched), Some(weekend_sched)) = (
        rate_data.get_tou_schedule(TouKey::DemandWeekday)?,
        rate_data.get_tou_schedule(TouKey::DemandWeekend)?,
    ) else {
        return Ok(Vec::new());
    };
    let weekday = power.filter_by_weekday();
    let weekend = power.filter_by_weekend();

    let mut line_items = Vec::new();
    let period_ids: BTreeSet<u32> = weekday_sched
        .period_ids()
        .union(&weekend_sched.period_ids())
        .copied()
        .collect();
    for period_id in period_ids {
        let weekday_mask = weekday_sched.mask(period_id);
        let weekend_mask = weekend_sched.mask(period_id);
        let peak = match (
            weekday.masked_peak(&weekday_mask)?,
            weekend.masked_peak(&weekend_mask)?,
        ) {
            (Some(weekday_peak), Some(weekend_peak)) => weekday_peak.max(weekend_peak),
            (Some(peak), None) | (None, Some(peak)) => peak,
            (None, None) => continue,
        };
        let matching_days =
            weekday.masked_days(&weekday_mask) + weekend.masked_days(&weekend_mask);
        let structure = rate_data
            .demand_structure(period_id)
            .ok_or_else(|| anyhow!("No demand rate structure for TOU period {period_id}"))?;
        let rate = structure
            .tiers
            .first()
            .ok_or_else(|| anyhow!("Demand rate structure for TOU period {period_id} has no tiers"))?
            .total_rate();
        line_items.push(ChargeLineItem {
            category: ChargeCategory::Demand,
            description: format!("period {period_id}"),
            count: peak * matching_days as f64 / days as f64,
            rate,
        });
    }
    Ok(line_items)
}

fn flat_demand_line_items(
    rate_data: &RateData,
    days: usize,
    power: &IntervalFrame,
) -> anyhow::Result<Vec<ChargeLineItem>> {
    let Some(month_ids) = rate_data.flat_demand_month_ids()? else {
        return Ok(Vec::new());
    };

    let mut line_items = Vec::new();
    let period_ids: BTreeSet<u32> = month_ids.iter().copied().collect();
    for period_id in period_ids {
        let months: BTreeSet<u32> = month_ids
            .iter()
            .enumerate()
            .filter(|(_, &id)| id == period_id)
            .map(|(month_idx, _)| month_idx as u32 + 1)
            .collect();
        let seasonal = power.filter_by_months(&months);
        if seasonal.is_empty() {
            continue;
        }
        let peak = seasonal
            .column(crate::core::interval_frame::POWER_COLUMN)
            .ok_or_else(|| anyhow!("Power series has no kw column"))?
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let structure = rate_data.flat_demand_structure(period_id).ok_or_else(|| {
            anyhow!("No flat demand rate structure for seasonal period {period_id}")
        })?;
        let rate = structure
            .tiers
            .first()
            .ok_or_else(|| {
                anyhow!("Flat demand rate structure for seasonal period {period_id} has no tiers")
            })?
            .total_rate();
        line_items.push(ChargeLineItem {
            category: ChargeCategory::FlatDemand,
            description: format!("period {period_id}"),
            count: peak * seasonal.days() as f64 / days as f64,
            rate,
        });
    }
    Ok(line_items)
}
