pub mod battery;
pub mod evse;
pub mod fuel_switching;
pub mod solar;

use crate::core::interval_frame::{IntervalFrame, POWER_COLUMN, THERMS_COLUMN};
use crate::errors::{DerError, InvalidSequenceError};
use anyhow::{anyhow, bail};
use chrono::{NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use rayon::prelude::*;

pub use battery::{Battery, BatteryOperator, BatteryStrategy};
pub use evse::{EvseFleet, EvseOperator, EvseStrategy};
pub use fuel_switching::{FuelSwitchEquipment, FuelSwitchOperator, FuelSwitchStrategy};
pub use solar::{SolarArray, SolarOperator, SolarShape};

/// One step of metered load presented to a device operator.
#[derive(Clone, Copy, Debug)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub duration: TimeDelta,
    pub load_kw: f64,
    /// Gas consumed over the interval, where the meter records it.
    pub therms: Option<f64>,
}

/// The per-interval capability a device/strategy pairing supplies to the
/// simulation builder. Implementations must derive the row purely from the
/// interval and the accumulated state so the run can be written as a fold.
pub trait DerOperator {
    /// Column layout of the rows this operator produces. The first column
    /// is always the device's net power in kW.
    fn columns(&self) -> &'static [&'static str];

    /// Computes the device's row for one real interval: ask the strategy
    /// for a target power, clamp it against the device's physical limits
    /// given the current stored state, and return the resulting power plus
    /// any auxiliary state columns.
    fn operate(&self, interval: &Interval, state: &SimulationState) -> anyhow::Result<Vec<f64>>;

    /// Row synthesized to fill a gap in the input: no device action, state
    /// carried forward.
    fn noop(&self, state: &SimulationState) -> Vec<f64>;

    /// Hook invoked once before a run, letting an operator inspect the
    /// meter series for optional inputs.
    fn check_meter(&self, _meter: &IntervalFrame) -> anyhow::Result<()> {
        Ok(())
    }

    /// Combines the pre-DER series and the device-effect series into the
    /// post-DER series.
    fn finalize(&self, pre: &IntervalFrame, effect: &IntervalFrame) -> anyhow::Result<IntervalFrame> {
        pre.add(effect)
    }
}

/// The closed set of device/strategy pairings the simulation dispatches
/// over.
#[derive(Clone, Debug)]
pub enum Der {
    Battery(BatteryOperator),
    Evse(EvseOperator),
    Solar(SolarOperator),
    FuelSwitch(FuelSwitchOperator),
}

impl DerOperator for Der {
    fn columns(&self) -> &'static [&'static str] {
        match self {
            Der::Battery(operator) => operator.columns(),
            Der::Evse(operator) => operator.columns(),
            Der::Solar(operator) => operator.columns(),
            Der::FuelSwitch(operator) => operator.columns(),
        }
    }

    fn operate(&self, interval: &Interval, state: &SimulationState) -> anyhow::Result<Vec<f64>> {
        match self {
            Der::Battery(operator) => operator.operate(interval, state),
            Der::Evse(operator) => operator.operate(interval, state),
            Der::Solar(operator) => operator.operate(interval, state),
            Der::FuelSwitch(operator) => operator.operate(interval, state),
        }
    }

    fn noop(&self, state: &SimulationState) -> Vec<f64> {
        match self {
            Der::Battery(operator) => operator.noop(state),
            Der::Evse(operator) => operator.noop(state),
            Der::Solar(operator) => operator.noop(state),
            Der::FuelSwitch(operator) => operator.noop(state),
        }
    }

    fn check_meter(&self, meter: &IntervalFrame) -> anyhow::Result<()> {
        match self {
            Der::Battery(operator) => operator.check_meter(meter),
            Der::Evse(operator) => operator.check_meter(meter),
            Der::Solar(operator) => operator.check_meter(meter),
            Der::FuelSwitch(operator) => operator.check_meter(meter),
        }
    }

    fn finalize(&self, pre: &IntervalFrame, effect: &IntervalFrame) -> anyhow::Result<IntervalFrame> {
        match self {
            Der::Battery(operator) => operator.finalize(pre, effect),
            Der::Evse(operator) => operator.finalize(pre, effect),
            Der::Solar(operator) => operator.finalize(pre, effect),
            Der::FuelSwitch(operator) => operator.finalize(pre, effect),
        }
    }
}

/// The device-effect series under construction, one row per interval.
/// Mutable while the builder steps, converted into an immutable
/// [`IntervalFrame`] when the run completes.
#[derive(Clone, Debug)]
pub struct SimulationState {
    columns: Vec<&'static str>,
    index: Vec<NaiveDateTime>,
    values: Vec<Vec<f64>>,
}

impl SimulationState {
    pub fn new(columns: &'static [&'static str]) -> Self {
        Self {
            columns: columns.to_vec(),
            index: Vec::new(),
            values: vec![Vec::new(); columns.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Latest value of the named column, used by operators for state
    /// continuity (current charge, remaining capacity).
    pub fn latest(&self, column: &str) -> Option<f64> {
        let position = self.columns.iter().position(|name| *name == column)?;
        self.values[position].last().copied()
    }

    fn push(&mut self, timestamp: NaiveDateTime, row: Vec<f64>) -> anyhow::Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "Operator produced {} values for {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.index.push(timestamp);
        for (column, value) in self.values.iter_mut().zip(row) {
            column.push(value);
        }
        Ok(())
    }

    fn into_frame(self) -> anyhow::Result<IntervalFrame> {
        IntervalFrame::new(
            self.index,
            self.columns
                .into_iter()
                .map(str::to_string)
                .zip(self.values)
                .collect(),
        )
    }
}

/// The result bundle of one device simulation against one meter's load.
#[derive(Clone, Debug, PartialEq)]
pub struct DerProduct {
    pub pre: IntervalFrame,
    pub effect: IntervalFrame,
    pub post: IntervalFrame,
}

impl DerProduct {
    /// Sums all three series with another product computed over the same
    /// meter. Both products must cover the same meter at the same period,
    /// or periods that align through resampling - the intended use is
    /// stacking devices simulated on one load (e.g. solar then battery).
    pub fn combine(&self, other: &DerProduct) -> anyhow::Result<DerProduct> {
        Ok(DerProduct {
            pre: self.pre.add(&other.pre)?,
            effect: self.effect.add(&other.effect)?,
            post: self.post.add(&other.post)?,
        })
    }
}

/// Per-meter DER products keyed by meter id, plus the isolated failures of
/// a batch run. Composition is a pure fold over frame addition, so merge
/// order does not affect results beyond floating-point rounding.
#[derive(Clone, Debug, Default)]
pub struct AggregateDerProduct {
    products: IndexMap<String, DerProduct>,
    failures: IndexMap<String, String>,
}

impl AggregateDerProduct {
    pub fn from_products(products: IndexMap<String, DerProduct>) -> Self {
        Self {
            products,
            failures: IndexMap::new(),
        }
    }

    pub fn insert_product(&mut self, meter_id: impl Into<String>, product: DerProduct) {
        self.products.insert(meter_id.into(), product);
    }

    pub fn insert_failure(&mut self, meter_id: impl Into<String>, reason: impl Into<String>) {
        self.failures.insert(meter_id.into(), reason.into());
    }

    pub fn products(&self) -> &IndexMap<String, DerProduct> {
        &self.products
    }

    pub fn product(&self, meter_id: &str) -> Option<&DerProduct> {
        self.products.get(meter_id)
    }

    /// Meter ids whose simulation failed, with the reason, without
    /// affecting sibling meters.
    pub fn failures(&self) -> &IndexMap<String, String> {
        &self.failures
    }

    pub fn pre_total(&self) -> anyhow::Result<IntervalFrame> {
        self.total(|product| &product.pre)
    }

    pub fn effect_total(&self) -> anyhow::Result<IntervalFrame> {
        self.total(|product| &product.effect)
    }

    pub fn post_total(&self) -> anyhow::Result<IntervalFrame> {
        self.total(|product| &product.post)
    }

    fn total(
        &self,
        series: impl Fn(&DerProduct) -> &IntervalFrame,
    ) -> anyhow::Result<IntervalFrame> {
        let mut folded = IntervalFrame::empty();
        for product in self.products.values() {
            folded = folded.add(series(product))?;
        }
        Ok(folded)
    }

    /// Merges two aggregates. Distinct meter ids are unioned; a meter id
    /// present on both sides has its products combined series-by-series
    /// (see [`DerProduct::combine`]). Failure maps are concatenated.
    pub fn combine(&self, other: &AggregateDerProduct) -> anyhow::Result<AggregateDerProduct> {
        let mut combined = self.clone();
        for (meter_id, product) in &other.products {
            let merged = match combined.products.get(meter_id) {
                Some(existing) => existing.combine(product)?,
                None => product.clone(),
            };
            combined.products.insert(meter_id.clone(), merged);
        }
        for (meter_id, reason) in &other.failures {
            combined.failures.insert(meter_id.clone(), reason.clone());
        }
        Ok(combined)
    }
}

/// Steps a device operator across one meter's series in increasing
/// timestamp order, synthesizing no-op rows over gaps, and packages the
/// pre/effect/post series into a [`DerProduct`].
#[derive(Clone, Debug)]
pub struct DerSimulationBuilder<O: DerOperator> {
    operator: O,
}

impl<O: DerOperator> DerSimulationBuilder<O> {
    pub fn new(operator: O) -> Self {
        Self { operator }
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn run(&self, meter: &IntervalFrame) -> anyhow::Result<DerProduct> {
        self.operator.check_meter(meter)?;
        let period = meter.period()?;
        let loads = meter
            .column(POWER_COLUMN)
            .ok_or_else(|| anyhow!("Meter series has no {POWER_COLUMN} column"))?;
        let therms = meter.column(THERMS_COLUMN);

        let mut state = SimulationState::new(self.operator.columns());
        let mut previous: Option<NaiveDateTime> = None;
        for (row_id, &start) in meter.index().iter().enumerate() {
            if let Some(previous) = previous {
                let delta = start - previous;
                if delta < TimeDelta::zero() {
                    return Err(InvalidSequenceError {
                        previous,
                        next: start,
                    }
                    .into());
                }
                if delta == TimeDelta::zero() {
                    // a zero-length interval is a no-op, not an error
                    continue;
                }
                let mut cursor = previous + period;
                while cursor < start {
                    let row = self.operator.noop(&state);
                    state.push(cursor, row)?;
                    cursor += period;
                }
            }
            let interval = Interval {
                start,
                duration: period,
                load_kw: loads[row_id],
                therms: therms.map(|column| column[row_id]),
            };
            let row = self.operator.operate(&interval, &state)?;
            state.push(start, row)?;
            previous = Some(start);
        }

        let effect = state.into_frame()?;
        let post = self.operator.finalize(meter, &effect)?;
        Ok(DerProduct {
            pre: meter.clone(),
            effect,
            post,
        })
    }
}

/// Fans a builder out over independent meters. Each meter's simulation is
/// sequential internally; across meters there is no shared mutable state,
/// so the parallel path dispatches per meter with no locking.
#[derive(Clone, Debug)]
pub struct DerDirector<O: DerOperator> {
    builder: DerSimulationBuilder<O>,
}

impl<O: DerOperator + Sync> DerDirector<O> {
    pub fn new(operator: O) -> Self {
        Self {
            builder: DerSimulationBuilder::new(operator),
        }
    }

    pub fn run_single(&self, meter: &IntervalFrame) -> Result<DerProduct, DerError> {
        self.builder.run(meter).map_err(DerError::from)
    }

    /// Runs every meter, isolating failures: one meter's error is reported
    /// in the aggregate without aborting its siblings.
    pub fn run_many(
        &self,
        meters: &IndexMap<String, IntervalFrame>,
        parallel: bool,
    ) -> AggregateDerProduct {
        let entries: Vec<(&String, &IntervalFrame)> = meters.iter().collect();
        let results: Vec<(String, anyhow::Result<DerProduct>)> = if parallel {
            entries
                .par_iter()
                .map(|(meter_id, meter)| ((*meter_id).clone(), self.builder.run(meter)))
                .collect()
        } else {
            entries
                .iter()
                .map(|(meter_id, meter)| ((*meter_id).clone(), self.builder.run(meter)))
                .collect()
        };

        let mut aggregate = AggregateDerProduct::default();
        for (meter_id, result) in results {
            match result {
                Ok(product) => aggregate.insert_product(meter_id, product),
                Err(error) => aggregate.insert_failure(meter_id, format!("{error:#}")),
            }
        }
        aggregate
    }
}
