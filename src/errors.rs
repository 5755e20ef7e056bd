use chrono::{NaiveDateTime, TimeDelta};
use thiserror::Error;

/// A device or strategy parameter was outside its physical range. Raised
/// eagerly at construction time; values are never silently clamped.
#[derive(Clone, Debug, Error)]
#[error("Validation failed: {0}")]
pub struct ValidationError(String);

impl ValidationError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        ValidationError(message.into())
    }
}

/// A computed operating power would fall outside a device's rated range.
/// Indicates bad input data or a device/strategy mismatch and aborts the
/// meter's simulation.
#[derive(Clone, Copy, Debug, Error)]
#[error("A power of {power}kW is outside the operating range [-{rating}kW, {rating}kW]")]
pub struct PowerOutOfRangeError {
    pub power: f64,
    pub rating: f64,
}

/// A computed stored energy would fall outside a device's capacity range.
#[derive(Clone, Copy, Debug, Error)]
#[error("A stored energy of {charge}kWh is outside the range [0kWh, {capacity}kWh]")]
pub struct ChargeOutOfRangeError {
    pub charge: f64,
    pub capacity: f64,
}

/// An interval series had more than one modal spacing between consecutive
/// timestamps. The caller must resample to a single period first.
#[derive(Clone, Debug, Error)]
#[error("More than one interval length was found in series: {modes:?}")]
pub struct MixedPeriodError {
    pub modes: Vec<TimeDelta>,
}

/// Timestamps in an interval series were reversed where an increase was
/// required. Fatal for the meter concerned.
#[derive(Clone, Copy, Debug, Error)]
#[error("Timestamps must increase: {previous} was followed by {next}")]
pub struct InvalidSequenceError {
    pub previous: NaiveDateTime,
    pub next: NaiveDateTime,
}

/// Union of the errors a DER simulation or billing run can surface to a
/// caller dispatching many meters.
#[derive(Debug, Error)]
pub enum DerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    PowerOutOfRange(#[from] PowerOutOfRangeError),
    #[error(transparent)]
    ChargeOutOfRange(#[from] ChargeOutOfRangeError),
    #[error(transparent)]
    MixedPeriod(#[from] MixedPeriodError),
    #[error(transparent)]
    InvalidSequence(#[from] InvalidSequenceError),
    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for DerError {
    /// Recovers the typed error kind from an `anyhow` chain, so callers
    /// dispatching many meters can match on what went wrong.
    fn from(error: anyhow::Error) -> Self {
        let error = match error.downcast::<ValidationError>() {
            Ok(typed) => return typed.into(),
            Err(error) => error,
        };
        let error = match error.downcast::<PowerOutOfRangeError>() {
            Ok(typed) => return typed.into(),
            Err(error) => error,
        };
        let error = match error.downcast::<ChargeOutOfRangeError>() {
            Ok(typed) => return typed.into(),
            Err(error) => error,
        };
        let error = match error.downcast::<MixedPeriodError>() {
            Ok(typed) => return typed.into(),
            Err(error) => error,
        };
        let error = match error.downcast::<InvalidSequenceError>() {
            Ok(typed) => return typed.into(),
            Err(error) => error,
        };
        DerError::Other(error)
    }
}
