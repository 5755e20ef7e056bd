pub mod core;
pub mod errors;

pub use crate::core::billing::{compute_bill, Bill, BillingCollection, RateData};
pub use crate::core::der::{
    AggregateDerProduct, Der, DerDirector, DerProduct, DerSimulationBuilder,
};
pub use crate::core::frame288::Frame288;
pub use crate::core::interval_frame::{AggFunc, IntervalFrame};
pub use crate::core::optimization::optimize_schedule;
