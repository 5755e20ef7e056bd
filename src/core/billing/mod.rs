pub mod bill;
pub mod rate_data;

pub use bill::{compute_bill, Bill, BillingCollection, ChargeCategory, ChargeLineItem};
pub use rate_data::{FixedRateUnit, KeyVal, RateData, RateStructure, RateTier, TouKey};
