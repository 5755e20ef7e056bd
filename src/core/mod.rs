pub mod billing;
pub mod der;
pub mod frame288;
pub mod interval_frame;
pub mod optimization;
pub mod units;
