//! Analysis of retained history: drift against past snapshots and
//! bucketed trend series for charts.

mod drift;
mod trends;

pub use drift::*;
pub use trends::*;
