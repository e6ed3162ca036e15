//! Storage module for hopwatch.
//!
//! SQLite-backed targets and record sink, plus the time-pruned history log.

mod history;
mod models;
mod store;

pub use history::*;
pub use models::*;
pub use store::*;

#[cfg(test)]
pub(crate) use history::testing;
