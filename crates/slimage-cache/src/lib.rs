//! Keyed byte cache shared by the slimage request pipeline.
//!
//! A [`Group`] owns a byte budget and a [`Getter`] that fills missing keys.
//! Concurrent lookups of the same missing key share one fill.

#[macro_use]
extern crate log;

mod group;
mod stats;
mod store;

pub use group::{Getter, Group, GroupError};
pub use stats::CacheStats;

/// Number of bytes in one megabyte, used when budgets are configured in MB.
pub const MEGABYTE: usize = 1 << 20;
