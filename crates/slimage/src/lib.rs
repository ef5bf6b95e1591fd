#[macro_use]
extern crate log;

pub mod application;
pub mod domain;
pub mod infrastructure;
#[cfg(feature = "server")]
pub mod presentation;
