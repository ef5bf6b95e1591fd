pub mod fetcher;
pub mod usage;
