pub mod image;
pub mod source;
pub mod usage;
