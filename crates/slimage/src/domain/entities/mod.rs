pub mod image;
pub mod request;
pub mod size;
