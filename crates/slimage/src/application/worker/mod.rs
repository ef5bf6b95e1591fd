pub mod pool;
pub mod transform;

pub use pool::{WorkerError, WorkerPool};
pub use transform::{Pipeline, ResizeTransformer, TransformError, Transformer};
