pub mod cors;
pub mod tracing;

pub use cors::*;
pub use tracing::*;
