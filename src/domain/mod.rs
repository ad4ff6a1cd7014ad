//! Domain layer: models, error taxonomy, and capability ports.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{KernelError, KernelResult};
