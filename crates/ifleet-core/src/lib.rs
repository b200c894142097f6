pub mod batch;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod monitor;
pub mod retry;

pub use error::{FleetError, Result};
