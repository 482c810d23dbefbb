//! Globalping measurement API

pub mod cache;
pub mod client;
pub mod error;
pub mod limits;

pub use client::{ClientConfig, GlobalpingClient};
pub use error::{MeasurementError, MeasurementErrorKind};
