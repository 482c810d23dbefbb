//! Wire models for the Globalping API

mod limits;
mod measurement;

pub use limits::*;
pub use measurement::*;
