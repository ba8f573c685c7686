//! Vallox Digit SE ventilation units on the RS-485 panel bus.
pub mod convert;
mod device;
pub mod protocol;
pub mod registry;
pub mod store;

pub use device::{SwitchType, Vallox, HEATING_TARGET_RANGE, QUERY_INTERVAL, RETRY_INTERVAL};
pub use store::{Field, Group};
