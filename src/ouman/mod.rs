//! Ouman heating controllers.
mod device;
pub mod points;
pub mod protocol;

pub use device::{Ouman, CONNECT_SETTLE, RESPONSE_TIMEOUT};
