use std::time::Duration;

/// Software version
pub const GATE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GATE_NAME: &str = "hvac-gate";

/// Value published for fields that were never decoded (or decoded as
/// out-of-range, eg. a disconnected humidity sensor).
pub const NOT_SET: i32 = -999;

/// Delay after writing a read request. Devices need time before an answer
/// appears on the line.
pub const REQUEST_SETTLE: Duration = Duration::from_millis(100);

/// Upper bound for a single read while draining the port.
pub const READ_TIMEOUT: Duration = Duration::from_millis(50);

pub const VALLOX_ROOT_TOPIC: &str = "ventilation";
pub const VALLOX_BAUD_RATE: u32 = 9600;

pub const OUMAN_ROOT_TOPIC: &str = "heating_controls";
pub const OUMAN_BAUD_RATE: u32 = 4800;
pub const OUMAN_POLL_INTERVAL: Duration = Duration::from_millis(1000);
