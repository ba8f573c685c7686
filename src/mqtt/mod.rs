mod connection;
mod message;

pub use connection::{Broker, Initiator, Publisher};
pub use message::{Incoming, Outgoing};

/// Common prefix of all topics of one device.
pub fn device_prefix(root: &str, device_id: &str) -> String {
    format!("{}/{}", root, device_id)
}

/// Topic a field's state is published to.
pub fn state_topic(prefix: &str, field: &str) -> String {
    format!("{}/{}", prefix, field)
}

/// Topic commands for a writable field arrive on.
pub fn command_topic(prefix: &str, field: &str) -> String {
    format!("{}/set", state_topic(prefix, field))
}

/// Field name addressed by a command topic under `prefix` (`{root}/{id}`).
pub fn parse_command_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let field = rest.strip_suffix("/set")?;
    if field.is_empty() || field.contains('/') {
        return None;
    }
    Some(field)
}
