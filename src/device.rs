//! Device-independent field model shared by the protocol engines and the bus
//! bridge.
//!
//! Every device type declares a static list of [`FieldDescriptor`]s. The
//! bridge iterates that list to derive topics and route commands; engines
//! report changes through a [`ChangeCallback`] and never talk to the bus.

use crate::comm::Direction;
use crate::consts::NOT_SET;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

/// What a field measures. Drives unit handling on the bus side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Binary,
    Temperature,
    Humidity,
    Number,
}

/// Static description of one published field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub unit: &'static str,
    pub read_only: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, kind: FieldKind, unit: &'static str, read_only: bool) -> Self {
        Self {
            name,
            kind,
            unit,
            read_only,
        }
    }
}

/// Decoded value of a field.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum FieldValue {
    /// Never decoded, or decoded from an out-of-range byte.
    #[default]
    Unset,
    Bool(bool),
    Int(i32),
    Float(f64),
}

impl FieldValue {
    pub fn is_set(&self) -> bool {
        !matches!(self, FieldValue::Unset)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// JSON text published on the bus.
    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| NOT_SET.to_string())
    }
}

impl From<Option<i32>> for FieldValue {
    fn from(value: Option<i32>) -> Self {
        value.map_or(FieldValue::Unset, FieldValue::Int)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Unset => serializer.serialize_i32(NOT_SET),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(v) => serializer.serialize_i32(*v),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
        }
    }
}

/// Last known value plus the time it was last decoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct Observed {
    pub value: FieldValue,
    pub last_received: Option<Instant>,
}

impl Observed {
    pub fn is_received(&self) -> bool {
        self.last_received.is_some()
    }
}

/// Called with the field name and its new value.
pub type ChangeCallback = Box<dyn FnMut(&'static str, FieldValue) + Send>;

/// Diagnostic hook for every raw frame read or written.
pub type PacketCallback = Box<dyn FnMut(&[u8], Direction) + Send>;

/// Optional callbacks registered on an engine.
#[derive(Default)]
pub struct Hooks {
    on_change: Option<ChangeCallback>,
    on_packet: Option<PacketCallback>,
}

impl Hooks {
    pub fn set_change(&mut self, callback: ChangeCallback) {
        self.on_change = Some(callback);
    }

    pub fn set_packet(&mut self, callback: PacketCallback) {
        self.on_packet = Some(callback);
    }

    pub fn changed(&mut self, name: &'static str, value: FieldValue) {
        if let Some(callback) = self.on_change.as_mut() {
            callback(name, value);
        }
    }

    pub fn packet(&mut self, raw: &[u8], direction: Direction) {
        if let Some(callback) = self.on_packet.as_mut() {
            callback(raw, direction);
        }
    }
}

/// Interpret a bus command payload as a switch state.
pub fn parse_switch(payload: &str) -> Option<bool> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Interpret a bus command payload as an integer. Accepts `21` and `21.0`.
pub fn parse_int(payload: &str) -> Option<i32> {
    let payload = payload.trim();
    if let Ok(value) = payload.parse::<i32>() {
        return Some(value);
    }
    let value = payload.parse::<f64>().ok()?;
    if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}

/// A device driven by the bridge.
#[allow(async_fn_in_trait)]
pub trait Device {
    /// Model name, for logs.
    fn name(&self) -> &'static str;

    fn descriptors(&self) -> Vec<FieldDescriptor>;

    /// Current value of a field by name. Unknown names read as unset.
    fn value(&self, field: &str) -> FieldValue;

    fn is_initialized(&self) -> bool;

    fn on_change(&mut self, callback: ChangeCallback);

    fn on_packet(&mut self, callback: PacketCallback);

    /// One cooperative polling step.
    async fn tick(&mut self) -> anyhow::Result<()>;

    /// Apply a command received from the bus. `Ok(false)` when it was
    /// rejected or had no effect.
    async fn command(&mut self, field: &str, payload: &str) -> anyhow::Result<bool>;
}
