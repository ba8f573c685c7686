//! Measure point tables, as found in the controllers' XML configuration.
use crate::device::{FieldDescriptor, FieldKind, FieldValue};

/// How the raw integer of a point is interpreted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointKind {
    /// `raw / divisor`.
    Numeric { divisor: f64 },
    /// `raw & mask != 0`.
    Binary { mask: i32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasurePoint {
    pub field: FieldDescriptor,
    pub command: u16,
    /// First data byte after the command echo.
    pub start: usize,
    /// Last data byte, inclusive.
    pub end: usize,
    pub kind: PointKind,
}

impl MeasurePoint {
    pub fn parse(&self, raw: i32) -> FieldValue {
        match self.kind {
            PointKind::Numeric { divisor } => FieldValue::Float(raw as f64 / divisor),
            PointKind::Binary { mask } => FieldValue::Bool(raw & mask != 0),
        }
    }
}

const fn numeric(
    name: &'static str,
    kind: FieldKind,
    unit: &'static str,
    command: u16,
    start: usize,
    end: usize,
    divisor: f64,
) -> MeasurePoint {
    MeasurePoint {
        field: FieldDescriptor::new(name, kind, unit, true),
        command,
        start,
        end,
        kind: PointKind::Numeric { divisor },
    }
}

const fn binary(name: &'static str, command: u16, mask: i32) -> MeasurePoint {
    MeasurePoint {
        field: FieldDescriptor::new(name, FieldKind::Binary, "", true),
        command,
        start: 0,
        end: 1,
        kind: PointKind::Binary { mask },
    }
}

use FieldKind::{Number, Temperature};

#[rustfmt::skip]
pub const EH203: &[MeasurePoint] = &[
    // Analog measurements
    numeric("outdoor_temperature", Temperature, "°C", 18, 0, 1, 100.0),
    numeric("h1_supply_temperature", Temperature, "°C", 20, 0, 1, 100.0),
    numeric("h1_room_temperature", Temperature, "°C", 21, 0, 1, 100.0),
    numeric("h1_return_temperature", Temperature, "°C", 23, 0, 1, 100.0),
    numeric("h2_supply_temperature", Temperature, "°C", 26, 0, 1, 100.0),
    numeric("measurement_6", Number, "°C", 27, 0, 1, 100.0),
    numeric("hw_supply_temperature", Temperature, "°C", 24, 0, 1, 100.0),
    numeric("hw_circulation_temperature", Temperature, "°C", 25, 0, 1, 100.0),
    numeric("measurement_9", Number, "°C", 33, 0, 1, 100.0),
    numeric("measurement_10", Number, "°C", 34, 0, 1, 100.0),
    numeric("measurement_11", Number, "°C", 41, 0, 1, 100.0),
    // Digital inputs
    binary("digital_input1", 45, 1),
    binary("digital_input2", 45, 2),
    binary("digital_input3", 45, 4),
    // Relays
    binary("relay1", 45, 8),
    binary("relay2", 45, 16),
    // Valve positions
    numeric("h1_valve_position", Number, "%", 49, 0, 0, 1.0),
    numeric("h2_valve_position", Number, "%", 50, 0, 0, 1.0),
    numeric("hw_valve_position", Number, "%", 51, 0, 0, 1.0),
    // Setpoints
    numeric("h1_room_setpoint", Temperature, "°C", 13, 1, 2, 10.0),
    numeric("h2_room_setpoint", Temperature, "°C", 13, 11, 12, 10.0),
    numeric("hw_supply_setpoint", Temperature, "°C", 15, 15, 15, 1.0),
    // Energy
    numeric("peak_power", Number, "kW", 60, 0, 3, 1.0),
    numeric("peak_flow", Number, "m3", 61, 0, 3, 100.0),
    numeric("hw_energy", Number, "kWh", 63, 0, 3, 1.0),
    numeric("hw_water", Number, "m3", 64, 0, 3, 100.0),
];
