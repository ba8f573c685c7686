//! Vallox variable table: which variable updates which fields, and how.
use super::convert;
use super::protocol::{flags06, io08, program, status, var};
use super::store::{Field, Raw, Store};
use crate::device::FieldValue;

/// How a received byte becomes field values.
#[derive(Clone, Copy, Debug)]
pub enum Rule {
    /// One field, one decoder.
    Scalar(Field, fn(u8) -> FieldValue),
    /// A byte of flags fanned out to several boolean fields. The full byte is
    /// kept as shadow.
    Flags(Raw, &'static [(Field, u8)]),
    /// Half of the CO₂ reading.
    Co2(Raw),
}

#[derive(Clone, Copy, Debug)]
pub struct Variable {
    pub id: u8,
    pub rule: Rule,
}

pub const STATUS_FLAGS: &[(Field, u8)] = &[
    (Field::IsOn, status::POWER),
    (Field::IsRhMode, status::RH),
    (Field::IsHeatingMode, status::HEATING_MODE),
    (Field::IsFilter, status::FILTER),
    (Field::IsHeating, status::HEATING),
    (Field::IsFault, status::FAULT),
    (Field::IsServiceNeeded, status::SERVICE),
];

pub const IO08_FLAGS: &[(Field, u8)] = &[
    (Field::IsSummerMode, io08::SUMMER_MODE),
    (Field::IsErrorRelay, io08::ERROR_RELAY),
    (Field::IsMotorIn, io08::MOTOR_IN),
    (Field::IsFrontHeating, io08::FRONT_HEATING),
    (Field::IsMotorOut, io08::MOTOR_OUT),
    (Field::IsExtraFunc, io08::EXTRA_FUNC),
];

pub const FLAGS06_FLAGS: &[(Field, u8)] = &[(Field::IsSwitchActive, flags06::SWITCH_ACTIVE)];

pub const PROGRAM_FLAGS: &[(Field, u8)] = &[(Field::IsBoostSetting, program::SWITCH_TYPE)];

fn temperature(value: u8) -> FieldValue {
    FieldValue::Int(convert::ntc_to_celsius(value))
}

fn humidity(value: u8) -> FieldValue {
    convert::hex_to_rh(value).into()
}

fn fan_speed(value: u8) -> FieldValue {
    convert::hex_to_fan_speed(value).into()
}

fn plain(value: u8) -> FieldValue {
    FieldValue::Int(value as i32)
}

const fn scalar(id: u8, field: Field, decode: fn(u8) -> FieldValue) -> Variable {
    Variable {
        id,
        rule: Rule::Scalar(field, decode),
    }
}

const fn flags(id: u8, raw: Raw, fields: &'static [(Field, u8)]) -> Variable {
    Variable {
        id,
        rule: Rule::Flags(raw, fields),
    }
}

pub const VARIABLES: &[Variable] = &[
    flags(var::STATUS, Raw::Status, STATUS_FLAGS),
    flags(var::IO_08, Raw::Variable08, IO08_FLAGS),
    flags(var::FLAGS_06, Raw::Flags06, FLAGS06_FLAGS),
    flags(var::PROGRAM, Raw::Program, PROGRAM_FLAGS),
    scalar(var::FAN_SPEED, Field::FanSpeed, fan_speed),
    scalar(var::DEFAULT_FAN_SPEED, Field::DefaultFanSpeed, fan_speed),
    scalar(var::SERVICE_PERIOD, Field::ServicePeriod, plain),
    scalar(var::SERVICE_COUNTER, Field::ServiceCounter, plain),
    scalar(var::HEATING_TARGET, Field::HeatingTarget, temperature),
    scalar(var::T_OUTSIDE, Field::OutsideTemp, temperature),
    scalar(var::T_INSIDE, Field::InsideTemp, temperature),
    scalar(var::T_EXHAUST, Field::ExhaustTemp, temperature),
    scalar(var::T_INCOMING, Field::IncomingTemp, temperature),
    scalar(var::RH1, Field::Rh1, humidity),
    scalar(var::RH2, Field::Rh2, humidity),
    Variable {
        id: var::CO2_HI,
        rule: Rule::Co2(Raw::Co2Hi),
    },
    Variable {
        id: var::CO2_LO,
        rule: Rule::Co2(Raw::Co2Lo),
    },
];

/// Requested on connect, in this order.
pub const INITIAL_REQUESTS: &[u8] = &[
    var::STATUS,
    var::IO_08,
    var::FAN_SPEED,
    var::DEFAULT_FAN_SPEED,
    var::RH1,
    var::SERVICE_PERIOD,
    var::SERVICE_COUNTER,
    var::HEATING_TARGET,
    var::FLAGS_06,
    var::PROGRAM,
];

/// Slowly changing values refreshed every query interval.
pub const PERIODIC_REQUESTS: &[u8] = &[var::IO_08, var::SERVICE_COUNTER];

pub fn lookup(id: u8) -> Option<&'static Variable> {
    VARIABLES.iter().find(|v| v.id == id)
}

impl Variable {
    /// Whether this variable was ever received on the current connection.
    pub fn is_received(&self, store: &Store) -> bool {
        match self.rule {
            Rule::Scalar(field, _) => store.is_received(field),
            Rule::Flags(raw, _) | Rule::Co2(raw) => store.raw_received_at(raw).is_some(),
        }
    }
}

/// Decode the boolean fields carried by one flags byte.
pub fn fan_out(byte: u8, fields: &'static [(Field, u8)]) -> impl Iterator<Item = (Field, FieldValue)> {
    fields
        .iter()
        .map(move |(field, mask)| (*field, FieldValue::Bool(byte & mask != 0)))
}
