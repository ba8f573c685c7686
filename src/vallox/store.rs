//! Last known Vallox state and initialization tracking.
use crate::device::{FieldDescriptor, FieldKind, FieldValue, Observed};
use std::time::Duration;
use tokio::time::Instant;

/// Both CO₂ halves must arrive within this window to form a reading.
pub const CO2_LIFETIME: Duration = Duration::from_millis(2000);

/// Role of a field in initialization tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Group {
    /// Status flags and configuration. Required for status initialization
    /// and part of its snapshot.
    Status,
    /// I/O flags of variable 08. Required, but not part of the snapshot.
    Io,
    /// Flags06 switch and program boost. Optional, part of the snapshot.
    Switch,
    /// Humidity and CO₂. Neither required nor part of the snapshot.
    Sensor,
    /// Required for (and gated on) temperature initialization.
    Temperature,
}

impl Group {
    pub fn gated_on_status(self) -> bool {
        !matches!(self, Group::Temperature)
    }

    pub fn required_for_status(self) -> bool {
        matches!(self, Group::Status | Group::Io)
    }

    /// Seeded to subscribers when status initialization completes.
    pub fn in_status_snapshot(self) -> bool {
        matches!(self, Group::Status | Group::Switch)
    }
}

/// Every published Vallox field, in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    IsOn,
    IsRhMode,
    IsHeatingMode,
    IsFilter,
    IsHeating,
    IsFault,
    IsServiceNeeded,
    IsSummerMode,
    IsErrorRelay,
    IsMotorIn,
    IsFrontHeating,
    IsMotorOut,
    IsExtraFunc,
    IsSwitchActive,
    IsBoostSetting,
    FanSpeed,
    DefaultFanSpeed,
    ServicePeriod,
    ServiceCounter,
    HeatingTarget,
    OutsideTemp,
    InsideTemp,
    ExhaustTemp,
    IncomingTemp,
    Rh1,
    Rh2,
    Co2,
}

struct FieldInfo {
    field: Field,
    group: Group,
    descriptor: FieldDescriptor,
}

const fn info(field: Field, group: Group, name: &'static str, kind: FieldKind, unit: &'static str, read_only: bool) -> FieldInfo {
    FieldInfo {
        field,
        group,
        descriptor: FieldDescriptor::new(name, kind, unit, read_only),
    }
}

use FieldKind::{Binary, Humidity, Number, Temperature};

#[rustfmt::skip]
const FIELDS: [FieldInfo; Field::COUNT] = [
    info(Field::IsOn, Group::Status, "is_on", Binary, "", false),
    info(Field::IsRhMode, Group::Status, "is_rh_mode", Binary, "", false),
    info(Field::IsHeatingMode, Group::Status, "is_heating_mode", Binary, "", false),
    info(Field::IsFilter, Group::Status, "is_filter", Binary, "", true),
    info(Field::IsHeating, Group::Status, "is_heating", Binary, "", true),
    info(Field::IsFault, Group::Status, "is_fault", Binary, "", true),
    info(Field::IsServiceNeeded, Group::Status, "is_service_needed", Binary, "", true),
    info(Field::IsSummerMode, Group::Io, "is_summer_mode", Binary, "", true),
    info(Field::IsErrorRelay, Group::Io, "is_error_relay", Binary, "", true),
    info(Field::IsMotorIn, Group::Io, "is_motor_in", Binary, "", true),
    info(Field::IsFrontHeating, Group::Io, "is_front_heating", Binary, "", true),
    info(Field::IsMotorOut, Group::Io, "is_motor_out", Binary, "", true),
    info(Field::IsExtraFunc, Group::Io, "is_extra_func", Binary, "", true),
    info(Field::IsSwitchActive, Group::Switch, "is_switch_active", Binary, "", false),
    info(Field::IsBoostSetting, Group::Switch, "is_boost_setting", Binary, "", true),
    info(Field::FanSpeed, Group::Status, "fan_speed", Number, "", false),
    info(Field::DefaultFanSpeed, Group::Status, "default_fan_speed", Number, "", false),
    info(Field::ServicePeriod, Group::Status, "service_period", Number, "months", false),
    info(Field::ServiceCounter, Group::Status, "service_counter", Number, "months", false),
    info(Field::HeatingTarget, Group::Status, "heating_target", Temperature, "°C", false),
    info(Field::OutsideTemp, Group::Temperature, "outside_temp", Temperature, "°C", true),
    info(Field::InsideTemp, Group::Temperature, "inside_temp", Temperature, "°C", true),
    info(Field::ExhaustTemp, Group::Temperature, "exhaust_temp", Temperature, "°C", true),
    info(Field::IncomingTemp, Group::Temperature, "incoming_temp", Temperature, "°C", true),
    info(Field::Rh1, Group::Sensor, "rh1", Humidity, "%", true),
    info(Field::Rh2, Group::Sensor, "rh2", Humidity, "%", true),
    info(Field::Co2, Group::Sensor, "co2", Number, "ppm", true),
];

impl Field {
    pub const COUNT: usize = 27;

    pub fn all() -> impl Iterator<Item = Field> {
        FIELDS.iter().map(|info| info.field)
    }

    pub fn from_name(name: &str) -> Option<Field> {
        FIELDS
            .iter()
            .find(|info| info.descriptor.name == name)
            .map(|info| info.field)
    }

    pub fn name(self) -> &'static str {
        self.info().descriptor.name
    }

    pub fn group(self) -> Group {
        self.info().group
    }

    pub fn descriptor(self) -> FieldDescriptor {
        self.info().descriptor
    }

    fn info(self) -> &'static FieldInfo {
        &FIELDS[self as usize]
    }
}

/// Full bytes kept to compute masked writes and composite values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Raw {
    Status,
    Variable08,
    Flags06,
    Program,
    Co2Hi,
    Co2Lo,
}

impl Raw {
    const COUNT: usize = 6;
}

#[derive(Clone, Copy, Debug, Default)]
struct RawByte {
    value: Option<u8>,
    last_received: Option<Instant>,
}

/// Completeness flags that turned true during one update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flipped {
    pub status: bool,
    pub temperature: bool,
}

/// Authoritative decoded state of one connected Vallox unit.
#[derive(Debug)]
pub struct Store {
    fields: [Observed; Field::COUNT],
    raw: [RawByte; Raw::COUNT],
    updated: Option<Instant>,
    status_initialized: bool,
    temperature_initialized: bool,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            fields: [Observed::default(); Field::COUNT],
            raw: [RawByte::default(); Raw::COUNT],
            updated: None,
            status_initialized: false,
            temperature_initialized: false,
        }
    }

    pub fn get(&self, field: Field) -> &Observed {
        &self.fields[field as usize]
    }

    pub fn value(&self, field: Field) -> FieldValue {
        self.get(field).value
    }

    pub fn is_received(&self, field: Field) -> bool {
        self.get(field).is_received()
    }

    pub fn mark_received(&mut self, field: Field, now: Instant) {
        self.fields[field as usize].last_received = Some(now);
    }

    /// Store a value. Returns true when it differs from the previous one.
    pub fn set(&mut self, field: Field, value: FieldValue, now: Instant) -> bool {
        let slot = &mut self.fields[field as usize];
        if slot.value == value {
            return false;
        }
        slot.value = value;
        self.updated = Some(now);
        true
    }

    pub fn raw(&self, raw: Raw) -> Option<u8> {
        self.raw[raw as usize].value
    }

    pub fn raw_received_at(&self, raw: Raw) -> Option<Instant> {
        self.raw[raw as usize].last_received
    }

    pub fn set_raw(&mut self, raw: Raw, value: u8, now: Instant) {
        self.raw[raw as usize] = RawByte {
            value: Some(value),
            last_received: Some(now),
        };
    }

    /// Combined CO₂ reading, if both halves arrived close enough together.
    pub fn co2_composite(&self) -> Option<i32> {
        let hi = self.raw[Raw::Co2Hi as usize];
        let lo = self.raw[Raw::Co2Lo as usize];
        let (hi_at, lo_at) = (hi.last_received?, lo.last_received?);
        let gap = if hi_at > lo_at { hi_at - lo_at } else { lo_at - hi_at };
        if gap >= CO2_LIFETIME {
            return None;
        }
        Some(lo.value? as i32 + ((hi.value? as i32) << 8))
    }

    /// Time of the last value change.
    pub fn updated(&self) -> Option<Instant> {
        self.updated
    }

    pub fn is_status_initialized(&self) -> bool {
        self.status_initialized
    }

    pub fn is_temperature_initialized(&self) -> bool {
        self.temperature_initialized
    }

    /// Whether notifications for `field` may be emitted.
    pub fn is_open(&self, field: Field) -> bool {
        if field.group().gated_on_status() {
            self.status_initialized
        } else {
            self.temperature_initialized
        }
    }

    /// Re-evaluate both flags. They never go back to false.
    pub fn refresh_completeness(&mut self) -> Flipped {
        let mut flipped = Flipped::default();
        if !self.status_initialized && self.all_received(Group::required_for_status) {
            self.status_initialized = true;
            flipped.status = true;
        }
        if !self.temperature_initialized && self.all_received(|group| group == Group::Temperature) {
            self.temperature_initialized = true;
            flipped.temperature = true;
        }
        flipped
    }

    fn all_received(&self, select: impl Fn(Group) -> bool) -> bool {
        Field::all()
            .filter(|f| select(f.group()))
            .all(|f| self.is_received(f))
    }
}
