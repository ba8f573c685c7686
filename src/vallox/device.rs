use super::convert;
use super::protocol::{addr, flags06, status, var, Frame, FrameReader, FRAME_LEN};
use super::registry::{self, Rule};
use super::store::{Field, Raw, Store};
use crate::comm::{self, Direction, Transport};
use crate::consts::REQUEST_SETTLE;
use crate::device::{
    parse_int, parse_switch, ChangeCallback, Device, FieldDescriptor, FieldValue, Hooks, PacketCallback,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Slowly changing values are re-read this often.
pub const QUERY_INTERVAL: Duration = Duration::from_secs(300);
/// Values never received are re-requested this often. Also bounds how long
/// a status write blocks the next one.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub const HEATING_TARGET_RANGE: std::ops::RangeInclusive<i32> = 10..=27;
const MONTHS_RANGE: std::ops::RangeInclusive<i32> = 0..=255;

/// What the fireplace/boost switch does when activated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchType {
    Fireplace,
    Boost,
}

/// Per-connection state. Dropped on disconnect.
struct Session<T> {
    transport: T,
    reader: FrameReader,
    store: Store,
    /// A status write is waiting to be confirmed by the next status frame.
    status_write_pending: bool,
    last_requested: Instant,
    last_retry: Instant,
}

/// Vallox Digit SE ventilation unit, attached to the bus as a control panel.
///
/// Drive it by calling [`Vallox::tick`] repeatedly. Each tick consumes every
/// frame currently waiting on the line, then issues periodic and retry
/// requests when due.
pub struct Vallox<T> {
    session: Option<Session<T>>,
    hooks: Hooks,
}

impl<T: Transport> Default for Vallox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Vallox<T> {
    pub fn new() -> Self {
        Self {
            session: None,
            hooks: Hooks::default(),
        }
    }

    /// Start a fresh session on `transport` and request the full
    /// configuration.
    pub async fn connect(&mut self, transport: T) -> anyhow::Result<()> {
        let now = Instant::now();
        self.session = Some(Session {
            transport,
            reader: FrameReader::new(),
            store: Store::new(),
            status_write_pending: false,
            last_requested: now,
            last_retry: now,
        });
        info!("Vallox connected, requesting configuration");
        self.request_config().await
    }

    /// Drop the session and hand back the transport for closing.
    pub fn disconnect(&mut self) -> Option<T> {
        self.session.take().map(|session| session.transport)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn set_change_callback(&mut self, callback: ChangeCallback) {
        self.hooks.set_change(callback);
    }

    pub fn set_packet_callback(&mut self, callback: PacketCallback) {
        self.hooks.set_packet(callback);
    }

    /// Request every tracked variable once.
    pub async fn request_config(&mut self) -> anyhow::Result<()> {
        let (session, hooks) = self.parts()?;
        for variable in registry::INITIAL_REQUESTS {
            session.request(hooks, *variable).await?;
        }
        let now = Instant::now();
        session.last_requested = now;
        session.last_retry = now;
        Ok(())
    }

    pub async fn tick(&mut self) -> anyhow::Result<()> {
        let Self { session, hooks } = self;
        let Some(session) = session.as_mut() else {
            return Ok(());
        };

        session.drain(hooks).await?;

        let now = Instant::now();
        if now.duration_since(session.last_requested) > QUERY_INTERVAL {
            session.last_requested = now;
            if session.store.is_status_initialized() {
                for variable in registry::PERIODIC_REQUESTS {
                    session.request(hooks, *variable).await?;
                }
            }
        }

        if now.duration_since(session.last_retry) > RETRY_INTERVAL {
            session.retry(hooks).await?;
        }
        Ok(())
    }

    pub async fn set_on(&mut self) -> anyhow::Result<bool> {
        self.set_status_flag(Field::IsOn, status::POWER, true).await
    }

    pub async fn set_off(&mut self) -> anyhow::Result<bool> {
        self.set_status_flag(Field::IsOn, status::POWER, false).await
    }

    pub async fn set_rh_mode(&mut self, on: bool) -> anyhow::Result<bool> {
        self.set_status_flag(Field::IsRhMode, status::RH, on).await
    }

    pub async fn set_heating_mode(&mut self, on: bool) -> anyhow::Result<bool> {
        self.set_status_flag(Field::IsHeatingMode, status::HEATING_MODE, on).await
    }

    /// Fan speed 1-8.
    pub async fn set_fan_speed(&mut self, speed: i32) -> anyhow::Result<bool> {
        let Some(hex) = convert::fan_speed_to_hex(speed) else {
            warn!("Fan speed {} out of range", speed);
            return Ok(false);
        };
        self.set_variable(var::FAN_SPEED, hex, Field::FanSpeed, FieldValue::Int(speed))
            .await
    }

    /// Fan speed 1-8 used after power on.
    pub async fn set_default_fan_speed(&mut self, speed: i32) -> anyhow::Result<bool> {
        let Some(hex) = convert::fan_speed_to_hex(speed) else {
            warn!("Default fan speed {} out of range", speed);
            return Ok(false);
        };
        self.set_variable(var::DEFAULT_FAN_SPEED, hex, Field::DefaultFanSpeed, FieldValue::Int(speed))
            .await
    }

    /// Service period in months, 0-255.
    pub async fn set_service_period(&mut self, months: i32) -> anyhow::Result<bool> {
        if !MONTHS_RANGE.contains(&months) {
            warn!("Service period {} out of range", months);
            return Ok(false);
        }
        self.set_variable(var::SERVICE_PERIOD, months as u8, Field::ServicePeriod, FieldValue::Int(months))
            .await
    }

    /// Months left until service, 0-255.
    pub async fn set_service_counter(&mut self, months: i32) -> anyhow::Result<bool> {
        if !MONTHS_RANGE.contains(&months) {
            warn!("Service counter {} out of range", months);
            return Ok(false);
        }
        self.set_variable(var::SERVICE_COUNTER, months as u8, Field::ServiceCounter, FieldValue::Int(months))
            .await
    }

    /// Post-heating target, 10-27 °C.
    pub async fn set_heating_target(&mut self, celsius: i32) -> anyhow::Result<bool> {
        if !HEATING_TARGET_RANGE.contains(&celsius) {
            warn!("Heating target {} out of range", celsius);
            return Ok(false);
        }
        let ntc = convert::celsius_to_ntc(celsius);
        self.set_variable(var::HEATING_TARGET, ntc, Field::HeatingTarget, FieldValue::Int(celsius))
            .await
    }

    /// Trigger the fireplace/boost function.
    pub async fn activate_switch(&mut self) -> anyhow::Result<bool> {
        let (session, hooks) = self.parts()?;
        let Some(current) = session.store.raw(Raw::Flags06) else {
            warn!("Flags 06 not received yet, cannot activate switch");
            return Ok(false);
        };
        let frames = Frame::set(addr::MAINBOARDS, var::FLAGS_06, current | flags06::SWITCH_ACTIVATE);
        session.write(hooks, &frames).await?;
        Ok(true)
    }

    async fn set_variable(&mut self, variable: u8, byte: u8, field: Field, value: FieldValue) -> anyhow::Result<bool> {
        let (session, hooks) = self.parts()?;
        session.write(hooks, &Frame::set(addr::MAINBOARDS, variable, byte)).await?;
        session.apply_local(hooks, field, value);
        Ok(true)
    }

    /// Read-modify-write one bit of the status byte. Only one status write
    /// may be in flight; further calls are no-ops until the next status frame
    /// or retry round.
    async fn set_status_flag(&mut self, field: Field, mask: u8, on: bool) -> anyhow::Result<bool> {
        let (session, hooks) = self.parts()?;
        let Some(current) = session.store.raw(Raw::Status) else {
            warn!("Status not received yet, ignoring {} change", field.name());
            return Ok(false);
        };

        if field == Field::IsHeatingMode && (current & mask != 0) == on {
            debug!("Heating mode is already {}", if on { "on" } else { "off" });
            session.announce(hooks, field);
            return Ok(false);
        }

        if session.status_write_pending {
            debug!("Status write pending, {} change must be retried", field.name());
            return Ok(false);
        }

        let byte = if on { current | mask } else { current & !mask };
        session
            .write(hooks, &Frame::set(addr::MAINBOARD_1, var::STATUS, byte))
            .await?;
        session.status_write_pending = true;
        session.last_retry = Instant::now();
        session.apply_local(hooks, field, FieldValue::Bool(on));
        Ok(true)
    }

    fn parts(&mut self) -> anyhow::Result<(&mut Session<T>, &mut Hooks)> {
        let Self { session, hooks } = self;
        match session.as_mut() {
            Some(session) => Ok((session, hooks)),
            None => anyhow::bail!("Vallox is not connected"),
        }
    }
}

impl<T> Vallox<T> {
    /// Current value of a field; unset when disconnected.
    pub fn get(&self, field: Field) -> FieldValue {
        self.session
            .as_ref()
            .map_or(FieldValue::Unset, |session| session.store.value(field))
    }

    fn flag(&self, field: Field) -> Option<bool> {
        self.get(field).as_bool()
    }

    fn number(&self, field: Field) -> Option<i32> {
        self.get(field).as_int()
    }

    /// All status fields and configuration received at least once.
    pub fn is_initialized(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.store.is_status_initialized())
    }

    pub fn is_temperature_initialized(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.store.is_temperature_initialized())
    }

    /// Time of the last decoded value change.
    pub fn updated(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|session| session.store.updated())
    }

    /// A status write is waiting for confirmation.
    pub fn is_status_write_pending(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.status_write_pending)
    }

    pub fn is_on(&self) -> Option<bool> {
        self.flag(Field::IsOn)
    }

    pub fn is_rh_mode(&self) -> Option<bool> {
        self.flag(Field::IsRhMode)
    }

    pub fn is_heating_mode(&self) -> Option<bool> {
        self.flag(Field::IsHeatingMode)
    }

    pub fn is_filter(&self) -> Option<bool> {
        self.flag(Field::IsFilter)
    }

    pub fn is_heating(&self) -> Option<bool> {
        self.flag(Field::IsHeating)
    }

    pub fn is_fault(&self) -> Option<bool> {
        self.flag(Field::IsFault)
    }

    pub fn is_service_needed(&self) -> Option<bool> {
        self.flag(Field::IsServiceNeeded)
    }

    pub fn is_summer_mode(&self) -> Option<bool> {
        self.flag(Field::IsSummerMode)
    }

    pub fn is_error_relay(&self) -> Option<bool> {
        self.flag(Field::IsErrorRelay)
    }

    pub fn is_motor_in(&self) -> Option<bool> {
        self.flag(Field::IsMotorIn)
    }

    pub fn is_front_heating(&self) -> Option<bool> {
        self.flag(Field::IsFrontHeating)
    }

    pub fn is_motor_out(&self) -> Option<bool> {
        self.flag(Field::IsMotorOut)
    }

    pub fn is_extra_func(&self) -> Option<bool> {
        self.flag(Field::IsExtraFunc)
    }

    pub fn is_switch_active(&self) -> Option<bool> {
        self.flag(Field::IsSwitchActive)
    }

    pub fn switch_type(&self) -> Option<SwitchType> {
        self.flag(Field::IsBoostSetting)
            .map(|boost| if boost { SwitchType::Boost } else { SwitchType::Fireplace })
    }

    pub fn fan_speed(&self) -> Option<i32> {
        self.number(Field::FanSpeed)
    }

    pub fn default_fan_speed(&self) -> Option<i32> {
        self.number(Field::DefaultFanSpeed)
    }

    pub fn service_period(&self) -> Option<i32> {
        self.number(Field::ServicePeriod)
    }

    pub fn service_counter(&self) -> Option<i32> {
        self.number(Field::ServiceCounter)
    }

    pub fn heating_target(&self) -> Option<i32> {
        self.number(Field::HeatingTarget)
    }

    pub fn outside_temp(&self) -> Option<i32> {
        self.number(Field::OutsideTemp)
    }

    pub fn inside_temp(&self) -> Option<i32> {
        self.number(Field::InsideTemp)
    }

    pub fn exhaust_temp(&self) -> Option<i32> {
        self.number(Field::ExhaustTemp)
    }

    pub fn incoming_temp(&self) -> Option<i32> {
        self.number(Field::IncomingTemp)
    }

    pub fn rh1(&self) -> Option<i32> {
        self.number(Field::Rh1)
    }

    pub fn rh2(&self) -> Option<i32> {
        self.number(Field::Rh2)
    }

    pub fn co2(&self) -> Option<i32> {
        self.number(Field::Co2)
    }
}

impl<T: Transport> Session<T> {
    async fn write(&mut self, hooks: &mut Hooks, frames: &[Frame]) -> anyhow::Result<()> {
        let mut out = Vec::with_capacity(frames.len() * FRAME_LEN);
        for frame in frames {
            let raw = frame.to_bytes();
            hooks.packet(&raw, Direction::Sent);
            out.extend_from_slice(&raw);
        }
        self.transport.write(&out).await?;
        debug!("TX->Vallox: {:02x?}", out);
        Ok(())
    }

    async fn request(&mut self, hooks: &mut Hooks, variable: u8) -> anyhow::Result<()> {
        self.write(hooks, &[Frame::request(variable)]).await?;
        tokio::time::sleep(REQUEST_SETTLE).await;
        Ok(())
    }

    /// Re-request whatever never arrived and release a stuck status write.
    async fn retry(&mut self, hooks: &mut Hooks) -> anyhow::Result<()> {
        self.status_write_pending = false;
        self.last_retry = Instant::now();

        let missing: Vec<u8> = registry::INITIAL_REQUESTS
            .iter()
            .copied()
            .filter(|id| registry::lookup(*id).is_some_and(|v| !v.is_received(&self.store)))
            .collect();
        if !missing.is_empty() {
            debug!("Re-requesting missing variables {:02x?}", missing);
        }
        for variable in missing {
            self.request(hooks, variable).await?;
        }
        Ok(())
    }

    /// Decode every complete frame currently waiting on the line.
    async fn drain(&mut self, hooks: &mut Hooks) -> anyhow::Result<()> {
        let mut incoming = Vec::new();
        if comm::read_available(&mut self.transport, &mut incoming).await? == 0 {
            return Ok(());
        }
        self.reader.push(&incoming);
        while let Some((frame, raw)) = self.reader.next_frame() {
            hooks.packet(&raw, Direction::Received);
            self.handle(hooks, frame);
        }
        self.seed(hooks);
        Ok(())
    }

    fn handle(&mut self, hooks: &mut Hooks, frame: Frame) {
        let Some(variable) = registry::lookup(frame.variable) else {
            return;
        };
        let now = Instant::now();
        let store = &mut self.store;
        let mut changed = Vec::new();

        match variable.rule {
            Rule::Scalar(field, decode) => {
                store.mark_received(field, now);
                if store.set(field, decode(frame.value), now) {
                    changed.push(field);
                }
            }
            Rule::Flags(raw, fields) => {
                // All flags count as received before any of them is reported.
                for (field, _) in fields {
                    store.mark_received(*field, now);
                }
                store.set_raw(raw, frame.value, now);
                for (field, value) in registry::fan_out(frame.value, fields) {
                    if store.set(field, value, now) {
                        changed.push(field);
                    }
                }
                if raw == Raw::Status {
                    self.status_write_pending = false;
                }
            }
            Rule::Co2(raw) => {
                store.set_raw(raw, frame.value, now);
                if let Some(total) = store.co2_composite() {
                    store.mark_received(Field::Co2, now);
                    if store.set(Field::Co2, FieldValue::Int(total), now) {
                        changed.push(Field::Co2);
                    }
                }
            }
        }

        self.dispatch(hooks, &changed);
    }

    /// Report changes of one frame to subscribers of open fields.
    fn dispatch(&self, hooks: &mut Hooks, changed: &[Field]) {
        for field in changed {
            if self.store.is_open(*field) {
                hooks.changed(field.name(), self.store.value(*field));
            }
        }
    }

    /// Re-evaluate completeness after a batch of frames and send the initial
    /// snapshot when a flag just turned true.
    fn seed(&mut self, hooks: &mut Hooks) {
        let flipped = self.store.refresh_completeness();
        if flipped.status {
            info!("Vallox status initialized");
            self.snapshot(hooks, |field| field.group().in_status_snapshot());
        }
        if flipped.temperature {
            info!("Vallox temperatures initialized");
            self.snapshot(hooks, |field| !field.group().gated_on_status());
        }
    }

    fn snapshot(&self, hooks: &mut Hooks, select: impl Fn(Field) -> bool) {
        for field in Field::all().filter(|f| select(*f)) {
            let observed = self.store.get(field);
            if observed.is_received() || observed.value.is_set() {
                hooks.changed(field.name(), observed.value);
            }
        }
    }

    /// Optimistic update after a write.
    fn apply_local(&mut self, hooks: &mut Hooks, field: Field, value: FieldValue) {
        if self.store.set(field, value, Instant::now()) && self.store.is_open(field) {
            hooks.changed(field.name(), value);
        }
    }

    /// Re-report the current value so subscribers resynchronize.
    fn announce(&self, hooks: &mut Hooks, field: Field) {
        if self.store.is_open(field) {
            hooks.changed(field.name(), self.store.value(field));
        }
    }
}

impl<T: Transport> Device for Vallox<T> {
    fn name(&self) -> &'static str {
        "vallox"
    }

    fn descriptors(&self) -> Vec<FieldDescriptor> {
        Field::all().map(Field::descriptor).collect()
    }

    fn value(&self, field: &str) -> FieldValue {
        Field::from_name(field).map_or(FieldValue::Unset, |field| self.get(field))
    }

    fn is_initialized(&self) -> bool {
        Vallox::is_initialized(self)
    }

    fn on_change(&mut self, callback: ChangeCallback) {
        self.set_change_callback(callback);
    }

    fn on_packet(&mut self, callback: PacketCallback) {
        self.set_packet_callback(callback);
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        Vallox::tick(self).await
    }

    async fn command(&mut self, field: &str, payload: &str) -> anyhow::Result<bool> {
        let Some(field) = Field::from_name(field) else {
            warn!("Unknown Vallox field {}", field);
            return Ok(false);
        };

        match field {
            Field::IsOn | Field::IsRhMode | Field::IsHeatingMode | Field::IsSwitchActive => {
                let Some(on) = parse_switch(payload) else {
                    warn!("Invalid switch payload '{}' for {}", payload, field.name());
                    return Ok(false);
                };
                match field {
                    Field::IsOn if on => self.set_on().await,
                    Field::IsOn => self.set_off().await,
                    Field::IsRhMode => self.set_rh_mode(on).await,
                    Field::IsHeatingMode => self.set_heating_mode(on).await,
                    _ if on => self.activate_switch().await,
                    _ => {
                        debug!("Switch deactivates by itself, ignoring OFF");
                        Ok(false)
                    }
                }
            }
            Field::FanSpeed
            | Field::DefaultFanSpeed
            | Field::ServicePeriod
            | Field::ServiceCounter
            | Field::HeatingTarget => {
                let Some(number) = parse_int(payload) else {
                    warn!("Invalid number '{}' for {}", payload, field.name());
                    return Ok(false);
                };
                match field {
                    Field::FanSpeed => self.set_fan_speed(number).await,
                    Field::DefaultFanSpeed => self.set_default_fan_speed(number).await,
                    Field::ServicePeriod => self.set_service_period(number).await,
                    Field::ServiceCounter => self.set_service_counter(number).await,
                    _ => self.set_heating_target(number).await,
                }
            }
            _ => {
                warn!("Vallox field {} is read-only", field.name());
                Ok(false)
            }
        }
    }
}
