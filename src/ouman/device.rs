use super::points::{self, MeasurePoint};
use super::protocol::{self, RESPONSE_HEADER_LEN};
use crate::comm::{read_exact_timeout, Direction, Transport};
use crate::consts::{OUMAN_POLL_INTERVAL, REQUEST_SETTLE};
use crate::device::{ChangeCallback, Device, FieldDescriptor, FieldValue, Hooks, Observed, PacketCallback};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The line needs this long after opening before the controller answers.
pub const CONNECT_SETTLE: Duration = Duration::from_secs(2);
/// Longest wait for each part of a response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

struct Session<T> {
    transport: T,
    values: Vec<Observed>,
    last_poll: Option<Instant>,
}

/// Ouman heating controller, polled point by point.
pub struct Ouman<T> {
    model: &'static str,
    points: &'static [MeasurePoint],
    poll_interval: Duration,
    session: Option<Session<T>>,
    hooks: Hooks,
}

impl<T: Transport> Ouman<T> {
    pub fn new(model: &'static str, points: &'static [MeasurePoint]) -> Self {
        Self {
            model,
            points,
            poll_interval: OUMAN_POLL_INTERVAL,
            session: None,
            hooks: Hooks::default(),
        }
    }

    pub fn eh203() -> Self {
        Self::new("ouman-eh203", points::EH203)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn connect(&mut self, mut transport: T) -> anyhow::Result<()> {
        transport.clear_input()?;
        tokio::time::sleep(CONNECT_SETTLE).await;
        self.session = Some(Session {
            transport,
            values: vec![Observed::default(); self.points.len()],
            last_poll: None,
        });
        info!("{} connected", self.model);
        Ok(())
    }

    pub fn disconnect(&mut self) -> Option<T> {
        self.session.take().map(|session| session.transport)
    }

    pub fn set_change_callback(&mut self, callback: ChangeCallback) {
        self.hooks.set_change(callback);
    }

    pub fn set_packet_callback(&mut self, callback: PacketCallback) {
        self.hooks.set_packet(callback);
    }

    /// Poll all points when the poll interval has elapsed.
    pub async fn tick(&mut self) -> anyhow::Result<()> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        let due = session
            .last_poll
            .map_or(true, |last| last.elapsed() >= self.poll_interval);
        if due {
            self.poll().await?;
        }
        Ok(())
    }

    /// Read every point once. Points sharing a command are served from a
    /// single response.
    pub async fn poll(&mut self) -> anyhow::Result<()> {
        let Self {
            points,
            session,
            hooks,
            ..
        } = self;
        let Some(session) = session.as_mut() else {
            anyhow::bail!("Ouman is not connected");
        };
        session.last_poll = Some(Instant::now());

        let mut responses: HashMap<u16, Option<Vec<u8>>> = HashMap::new();
        for (idx, point) in points.iter().enumerate() {
            if !responses.contains_key(&point.command) {
                let data = session.read_command(hooks, point.command).await?;
                responses.insert(point.command, data);
            }
            // A failed read leaves the point Unset but keeps its last
            // reception time.
            let value = match responses.get(&point.command) {
                Some(Some(data)) => match protocol::extract_value(data, point.start, point.end) {
                    Ok(raw) => Some(point.parse(raw)),
                    Err(err) => {
                        warn!("Unable to read {}: {}", point.field.name, err);
                        None
                    }
                },
                _ => None,
            };

            let slot = &mut session.values[idx];
            if value.is_some() {
                slot.last_received = Some(Instant::now());
            }
            let value = value.unwrap_or(FieldValue::Unset);
            if slot.value != value {
                slot.value = value;
                hooks.changed(point.field.name, value);
            }
        }
        Ok(())
    }
}

impl<T> Ouman<T> {
    /// Current value of a point by name. Unset when unknown or not read yet.
    pub fn get(&self, name: &str) -> FieldValue {
        let Some(session) = self.session.as_ref() else {
            return FieldValue::Unset;
        };
        self.points
            .iter()
            .position(|point| point.field.name == name)
            .map_or(FieldValue::Unset, |idx| session.values[idx].value)
    }

    /// Every point was read at least once.
    pub fn is_initialized(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.values.iter().all(Observed::is_received))
    }
}

impl<T: Transport> Session<T> {
    /// One request/response exchange. `Ok(None)` when the controller did not
    /// answer properly; `Err` only for transport failures.
    async fn read_command(&mut self, hooks: &mut Hooks, command: u16) -> anyhow::Result<Option<Vec<u8>>> {
        self.transport.clear_input()?;
        let request = protocol::encode_request(command);
        hooks.packet(&request, Direction::Sent);
        self.transport.write(&request).await?;
        debug!("TX->Ouman: {:02x?}", request);
        tokio::time::sleep(REQUEST_SETTLE).await;

        let mut header = [0u8; RESPONSE_HEADER_LEN];
        if !read_exact_timeout(&mut self.transport, &mut header, RESPONSE_TIMEOUT).await? {
            debug!("No response to command {}", command);
            return Ok(None);
        }
        let Some(len) = protocol::payload_len(&header) else {
            return Ok(None);
        };

        let mut raw = header.to_vec();
        raw.resize(RESPONSE_HEADER_LEN + len + 1, 0);
        if !read_exact_timeout(&mut self.transport, &mut raw[RESPONSE_HEADER_LEN..], RESPONSE_TIMEOUT).await? {
            debug!("Truncated response to command {}", command);
            return Ok(None);
        }
        hooks.packet(&raw, Direction::Received);

        Ok(protocol::decode_response(command, &raw).map(<[u8]>::to_vec))
    }
}

impl<T: Transport> Device for Ouman<T> {
    fn name(&self) -> &'static str {
        self.model
    }

    fn descriptors(&self) -> Vec<FieldDescriptor> {
        self.points.iter().map(|point| point.field).collect()
    }

    fn value(&self, field: &str) -> FieldValue {
        self.get(field)
    }

    fn is_initialized(&self) -> bool {
        Ouman::is_initialized(self)
    }

    fn on_change(&mut self, callback: ChangeCallback) {
        self.set_change_callback(callback);
    }

    fn on_packet(&mut self, callback: PacketCallback) {
        self.set_packet_callback(callback);
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        Ouman::tick(self).await
    }

    async fn command(&mut self, field: &str, _payload: &str) -> anyhow::Result<bool> {
        warn!("{} field {} is read-only", self.model, field);
        Ok(false)
    }
}
