use hvac_gate::comm::{Direction, MemoryTransport};
use hvac_gate::device::{Device, FieldValue};
use hvac_gate::vallox::convert::{celsius_to_ntc, ntc_to_celsius};
use hvac_gate::vallox::protocol::{addr, var, Frame};
use hvac_gate::vallox::registry::INITIAL_REQUESTS;
use hvac_gate::vallox::{SwitchType, Vallox};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<(&'static str, FieldValue)>>>;

fn from_mainboard(variable: u8, value: u8) -> [u8; 6] {
    Frame::new(addr::MAINBOARD_1, addr::PANELS, variable, value).to_bytes()
}

fn set_bytes(target: u8, variable: u8, value: u8) -> Vec<u8> {
    Frame::set(target, variable, value)
        .iter()
        .flat_map(|frame| frame.to_bytes())
        .collect()
}

fn request_bytes(variable: u8) -> Vec<u8> {
    Frame::request(variable).to_bytes().to_vec()
}

/// Everything required for status initialization, plus the optional
/// switch flags.
fn status_frames(status: u8) -> Vec<(u8, u8)> {
    vec![
        (var::STATUS, status),
        (var::IO_08, 0x00),
        (var::FAN_SPEED, 0x07),
        (var::DEFAULT_FAN_SPEED, 0x03),
        (var::SERVICE_PERIOD, 12),
        (var::SERVICE_COUNTER, 7),
        (var::HEATING_TARGET, celsius_to_ntc(18)),
        (var::FLAGS_06, 0x00),
        (var::PROGRAM, 0x20),
    ]
}

async fn connected() -> (Vallox<MemoryTransport>, MemoryTransport, Log) {
    let transport = MemoryTransport::new();
    let log: Log = Arc::default();
    let sink = log.clone();

    let mut vallox = Vallox::new();
    vallox.set_change_callback(Box::new(move |name, value| {
        sink.lock().unwrap().push((name, value));
    }));
    vallox.connect(transport.clone()).await.unwrap();
    transport.take_written();
    (vallox, transport, log)
}

async fn feed(vallox: &mut Vallox<MemoryTransport>, transport: &MemoryTransport, frames: &[(u8, u8)]) {
    for (variable, value) in frames {
        transport.inject(&from_mainboard(*variable, *value));
    }
    vallox.tick().await.unwrap();
}

async fn initialized(status: u8) -> (Vallox<MemoryTransport>, MemoryTransport, Log) {
    let (mut vallox, transport, log) = connected().await;
    feed(&mut vallox, &transport, &status_frames(status)).await;
    assert!(vallox.is_initialized());
    log.lock().unwrap().clear();
    (vallox, transport, log)
}

fn take(log: &Log) -> Vec<(&'static str, FieldValue)> {
    std::mem::take(&mut *log.lock().unwrap())
}

#[tokio::test(start_paused = true)]
async fn connect_requests_configuration_in_order() {
    let transport = MemoryTransport::new();
    let mut vallox = Vallox::new();
    vallox.connect(transport.clone()).await.unwrap();

    let expected: Vec<Vec<u8>> = INITIAL_REQUESTS.iter().map(|id| request_bytes(*id)).collect();
    assert_eq!(transport.written(), expected);
    assert_eq!(expected[0], vec![0x01, 0x22, 0x11, 0x00, 0xA3, 0xD7]);
    assert!(vallox.is_connected());
    assert!(!vallox.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn status_initialization_reports_snapshot_once() {
    let (mut vallox, transport, log) = connected().await;
    feed(&mut vallox, &transport, &status_frames(0x01)).await;

    let notified = take(&log);
    let names: Vec<_> = notified.iter().map(|(name, _)| *name).collect();
    assert_eq!(
        names,
        vec![
            "is_on",
            "is_rh_mode",
            "is_heating_mode",
            "is_filter",
            "is_heating",
            "is_fault",
            "is_service_needed",
            "is_switch_active",
            "is_boost_setting",
            "fan_speed",
            "default_fan_speed",
            "service_period",
            "service_counter",
            "heating_target",
        ]
    );
    assert_eq!(notified[0].1, FieldValue::Bool(true));
    assert_eq!(notified[1].1, FieldValue::Bool(false));
    assert_eq!(notified[9].1, FieldValue::Int(3));
    assert_eq!(notified[13].1, FieldValue::Int(18));

    assert!(vallox.is_initialized());
    assert!(!vallox.is_temperature_initialized());
    assert_eq!(vallox.is_on(), Some(true));
    assert_eq!(vallox.fan_speed(), Some(3));
    assert_eq!(vallox.default_fan_speed(), Some(2));
    assert_eq!(vallox.service_period(), Some(12));
    assert_eq!(vallox.service_counter(), Some(7));
    assert_eq!(vallox.heating_target(), Some(18));
    assert_eq!(vallox.switch_type(), Some(SwitchType::Boost));
    assert_eq!(vallox.is_summer_mode(), Some(false));
    assert_eq!(vallox.rh1(), None);
    assert!(vallox.updated().is_some());

    // Later frames report plain changes only.
    feed(&mut vallox, &transport, &status_frames(0x01)).await;
    assert!(take(&log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn initial_answers_in_one_batch_seed_status_fields() {
    let (mut vallox, transport, log) = connected().await;
    let answers: Vec<(u8, u8)> = INITIAL_REQUESTS
        .iter()
        .map(|id| {
            let value = match *id {
                var::STATUS => 0x01,
                var::FAN_SPEED => 0x07,
                var::DEFAULT_FAN_SPEED => 0x03,
                var::RH1 => 0x80,
                var::SERVICE_PERIOD => 12,
                var::SERVICE_COUNTER => 7,
                var::HEATING_TARGET => celsius_to_ntc(18),
                var::PROGRAM => 0x20,
                _ => 0x00,
            };
            (*id, value)
        })
        .collect();
    feed(&mut vallox, &transport, &answers).await;

    let names: Vec<_> = take(&log).into_iter().map(|(name, _)| name).collect();
    assert_eq!(
        names,
        vec![
            "is_on",
            "is_rh_mode",
            "is_heating_mode",
            "is_filter",
            "is_heating",
            "is_fault",
            "is_service_needed",
            "is_switch_active",
            "is_boost_setting",
            "fan_speed",
            "default_fan_speed",
            "service_period",
            "service_counter",
            "heating_target",
        ]
    );
    assert_eq!(vallox.rh1(), Some(37));
    assert_eq!(vallox.is_summer_mode(), Some(false));
}

#[tokio::test(start_paused = true)]
async fn switch_flags_are_optional_but_io_flags_are_not() {
    let (mut vallox, transport, log) = connected().await;
    let without_io: Vec<(u8, u8)> = status_frames(0x01)
        .into_iter()
        .filter(|(id, _)| *id != var::IO_08 && *id != var::FLAGS_06 && *id != var::PROGRAM)
        .collect();
    feed(&mut vallox, &transport, &without_io).await;
    assert!(!vallox.is_initialized());
    assert!(take(&log).is_empty());

    feed(&mut vallox, &transport, &[(var::IO_08, 0x00)]).await;
    assert!(vallox.is_initialized());
    let names: Vec<_> = take(&log).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names.len(), 12);
    assert!(!names.contains(&"is_switch_active"));
    assert!(!names.contains(&"is_summer_mode"));

    // The switch flags open with the status gate.
    feed(&mut vallox, &transport, &[(var::FLAGS_06, 0x20)]).await;
    assert_eq!(take(&log), vec![("is_switch_active", FieldValue::Bool(true))]);
}

#[tokio::test(start_paused = true)]
async fn changes_before_initialization_are_silent() {
    let (mut vallox, transport, log) = connected().await;
    feed(&mut vallox, &transport, &[(var::FAN_SPEED, 0x0F), (var::STATUS, 0x01)]).await;

    assert!(take(&log).is_empty());
    assert_eq!(vallox.fan_speed(), Some(4));
    assert!(!vallox.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn only_real_changes_are_reported() {
    let (mut vallox, transport, log) = initialized(0x01).await;

    feed(&mut vallox, &transport, &[(var::STATUS, 0x01), (var::FAN_SPEED, 0x07)]).await;
    assert!(take(&log).is_empty());

    feed(&mut vallox, &transport, &[(var::STATUS, 0x05)]).await;
    assert_eq!(take(&log), vec![("is_rh_mode", FieldValue::Bool(true))]);

    feed(&mut vallox, &transport, &[(var::IO_08, 0x02)]).await;
    assert_eq!(take(&log), vec![("is_summer_mode", FieldValue::Bool(true))]);

    feed(&mut vallox, &transport, &[(var::IO_08, 0x0A)]).await;
    assert_eq!(take(&log), vec![("is_motor_in", FieldValue::Bool(true))]);
    assert_eq!(vallox.is_motor_out(), Some(false));
}

#[tokio::test(start_paused = true)]
async fn temperatures_have_their_own_gate() {
    let (mut vallox, transport, log) = connected().await;
    let outside = celsius_to_ntc(-5);
    feed(
        &mut vallox,
        &transport,
        &[
            (var::T_OUTSIDE, outside),
            (var::T_INSIDE, celsius_to_ntc(22)),
            (var::T_EXHAUST, celsius_to_ntc(21)),
        ],
    )
    .await;
    assert!(take(&log).is_empty());

    feed(&mut vallox, &transport, &[(var::T_INCOMING, celsius_to_ntc(17))]).await;
    let names: Vec<_> = take(&log).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["outside_temp", "inside_temp", "exhaust_temp", "incoming_temp"]);
    assert!(vallox.is_temperature_initialized());
    assert!(!vallox.is_initialized());
    assert_eq!(vallox.outside_temp(), Some(ntc_to_celsius(outside)));
    assert_eq!(vallox.incoming_temp(), Some(17));
}

#[tokio::test(start_paused = true)]
async fn humidity_below_offset_is_unset() {
    let (mut vallox, transport, log) = initialized(0x01).await;

    feed(&mut vallox, &transport, &[(var::RH1, 10)]).await;
    assert_eq!(vallox.rh1(), None);
    assert_eq!(Device::value(&vallox, "rh1"), FieldValue::Unset);
    assert!(take(&log).is_empty());

    feed(&mut vallox, &transport, &[(var::RH1, 0x80)]).await;
    assert_eq!(vallox.rh1(), Some(37));
    assert_eq!(take(&log), vec![("rh1", FieldValue::Int(37))]);
}

#[tokio::test(start_paused = true)]
async fn co2_halves_must_arrive_together() {
    let (mut vallox, transport, log) = initialized(0x01).await;

    feed(&mut vallox, &transport, &[(var::CO2_HI, 0x02)]).await;
    tokio::time::advance(Duration::from_millis(2500)).await;
    feed(&mut vallox, &transport, &[(var::CO2_LO, 0x10)]).await;
    assert_eq!(vallox.co2(), None);
    assert!(take(&log).is_empty());

    tokio::time::advance(Duration::from_millis(500)).await;
    feed(&mut vallox, &transport, &[(var::CO2_HI, 0x02)]).await;
    assert_eq!(vallox.co2(), Some(0x0210));
    assert_eq!(take(&log), vec![("co2", FieldValue::Int(528))]);
}

#[tokio::test(start_paused = true)]
async fn one_status_write_at_a_time() {
    let (mut vallox, transport, log) = initialized(0x00).await;

    assert!(vallox.set_on().await.unwrap());
    assert_eq!(
        transport.take_written(),
        vec![set_bytes(addr::MAINBOARD_1, var::STATUS, 0x01)]
    );
    assert_eq!(transport.take_written().len(), 0);
    assert_eq!(take(&log), vec![("is_on", FieldValue::Bool(true))]);
    assert!(vallox.is_status_write_pending());

    assert!(!vallox.set_on().await.unwrap());
    assert!(!vallox.set_rh_mode(true).await.unwrap());
    assert!(transport.written().is_empty());

    // The unit confirms; the guard opens again.
    feed(&mut vallox, &transport, &[(var::STATUS, 0x01)]).await;
    assert!(!vallox.is_status_write_pending());
    assert!(take(&log).is_empty());

    assert!(vallox.set_rh_mode(true).await.unwrap());
    assert_eq!(
        transport.take_written(),
        vec![set_bytes(addr::MAINBOARD_1, var::STATUS, 0x05)]
    );
}

#[tokio::test(start_paused = true)]
async fn retry_round_releases_status_guard() {
    let (mut vallox, transport, _log) = initialized(0x00).await;
    feed(&mut vallox, &transport, &[(var::RH1, 0x80)]).await;

    assert!(vallox.set_on().await.unwrap());
    assert!(!vallox.set_off().await.unwrap());

    tokio::time::advance(Duration::from_secs(6)).await;
    vallox.tick().await.unwrap();
    assert!(!vallox.is_status_write_pending());
    transport.take_written();

    assert!(vallox.set_off().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn heating_mode_already_set_is_reannounced() {
    let (mut vallox, transport, log) = initialized(0x00).await;

    assert!(!vallox.set_heating_mode(false).await.unwrap());
    assert!(transport.written().is_empty());
    assert_eq!(take(&log), vec![("is_heating_mode", FieldValue::Bool(false))]);
    assert!(!vallox.is_status_write_pending());

    assert!(vallox.set_heating_mode(true).await.unwrap());
    assert_eq!(
        transport.take_written(),
        vec![set_bytes(addr::MAINBOARD_1, var::STATUS, 0x08)]
    );
}

#[tokio::test(start_paused = true)]
async fn status_setters_need_status_byte() {
    let (mut vallox, transport, log) = connected().await;

    assert!(!vallox.set_on().await.unwrap());
    assert!(!vallox.set_heating_mode(true).await.unwrap());
    assert!(!vallox.activate_switch().await.unwrap());
    assert!(transport.written().is_empty());
    assert!(take(&log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn out_of_range_values_are_not_written() {
    let (mut vallox, transport, log) = initialized(0x01).await;

    assert!(!vallox.set_fan_speed(0).await.unwrap());
    assert!(!vallox.set_fan_speed(9).await.unwrap());
    assert!(!vallox.set_default_fan_speed(-1).await.unwrap());
    assert!(!vallox.set_service_period(256).await.unwrap());
    assert!(!vallox.set_service_counter(-1).await.unwrap());
    assert!(!vallox.set_heating_target(9).await.unwrap());
    assert!(!vallox.set_heating_target(28).await.unwrap());
    assert!(transport.written().is_empty());
    assert!(take(&log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn configuration_writes_go_to_all_mainboards() {
    let (mut vallox, transport, log) = initialized(0x01).await;

    assert!(vallox.set_fan_speed(8).await.unwrap());
    assert!(vallox.set_heating_target(27).await.unwrap());
    assert!(vallox.set_service_period(6).await.unwrap());
    assert_eq!(
        transport.take_written(),
        vec![
            set_bytes(addr::MAINBOARDS, var::FAN_SPEED, 0xFF),
            set_bytes(addr::MAINBOARDS, var::HEATING_TARGET, celsius_to_ntc(27)),
            set_bytes(addr::MAINBOARDS, var::SERVICE_PERIOD, 6),
        ]
    );
    assert_eq!(
        take(&log),
        vec![
            ("fan_speed", FieldValue::Int(8)),
            ("heating_target", FieldValue::Int(27)),
            ("service_period", FieldValue::Int(6)),
        ]
    );
    assert_eq!(vallox.fan_speed(), Some(8));
}

#[tokio::test(start_paused = true)]
async fn switch_activation_keeps_other_flags() {
    let (mut vallox, transport, _log) = initialized(0x01).await;
    feed(&mut vallox, &transport, &[(var::FLAGS_06, 0x01)]).await;

    assert!(vallox.activate_switch().await.unwrap());
    assert_eq!(
        transport.take_written(),
        vec![set_bytes(addr::MAINBOARDS, var::FLAGS_06, 0x21)]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_values_are_requested_again() {
    let (mut vallox, transport, _log) = connected().await;
    feed(&mut vallox, &transport, &[(var::STATUS, 0x01)]).await;
    assert!(transport.written().is_empty());

    tokio::time::advance(Duration::from_secs(6)).await;
    vallox.tick().await.unwrap();

    let expected: Vec<Vec<u8>> = INITIAL_REQUESTS
        .iter()
        .filter(|id| **id != var::STATUS)
        .map(|id| request_bytes(*id))
        .collect();
    assert_eq!(transport.take_written(), expected);
}

#[tokio::test(start_paused = true)]
async fn slow_values_are_refreshed_periodically() {
    let (mut vallox, transport, _log) = initialized(0x01).await;
    feed(&mut vallox, &transport, &[(var::RH1, 0x80)]).await;

    tokio::time::advance(Duration::from_secs(60)).await;
    vallox.tick().await.unwrap();
    assert!(transport.take_written().is_empty());

    tokio::time::advance(Duration::from_secs(250)).await;
    vallox.tick().await.unwrap();
    assert_eq!(
        transport.take_written(),
        vec![request_bytes(var::IO_08), request_bytes(var::SERVICE_COUNTER)]
    );
}

#[tokio::test(start_paused = true)]
async fn write_failures_keep_state() {
    let (mut vallox, transport, log) = initialized(0x00).await;
    transport.set_fail_writes(true);

    assert!(vallox.set_fan_speed(5).await.is_err());
    assert!(vallox.set_on().await.is_err());
    assert!(!vallox.is_status_write_pending());
    assert_eq!(vallox.fan_speed(), Some(3));
    assert!(take(&log).is_empty());

    // Retry round cannot write either.
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(vallox.tick().await.is_err());
    assert!(vallox.is_initialized());

    transport.set_fail_writes(false);
    assert!(vallox.set_on().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn disconnect_discards_session() {
    let (mut vallox, _transport, _log) = initialized(0x01).await;

    assert!(vallox.disconnect().is_some());
    assert!(!vallox.is_connected());
    assert!(!vallox.is_initialized());
    assert_eq!(vallox.fan_speed(), None);
    assert!(vallox.set_fan_speed(3).await.is_err());
    assert!(vallox.disconnect().is_none());

    let transport = MemoryTransport::new();
    vallox.connect(transport.clone()).await.unwrap();
    assert!(!vallox.is_initialized());
    assert_eq!(transport.written().len(), INITIAL_REQUESTS.len());
}

#[tokio::test(start_paused = true)]
async fn line_noise_is_skipped() {
    let (mut vallox, transport, _log) = connected().await;
    transport.inject(&[0x55, 0x01, 0x02]);
    transport.inject(&from_mainboard(var::FAN_SPEED, 0x01));
    vallox.tick().await.unwrap();
    assert_eq!(vallox.fan_speed(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn packet_observer_sees_both_directions() {
    let transport = MemoryTransport::new();
    let packets: Arc<Mutex<Vec<Direction>>> = Arc::default();
    let sink = packets.clone();

    let mut vallox = Vallox::new();
    vallox.set_packet_callback(Box::new(move |raw, direction| {
        assert_eq!(raw.len(), 6);
        sink.lock().unwrap().push(direction);
    }));
    vallox.connect(transport.clone()).await.unwrap();
    transport.inject(&from_mainboard(var::STATUS, 0x01));
    vallox.tick().await.unwrap();

    let packets = packets.lock().unwrap();
    assert_eq!(packets.len(), INITIAL_REQUESTS.len() + 1);
    assert_eq!(packets.last(), Some(&Direction::Received));
}

#[tokio::test(start_paused = true)]
async fn bus_commands_map_to_setters() {
    let (mut vallox, transport, _log) = initialized(0x00).await;

    assert!(vallox.command("fan_speed", "5").await.unwrap());
    assert!(vallox.command("is_on", "ON").await.unwrap());
    assert!(vallox.command("is_switch_active", "true").await.unwrap());
    assert!(!vallox.command("is_switch_active", "OFF").await.unwrap());
    assert!(!vallox.command("fan_speed", "fast").await.unwrap());
    assert!(!vallox.command("is_filter", "ON").await.unwrap());
    assert!(!vallox.command("bogus", "1").await.unwrap());

    assert_eq!(
        transport.take_written(),
        vec![
            set_bytes(addr::MAINBOARDS, var::FAN_SPEED, 0x1F),
            set_bytes(addr::MAINBOARD_1, var::STATUS, 0x01),
            set_bytes(addr::MAINBOARDS, var::FLAGS_06, 0x20),
        ]
    );

    let descriptors = vallox.descriptors();
    assert_eq!(descriptors.len(), 27);
    assert!(descriptors.iter().any(|d| d.name == "co2" && d.read_only));
    assert!(descriptors.iter().any(|d| d.name == "fan_speed" && !d.read_only));
}
