use clap::Parser;
use hvac_gate::comm::{Direction, SerialTransport};
use hvac_gate::config::{Config, DeviceConfig, DeviceModel};
use hvac_gate::consts;
use hvac_gate::device::Device;
use hvac_gate::idstore::{DeviceIdStore, FileIdStore};
use hvac_gate::mqtt::{self, Incoming, Outgoing, Publisher};
use hvac_gate::ouman::Ouman;
use hvac_gate::vallox::Vallox;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "config.yaml")]
    config_path: String,

    // MQTT connection
    #[arg(long)]
    mqtt_host: String,
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,
    #[arg(long, default_value = "")]
    mqtt_username: String,
    #[arg(long, default_value = "")]
    mqtt_password: String,

    // Other
    /// File keeping generated device ids between runs.
    #[arg(long, default_value = "deviceids.txt")]
    id_store: String,
    /// How often each device engine is ticked.
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,
}

fn init_log() {
    let timer = fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string());

    // Configure a custom event formatter
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_source_location(true)
        .with_timer(timer)
        .compact();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env()
        .expect("RUST_LOG configuration is valid")
        .add_directive("rumqttc=info".parse().unwrap());

    fmt().event_format(format).with_env_filter(filter).init();
}

/// Requests routed from the broker to a device task.
#[derive(Debug)]
enum DeviceRequest {
    Command { field: String, payload: String },
    /// Broker session (re)established.
    Resync,
}

/// Where commands for one device go.
struct Route {
    /// `{root_topic}/{device_id}`
    prefix: String,
    requests: mpsc::Sender<DeviceRequest>,
}

/// Subscribe command topics and publish every current value.
async fn resync<D: Device>(device: &mut D, prefix: &str, publisher: &Publisher) -> anyhow::Result<()> {
    for descriptor in device.descriptors() {
        if !descriptor.read_only {
            publisher
                .send(Outgoing::Subscribe(mqtt::command_topic(prefix, descriptor.name)))
                .await?;
        }
        let topic = mqtt::state_topic(prefix, descriptor.name);
        let payload = device.value(descriptor.name).to_payload();
        publisher.send(Outgoing::State { topic, payload }).await?;
    }
    Ok(())
}

/// Own a device engine: tick it on an interval and serve routed requests
/// between ticks.
async fn run_device<D: Device>(
    mut device: D,
    prefix: String,
    tick: Duration,
    publisher: Publisher,
    mut requests: mpsc::Receiver<DeviceRequest>,
) -> anyhow::Result<()> {
    let change_prefix = prefix.clone();
    let change_publisher = publisher.clone();
    device.on_change(Box::new(move |field, value| {
        let msg = Outgoing::State {
            topic: mqtt::state_topic(&change_prefix, field),
            payload: value.to_payload(),
        };
        // Dropped when the broker falls behind.
        change_publisher.publish(msg);
    }));

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut initialized = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Transport trouble is retried on the next tick.
                if let Err(err) = device.tick().await {
                    error!("{} tick failed: {:?}", device.name(), err);
                }
                if !initialized && device.is_initialized() {
                    initialized = true;
                    info!("{} at {} initialized", device.name(), prefix);
                }
            }
            request = requests.recv() => match request {
                Some(DeviceRequest::Command { field, payload }) => {
                    match device.command(&field, &payload).await {
                        Ok(true) => debug!("{} {} <- {}", device.name(), field, payload),
                        Ok(false) => info!("{} ignored {} <- '{}'", device.name(), field, payload),
                        Err(err) => error!("{} unable to set {}: {:?}", device.name(), field, err),
                    }
                }
                Some(DeviceRequest::Resync) => resync(&mut device, &prefix, &publisher).await?,
                None => break,
            }
        }
    }
    info!("{} task finishing", device.name());
    Ok(())
}

fn frame_logger(name: String) -> hvac_gate::device::PacketCallback {
    Box::new(move |raw, direction| match direction {
        Direction::Received => debug!("{} RX {:02x?}", name, raw),
        Direction::Sent => debug!("{} TX {:02x?}", name, raw),
    })
}

/// Open the port, connect the engine and spawn its task.
async fn start_device(
    tasks: &mut JoinSet<anyhow::Result<()>>,
    name: &str,
    cfg: &DeviceConfig,
    device_id: String,
    tick: Duration,
    publisher: Publisher,
) -> anyhow::Result<Route> {
    let prefix = mqtt::device_prefix(cfg.root_topic(), &device_id);
    let transport = SerialTransport::open(&cfg.port, cfg.baud_rate())?;
    let (sender, receiver) = mpsc::channel(10);

    match cfg.model {
        DeviceModel::Vallox => {
            let mut vallox = Vallox::new();
            if cfg.debug {
                vallox.set_packet_callback(frame_logger(name.to_string()));
            }
            vallox.connect(transport).await?;
            tasks.spawn(run_device(vallox, prefix.clone(), tick, publisher, receiver));
        }
        DeviceModel::OumanEh203 => {
            let mut ouman = Ouman::eh203();
            if let Some(poll_interval) = cfg.poll_interval() {
                ouman = ouman.with_poll_interval(poll_interval);
            }
            if cfg.debug {
                ouman.set_packet_callback(frame_logger(name.to_string()));
            }
            ouman.connect(transport).await?;
            tasks.spawn(run_device(ouman, prefix.clone(), tick, publisher, receiver));
        }
    }

    info!("Device {} ({:?}) on {} publishes under {}", name, cfg.model, cfg.port, prefix);
    Ok(Route {
        prefix,
        requests: sender,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log();
    let args = Args::parse();

    let config = Config::from_file(&args.config_path)?;
    info!(
        "Starting {} {}. Args: {:?} Config: {:?}",
        consts::GATE_NAME,
        consts::GATE_VERSION,
        args,
        config
    );

    let broker = mqtt::Initiator::new(
        &format!("{}-mqtt", consts::GATE_NAME),
        &args.mqtt_host,
        args.mqtt_port,
        &args.mqtt_username,
        &args.mqtt_password,
    )
    .await?
    .start();
    broker.send(Outgoing::Initial).await?;

    let mut ids = FileIdStore::open(&args.id_store)?;
    let tick = Duration::from_millis(args.tick_ms);
    let mut tasks = JoinSet::new();
    let mut routes = Vec::new();
    for (name, cfg) in &config.devices {
        let device_id = match &cfg.device_id {
            Some(id) => id.clone(),
            None => ids.allocate_id()?,
        };
        let route = start_device(&mut tasks, name, cfg, device_id, tick, broker.publisher()).await?;
        routes.push(route);
    }

    info!("{} initialized.", consts::GATE_NAME);

    // MQTT -> devices. If any device task dies, quit.
    loop {
        tokio::select! {
            msg = broker.recv() => match msg {
                Some(Incoming::Connected) => {
                    for route in &routes {
                        route.requests.send(DeviceRequest::Resync).await?;
                    }
                }
                Some(Incoming::Publish { topic, payload }) => {
                    let routed = routes.iter().find_map(|route| {
                        mqtt::parse_command_topic(&route.prefix, &topic).map(|field| (route, field))
                    });
                    match routed {
                        Some((route, field)) => {
                            let request = DeviceRequest::Command {
                                field: field.to_string(),
                                payload,
                            };
                            route.requests.send(request).await?;
                        }
                        None => info!("Unknown topic {} - ignoring", topic),
                    }
                }
                None => {
                    // The other side died.
                    info!("MQTT receiver finished");
                    break;
                }
            },
            Some(result) = tasks.join_next() => {
                match result {
                    Ok(Ok(())) => info!("Device task finished"),
                    Ok(Err(err)) => error!("Device task failed: {:?}", err),
                    Err(err) => error!("Device task panicked: {:?}", err),
                }
                break;
            }
        }
    }
    Ok(())
}
