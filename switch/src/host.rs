use std::{
    env,
    io::ErrorKind,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use rumqttc::{
    Client, Connection, ConnectionError, ConnectReturnCode, Event, Incoming, MqttOptions, QoS,
    RecvTimeoutError,
};
use tracing::{debug, info, trace, warn};

use light_switch_common::{
    actuator::pulse_width_us, mode, BrokerTransport, Controller, DeviceConfig, HardwareError,
    Indicator, OverridePin, PowerControl, ServoOutput, SntpQuery, StdTimebase, TransportError,
};

const DEFAULT_CONFIG_PATH: &str = "./.light-switch/config.json";
const AUTOMATION_OVERRIDE_VAR: &str = "LIGHT_SWITCH_AUTOMATION_OVERRIDE";
const DEEP_SLEEP_OVERRIDE_VAR: &str = "LIGHT_SWITCH_DEEP_SLEEP_OVERRIDE";

const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(15);
const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MQTT_POLL_SLICE: Duration = Duration::from_millis(1);
const MQTT_MAX_EVENTS_PER_POLL: usize = 32;

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = read_config_file(&config_path()).unwrap_or_else(|err| {
        warn!("failed to load device config: {err:#}");
        DeviceConfig::default()
    });
    apply_env_overrides(&mut config, |name| env::var(name).ok());
    config.sanitize();

    let runtime = mode::resolve_or_halt(
        &mut EnvOverridePin::new(AUTOMATION_OVERRIDE_VAR),
        &mut EnvOverridePin::new(DEEP_SLEEP_OVERRIDE_VAR),
        &mut ParkedHalt,
    );

    info!(
        "light switch simulation starting against mqtt://{}:{}",
        config.network.mqtt_host, config.network.mqtt_port
    );

    let transport = RumqttTransport::new(&config.network.mqtt_host, config.network.mqtt_port);
    let time_query = SntpQuery::from_config(&config.time);

    let mut controller = Controller::new(
        config,
        runtime,
        transport,
        time_query,
        LoggingServo,
        LoggingIndicator,
        StdTimebase::new(),
    );
    controller.start();
    controller.run()
}

fn config_path() -> PathBuf {
    env::var("LIGHT_SWITCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn read_config_file(path: &Path) -> anyhow::Result<DeviceConfig> {
    match std::fs::read_to_string(path) {
        Ok(raw) => DeviceConfig::from_json(&raw)
            .with_context(|| format!("invalid config in {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            Ok(DeviceConfig::default())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn apply_env_overrides(config: &mut DeviceConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("MQTT_HOST") {
        config.network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT") {
        match port.parse::<u16>() {
            Ok(port) => config.network.mqtt_port = port,
            Err(err) => warn!("ignoring MQTT_PORT `{port}`: {err}"),
        }
    }
    if let Some(user) = lookup("MQTT_USER") {
        config.network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        config.network.mqtt_pass = pass;
    }
    if let Some(server) = lookup("NTP_SERVER") {
        config.time.ntp_server = server;
    }
    if let Some(offset) = lookup("UTC_OFFSET_SECONDS") {
        match offset.parse::<i32>() {
            Ok(offset) => config.time.utc_offset_secs = offset,
            Err(err) => warn!("ignoring UTC_OFFSET_SECONDS `{offset}`: {err}"),
        }
    }
}

fn connack_result(code: ConnectReturnCode) -> Result<(), TransportError> {
    match code {
        ConnectReturnCode::Success => Ok(()),
        refused => Err(TransportError::Refused(format!("{refused:?}"))),
    }
}

fn connect_failure(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(format!("{code:?}")),
        other => TransportError::Connect(other.to_string()),
    }
}

struct RumqttTransport {
    host: String,
    port: u16,
    session: Option<(Client, Connection)>,
    connected: bool,
}

impl RumqttTransport {
    fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            session: None,
            connected: false,
        }
    }

    fn lost(&mut self, reason: String) -> TransportError {
        self.connected = false;
        self.session = None;
        TransportError::ConnectionLost(reason)
    }
}

impl BrokerTransport for RumqttTransport {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<(&str, &str)>,
    ) -> Result<(), TransportError> {
        self.session = None;
        self.connected = false;

        let mut options = MqttOptions::new(client_id, self.host.as_str(), self.port);
        options.set_keep_alive(MQTT_KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some((user, pass)) = credentials {
            options.set_credentials(user, pass);
        }

        let (client, mut connection) = Client::new(options, 16);

        let deadline = Instant::now() + MQTT_CONNECT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Connect(
                    "timed out waiting for CONNACK".to_string(),
                ));
            }

            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Incoming::ConnAck(ack)))) => {
                    debug!("broker CONNACK: {:?}", ack.code);
                    connack_result(ack.code)?;
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(connect_failure(err)),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TransportError::Connect(
                        "timed out waiting for CONNACK".to_string(),
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Connect("event loop stopped".to_string()));
                }
            }
        }

        self.session = Some((client, connection));
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let (client, _) = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|err| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let (client, _) = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|err| TransportError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    fn poll(&mut self, handler: &mut dyn FnMut(&str, &[u8])) -> Result<(), TransportError> {
        let (_, connection) = self.session.as_mut().ok_or(TransportError::NotConnected)?;

        for _ in 0..MQTT_MAX_EVENTS_PER_POLL {
            match connection.recv_timeout(MQTT_POLL_SLICE) {
                Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                    handler(&publish.topic, &publish.payload);
                }
                Ok(Ok(Event::Incoming(Incoming::Disconnect))) => {
                    return Err(self.lost("broker sent DISCONNECT".to_string()));
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(self.lost(err.to_string())),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.lost("event loop stopped".to_string()));
                }
            }
        }

        Ok(())
    }
}

struct LoggingServo;

impl ServoOutput for LoggingServo {
    fn set_angle(&mut self, degrees: u8) -> Result<(), HardwareError> {
        info!("servo -> {degrees}° ({} us pulse)", pulse_width_us(degrees));
        Ok(())
    }
}

struct LoggingIndicator;

impl Indicator for LoggingIndicator {
    fn set_lit(&mut self, lit: bool) -> Result<(), HardwareError> {
        trace!("indicator {}", if lit { "on" } else { "off" });
        Ok(())
    }
}

struct EnvOverridePin {
    var: &'static str,
    reference_driven: bool,
}

impl EnvOverridePin {
    fn new(var: &'static str) -> Self {
        Self {
            var,
            reference_driven: false,
        }
    }
}

impl OverridePin for EnvOverridePin {
    fn drive_reference(&mut self) -> Result<(), HardwareError> {
        self.reference_driven = true;
        Ok(())
    }

    fn is_engaged(&mut self) -> Result<bool, HardwareError> {
        if !self.reference_driven {
            return Ok(false);
        }

        match env::var(self.var) {
            Ok(value) => Ok(is_truthy(&value)),
            Err(env::VarError::NotPresent) => Ok(false),
            Err(err) => Err(HardwareError::new("override", format!("{}: {err}", self.var))),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "high" | "yes"
    )
}

// Nothing on a desktop resembles deep sleep.
struct ParkedHalt;

impl PowerControl for ParkedHalt {
    fn halt(&mut self) -> ! {
        info!("deep sleep requested, parking until the process is killed");
        loop {
            thread::park();
        }
    }
}
