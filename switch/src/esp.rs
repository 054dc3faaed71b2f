use std::{
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::Utc;
use embedded_svc::{
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    gpio::{AnyInputPin, AnyOutputPin, Input, InputPin, Output, OutputPin, PinDriver, Pull},
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution},
    prelude::*,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    log::EspLogger,
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use light_switch_common::{
    actuator::{duty_for_pulse, pulse_width_us},
    config::NetworkConfig,
    mode, BrokerTransport, Controller, DeviceConfig, HardwareError, Indicator, OverridePin,
    PowerControl, ServoOutput, StdTimebase, SyncError, TimeQuery, TransportError,
};

const NVS_NAMESPACE: &str = "light_switch";
const NVS_CONFIG_KEY: &str = "config_json";

const WIFI_RETRY_DELAY: Duration = Duration::from_millis(500);
const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SNTP_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let mut status_led = StatusLed::new(pins.gpio2.downgrade_output())
        .context("failed to initialize status LED")?;
    status_led.set_lit(true)?;

    let mut automation_pin =
        GpioOverridePin::new(pins.gpio25.downgrade_output(), pins.gpio26.downgrade_input())
            .context("failed to initialize automation override pins")?;
    let mut deep_sleep_pin =
        GpioOverridePin::new(pins.gpio27.downgrade_output(), pins.gpio14.downgrade_input())
            .context("failed to initialize deep sleep override pins")?;

    let runtime = mode::resolve_or_halt(&mut automation_pin, &mut deep_sleep_pin, &mut DeepSleep);

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let config = load_device_config(nvs_partition.clone()).unwrap_or_else(|err| {
        warn!("failed to load device config from NVS: {err:#}");
        DeviceConfig::default()
    });

    let _wifi = connect_wifi(peripherals.modem, sys_loop, nvs_partition, &config.network)
        .context("wifi startup failed")?;

    let time_query = EspTimeQuery::start(Duration::from_millis(config.time.query_timeout_ms))
        .context("failed to start SNTP")?;

    let timer = LedcTimerDriver::new(
        peripherals.ledc.timer0,
        &TimerConfig::default()
            .frequency(50.Hz().into())
            .resolution(Resolution::Bits14),
    )
    .context("failed to initialize servo PWM timer")?;
    let ledc = LedcDriver::new(peripherals.ledc.channel0, timer, pins.gpio18)
        .context("failed to initialize servo PWM channel")?;

    let transport = EspMqttTransport::new(&config.network);

    let mut controller = Controller::new(
        config,
        runtime,
        transport,
        time_query,
        LedcServo { driver: ledc },
        status_led,
        StdTimebase::new(),
    );
    controller.start();
    controller.run()
}

fn load_device_config(partition: EspDefaultNvsPartition) -> anyhow::Result<DeviceConfig> {
    let nvs = EspNvs::new(partition, NVS_NAMESPACE, false)?;
    let mut buffer = vec![0_u8; 4096];

    match nvs.get_str(NVS_CONFIG_KEY, &mut buffer)? {
        Some(raw) => Ok(DeviceConfig::from_json(raw)?),
        None => {
            info!("no stored config, using defaults");
            Ok(DeviceConfig::default())
        }
    }
}

// ESP-IDF keeps the system clock disciplined once SNTP has completed.
struct EspTimeQuery {
    sntp: EspSntp<'static>,
}

impl EspTimeQuery {
    fn start(first_sync_wait: Duration) -> anyhow::Result<Self> {
        let sntp = EspSntp::new_default()?;
        info!("SNTP initialized");

        let deadline = Instant::now() + first_sync_wait;
        while !matches!(sntp.get_sync_status(), SyncStatus::Completed)
            && Instant::now() < deadline
        {
            thread::sleep(SNTP_POLL_INTERVAL);
        }

        Ok(Self { sntp })
    }
}

impl TimeQuery for EspTimeQuery {
    fn query_unix_secs(&mut self) -> Result<i64, SyncError> {
        match self.sntp.get_sync_status() {
            SyncStatus::Completed => Ok(Utc::now().timestamp()),
            _ => Err(SyncError::Timeout),
        }
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("Connecting to {}", network.wifi_ssid);

    loop {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => break,
            Err(err) => {
                warn!("wifi connect failed: {err}");
                let _ = wifi.disconnect();
                thread::sleep(WIFI_RETRY_DELAY);
            }
        }
    }

    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
    info!("WiFi connected, IP address: {}", ip_info.ip);

    Ok(wifi)
}

enum MqttEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

// The client callback runs on the MQTT task and only forwards events.
struct EspMqttTransport {
    url: String,
    client: Option<EspMqttClient<'static>>,
    events: Option<Receiver<MqttEvent>>,
    connected: bool,
}

impl EspMqttTransport {
    fn new(network: &NetworkConfig) -> Self {
        Self {
            url: format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port),
            client: None,
            events: None,
            connected: false,
        }
    }

    fn lost(&mut self, reason: &str) -> TransportError {
        self.connected = false;
        self.client = None;
        self.events = None;
        TransportError::ConnectionLost(reason.to_string())
    }
}

impl BrokerTransport for EspMqttTransport {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<(&str, &str)>,
    ) -> Result<(), TransportError> {
        // Drop any previous session before opening a new one.
        self.client = None;
        self.events = None;
        self.connected = false;

        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            username: credentials.map(|(user, _)| user),
            password: credentials.map(|(_, pass)| pass),
            ..Default::default()
        };

        let (tx, rx) = mpsc::channel();
        let client = EspMqttClient::new_cb(&self.url, &conf, move |event| {
            let forwarded = match event.payload() {
                EventPayload::Connected(_) => Some(MqttEvent::Connected),
                EventPayload::Disconnected => Some(MqttEvent::Disconnected),
                EventPayload::Received {
                    topic: Some(topic),
                    data,
                    details: Details::Complete,
                    ..
                } => Some(MqttEvent::Message {
                    topic: topic.to_string(),
                    payload: data.to_vec(),
                }),
                EventPayload::Error(err) => {
                    warn!("mqtt client error: {err:?}");
                    None
                }
                _ => None,
            };

            if let Some(event) = forwarded {
                let _ = tx.send(event);
            }
        })
        .map_err(|err| TransportError::Connect(err.to_string()))?;

        let deadline = Instant::now() + MQTT_CONNECT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(MqttEvent::Connected) => break,
                Ok(MqttEvent::Disconnected) => {
                    return Err(TransportError::Refused(
                        "broker closed the connection".to_string(),
                    ));
                }
                Ok(MqttEvent::Message { .. }) => {}
                Err(_) => {
                    return Err(TransportError::Connect(
                        "timed out waiting for broker".to_string(),
                    ));
                }
            }
        }

        self.client = Some(client);
        self.events = Some(rx);
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map(|_| ())
            .map_err(|err| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .publish(topic, QoS::AtMostOnce, false, &payload)
            .map(|_| ())
            .map_err(|err| TransportError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    fn poll(&mut self, handler: &mut dyn FnMut(&str, &[u8])) -> Result<(), TransportError> {
        let events = self.events.as_ref().ok_or(TransportError::NotConnected)?;

        loop {
            match events.try_recv() {
                Ok(MqttEvent::Message { topic, payload }) => handler(&topic, &payload),
                Ok(MqttEvent::Connected) => {}
                Ok(MqttEvent::Disconnected) => return Err(self.lost("broker disconnected")),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(self.lost("mqtt client stopped")),
            }
        }
    }
}

struct LedcServo {
    driver: LedcDriver<'static>,
}

impl ServoOutput for LedcServo {
    fn set_angle(&mut self, degrees: u8) -> Result<(), HardwareError> {
        let duty = duty_for_pulse(pulse_width_us(degrees), self.driver.get_max_duty());
        self.driver
            .set_duty(duty)
            .map_err(|err| HardwareError::new("servo", err.to_string()))
    }
}

// Active-low.
struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl StatusLed {
    fn new(pin: AnyOutputPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::output(pin)?;
        pin.set_high()?;
        Ok(Self { pin })
    }
}

impl Indicator for StatusLed {
    fn set_lit(&mut self, lit: bool) -> Result<(), HardwareError> {
        let result = if lit {
            self.pin.set_low()
        } else {
            self.pin.set_high()
        };
        result.map_err(|err| HardwareError::new("status led", err.to_string()))
    }
}

struct GpioOverridePin {
    reference: PinDriver<'static, AnyOutputPin, Output>,
    sense: PinDriver<'static, AnyInputPin, Input>,
}

impl GpioOverridePin {
    fn new(reference: AnyOutputPin, sense: AnyInputPin) -> anyhow::Result<Self> {
        let reference = PinDriver::output(reference)?;
        let mut sense = PinDriver::input(sense)?;
        sense.set_pull(Pull::Down)?;
        Ok(Self { reference, sense })
    }
}

impl OverridePin for GpioOverridePin {
    fn drive_reference(&mut self) -> Result<(), HardwareError> {
        self.reference
            .set_high()
            .map_err(|err| HardwareError::new("override", err.to_string()))
    }

    fn is_engaged(&mut self) -> Result<bool, HardwareError> {
        Ok(self.sense.is_high())
    }
}

struct DeepSleep;

impl PowerControl for DeepSleep {
    #[allow(unreachable_code)]
    fn halt(&mut self) -> ! {
        unsafe { esp_idf_svc::sys::esp_deep_sleep_start() };
        loop {
            thread::park();
        }
    }
}
