use serde::{Deserialize, Serialize};

use crate::topics::TOPIC_LIGHT_SWITCH;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id_prefix: String,
    pub control_topic: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "broker-example.com".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id_prefix: "JarvisClient".to_string(),
            control_topic: TOPIC_LIGHT_SWITCH.to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.mqtt_user.is_empty() {
            None
        } else {
            Some((self.mqtt_user.as_str(), self.mqtt_pass.as_str()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub ntp_server: String,
    pub ntp_port: u16,
    pub utc_offset_secs: i32,
    pub query_timeout_ms: u64,
    pub resync_after_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            ntp_server: "pool.ntp.org".to_string(),
            ntp_port: 123,
            utc_offset_secs: 25_200,
            query_timeout_ms: 2_000,
            resync_after_ms: 3_600_000,
            retry_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActuatorConfig {
    pub on_angle: u8,
    pub off_angle: u8,
    pub settle_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            on_angle: 0,
            off_angle: 30,
            settle_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutomationConfig {
    pub morning_hour: u8,
    pub night_hour: u8,
    pub remote_control: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            morning_hour: 6,
            night_hour: 18,
            remote_control: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    pub lit_ms: u64,
    pub dark_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            lit_ms: 500,
            dark_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootConfig {
    pub reconnect_backoff_ms: u64,
    pub settle_window_ms: u64,
    pub loop_idle_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 5_000,
            settle_window_ms: 3_000,
            loop_idle_ms: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub network: NetworkConfig,
    pub time: TimeConfig,
    pub actuator: ActuatorConfig,
    pub automation: AutomationConfig,
    pub heartbeat: HeartbeatConfig,
    pub boot: BootConfig,
}

impl DeviceConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.actuator.sanitize();
        self.automation.sanitize();
        self.heartbeat.sanitize();
        self.time.sanitize();
        self.boot.sanitize();

        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = 1883;
        }
        if self.network.control_topic.trim().is_empty() {
            self.network.control_topic = TOPIC_LIGHT_SWITCH.to_string();
        }
        if self.network.client_id_prefix.is_empty() {
            self.network.client_id_prefix = NetworkConfig::default().client_id_prefix;
        }
    }
}

impl ActuatorConfig {
    pub fn sanitize(&mut self) {
        self.on_angle = self.on_angle.min(180);
        self.off_angle = self.off_angle.min(180);
        self.settle_ms = self.settle_ms.clamp(50, 5_000);
    }
}

impl AutomationConfig {
    pub fn sanitize(&mut self) {
        self.morning_hour = self.morning_hour.min(23);
        self.night_hour = self.night_hour.min(23);
    }
}

impl HeartbeatConfig {
    pub fn sanitize(&mut self) {
        self.interval_ms = self.interval_ms.max(100);
    }
}

impl BootConfig {
    pub fn sanitize(&mut self) {
        self.reconnect_backoff_ms = self.reconnect_backoff_ms.clamp(1_000, 60_000);
        self.settle_window_ms = self.settle_window_ms.min(30_000);
        self.loop_idle_ms = self.loop_idle_ms.clamp(1, 1_000);
    }
}

impl TimeConfig {
    pub fn sanitize(&mut self) {
        // No inhabited zone is more than 14 hours away from UTC.
        self.utc_offset_secs = self.utc_offset_secs.clamp(-14 * 3600, 14 * 3600);
        self.query_timeout_ms = self.query_timeout_ms.clamp(100, 30_000);
        if self.ntp_port == 0 {
            self.ntp_port = 123;
        }
    }
}
