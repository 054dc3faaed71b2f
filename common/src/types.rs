use crate::topics::{PAYLOAD_OFF, PAYLOAD_ON};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn payload(self) -> &'static [u8] {
        match self {
            Self::On => PAYLOAD_ON,
            Self::Off => PAYLOAD_OFF,
        }
    }

    // Only the first byte is significant.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload.first() {
            Some(b'1') => Some(Self::On),
            Some(b'0') => Some(Self::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// Fixed once at boot by the mode resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    automation_enabled: bool,
    deep_sleep_enabled: bool,
}

impl RuntimeConfig {
    pub(crate) fn new(automation_enabled: bool, deep_sleep_enabled: bool) -> Self {
        Self {
            automation_enabled,
            deep_sleep_enabled,
        }
    }

    pub fn automation_enabled(&self) -> bool {
        self.automation_enabled
    }

    pub fn deep_sleep_enabled(&self) -> bool {
        self.deep_sleep_enabled
    }
}
