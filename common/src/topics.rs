pub const TOPIC_LIGHT_SWITCH: &str = "jarvis/light_switch/1";

pub const PAYLOAD_ON: &[u8] = b"1";
pub const PAYLOAD_OFF: &[u8] = b"0";
