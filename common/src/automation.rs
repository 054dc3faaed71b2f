use crate::{config::AutomationConfig, types::SwitchState};

// Boundary hours count as night.
pub fn is_night(hour: u8, config: &AutomationConfig) -> bool {
    hour <= config.morning_hour || (config.night_hour..=23).contains(&hour)
}

pub fn desired_state(hour: u8, config: &AutomationConfig) -> SwitchState {
    if is_night(hour, config) {
        SwitchState::On
    } else {
        SwitchState::Off
    }
}
