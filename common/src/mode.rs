use log::{info, warn};

use crate::{
    platform::{OverridePin, PowerControl},
    types::RuntimeConfig,
};

pub fn resolve(
    automation_pin: &mut impl OverridePin,
    deep_sleep_pin: &mut impl OverridePin,
) -> RuntimeConfig {
    let automation_enabled = !read_override("automation", automation_pin);
    if automation_enabled {
        info!("mode_timebased_automate = on (default)");
    } else {
        info!("mode_timebased_automate = off");
    }

    let deep_sleep_enabled = read_override("deep sleep", deep_sleep_pin);
    if deep_sleep_enabled {
        info!("mode_deep_sleep = on");
    } else {
        info!("mode_deep_sleep = off (default)");
    }

    RuntimeConfig::new(automation_enabled, deep_sleep_enabled)
}

pub fn resolve_or_halt(
    automation_pin: &mut impl OverridePin,
    deep_sleep_pin: &mut impl OverridePin,
    power: &mut impl PowerControl,
) -> RuntimeConfig {
    let config = resolve(automation_pin, deep_sleep_pin);
    if config.deep_sleep_enabled() {
        info!("Entering Deep Sleep...");
        power.halt();
    }
    config
}

fn read_override(name: &str, pin: &mut impl OverridePin) -> bool {
    if let Err(err) = pin.drive_reference() {
        warn!("failed to drive {name} override reference pin: {err}");
        return false;
    }

    match pin.is_engaged() {
        Ok(engaged) => engaged,
        Err(err) => {
            warn!("failed to read {name} override pin, assuming default: {err}");
            false
        }
    }
}
