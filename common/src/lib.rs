pub mod actuator;
pub mod automation;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod messaging;
pub mod mode;
pub mod platform;
pub mod scheduler;
pub mod sntp;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

pub use actuator::ActuatorDriver;
pub use clock::{ClockState, TimeQuery, TimeSource};
pub use config::DeviceConfig;
pub use controller::Controller;
pub use error::{HardwareError, SyncError, TransportError};
pub use messaging::{BrokerTransport, MessagingClient};
pub use platform::{Indicator, OverridePin, PowerControl, ServoOutput, StdTimebase, Timebase};
pub use sntp::SntpQuery;
pub use topics::*;
pub use types::{ConnectionState, RuntimeConfig, SwitchState};
