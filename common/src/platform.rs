use crate::error::HardwareError;

pub trait Timebase {
    fn now_ms(&self) -> u64;
    fn delay_ms(&mut self, ms: u64);
}

pub trait ServoOutput {
    fn set_angle(&mut self, degrees: u8) -> Result<(), HardwareError>;
}

pub trait Indicator {
    fn set_lit(&mut self, lit: bool) -> Result<(), HardwareError>;
}

pub trait OverridePin {
    fn drive_reference(&mut self) -> Result<(), HardwareError>;
    fn is_engaged(&mut self) -> Result<bool, HardwareError>;
}

// Only an external reset resumes execution.
pub trait PowerControl {
    fn halt(&mut self) -> !;
}

#[derive(Debug, Clone, Copy)]
pub struct StdTimebase {
    start: std::time::Instant,
}

impl StdTimebase {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for StdTimebase {
    fn default() -> Self {
        Self::new()
    }
}

impl Timebase for StdTimebase {
    fn now_ms(&self) -> u64 {
        self.start
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}
