use log::{debug, info};

use crate::{
    config::ActuatorConfig,
    error::HardwareError,
    platform::{ServoOutput, Timebase},
    types::SwitchState,
};

pub const SERVO_MAX_ANGLE: u8 = 180;
pub const SERVO_MIN_PULSE_US: u32 = 544;
pub const SERVO_MAX_PULSE_US: u32 = 2_400;
pub const SERVO_FRAME_US: u32 = 20_000;

pub fn pulse_width_us(angle: u8) -> u32 {
    let angle = u32::from(angle.min(SERVO_MAX_ANGLE));
    SERVO_MIN_PULSE_US
        + (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) * angle / u32::from(SERVO_MAX_ANGLE)
}

pub fn duty_for_pulse(pulse_us: u32, max_duty: u32) -> u32 {
    let pulse_us = u64::from(pulse_us.min(SERVO_FRAME_US));
    (pulse_us * u64::from(max_duty) / u64::from(SERVO_FRAME_US)) as u32
}

pub struct ActuatorDriver<S> {
    servo: S,
    config: ActuatorConfig,
    position: Option<SwitchState>,
}

impl<S: ServoOutput> ActuatorDriver<S> {
    pub fn new(servo: S, config: ActuatorConfig) -> Self {
        Self {
            servo,
            config,
            position: None,
        }
    }

    pub fn position(&self) -> Option<SwitchState> {
        self.position
    }

    pub fn servo(&self) -> &S {
        &self.servo
    }

    pub fn angle_for(&self, state: SwitchState) -> u8 {
        match state {
            SwitchState::On => self.config.on_angle,
            SwitchState::Off => self.config.off_angle,
        }
    }

    // Re-commanding the current position is a no-op.
    pub fn set_state(
        &mut self,
        state: SwitchState,
        timebase: &mut impl Timebase,
    ) -> Result<(), HardwareError> {
        if self.position == Some(state) {
            debug!("switch already {}, not moving", state.as_str());
            return Ok(());
        }

        let angle = self.angle_for(state);
        self.servo.set_angle(angle)?;
        timebase.delay_ms(self.config.settle_ms);
        self.position = Some(state);

        info!("lights: {} (servo at {angle}°)", state.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{FakeServo, VirtualTimebase};

    #[test]
    fn pulse_width_spans_servo_range() {
        assert_eq!(pulse_width_us(0), 544);
        assert_eq!(pulse_width_us(90), 1_472);
        assert_eq!(pulse_width_us(180), 2_400);
        assert_eq!(pulse_width_us(255), 2_400);
    }

    #[test]
    fn duty_scales_with_resolution() {
        // 14-bit LEDC channel at 50 Hz.
        assert_eq!(duty_for_pulse(544, 16_383), 445);
        assert_eq!(duty_for_pulse(2_400, 16_383), 1_965);
        assert_eq!(duty_for_pulse(40_000, 1_000), 1_000);
    }

    #[test]
    fn moves_to_calibrated_angles_and_settles() {
        let mut timebase = VirtualTimebase::default();
        let mut driver = ActuatorDriver::new(FakeServo::default(), ActuatorConfig::default());

        driver.set_state(SwitchState::On, &mut timebase).unwrap();
        driver.set_state(SwitchState::Off, &mut timebase).unwrap();

        assert_eq!(driver.servo().angles, vec![0, 30]);
        assert_eq!(timebase.delays, vec![500, 500]);
        assert_eq!(timebase.now_ms(), 1_000);
        assert_eq!(driver.position(), Some(SwitchState::Off));
    }

    #[test]
    fn repeated_command_is_a_no_op() {
        let mut timebase = VirtualTimebase::default();
        let mut driver = ActuatorDriver::new(FakeServo::default(), ActuatorConfig::default());

        driver.set_state(SwitchState::On, &mut timebase).unwrap();
        driver.set_state(SwitchState::On, &mut timebase).unwrap();

        assert_eq!(driver.servo().angles, vec![0]);
        assert_eq!(timebase.delays, vec![500]);
    }

    #[test]
    fn servo_failure_leaves_position_unchanged() {
        let mut timebase = VirtualTimebase::default();
        let mut driver = ActuatorDriver::new(FakeServo::broken(), ActuatorConfig::default());

        assert!(driver.set_state(SwitchState::On, &mut timebase).is_err());
        assert_eq!(driver.position(), None);
        assert!(timebase.delays.is_empty());
    }
}
