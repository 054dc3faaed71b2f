use std::collections::VecDeque;

use crate::{
    clock::TimeQuery,
    error::{HardwareError, SyncError, TransportError},
    messaging::BrokerTransport,
    platform::{Indicator, OverridePin, PowerControl, ServoOutput, Timebase},
};

#[derive(Debug, Default)]
pub struct VirtualTimebase {
    pub now: u64,
    pub delays: Vec<u64>,
}

impl VirtualTimebase {
    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }
}

impl Timebase for VirtualTimebase {
    fn now_ms(&self) -> u64 {
        self.now
    }

    fn delay_ms(&mut self, ms: u64) {
        self.delays.push(ms);
        self.now += ms;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCall {
    ConnectFailed,
    Connected,
    SubscribeFailed,
    Subscribed,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    pub connected: bool,
    pub connect_failures: usize,
    pub subscribe_failures: usize,
    pub echo_publishes: bool,
    pub calls: Vec<TransportCall>,
    pub client_ids: Vec<String>,
    pub credentials: Vec<Option<(String, String)>>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub inbound: VecDeque<(String, Vec<u8>)>,
    pub poll_failure: Option<String>,
}

impl FakeTransport {
    pub fn failing_connects(count: usize) -> Self {
        Self {
            connect_failures: count,
            ..Self::default()
        }
    }

    pub fn echoing() -> Self {
        Self {
            echo_publishes: true,
            ..Self::default()
        }
    }

    pub fn inject(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back((topic.to_string(), payload.to_vec()));
    }

    pub fn fail_next_poll(&mut self, reason: &str) {
        self.poll_failure = Some(reason.to_string());
    }
}

impl BrokerTransport for FakeTransport {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<(&str, &str)>,
    ) -> Result<(), TransportError> {
        self.client_ids.push(client_id.to_string());
        self.credentials
            .push(credentials.map(|(user, pass)| (user.to_string(), pass.to_string())));

        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            self.calls.push(TransportCall::ConnectFailed);
            return Err(TransportError::Refused("rc=-2".to_string()));
        }

        self.connected = true;
        self.calls.push(TransportCall::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        if self.subscribe_failures > 0 {
            self.subscribe_failures -= 1;
            self.connected = false;
            self.calls.push(TransportCall::SubscribeFailed);
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "timed out".to_string(),
            });
        }

        self.subscriptions.push(topic.to_string());
        self.calls.push(TransportCall::Subscribed);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        if self.echo_publishes {
            self.inbound.push_back((topic.to_string(), payload.clone()));
        }
        self.published.push((topic.to_string(), payload));
        Ok(())
    }

    fn poll(&mut self, handler: &mut dyn FnMut(&str, &[u8])) -> Result<(), TransportError> {
        if let Some(reason) = self.poll_failure.take() {
            self.connected = false;
            return Err(TransportError::ConnectionLost(reason));
        }

        while let Some((topic, payload)) = self.inbound.pop_front() {
            handler(&topic, &payload);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeServo {
    pub angles: Vec<u8>,
    pub broken: bool,
}

impl FakeServo {
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }
}

impl ServoOutput for FakeServo {
    fn set_angle(&mut self, degrees: u8) -> Result<(), HardwareError> {
        if self.broken {
            return Err(HardwareError::new("servo", "pwm channel unavailable"));
        }
        self.angles.push(degrees);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeIndicator {
    pub states: Vec<bool>,
}

impl Indicator for FakeIndicator {
    fn set_lit(&mut self, lit: bool) -> Result<(), HardwareError> {
        self.states.push(lit);
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakePin {
    engaged: Option<bool>,
    pub reference_driven: bool,
}

impl FakePin {
    pub fn low() -> Self {
        Self {
            engaged: Some(false),
            reference_driven: false,
        }
    }

    pub fn high() -> Self {
        Self {
            engaged: Some(true),
            reference_driven: false,
        }
    }

    pub fn broken() -> Self {
        Self {
            engaged: None,
            reference_driven: false,
        }
    }
}

impl OverridePin for FakePin {
    fn drive_reference(&mut self) -> Result<(), HardwareError> {
        self.reference_driven = true;
        Ok(())
    }

    fn is_engaged(&mut self) -> Result<bool, HardwareError> {
        // A jumper only reads high once its reference pin is driven.
        match self.engaged {
            Some(engaged) => Ok(engaged && self.reference_driven),
            None => Err(HardwareError::new("override", "gpio read failed")),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakePower;

impl PowerControl for FakePower {
    fn halt(&mut self) -> ! {
        panic!("halted");
    }
}

// Times out forever once the script runs out.
#[derive(Debug, Default)]
pub struct FakeTimeQuery {
    answers: VecDeque<Result<i64, SyncError>>,
    pub queries: usize,
}

impl FakeTimeQuery {
    pub fn answering(answers: impl IntoIterator<Item = Result<i64, SyncError>>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            queries: 0,
        }
    }
}

impl TimeQuery for FakeTimeQuery {
    fn query_unix_secs(&mut self) -> Result<i64, SyncError> {
        self.queries += 1;
        self.answers.pop_front().unwrap_or(Err(SyncError::Timeout))
    }
}
