use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::NetworkConfig,
    error::TransportError,
    platform::Timebase,
    types::{ConnectionState, SwitchState},
};

pub trait BrokerTransport {
    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<(&str, &str)>,
    ) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    fn poll(&mut self, handler: &mut dyn FnMut(&str, &[u8])) -> Result<(), TransportError>;
}

pub struct MessagingClient<T> {
    transport: T,
    state: ConnectionState,
    control_topic: String,
    client_id_prefix: String,
    credentials: Option<(String, String)>,
    backoff_ms: u64,
    rng: StdRng,
}

impl<T: BrokerTransport> MessagingClient<T> {
    pub fn new(transport: T, network: &NetworkConfig, backoff_ms: u64) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            control_topic: network.control_topic.clone(),
            client_id_prefix: network.client_id_prefix.clone(),
            credentials: network
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            backoff_ms,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.transport.is_connected()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn next_client_id(&mut self) -> String {
        format!("{}-{:x}", self.client_id_prefix, self.rng.gen::<u16>())
    }

    pub fn ensure_connected(&mut self, timebase: &mut impl Timebase) {
        while !self.is_connected() {
            self.state = ConnectionState::Connecting;
            let client_id = self.next_client_id();
            info!("Attempting MQTT connection as `{client_id}`...");

            let credentials = self
                .credentials
                .as_ref()
                .map(|(user, pass)| (user.as_str(), pass.as_str()));

            let result = self
                .transport
                .connect(&client_id, credentials)
                .and_then(|()| {
                    // Subscriptions never survive a reconnect.
                    self.transport.subscribe(&self.control_topic)
                });

            match result {
                Ok(()) => {
                    self.state = ConnectionState::Connected;
                    info!("connected, subscribed to `{}`", self.control_topic);
                }
                Err(err) => {
                    self.state = ConnectionState::Disconnected;
                    warn!(
                        "failed, {err}; try again in {} seconds",
                        self.backoff_ms / 1000
                    );
                    timebase.delay_ms(self.backoff_ms);
                }
            }
        }
    }

    pub fn poll(&mut self, mut handler: impl FnMut(&str, &[u8])) {
        if self.state != ConnectionState::Connected {
            return;
        }

        if let Err(err) = self.transport.poll(&mut handler) {
            warn!("mqtt poll error: {err}");
            self.state = ConnectionState::Disconnected;
        }
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8]) {
        let buffer = payload.to_vec();

        match self.transport.publish(topic, buffer) {
            Ok(()) => {}
            Err(err @ (TransportError::NotConnected | TransportError::ConnectionLost(_))) => {
                warn!("mqtt publish to `{topic}` dropped: {err}");
                self.state = ConnectionState::Disconnected;
            }
            Err(err) => warn!("mqtt publish failed: {err}"),
        }
    }
}

pub fn decode_command(control_topic: &str, topic: &str, payload: &[u8]) -> Option<SwitchState> {
    if topic != control_topic {
        return None;
    }
    SwitchState::from_payload(payload)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        testing::{FakeTransport, TransportCall, VirtualTimebase},
        topics::TOPIC_LIGHT_SWITCH,
    };

    fn client(transport: FakeTransport) -> MessagingClient<FakeTransport> {
        MessagingClient::new(transport, &NetworkConfig::default(), 5_000)
    }

    #[test]
    fn connects_and_subscribes_on_first_try() {
        let mut timebase = VirtualTimebase::default();
        let mut messaging = client(FakeTransport::default());

        messaging.ensure_connected(&mut timebase);

        assert!(messaging.is_connected());
        assert_eq!(messaging.state(), ConnectionState::Connected);
        assert!(timebase.delays.is_empty());
        assert_eq!(
            messaging.transport().subscriptions,
            vec![TOPIC_LIGHT_SWITCH.to_string()]
        );
    }

    #[test]
    fn each_failed_attempt_backs_off_before_retrying() {
        let mut timebase = VirtualTimebase::default();
        let mut messaging = client(FakeTransport::failing_connects(3));

        messaging.ensure_connected(&mut timebase);

        assert!(messaging.is_connected());
        assert_eq!(timebase.delays, vec![5_000, 5_000, 5_000]);
        assert_eq!(timebase.now_ms(), 15_000);
        assert_eq!(
            messaging.transport().calls,
            vec![
                TransportCall::ConnectFailed,
                TransportCall::ConnectFailed,
                TransportCall::ConnectFailed,
                TransportCall::Connected,
                TransportCall::Subscribed,
            ]
        );
    }

    #[test]
    fn every_attempt_uses_a_fresh_prefixed_client_id() {
        let mut timebase = VirtualTimebase::default();
        let mut messaging = client(FakeTransport::failing_connects(2));

        messaging.ensure_connected(&mut timebase);

        let ids = &messaging.transport().client_ids;
        assert_eq!(ids.len(), 3);
        for id in ids {
            let suffix = id.strip_prefix("JarvisClient-").unwrap();
            assert!(u16::from_str_radix(suffix, 16).is_ok(), "bad id {id}");
        }
    }

    #[test]
    fn passes_credentials_only_when_configured() {
        let mut timebase = VirtualTimebase::default();
        let mut network = NetworkConfig::default();
        network.mqtt_user = "jarvis".to_string();
        network.mqtt_pass = "hunter2".to_string();
        let mut messaging = MessagingClient::new(FakeTransport::default(), &network, 5_000);

        messaging.ensure_connected(&mut timebase);

        assert_eq!(
            messaging.transport().credentials,
            vec![Some(("jarvis".to_string(), "hunter2".to_string()))]
        );

        let mut anonymous = client(FakeTransport::default());
        anonymous.ensure_connected(&mut timebase);
        assert_eq!(anonymous.transport().credentials, vec![None]);
    }

    #[test]
    fn failed_subscribe_counts_as_failed_attempt() {
        let mut timebase = VirtualTimebase::default();
        let mut transport = FakeTransport::default();
        transport.subscribe_failures = 1;
        let mut messaging = client(transport);

        messaging.ensure_connected(&mut timebase);

        assert!(messaging.is_connected());
        assert_eq!(timebase.delays, vec![5_000]);
        assert_eq!(messaging.transport().subscriptions.len(), 1);
    }

    #[test]
    fn resubscribes_after_connection_loss() {
        let mut timebase = VirtualTimebase::default();
        let mut messaging = client(FakeTransport::default());
        messaging.ensure_connected(&mut timebase);

        messaging.transport_mut().fail_next_poll("connection reset");
        messaging.poll(|_, _| {});
        assert_eq!(messaging.state(), ConnectionState::Disconnected);
        assert!(!messaging.is_connected());

        messaging.ensure_connected(&mut timebase);

        assert!(messaging.is_connected());
        assert_eq!(messaging.transport().subscriptions.len(), 2);
    }

    #[test]
    fn poll_dispatches_every_available_message() {
        let mut timebase = VirtualTimebase::default();
        let mut messaging = client(FakeTransport::default());
        messaging.ensure_connected(&mut timebase);
        messaging.transport_mut().inject(TOPIC_LIGHT_SWITCH, b"1");
        messaging.transport_mut().inject("other/topic", b"0");

        let mut seen = Vec::new();
        messaging.poll(|topic, payload| seen.push((topic.to_string(), payload.to_vec())));

        assert_eq!(
            seen,
            vec![
                (TOPIC_LIGHT_SWITCH.to_string(), b"1".to_vec()),
                ("other/topic".to_string(), b"0".to_vec()),
            ]
        );
    }

    #[test]
    fn poll_is_skipped_while_disconnected() {
        let mut messaging = client(FakeTransport::default());
        messaging.transport_mut().inject(TOPIC_LIGHT_SWITCH, b"1");

        let mut calls = 0;
        messaging.poll(|_, _| calls += 1);

        assert_eq!(calls, 0);
    }

    #[test]
    fn publish_copies_exactly_the_payload() {
        let mut timebase = VirtualTimebase::default();
        let mut messaging = client(FakeTransport::default());
        messaging.ensure_connected(&mut timebase);

        let source = *b"0trailing";
        messaging.publish(TOPIC_LIGHT_SWITCH, &source[..1]);
        messaging.publish(TOPIC_LIGHT_SWITCH, &source[..0]);

        let published = &messaging.transport().published;
        assert_eq!(published[0], (TOPIC_LIGHT_SWITCH.to_string(), b"0".to_vec()));
        assert_eq!(published[1], (TOPIC_LIGHT_SWITCH.to_string(), Vec::new()));
    }

    #[test]
    fn publish_failure_marks_connection_lost() {
        let mut messaging = client(FakeTransport::default());

        messaging.publish(TOPIC_LIGHT_SWITCH, b"1");

        assert_eq!(messaging.state(), ConnectionState::Disconnected);
        assert!(messaging.transport().published.is_empty());
    }

    #[test]
    fn decodes_only_the_control_topic() {
        assert_eq!(
            decode_command(TOPIC_LIGHT_SWITCH, TOPIC_LIGHT_SWITCH, b"1"),
            Some(SwitchState::On)
        );
        assert_eq!(
            decode_command(TOPIC_LIGHT_SWITCH, TOPIC_LIGHT_SWITCH, b"0000"),
            Some(SwitchState::Off)
        );
        assert_eq!(decode_command(TOPIC_LIGHT_SWITCH, TOPIC_LIGHT_SWITCH, b""), None);
        assert_eq!(decode_command(TOPIC_LIGHT_SWITCH, TOPIC_LIGHT_SWITCH, b"x"), None);
        assert_eq!(decode_command(TOPIC_LIGHT_SWITCH, "jarvis/other", b"1"), None);
    }
}
