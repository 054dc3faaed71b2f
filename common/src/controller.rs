use log::{debug, info, trace, warn};

use crate::{
    actuator::ActuatorDriver,
    automation,
    clock::{ClockState, TimeQuery, TimeSource},
    config::DeviceConfig,
    messaging::{decode_command, BrokerTransport, MessagingClient},
    platform::{Indicator, ServoOutput, Timebase},
    scheduler::{self, ScheduledTask, TaskAction, TaskSchedule},
    types::{RuntimeConfig, SwitchState},
};

pub struct Controller<T, Q, S, I, C> {
    config: DeviceConfig,
    runtime: RuntimeConfig,
    messaging: MessagingClient<T>,
    time: TimeSource<Q>,
    actuator: ActuatorDriver<S>,
    indicator: I,
    timebase: C,
    tasks: TaskSchedule,
}

impl<T, Q, S, I, C> Controller<T, Q, S, I, C>
where
    T: BrokerTransport,
    Q: TimeQuery,
    S: ServoOutput,
    I: Indicator,
    C: Timebase,
{
    pub fn new(
        config: DeviceConfig,
        runtime: RuntimeConfig,
        transport: T,
        time_query: Q,
        servo: S,
        indicator: I,
        timebase: C,
    ) -> Self {
        let messaging =
            MessagingClient::new(transport, &config.network, config.boot.reconnect_backoff_ms);
        let time = TimeSource::new(time_query, config.time.utc_offset_secs);
        let actuator = ActuatorDriver::new(servo, config.actuator.clone());

        let mut tasks = TaskSchedule::default();
        tasks.add(ScheduledTask::new(
            config.heartbeat.interval_ms,
            TaskAction::Heartbeat,
            timebase.now_ms(),
        ));

        Self {
            config,
            runtime,
            messaging,
            time,
            actuator,
            indicator,
            timebase,
            tasks,
        }
    }

    pub fn clock(&self) -> &ClockState {
        self.time.clock()
    }

    pub fn messaging(&self) -> &MessagingClient<T> {
        &self.messaging
    }

    pub fn actuator(&self) -> &ActuatorDriver<S> {
        &self.actuator
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub fn timebase(&self) -> &C {
        &self.timebase
    }

    #[cfg(test)]
    pub(crate) fn messaging_mut(&mut self) -> &mut MessagingClient<T> {
        &mut self.messaging
    }

    #[cfg(test)]
    pub(crate) fn timebase_mut(&mut self) -> &mut C {
        &mut self.timebase
    }

    // The indicator stays lit until the settle window closes.
    pub fn start(&mut self) {
        self.set_indicator(true);

        let now = self.timebase.now_ms();
        if self.time.sync(now).is_err() {
            info!("continuing without wall-clock time");
        }

        self.messaging.ensure_connected(&mut self.timebase);

        let window_ms = self.config.boot.settle_window_ms;
        let slice_ms = self.config.boot.loop_idle_ms.max(1);
        let started = self.timebase.now_ms();
        while self.timebase.now_ms().saturating_sub(started) < window_ms {
            self.poll_messages();
            self.timebase.delay_ms(slice_ms);
        }

        self.set_indicator(false);
        info!("Setup done.");
    }

    pub fn tick(&mut self) {
        if !self.messaging.is_connected() {
            self.messaging.ensure_connected(&mut self.timebase);
        }

        self.poll_messages();
        self.resync_if_due();
        self.run_due_tasks();

        if self.runtime.automation_enabled() {
            self.run_automation();
        }
    }

    pub fn run(mut self) -> ! {
        loop {
            self.tick();
            self.timebase.delay_ms(self.config.boot.loop_idle_ms);
        }
    }

    fn poll_messages(&mut self) {
        let Self {
            config,
            messaging,
            actuator,
            timebase,
            ..
        } = self;
        let control_topic = config.network.control_topic.as_str();
        let remote_control = config.automation.remote_control;

        messaging.poll(|topic, payload| {
            debug!(
                "Message arrived [{topic}] {}",
                String::from_utf8_lossy(payload)
            );

            let Some(state) = decode_command(control_topic, topic, payload) else {
                return;
            };
            if !remote_control {
                debug!("remote control disabled, ignoring {}", state.as_str());
                return;
            }

            if let Err(err) = actuator.set_state(state, &mut *timebase) {
                warn!("failed to move switch {}: {err}", state.as_str());
            }
        });
    }

    fn resync_if_due(&mut self) {
        let now = self.timebase.now_ms();
        let clock = *self.time.clock();

        if !scheduler::needs_resync(&clock, now, self.config.time.resync_after_ms) {
            return;
        }
        if !scheduler::retry_allowed(
            self.time.last_failure_ms(),
            now,
            self.config.time.retry_delay_ms,
        ) {
            return;
        }

        if clock.synced {
            debug!(
                "{} ms since last time sync at hour {}",
                now.saturating_sub(clock.last_sync_ms),
                clock.last_sync_hour
            );
        }
        if self.time.sync(now).is_err() {
            debug!(
                "next time sync attempt in {} ms",
                self.config.time.retry_delay_ms
            );
        }
    }

    fn run_due_tasks(&mut self) {
        let now = self.timebase.now_ms();
        for action in self.tasks.take_due(now) {
            match action {
                TaskAction::Heartbeat => self.heartbeat(),
            }
        }
    }

    fn heartbeat(&mut self) {
        self.set_indicator(true);
        self.timebase.delay_ms(self.config.heartbeat.lit_ms);
        self.set_indicator(false);
        self.timebase.delay_ms(self.config.heartbeat.dark_ms);
    }

    // Publishes on every pass; the actuator filters the echoes.
    fn run_automation(&mut self) {
        let clock = self.time.clock();
        if !clock.synced {
            trace!("automation waiting for the first time sync");
            return;
        }

        let hour = clock.hour_at(self.timebase.now_ms());
        let state = automation::desired_state(hour, &self.config.automation);
        match state {
            SwitchState::On => debug!("Night Time: On"),
            SwitchState::Off => debug!("Night Time: Off"),
        }

        self.messaging
            .publish(&self.config.network.control_topic, state.payload());
    }

    fn set_indicator(&mut self, lit: bool) {
        if let Err(err) = self.indicator.set_lit(lit) {
            warn!("failed to drive indicator: {err}");
        }
    }
}
