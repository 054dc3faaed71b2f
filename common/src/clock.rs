use chrono::{DateTime, FixedOffset, Timelike};
use log::{debug, info, warn};

use crate::error::SyncError;

pub trait TimeQuery {
    fn query_unix_secs(&mut self) -> Result<i64, SyncError>;
}

// Extrapolated from uptime between syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockState {
    pub current_hour: u8,
    pub current_minute: u8,
    pub current_second: u8,
    pub last_sync_ms: u64,
    pub last_sync_hour: u8,
    pub synced: bool,
}

impl ClockState {
    fn seconds_of_day_at(&self, now_ms: u64) -> u64 {
        let base = u64::from(self.current_hour) * 3600
            + u64::from(self.current_minute) * 60
            + u64::from(self.current_second);
        let elapsed = now_ms.saturating_sub(self.last_sync_ms) / 1000;
        (base + elapsed) % 86_400
    }

    pub fn hour_at(&self, now_ms: u64) -> u8 {
        (self.seconds_of_day_at(now_ms) / 3600) as u8
    }

    pub fn minute_at(&self, now_ms: u64) -> u8 {
        ((self.seconds_of_day_at(now_ms) % 3600) / 60) as u8
    }

    pub fn formatted_at(&self, now_ms: u64) -> String {
        let secs = self.seconds_of_day_at(now_ms);
        format!(
            "{:02}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}

pub fn local_time_of_day(unix_secs: i64, utc_offset_secs: i32) -> Option<(u8, u8, u8)> {
    let offset = FixedOffset::east_opt(utc_offset_secs)?;
    let local = DateTime::from_timestamp(unix_secs, 0)?.with_timezone(&offset);
    Some((
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    ))
}

pub struct TimeSource<Q> {
    query: Q,
    utc_offset_secs: i32,
    clock: ClockState,
    last_failure_ms: Option<u64>,
}

impl<Q: TimeQuery> TimeSource<Q> {
    pub fn new(query: Q, utc_offset_secs: i32) -> Self {
        Self {
            query,
            utc_offset_secs,
            clock: ClockState::default(),
            last_failure_ms: None,
        }
    }

    pub fn clock(&self) -> &ClockState {
        &self.clock
    }

    pub fn last_failure_ms(&self) -> Option<u64> {
        self.last_failure_ms
    }

    #[cfg(test)]
    pub(crate) fn query(&self) -> &Q {
        &self.query
    }

    // On failure the previous clock is kept.
    pub fn sync(&mut self, now_ms: u64) -> Result<ClockState, SyncError> {
        debug!("querying time authority");

        let result = self.query.query_unix_secs().and_then(|unix_secs| {
            local_time_of_day(unix_secs, self.utc_offset_secs)
                .ok_or(SyncError::InvalidResponse("timestamp out of range"))
        });

        match result {
            Ok((hour, minute, second)) => {
                self.clock = ClockState {
                    current_hour: hour,
                    current_minute: minute,
                    current_second: second,
                    last_sync_ms: now_ms,
                    last_sync_hour: hour,
                    synced: true,
                };
                self.last_failure_ms = None;
                info!("Current time is: {}", self.clock.formatted_at(now_ms));
                Ok(self.clock)
            }
            Err(err) => {
                self.last_failure_ms = Some(now_ms);
                if self.clock.synced {
                    warn!(
                        "time sync failed, keeping stale clock at {}: {err}",
                        self.clock.formatted_at(now_ms)
                    );
                } else {
                    warn!("time sync failed and no time is known yet: {err}");
                }
                Err(err)
            }
        }
    }
}
