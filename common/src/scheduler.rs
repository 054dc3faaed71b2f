use crate::clock::ClockState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub interval_ms: u64,
    pub last_fired_ms: u64,
    pub action: TaskAction,
}

impl ScheduledTask {
    pub fn new(interval_ms: u64, action: TaskAction, created_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fired_ms: created_ms,
            action,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_fired_ms) >= self.interval_ms
    }
}

#[derive(Debug, Default)]
pub struct TaskSchedule {
    tasks: Vec<ScheduledTask>,
}

impl TaskSchedule {
    pub fn add(&mut self, task: ScheduledTask) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    // An overdue task fires once, not once per missed interval.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<TaskAction> {
        let mut due = Vec::new();
        for task in self.tasks.iter_mut().filter(|task| task.is_due(now_ms)) {
            task.last_fired_ms = now_ms;
            due.push(task.action);
        }
        due
    }
}

// Skipped while the extrapolated hour is exactly one ahead of the sync hour.
// Signed math so the midnight wrap (-23) still makes the sync due.
pub fn needs_resync(clock: &ClockState, now_ms: u64, resync_after_ms: u64) -> bool {
    if !clock.synced {
        return true;
    }

    let elapsed = now_ms.saturating_sub(clock.last_sync_ms);
    let hour_delta = i32::from(clock.hour_at(now_ms)) - i32::from(clock.last_sync_hour);

    elapsed > resync_after_ms && hour_delta != 1
}

pub fn retry_allowed(last_failure_ms: Option<u64>, now_ms: u64, retry_delay_ms: u64) -> bool {
    match last_failure_ms {
        Some(failed_at) => now_ms.saturating_sub(failed_at) >= retry_delay_ms,
        None => true,
    }
}
