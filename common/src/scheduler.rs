//! Cooperative timer scheduler.
//!
//! Single-threaded and tick-driven: `tick` collects the tasks that are
//! due and hands them back to the caller, which dispatches them itself.
//! Nothing runs inside `tick`, so a task can never re-enter the
//! scheduler while it is deciding what is due.
//!
//! Timer context is the typed [`TimerTask`] value registered with the
//! timer, not an opaque pointer-sized integer.

use crate::address::UnifiedAddress;

/// Identifies a registered timer for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u32);

/// What a timer drives when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTask {
    SampleButtons,
    LinkCheck,
    /// One dim step toward the current ramp direction of the target.
    DimStep(UnifiedAddress),
    /// One brightness readback-and-publish for the target.
    ArcPoll(UnifiedAddress),
}

#[derive(Debug)]
struct Slot {
    handle: TimerHandle,
    task: TimerTask,
    period_ms: u64,
    next_due_ms: u64,
    /// `None` for periodic timers, otherwise remaining repetitions.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    slots: Vec<Slot>,
    next_id: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a periodic timer. First fire is one period from `now_ms`.
    pub fn every(&mut self, now_ms: u64, period_ms: u64, task: TimerTask) -> TimerHandle {
        self.register(now_ms, period_ms, task, None)
    }

    /// Registers a timer capped to `count` repetitions. A zero count
    /// registers nothing useful; the timer is dropped on its first tick.
    pub fn every_limited(
        &mut self,
        now_ms: u64,
        period_ms: u64,
        count: u32,
        task: TimerTask,
    ) -> TimerHandle {
        self.register(now_ms, period_ms, task, Some(count))
    }

    pub fn cancel(&mut self, handle: TimerHandle) {
        self.slots.retain(|slot| slot.handle != handle);
    }

    /// Returns the tasks due at `now_ms`, in registration order. A timer
    /// that fell behind fires once and is rescheduled one full period
    /// ahead of `now_ms`; missed periods are not replayed.
    pub fn tick(&mut self, now_ms: u64) -> Vec<TimerTask> {
        let mut due = Vec::new();
        for slot in &mut self.slots {
            if slot.next_due_ms > now_ms {
                continue;
            }
            if let Some(remaining) = &mut slot.remaining {
                if *remaining == 0 {
                    continue;
                }
                *remaining -= 1;
            }
            due.push(slot.task);
            slot.next_due_ms = now_ms + slot.period_ms;
        }
        self.slots.retain(|slot| slot.remaining != Some(0));
        due
    }

    fn register(
        &mut self,
        now_ms: u64,
        period_ms: u64,
        task: TimerTask,
        remaining: Option<u32>,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.slots.push(Slot {
            handle,
            task,
            period_ms,
            next_due_ms: now_ms + period_ms,
            remaining,
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn periodic_timer_fires_every_period() {
        let mut scheduler = Scheduler::new();
        scheduler.every(0, 50, TimerTask::SampleButtons);

        assert_eq!(scheduler.tick(0), vec![]);
        assert_eq!(scheduler.tick(49), vec![]);
        assert_eq!(scheduler.tick(50), vec![TimerTask::SampleButtons]);
        assert_eq!(scheduler.tick(60), vec![]);
        assert_eq!(scheduler.tick(110), vec![TimerTask::SampleButtons]);
    }

    #[test]
    fn limited_timer_stops_after_count() {
        let mut scheduler = Scheduler::new();
        scheduler.every_limited(0, 100, 2, TimerTask::ArcPoll(3));

        assert_eq!(scheduler.tick(100), vec![TimerTask::ArcPoll(3)]);
        assert_eq!(scheduler.tick(200), vec![TimerTask::ArcPoll(3)]);
        assert_eq!(scheduler.tick(300), vec![]);
        assert_eq!(scheduler.tick(1_000), vec![]);
    }

    #[test]
    fn cancel_removes_timer() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.every(0, 10, TimerTask::DimStep(64));
        scheduler.cancel(handle);
        assert_eq!(scheduler.tick(100), vec![]);
    }

    #[test]
    fn cancel_only_affects_named_handle() {
        let mut scheduler = Scheduler::new();
        let first = scheduler.every(0, 10, TimerTask::DimStep(1));
        scheduler.every(0, 10, TimerTask::ArcPoll(1));
        scheduler.cancel(first);
        assert_eq!(scheduler.tick(10), vec![TimerTask::ArcPoll(1)]);
    }

    #[test]
    fn late_tick_fires_once_without_catch_up() {
        let mut scheduler = Scheduler::new();
        scheduler.every(0, 50, TimerTask::LinkCheck);

        // A blocked main loop shows up as one large time jump; the timer
        // fires once and resumes its cadence from now.
        assert_eq!(scheduler.tick(500), vec![TimerTask::LinkCheck]);
        assert_eq!(scheduler.tick(540), vec![]);
        assert_eq!(scheduler.tick(550), vec![TimerTask::LinkCheck]);
    }

    #[test]
    fn tasks_fire_in_registration_order() {
        let mut scheduler = Scheduler::new();
        scheduler.every(0, 10, TimerTask::SampleButtons);
        scheduler.every(0, 10, TimerTask::LinkCheck);
        assert_eq!(
            scheduler.tick(10),
            vec![TimerTask::SampleButtons, TimerTask::LinkCheck]
        );
    }
}
