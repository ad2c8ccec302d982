//! Timer bookkeeping for the active trip.
//!
//! Each timer kind has exactly one slot. Arming a kind replaces whatever
//! task holds the slot, disarming an empty slot is a no-op, and teardown
//! paths call [`TimerSet::disarm_all`] so no task outlives the trip it was
//! counting down for.

use ridelink_protocol::status::TimerKind;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct TimerSet {
    search_timeout: Option<JoinHandle<()>>,
    arrival_auto_start: Option<JoinHandle<()>>,
}

impl TimerSet {
    pub fn arm(&mut self, kind: TimerKind, task: JoinHandle<()>) {
        let slot = self.slot_mut(kind);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        debug!(timer = %kind, "timer armed");
        *slot = Some(task);
    }

    pub fn disarm(&mut self, kind: TimerKind) {
        if let Some(task) = self.slot_mut(kind).take() {
            task.abort();
            debug!(timer = %kind, "timer disarmed");
        }
    }

    pub fn disarm_all(&mut self) {
        self.disarm(TimerKind::SearchTimeout);
        self.disarm(TimerKind::ArrivalAutoStart);
    }

    #[cfg(test)]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::SearchTimeout => self.search_timeout.is_some(),
            TimerKind::ArrivalAutoStart => self.arrival_auto_start.is_some(),
        }
    }

    fn slot_mut(&mut self, kind: TimerKind) -> &mut Option<JoinHandle<()>> {
        match kind {
            TimerKind::SearchTimeout => &mut self.search_timeout,
            TimerKind::ArrivalAutoStart => &mut self.arrival_auto_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn arming_a_kind_replaces_the_previous_task() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = TimerSet::default();

        for _ in 0..2 {
            let fired = fired.clone();
            timers.arm(
                TimerKind::SearchTimeout,
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timers.is_armed(TimerKind::SearchTimeout));
    }

    #[tokio::test]
    async fn disarm_aborts_the_task_and_empties_the_slot() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = TimerSet::default();

        let fired_task = fired.clone();
        timers.arm(
            TimerKind::ArrivalAutoStart,
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                fired_task.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timers.disarm(TimerKind::ArrivalAutoStart);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timers.is_armed(TimerKind::ArrivalAutoStart));
    }

    #[tokio::test]
    async fn disarming_an_empty_slot_is_a_no_op() {
        let mut timers = TimerSet::default();
        timers.disarm(TimerKind::SearchTimeout);
        timers.disarm_all();
        assert!(!timers.is_armed(TimerKind::SearchTimeout));
        assert!(!timers.is_armed(TimerKind::ArrivalAutoStart));
    }
}
