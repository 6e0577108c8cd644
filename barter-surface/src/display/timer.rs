//! Periodic per-display timers, polled by the render scheduler.

use super::DisplayId;
use crate::error::ReleaseError;
use std::{
    cell::RefCell,
    collections::BTreeMap,
    rc::Rc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
struct Timer {
    owner: DisplayId,
    period: Duration,
    /// Unset until the first poll after arming
    deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct Timers {
    next_id: u64,
    timers: BTreeMap<TimerId, Timer>,
}

/// Shared registry of armed timers. Cancelling is the timer's ledger release.
#[derive(Debug, Clone, Default)]
pub struct TimerRegistry {
    inner: Rc<RefCell<Timers>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, owner: DisplayId, period: Duration) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = TimerId(inner.next_id);
        inner.next_id += 1;
        inner.timers.insert(
            id,
            Timer {
                owner,
                period,
                deadline: None,
            },
        );
        id
    }

    pub fn cancel(&self, id: TimerId) -> Result<(), ReleaseError> {
        match self.inner.borrow_mut().timers.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ReleaseError::AlreadyReleased {
                kind: "timer".to_string(),
                record: format!("{id:?}"),
            }),
        }
    }

    /// Push the deadline a full period past `now`.
    pub fn touch(&self, id: TimerId, now: Instant) {
        if let Some(timer) = self.inner.borrow_mut().timers.get_mut(&id) {
            timer.deadline = Some(now + timer.period);
        }
    }

    /// Owners of every timer due at `now`. Fired timers re-arm one period later.
    pub fn due(&self, now: Instant) -> Vec<DisplayId> {
        let mut inner = self.inner.borrow_mut();
        let mut fired = Vec::new();
        for timer in inner.timers.values_mut() {
            match timer.deadline {
                None => timer.deadline = Some(now + timer.period),
                Some(deadline) if now >= deadline => {
                    fired.push(timer.owner);
                    timer.deadline = Some(now + timer.period);
                }
                Some(_) => {}
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
