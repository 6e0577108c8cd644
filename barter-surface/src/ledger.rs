//! Ordered record of everything a display owns, released together on destroy.
//!
//! Release runs newest first. A failing or panicking callback is recorded in the
//! [`ReleaseReport`] and never stops the remaining entries from being released.

use crate::error::{ReleaseError, panic_message};
use derive_more::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

/// Category of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ResourceKind {
    #[display("surface")]
    Surface,
    #[display("timer")]
    Timer,
    #[display("subscription")]
    Subscription,
}

/// Handle to one ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

type ReleaseFn = Box<dyn FnOnce() -> Result<(), ReleaseError>>;

struct Entry {
    id: EntryId,
    kind: ResourceKind,
    record: String,
    release: ReleaseFn,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseFailure {
    pub kind: ResourceKind,
    pub record: String,
    pub error: ReleaseError,
}

/// Outcome of releasing a set of ledger entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReleaseReport {
    pub released: usize,
    pub failures: Vec<ReleaseFailure>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.released + self.failures.len()
    }
}

#[derive(Debug)]
pub struct ResourceLedger {
    owner: String,
    next_id: u64,
    entries: Vec<Entry>,
}

impl ResourceLedger {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// Track a resource together with the callback that releases it.
    pub fn register<F>(&mut self, kind: ResourceKind, record: impl Into<String>, release: F) -> EntryId
    where
        F: FnOnce() -> Result<(), ReleaseError> + 'static,
    {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            kind,
            record: record.into(),
            release: Box::new(release),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn records(&self) -> impl Iterator<Item = (ResourceKind, &str)> {
        self.entries.iter().map(|e| (e.kind, e.record.as_str()))
    }

    /// Release a single entry ahead of the owner being destroyed.
    pub fn release(&mut self, id: EntryId) -> Result<(), ReleaseError> {
        let Some(position) = self.entries.iter().position(|e| e.id == id) else {
            return Err(ReleaseError::AlreadyReleased {
                kind: "entry".to_string(),
                record: format!("{id:?}"),
            });
        };
        let entry = self.entries.remove(position);
        run_release(entry).map_err(|failure| failure.error)
    }

    /// Release every remaining entry, newest first, collecting failures.
    pub fn release_all(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        while let Some(entry) = self.entries.pop() {
            match run_release(entry) {
                Ok(()) => report.released += 1,
                Err(failure) => {
                    warn!(
                        owner = %self.owner,
                        kind = %failure.kind,
                        record = %failure.record,
                        error = %failure.error,
                        "resource release failed"
                    );
                    report.failures.push(failure);
                }
            }
        }
        debug!(owner = %self.owner, released = report.released, failed = report.failures.len(), "ledger released");
        report
    }
}

fn run_release(entry: Entry) -> Result<(), ReleaseFailure> {
    let Entry {
        kind,
        record,
        release,
        ..
    } = entry;

    let error = match catch_unwind(AssertUnwindSafe(release)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(error)) => error,
        Err(payload) => ReleaseError::Panicked(panic_message(payload)),
    };
    Err(ReleaseFailure {
        kind,
        record,
        error,
    })
}

impl Drop for ResourceLedger {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(owner = %self.owner, remaining = self.entries.len(), "ledger dropped with live entries");
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_release_all_runs_newest_first() {
        let order = recorder();
        let mut ledger = ResourceLedger::new("display 1");

        for name in ["surface", "timer", "subscription"] {
            let order = Rc::clone(&order);
            ledger.register(ResourceKind::Surface, name, move || {
                order.borrow_mut().push(name.to_string());
                Ok(())
            });
        }

        let report = ledger.release_all();
        assert!(report.is_clean());
        assert_eq!(report.released, 3);
        assert_eq!(*order.borrow(), vec!["subscription", "timer", "surface"]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_failures_do_not_stop_release() {
        let order = recorder();
        let mut ledger = ResourceLedger::new("display 2");

        let first = Rc::clone(&order);
        ledger.register(ResourceKind::Surface, "surface", move || {
            first.borrow_mut().push("surface".to_string());
            Ok(())
        });
        ledger.register(ResourceKind::Timer, "timer", || {
            Err(ReleaseError::Failed {
                kind: "timer".to_string(),
                reason: "already cancelled".to_string(),
            })
        });
        ledger.register(ResourceKind::Subscription, "BTC", || panic!("subscription table poisoned"));

        let report = ledger.release_all();

        assert_eq!(report.released, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.failures[0].kind, ResourceKind::Subscription);
        assert_eq!(
            report.failures[0].error,
            ReleaseError::Panicked("subscription table poisoned".to_string())
        );
        assert_eq!(report.failures[1].kind, ResourceKind::Timer);
        assert_eq!(*order.borrow(), vec!["surface"]);
    }

    #[test]
    fn test_release_single_entry() {
        let mut ledger = ResourceLedger::new("display 3");
        let timer = ledger.register(ResourceKind::Timer, "stale timer", || Ok(()));
        ledger.register(ResourceKind::Surface, "surface", || Ok(()));

        assert!(ledger.release(timer).is_ok());
        assert_eq!(ledger.count(ResourceKind::Timer), 0);
        assert_eq!(ledger.len(), 1);
        assert!(matches!(
            ledger.release(timer),
            Err(ReleaseError::AlreadyReleased { .. })
        ));
    }

    #[test]
    fn test_drop_releases_remaining_entries() {
        let released = Rc::new(RefCell::new(0));
        {
            let mut ledger = ResourceLedger::new("display 4");
            let counter = Rc::clone(&released);
            ledger.register(ResourceKind::Surface, "surface", move || {
                *counter.borrow_mut() += 1;
                Ok(())
            });
        }
        assert_eq!(*released.borrow(), 1);
    }
}
