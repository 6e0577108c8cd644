//! Reference-counted symbol subscriptions.
//!
//! The first display subscribing to a symbol sends [`SubscriptionCommand::Start`] to the
//! aggregation domain and the last one leaving sends [`SubscriptionCommand::Stop`]. Displays
//! and symbol streams never hold references to each other.

use super::DisplayId;
use crate::{aggregation::SubscriptionCommand, error::ReleaseError, tick::Symbol};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug)]
struct Subscriptions {
    by_symbol: BTreeMap<Symbol, BTreeSet<DisplayId>>,
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
}

impl Subscriptions {
    fn send(&self, command: SubscriptionCommand) {
        if let Err(error) = self.commands.send(command) {
            debug!(command = ?error.0, "aggregation domain gone, subscription command dropped");
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionTable {
    inner: Rc<RefCell<Subscriptions>>,
}

impl SubscriptionTable {
    pub fn new(commands: mpsc::UnboundedSender<SubscriptionCommand>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Subscriptions {
                by_symbol: BTreeMap::new(),
                commands,
            })),
        }
    }

    /// Add a subscriber. Returns `true` if it is the symbol's first.
    pub fn subscribe(&self, symbol: &Symbol, subscriber: DisplayId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let subscribers = inner.by_symbol.entry(symbol.clone()).or_default();
        subscribers.insert(subscriber);

        if subscribers.len() == 1 {
            info!(%symbol, %subscriber, "first subscriber, starting aggregation");
            inner.send(SubscriptionCommand::Start(symbol.clone()));
            true
        } else {
            false
        }
    }

    /// Remove a subscriber. Returns `Ok(true)` if it was the symbol's last.
    pub fn unsubscribe(&self, symbol: &Symbol, subscriber: DisplayId) -> Result<bool, ReleaseError> {
        let mut inner = self.inner.borrow_mut();
        let removed = inner
            .by_symbol
            .get_mut(symbol)
            .is_some_and(|subscribers| subscribers.remove(&subscriber));
        if !removed {
            return Err(ReleaseError::AlreadyReleased {
                kind: "subscription".to_string(),
                record: format!("{symbol}/{subscriber}"),
            });
        }

        let last = inner.by_symbol.get(symbol).is_none_or(BTreeSet::is_empty);
        if last {
            inner.by_symbol.remove(symbol);
            info!(%symbol, %subscriber, "last subscriber gone, stopping aggregation");
            inner.send(SubscriptionCommand::Stop(symbol.clone()));
        }
        Ok(last)
    }

    pub fn subscribers(&self, symbol: &str) -> Vec<DisplayId> {
        self.inner
            .borrow()
            .by_symbol
            .get(symbol)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn refcount(&self, symbol: &str) -> usize {
        self.inner.borrow().by_symbol.get(symbol).map_or(0, BTreeSet::len)
    }

    /// Total (symbol, display) subscriptions.
    pub fn len(&self) -> usize {
        self.inner.borrow().by_symbol.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().by_symbol.is_empty()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.inner.borrow().by_symbol.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcount_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let table = SubscriptionTable::new(tx);
        let btc = Symbol::new("BTC");

        assert!(table.subscribe(&btc, DisplayId::from(1)));
        assert!(!table.subscribe(&btc, DisplayId::from(2)));
        assert_eq!(table.refcount("BTC"), 2);
        assert_eq!(rx.try_recv().unwrap(), SubscriptionCommand::Start(btc.clone()));
        assert!(rx.try_recv().is_err());

        assert_eq!(table.unsubscribe(&btc, DisplayId::from(1)), Ok(false));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.unsubscribe(&btc, DisplayId::from(2)), Ok(true));
        assert_eq!(rx.try_recv().unwrap(), SubscriptionCommand::Stop(btc.clone()));

        assert!(table.is_empty());
        assert_eq!(table.refcount("BTC"), 0);
    }

    #[test]
    fn test_double_unsubscribe_is_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let table = SubscriptionTable::new(tx);
        let eth = Symbol::new("ETH");
        table.subscribe(&eth, DisplayId::from(1));

        assert!(table.unsubscribe(&eth, DisplayId::from(1)).is_ok());
        assert!(matches!(
            table.unsubscribe(&eth, DisplayId::from(1)),
            Err(ReleaseError::AlreadyReleased { .. })
        ));
    }

    #[test]
    fn test_closed_command_channel_is_tolerated() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let table = SubscriptionTable::new(tx);
        let sol = Symbol::new("SOL");

        assert!(table.subscribe(&sol, DisplayId::from(1)));
        assert_eq!(table.unsubscribe(&sol, DisplayId::from(1)), Ok(true));
    }
}
