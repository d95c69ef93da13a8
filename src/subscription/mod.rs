//! Subscription Registry — tracks pending/active channel subscriptions per
//! session, keyed `(channel, symbol)`, for resubscription after reconnect
//! (§4.5).

use std::collections::HashMap;

use crate::domain::Symbol;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub channel: String,
    pub symbol: Symbol,
}

impl SubscriptionKey {
    pub fn new(channel: impl Into<String>, symbol: Symbol) -> Self {
        Self {
            channel: channel.into(),
            symbol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Active,
}

/// Tracks this session's pending and active `(channel, symbol)` subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, SubscriptionState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a subscription request as pending.
    pub fn mark_pending(&mut self, key: SubscriptionKey) {
        self.entries.entry(key).or_insert(SubscriptionState::Pending);
    }

    /// Transitions `pending -> active` on subscribe acknowledgement (§4.5).
    /// No-op if the key was never registered as pending.
    pub fn mark_active(&mut self, key: &SubscriptionKey) {
        if let Some(state) = self.entries.get_mut(key) {
            *state = SubscriptionState::Active;
        }
    }

    pub fn remove(&mut self, key: &SubscriptionKey) {
        self.entries.remove(key);
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        matches!(self.entries.get(key), Some(SubscriptionState::Active))
    }

    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.entries
            .iter()
            .filter(|(_, state)| **state == SubscriptionState::Active)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// On reconnect: every previously active entry is re-requested (demoted
    /// back to pending so callers know to re-send the subscribe frame);
    /// entries that never acknowledged are dropped (§4.5).
    pub fn reset_for_reconnect(&mut self) -> Vec<SubscriptionKey> {
        let to_resubscribe: Vec<SubscriptionKey> = self
            .entries
            .iter()
            .filter(|(_, state)| **state == SubscriptionState::Active)
            .map(|(key, _)| key.clone())
            .collect();

        self.entries.clear();
        for key in &to_resubscribe {
            self.entries.insert(key.clone(), SubscriptionState::Pending);
        }
        to_resubscribe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(channel: &str, symbol: &str) -> SubscriptionKey {
        SubscriptionKey::new(channel, Symbol::new(symbol))
    }

    #[test]
    fn pending_transitions_to_active_on_ack() {
        let mut registry = SubscriptionRegistry::new();
        let k = key("book", "BTC/USD");
        registry.mark_pending(k.clone());
        assert!(!registry.is_active(&k));
        registry.mark_active(&k);
        assert!(registry.is_active(&k));
    }

    #[test]
    fn reconnect_resubscribes_only_previously_active_entries() {
        let mut registry = SubscriptionRegistry::new();
        let active_key = key("book", "BTC/USD");
        let never_acked_key = key("trade", "ETH/USD");

        registry.mark_pending(active_key.clone());
        registry.mark_active(&active_key);
        registry.mark_pending(never_acked_key.clone());

        let resubscribe = registry.reset_for_reconnect();
        assert_eq!(resubscribe, vec![active_key.clone()]);
        assert!(!registry.is_active(&active_key), "demoted to pending until re-acked");
    }
}
