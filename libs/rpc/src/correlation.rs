//! Call/Response Correlation
//!
//! A reply is matched back to the call that issued it through a composite
//! key. Correlation IDs are only unique per originating listener, so the
//! sender's system ID is part of the key; several listener instances may
//! share one router.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::envelope::MessageEnvelope;

/// Identifies one outstanding call: the sender's system ID plus the
/// correlation ID it allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub system_id: u64,
    pub correlation_id: u64,
}

impl CorrelationKey {
    pub fn new(system_id: u64, correlation_id: u64) -> Self {
        Self {
            system_id,
            correlation_id,
        }
    }

    /// Key identifying `envelope` itself.
    pub fn from_message(envelope: &MessageEnvelope) -> Self {
        Self::new(envelope.message_system_id, envelope.message_correlation_id)
    }

    /// Key of the request a response envelope answers.
    pub fn from_response(envelope: &MessageEnvelope) -> Self {
        Self::new(envelope.response_system_id, envelope.response_correlation_id)
    }
}

/// Lock-guarded map of outstanding calls.
///
/// `complete` is a single find-and-remove transaction: a response reaches at
/// most one waiter, and a duplicate or late response with the same key is a
/// silent no-op rather than an error. The lock covers only the map
/// mutation; waiters are resolved by the caller outside of it.
pub struct PendingCalls<T> {
    calls: Mutex<HashMap<CorrelationKey, T>>,
}

impl<T> PendingCalls<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a pending call. Returns false when the key is already
    /// outstanding; the existing entry is left untouched.
    pub fn register(&self, key: CorrelationKey, pending: T) -> bool {
        let mut calls = self.calls.lock();
        if calls.contains_key(&key) {
            return false;
        }
        calls.insert(key, pending);
        true
    }

    /// Removes and returns the entry for `key`, if it is still outstanding.
    pub fn complete(&self, key: &CorrelationKey) -> Option<T> {
        self.calls.lock().remove(key)
    }

    /// Removes every outstanding entry, for teardown.
    pub fn drain(&self) -> Vec<T> {
        self.calls
            .lock()
            .drain()
            .map(|(_, pending)| pending)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

impl<T> Default for PendingCalls<T> {
    fn default() -> Self {
        Self::new()
    }
}
