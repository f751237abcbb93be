//! Per-message scratch storage.
//!
//! The host identifies outbound messages by a [`MessageId`]; the engine
//! owns a typed side-table keyed by that identity for the lifetime of
//! the message, carrying the two fields the scheduler needs to survive
//! re-entries: the slot it already claimed, and whether it has already
//! been counted toward the "delay applied" metric.

use dashmap::DashMap;
use ulid::Ulid;

/// Opaque identity for an outbound message, stable across scheduler
/// re-entries for the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Ulid);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Ulid> for MessageId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

/// Scratch fields the scheduler threads across re-entries of the same
/// message: `claimed_slot` and `delay_counted` per §9.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scratch {
    pub claimed_slot: Option<i64>,
    pub delay_counted: bool,
}

/// Process-wide scratch table, one entry per in-flight message.
pub struct ScratchStore {
    entries: DashMap<MessageId, Scratch>,
}

impl ScratchStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Run `f` against the scratch entry for `id`, creating it with
    /// defaults if this is the first scheduler entry for this message.
    pub fn with_scratch<R>(&self, id: MessageId, f: impl FnOnce(&mut Scratch) -> R) -> R {
        let mut entry = self.entries.entry(id).or_default();
        f(&mut entry)
    }

    /// Drop the scratch entry for a message once the host considers it
    /// fully handled (delivered, deferred terminally, or bounced).
    pub fn release(&self, id: MessageId) {
        self.entries.remove(&id);
    }
}

impl Default for ScratchStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_defaults_to_unclaimed_and_uncounted() {
        let store = ScratchStore::new();
        let id = MessageId::new();
        store.with_scratch(id, |scratch| {
            assert_eq!(scratch.claimed_slot, None);
            assert!(!scratch.delay_counted);
        });
    }

    #[test]
    fn scratch_persists_across_calls() {
        let store = ScratchStore::new();
        let id = MessageId::new();
        store.with_scratch(id, |scratch| scratch.claimed_slot = Some(12345));
        store.with_scratch(id, |scratch| assert_eq!(scratch.claimed_slot, Some(12345)));
    }

    #[test]
    fn release_clears_the_entry() {
        let store = ScratchStore::new();
        let id = MessageId::new();
        store.with_scratch(id, |scratch| scratch.claimed_slot = Some(1));
        store.release(id);
        store.with_scratch(id, |scratch| assert_eq!(scratch.claimed_slot, None));
    }
}
