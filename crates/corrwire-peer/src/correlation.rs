//! Outstanding request tracking for the client engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use corrwire_frame::NO_REPLY;

/// Allocates non-zero packet IDs from a wrapping counter.
#[derive(Debug)]
pub struct PacketIds {
    next: AtomicU32,
}

impl PacketIds {
    /// Counter starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Start the counter at `first` (0 is skipped like any other wrap).
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Next ID, never [`NO_REPLY`].
    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != NO_REPLY {
                return id;
            }
        }
    }
}

impl Default for PacketIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Packet ID -> single-use delivery slot.
///
/// An entry leaves the table exactly once: through [`resolve`](Self::resolve)
/// when the response arrives, or through [`abandon`](Self::abandon) when the
/// waiter gives up. Whichever call removes the entry owns the outcome.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    slots: Mutex<HashMap<u32, SyncSender<Bytes>>>,
}

impl CorrelationTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for `id` and return the receiving end.
    ///
    /// A stale slot still registered under the same ID (possible only after
    /// the counter wraps) is replaced; its waiter sees a disconnected channel.
    pub fn register(&self, id: u32) -> Receiver<Bytes> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        rx
    }

    /// Deliver `payload` to the waiter for `id`.
    ///
    /// Returns `false` if no slot is registered, i.e. the response is
    /// unsolicited or arrived after the waiter abandoned it. Never blocks.
    pub fn resolve(&self, id: u32, payload: Bytes) -> bool {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match slot {
            // Capacity 1 and a single sender, so this only fails if the
            // receiver is gone, which still counts as resolved.
            Some(tx) => {
                let _ = tx.try_send(payload);
                true
            }
            None => false,
        }
    }

    /// Withdraw the slot for `id`.
    ///
    /// Returns `false` if it was already resolved; the payload is then
    /// already in (or about to be in) the receiver.
    pub fn abandon(&self, id: u32) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Drop every outstanding slot. Their waiters see a disconnected channel.
    pub fn cancel_all(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let cancelled = slots.len();
        slots.clear();
        cancelled
    }

    /// Number of outstanding slots.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn ids_skip_zero_on_wrap() {
        let ids = PacketIds::starting_at(u32::MAX - 1);
        assert_eq!(ids.next_id(), u32::MAX - 1);
        assert_eq!(ids.next_id(), u32::MAX);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let ids = Arc::new(PacketIds::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("allocator thread should finish") {
                assert_ne!(id, NO_REPLY);
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
    }

    #[test]
    fn resolve_delivers_once() {
        let table = CorrelationTable::new();
        let rx = table.register(7);

        assert!(table.resolve(7, Bytes::from_static(b"pong")));
        assert!(!table.resolve(7, Bytes::from_static(b"again")));
        assert!(!table.abandon(7));
        assert_eq!(rx.recv().expect("slot should be filled"), "pong");
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_id_is_not_resolved() {
        let table = CorrelationTable::new();
        assert!(!table.resolve(99, Bytes::new()));
    }

    #[test]
    fn abandoned_slot_drops_late_response() {
        let table = CorrelationTable::new();
        let rx = table.register(3);

        assert!(table.abandon(3));
        assert!(!table.resolve(3, Bytes::from_static(b"late")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn resolve_never_blocks_on_dropped_receiver() {
        let table = CorrelationTable::new();
        drop(table.register(5));
        assert!(table.resolve(5, Bytes::from_static(b"nobody")));
    }

    #[test]
    fn cancel_all_disconnects_waiters() {
        let table = CorrelationTable::new();
        let first = table.register(1);
        let second = table.register(2);

        assert_eq!(table.cancel_all(), 2);
        assert!(matches!(first.recv(), Err(mpsc::RecvError)));
        assert!(second.recv().is_err());
        assert!(!table.abandon(1));
    }

    #[test]
    fn racing_resolve_and_abandon_pick_exactly_one_outcome() {
        for round in 0..200u32 {
            let table = Arc::new(CorrelationTable::new());
            let rx = table.register(round + 1);

            let resolver = {
                let table = Arc::clone(&table);
                thread::spawn(move || table.resolve(round + 1, Bytes::from_static(b"x")))
            };
            let abandoned = table.abandon(round + 1);
            let resolved = resolver.join().expect("resolver should finish");

            assert_ne!(resolved, abandoned, "round {round}");
            if resolved {
                assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
            } else {
                assert!(rx.try_recv().is_err());
            }
            assert!(table.is_empty());
        }
    }
}
