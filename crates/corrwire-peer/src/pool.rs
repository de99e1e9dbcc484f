use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use corrwire_transport::Connection;

/// Something a [`ConnectionPool`] can hold: identifiable and closable.
pub trait PoolMember: Send + Sync {
    /// Identity used for membership; must be unique among live members.
    fn member_id(&self) -> u64;

    /// Close the underlying resource.
    fn close(&self) -> bool;
}

impl PoolMember for Connection {
    fn member_id(&self) -> u64 {
        self.id()
    }

    fn close(&self) -> bool {
        Connection::close(self)
    }
}

struct Members<C> {
    list: Vec<Arc<C>>,
    /// member id -> position in `list`
    index: HashMap<u64, usize>,
}

/// Live connections selected round-robin.
///
/// The ordered list and its membership index change together under one
/// lock, so they always describe the same set.
pub struct ConnectionPool<C = Connection> {
    members: RwLock<Members<C>>,
    cursor: AtomicUsize,
}

impl<C: PoolMember> ConnectionPool<C> {
    /// Empty pool.
    pub fn new() -> Self {
        Self {
            members: RwLock::new(Members {
                list: Vec::new(),
                index: HashMap::new(),
            }),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of members right now.
    pub fn size(&self) -> usize {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .list
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Next member in round-robin order, or `None` if the pool is empty.
    ///
    /// The shared cursor advances on every call, whatever the concurrent
    /// membership changes; the pick is `cursor % current size`.
    pub fn next(&self) -> Option<Arc<C>> {
        let members = self.members.read().unwrap_or_else(PoisonError::into_inner);
        if members.list.is_empty() {
            return None;
        }
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&members.list[turn % members.list.len()]))
    }

    /// Add a member. Returns `false` if one with the same identity is present.
    pub fn add(&self, member: Arc<C>) -> bool {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        let id = member.member_id();
        if members.index.contains_key(&id) {
            return false;
        }
        let position = members.list.len();
        members.index.insert(id, position);
        members.list.push(member);
        true
    }

    /// Whether a member with the same identity is present.
    pub fn contains(&self, member: &C) -> bool {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .contains_key(&member.member_id())
    }

    /// Remove a member by identity and close it.
    ///
    /// Returns `false` (and closes nothing) if it was not present, so each
    /// member is closed by the pool at most once.
    pub fn remove(&self, member: &C) -> bool {
        let removed = {
            let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
            let Some(position) = members.index.remove(&member.member_id()) else {
                return false;
            };
            let removed = members.list.swap_remove(position);
            if let Some(moved) = members.list.get(position) {
                let moved_id = moved.member_id();
                members.index.insert(moved_id, position);
            }
            removed
        };
        removed.close();
        true
    }

    /// Close every member, then empty the pool. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<C>> = {
            let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
            members.index.clear();
            members.list.drain(..).collect()
        };
        for member in &drained {
            member.close();
        }
        drained.len()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let members = self.members.read().unwrap();
        assert_eq!(members.list.len(), members.index.len());
        for (position, member) in members.list.iter().enumerate() {
            assert_eq!(members.index.get(&member.member_id()), Some(&position));
        }
    }
}

impl<C: PoolMember> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size = self
            .members
            .read()
            .map(|m| m.list.len())
            .unwrap_or_default();
        f.debug_struct("ConnectionPool")
            .field("size", &size)
            .finish_non_exhaustive()
    }
}
