//! Keyed state storage shared by the limiter policies.

use std::borrow::Borrow;
use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Per-key state held in a [`KeyedStateStore`].
///
/// A vacant state carries no information: an entry holding it is
/// indistinguishable from an absent entry and is never kept in the store.
pub(crate) trait KeyState: Default {
    /// Whether this state is equivalent to the key being absent.
    fn is_vacant(&self) -> bool;
}

/// A concurrent map from key to per-key limiter state.
///
/// Keys are spread across lock-striped shards, so operations on unrelated
/// keys rarely contend. Every [`update`](Self::update) runs with exclusive
/// access to the key's shard, which makes read-decide-write sequences atomic
/// per key.
pub(crate) struct KeyedStateStore<K, S>
where
    K: Eq + Hash,
{
    entries: DashMap<K, S>,
}

impl<K, S> KeyedStateStore<K, S>
where
    K: Eq + Hash,
    S: KeyState,
{
    /// Create an empty store.
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Run `f` against the state for `key` under an exclusive lock.
    ///
    /// An absent key is presented as a fresh default state. The state is
    /// inserted only if `f` leaves it non-vacant, and an existing entry is
    /// removed once `f` leaves it vacant.
    pub(crate) fn update<Q, R, F>(&self, key: &Q, f: F) -> R
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce(&mut S) -> R,
    {
        // Fast path avoids allocating an owned key for existing entries.
        if let Some(mut state) = self.entries.get_mut(key) {
            let result = f(state.value_mut());
            let vacant = state.is_vacant();
            drop(state);
            if vacant {
                // Another caller may have refilled the entry in between.
                self.entries.remove_if(key, |_, state| state.is_vacant());
            }
            return result;
        }

        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let result = f(occupied.get_mut());
                if occupied.get().is_vacant() {
                    occupied.remove();
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut state = S::default();
                let result = f(&mut state);
                if !state.is_vacant() {
                    vacant.insert(state);
                }
                result
            }
        }
    }

    /// Run `f` against the state for `key` under a shared lock.
    pub(crate) fn read<Q, R, F>(&self, key: &Q, f: F) -> R
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(Option<&S>) -> R,
    {
        match self.entries.get(key) {
            Some(state) => f(Some(state.value())),
            None => f(None),
        }
    }

    /// Keep only the entries for which `keep` returns `true`.
    ///
    /// `keep` may mutate the state; entries it leaves vacant are dropped
    /// regardless of its verdict. Returns the number of entries removed.
    pub(crate) fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &mut S) -> bool,
    {
        let before = self.entries.len();
        self.entries
            .retain(|key, state| keep(key, state) && !state.is_vacant());
        before.saturating_sub(self.entries.len())
    }

    /// Number of keys with resident state.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop all state.
    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, S> Default for KeyedStateStore<K, S>
where
    K: Eq + Hash,
    S: KeyState,
{
    fn default() -> Self {
        Self::new()
    }
}
