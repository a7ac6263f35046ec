// ── Identifier registries ──
//
// Hand out small integer ids for variable definitions and client events.
// An id is valid for one connection generation only: the bridge forgets
// every registration when the session goes away.

use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::error;

use simlink_api::{DefinitionId, EventId};

use crate::error::CoreError;
use crate::model::VariableKey;

/// Variable `(name, unit)` to definition id.
pub(crate) type DefinitionRegistry = IdRegistry<VariableKey, DefinitionId>;

/// Event name to client event id.
pub(crate) type EventRegistry = IdRegistry<String, EventId>;

#[derive(Debug, Clone, Copy)]
struct Assigned<Id> {
    id: Id,
    generation: u64,
}

/// Concurrent get-or-create map from keys to bridge ids.
///
/// The counter never rewinds, so an id is never handed out twice for the
/// lifetime of the registry, even across [`clear`](Self::clear).
pub(crate) struct IdRegistry<K, Id> {
    ids: DashMap<K, Assigned<Id>>,
    next: AtomicU32,
}

impl<K, Id> IdRegistry<K, Id>
where
    K: Eq + Hash + Clone + Display,
    Id: From<u32> + Copy,
{
    pub(crate) fn new() -> Self {
        Self {
            ids: DashMap::new(),
            next: AtomicU32::new(1),
        }
    }

    /// Return the id for `key` in `generation`, assigning one if needed.
    ///
    /// The boolean is `true` for exactly one caller per key per generation.
    /// `on_new` runs for that caller while the key's shard is still locked,
    /// so anything it enqueues is ordered before any other caller can see
    /// the id. It must not touch this registry. If it fails, nothing is
    /// recorded and its error is returned.
    pub(crate) fn get_or_assign(
        &self,
        key: K,
        generation: u64,
        on_new: impl FnOnce(Id) -> Result<(), CoreError>,
    ) -> Result<(Id, bool), CoreError> {
        match self.ids.entry(key) {
            Entry::Occupied(entry) if entry.get().generation >= generation => {
                Ok((entry.get().id, false))
            }
            Entry::Occupied(mut entry) => {
                // Left over from an earlier session; the bridge no longer knows it.
                let id = self.allocate(entry.key())?;
                if let Err(e) = on_new(id) {
                    entry.remove();
                    return Err(e);
                }
                entry.insert(Assigned { id, generation });
                Ok((id, true))
            }
            Entry::Vacant(entry) => {
                let id = self.allocate(entry.key())?;
                on_new(id)?;
                entry.insert(Assigned { id, generation });
                Ok((id, true))
            }
        }
    }

    fn allocate(&self, key: &K) -> Result<Id, CoreError> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        if raw == 0 {
            // Wrapped: the next ids would collide with live ones.
            error!(%key, "identifier space exhausted");
            return Err(CoreError::RegistrationConflict {
                key: key.to_string(),
            });
        }
        Ok(Id::from(raw))
    }

    pub(crate) fn get(&self, key: &K) -> Option<Id> {
        self.ids.get(key).map(|entry| entry.id)
    }

    /// Forget every assignment. Called only from connection transitions.
    pub(crate) fn clear(&self) {
        self.ids.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
