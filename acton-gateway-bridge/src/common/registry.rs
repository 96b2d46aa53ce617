/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Id-keyed registries for execution contexts, workers, and client connections.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tracing::trace;

use crate::common::BridgeError;

/// A concurrent map from dense, process-unique ids to handles.
///
/// Ids come from an atomic counter starting at 1 and are never reused, so two
/// live entries can never share a key. Every operation is a single map
/// operation; no lock is held across an await.
pub struct IdentityRegistry<H> {
    name: &'static str,
    next_id: AtomicI64,
    entries: DashMap<i64, H>,
}

impl<H> fmt::Debug for IdentityRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<H> IdentityRegistry<H>
where
    H: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry. `name` appears in [`BridgeError::NotFound`].
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicI64::new(0),
            entries: DashMap::new(),
        }
    }

    /// The registry's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Stores `handle` under the next id and returns the id.
    pub fn add(&self, handle: H) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.insert(id, handle);
        trace!(registry = self.name, id, "Added entry");
        id
    }

    /// Returns a clone of the handle stored under `id`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] if `id` is not live.
    pub fn get(&self, id: i64) -> Result<H, BridgeError> {
        self.entries
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(BridgeError::NotFound {
                registry: self.name,
                id,
            })
    }

    /// Removes and returns the handle stored under `id`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] if `id` is not live, including when it was
    /// already removed.
    pub fn remove(&self, id: i64) -> Result<H, BridgeError> {
        let (_, handle) = self.entries.remove(&id).ok_or(BridgeError::NotFound {
            registry: self.name,
            id,
        })?;
        trace!(registry = self.name, id, "Removed entry");
        Ok(handle)
    }

    /// Whether `id` is live.
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Applies `update` to the handle stored under `id`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] if `id` is not live.
    pub fn update<F>(&self, id: i64, update: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut H),
    {
        let mut entry = self.entries.get_mut(&id).ok_or(BridgeError::NotFound {
            registry: self.name,
            id,
        })?;
        update(entry.value_mut());
        Ok(())
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live ids, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Removes and returns every entry matching `predicate`.
    pub fn remove_where<F>(&self, predicate: F) -> Vec<(i64, H)>
    where
        F: Fn(&H) -> bool,
    {
        let ids: Vec<i64> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    /// Removes and returns every entry.
    pub fn drain(&self) -> Vec<(i64, H)> {
        self.remove_where(|_| true)
    }
}
