//! Subscription pinning table.
//!
//! A subscription is a live request handle pinning one cached object. The
//! table is the single owner of pin lifetimes: each add hands out a handle,
//! and cancelling the last handle for an object is the signal to run the
//! unsubscribe path. Objects themselves carry only the count; the table holds
//! the `(typeName, id)` keys, so no back-pointers exist.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::types::ObjectId;

/// Identifies one live subscription.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Returns the raw u64 value of this handle.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps live request handles to the objects they pin.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    next_handle: u64,
    by_handle: HashMap<SubscriptionHandle, (String, ObjectId)>,
    by_object: HashMap<ObjectId, HashSet<SubscriptionHandle>>,
}

impl SubscriptionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            by_handle: HashMap::new(),
            by_object: HashMap::new(),
        }
    }

    /// Registers a new subscription for `(type_name, id)` and returns its
    /// handle.
    pub fn add(&mut self, type_name: &str, id: ObjectId) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;
        self.by_handle
            .insert(handle, (type_name.to_string(), id));
        self.by_object.entry(id).or_default().insert(handle);
        debug!(%handle, type_name, %id, "added subscription");
        handle
    }

    /// Cancels a subscription. Returns the pinned `(typeName, id)` and
    /// whether this was the last handle for the object, in which case the
    /// caller must run the unsubscribe path.
    pub fn cancel(&mut self, handle: SubscriptionHandle) -> Option<(String, ObjectId, bool)> {
        let (type_name, id) = self.by_handle.remove(&handle)?;
        let last = match self.by_object.get_mut(&id) {
            Some(handles) => {
                handles.remove(&handle);
                if handles.is_empty() {
                    self.by_object.remove(&id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };
        debug!(%handle, type_name, %id, last, "cancelled subscription");
        Some((type_name, id, last))
    }

    /// Number of live handles pinning an object.
    pub fn count(&self, id: ObjectId) -> usize {
        self.by_object.get(&id).map(|h| h.len()).unwrap_or(0)
    }

    /// Distinct subscribed objects, for the maintenance sweep.
    pub fn subscribed_objects(&self) -> Vec<(String, ObjectId)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (type_name, id) in self.by_handle.values() {
            if seen.insert(*id) {
                out.push((type_name.clone(), *id));
            }
        }
        out.sort_by(|a, b| a.1.cmp(&b.1));
        out
    }

    /// Total number of live handles.
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// True when no subscriptions exist.
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}
