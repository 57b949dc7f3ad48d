use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// State held for one monitored destination.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DestinationState {
    pub name: String,
    /// Names of the brokers known to host this destination.
    pub brokers: BTreeSet<String>,
}

impl DestinationState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            brokers: BTreeSet::new(),
        }
    }

    pub fn with_broker(mut self, broker: impl Into<String>) -> Self {
        self.brokers.insert(broker.into());
        self
    }
}

/// Receiver of destination registry changes.
///
/// Callbacks run on the thread that mutated the registry, after the
/// mutation is visible to readers, and never under a registry lock.
pub trait DestinationRegistryListener: Send + Sync {
    fn on_put_entry(&self, _name: &str, _state: &DestinationState) {}

    fn on_remove_entry(&self, _name: &str, _state: &DestinationState) {}

    fn on_replace_entry(&self, _name: &str, _old: &DestinationState, _new: &DestinationState) {}
}

/// Handle returned by [`DestinationRegistry::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerList = Vec<(ListenerId, Arc<dyn DestinationRegistryListener>)>;

/// [`DestinationRegistry`] is a thread-safe store of monitored queue or
/// topic names that notifies listeners on every change.
///
/// Uses DashMap internally so lookups from pollers never contend with
/// each other.
#[derive(Default)]
pub struct DestinationRegistry {
    destinations: DashMap<String, DestinationState>,
    listeners: RwLock<ListenerList>,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for DestinationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationRegistry")
            .field("destinations", &self.destinations.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl DestinationRegistry {
    /// Creates a new empty [`DestinationRegistry`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn DestinationRegistryListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns `true` if the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Inserts or replaces a destination.
    ///
    /// A new name fires `on_put_entry`; an existing name fires
    /// `on_replace_entry`, even when the state is unchanged.
    pub fn put(&self, name: impl Into<String>, state: DestinationState) {
        let name = name.into();
        let previous = match self.destinations.entry(name.clone()) {
            Entry::Occupied(mut occupied) => Some(occupied.insert(state.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(state.clone());
                None
            }
        };

        match previous {
            None => {
                debug!(destination = %name, "destination added");
                self.notify(|l| l.on_put_entry(&name, &state));
            }
            Some(old) => {
                self.notify(|l| l.on_replace_entry(&name, &old, &state));
            }
        }
    }

    /// Adds a destination with an empty broker set unless it already exists.
    pub fn put_if_absent(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        let inserted = match self.destinations.entry(name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(DestinationState::new(name.clone()));
                true
            }
        };

        if inserted {
            let state = DestinationState::new(name.clone());
            self.notify(|l| l.on_put_entry(&name, &state));
        }
        inserted
    }

    /// Removes a destination by name.
    ///
    /// Returns `Some(state)` if it was removed, or `None` if not found.
    pub fn remove(&self, name: &str) -> Option<DestinationState> {
        let (name, state) = self.destinations.remove(name)?;
        debug!(destination = %name, "destination removed");
        self.notify(|l| l.on_remove_entry(&name, &state));
        Some(state)
    }

    pub fn get(&self, name: &str) -> Option<DestinationState> {
        self.destinations.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.destinations.contains_key(name)
    }

    /// Lists all destination names currently registered, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .destinations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    fn notify<F>(&self, event: F)
    where
        F: Fn(&dyn DestinationRegistryListener),
    {
        // Snapshot so callbacks may add or remove listeners.
        let listeners: Vec<Arc<dyn DestinationRegistryListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            event(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl DestinationRegistryListener for Recorder {
        fn on_put_entry(&self, name: &str, _state: &DestinationState) {
            self.events.lock().push(format!("put:{name}"));
        }

        fn on_remove_entry(&self, name: &str, _state: &DestinationState) {
            self.events.lock().push(format!("remove:{name}"));
        }

        fn on_replace_entry(&self, name: &str, _old: &DestinationState, _new: &DestinationState) {
            self.events.lock().push(format!("replace:{name}"));
        }
    }

    #[test]
    fn notifies_put_replace_remove() {
        let registry = DestinationRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add_listener(recorder.clone());

        registry.put("orders", DestinationState::new("orders"));
        registry.put("orders", DestinationState::new("orders").with_broker("amq01"));
        assert!(registry.remove("orders").is_some());
        assert!(registry.remove("orders").is_none());

        assert_eq!(
            *recorder.events.lock(),
            vec!["put:orders", "replace:orders", "remove:orders"]
        );
    }

    #[test]
    fn put_if_absent_only_fires_once() {
        let registry = DestinationRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add_listener(recorder.clone());

        assert!(registry.put_if_absent("orders"));
        assert!(!registry.put_if_absent("orders"));
        assert_eq!(*recorder.events.lock(), vec!["put:orders"]);
    }

    #[test]
    fn removed_listener_is_silent() {
        let registry = DestinationRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let id = registry.add_listener(recorder.clone());

        assert!(registry.remove_listener(id));
        assert!(!registry.remove_listener(id));
        registry.put("orders", DestinationState::new("orders"));

        assert!(recorder.events.lock().is_empty());
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn keys_are_sorted() {
        let registry = DestinationRegistry::new();
        for name in ["c", "a", "b"] {
            registry.put_if_absent(name);
        }
        assert_eq!(registry.keys(), vec!["a", "b", "c"]);
        assert_eq!(registry.len(), 3);
    }
}
