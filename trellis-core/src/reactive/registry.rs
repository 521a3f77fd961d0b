//! Dependency Registry
//!
//! Attaches reactivity to data the crate does not own. A host keeps its
//! records as plain values behind an `Rc`, calls [`Registry::track`] from
//! its getters and [`Registry::notify`] from its setters, and derivations
//! re-run exactly as if the fields were observables.
//!
//! Entries are keyed by the owner's address and hold only a weak reference
//! to it. The registry never keeps an owner alive; entries of owners that
//! have been dropped are purged on the next registry call.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::graph::ObservableId;

use super::atom::Atom;
use super::context::ReactiveContext;
use super::runtime::Runtime;

struct OwnerEntry {
    owner: Weak<dyn Any>,
    keys: HashMap<String, Atom>,
}

impl OwnerEntry {
    fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

#[derive(Default)]
struct DependencyRegistry {
    owners: HashMap<usize, OwnerEntry>,
}

impl DependencyRegistry {
    /// Drop the entries of owners that no longer exist.
    ///
    /// The removed atoms are returned so the caller can drop them after
    /// releasing the registry.
    fn purge(&mut self) -> Vec<OwnerEntry> {
        let dead: Vec<usize> = self
            .owners
            .iter()
            .filter(|(_, entry)| !entry.is_alive())
            .map(|(address, _)| *address)
            .collect();
        dead.iter()
            .filter_map(|address| self.owners.remove(address))
            .collect()
    }

    /// The live entry for `owner`, created on first use.
    fn entry_for(&mut self, address: usize, owner: Weak<dyn Any>) -> &mut OwnerEntry {
        self.owners.entry(address).or_insert_with(|| OwnerEntry {
            owner,
            keys: HashMap::new(),
        })
    }

    fn lookup(&self, address: usize, key: &str) -> Option<ObservableId> {
        self.owners
            .get(&address)
            .filter(|entry| entry.is_alive())
            .and_then(|entry| entry.keys.get(key))
            .map(Atom::id)
    }
}

thread_local! {
    static REGISTRY: RefCell<DependencyRegistry> = RefCell::new(DependencyRegistry::default());
}

fn address_of<T>(owner: &Rc<T>) -> usize {
    Rc::as_ptr(owner) as *const () as usize
}

fn release(dead: Vec<OwnerEntry>) {
    for entry in dead {
        debug!(keys = entry.keys.len(), "registry owner released");
    }
}

/// Per-thread association of `(owner, key)` pairs with the derivations
/// that read them.
///
/// # Example
///
/// ```rust,ignore
/// struct Settings { theme: RefCell<String> }
///
/// impl Settings {
///     fn theme(self: &Rc<Self>) -> String {
///         Registry::track(self, "theme");
///         self.theme.borrow().clone()
///     }
///
///     fn set_theme(self: &Rc<Self>, theme: String) {
///         *self.theme.borrow_mut() = theme;
///         Registry::notify(self, "theme");
///     }
/// }
/// ```
pub struct Registry;

impl Registry {
    /// Record a read of `key` on `owner` by the current derivation.
    ///
    /// Does nothing unless a derivation is running. Returns whether any
    /// derivation observes the pair afterwards.
    pub fn track<T: 'static>(owner: &Rc<T>, key: &str) -> bool {
        if !ReactiveContext::is_active() {
            return false;
        }
        let address = address_of(owner);
        let (id, dead) = REGISTRY.with(|registry| {
            let mut registry = registry.borrow_mut();
            let dead = registry.purge();
            let weak: Weak<T> = Rc::downgrade(owner);
            let entry = registry.entry_for(address, weak);
            let id = match entry.keys.get(key) {
                Some(atom) => atom.id(),
                None => {
                    let atom = Atom::new(key);
                    let id = atom.id();
                    entry.keys.insert(key.to_string(), atom);
                    id
                }
            };
            (id, dead)
        });
        release(dead);
        Runtime::report_observed(id)
    }

    /// Tell every derivation that read `key` on `owner` that it changed.
    ///
    /// Inside a batch the affected reactions join the queue; otherwise they
    /// run before this call returns.
    pub fn notify<T: 'static>(owner: &Rc<T>, key: &str) {
        let address = address_of(owner);
        let id = REGISTRY.with(|registry| registry.borrow().lookup(address, key));
        if let Some(id) = id {
            Runtime::report_changed(id);
        }
    }

    /// Tell every derivation that read any key of `owner` that it changed.
    pub fn notify_all<T: 'static>(owner: &Rc<T>) {
        let address = address_of(owner);
        let ids: Vec<ObservableId> = REGISTRY.with(|registry| {
            registry
                .borrow()
                .owners
                .get(&address)
                .filter(|entry| entry.is_alive())
                .map(|entry| entry.keys.values().map(Atom::id).collect())
                .unwrap_or_default()
        });
        crate::reactive::batch(|| {
            for id in ids {
                Runtime::report_changed(id);
            }
        });
    }

    /// Number of observers of `key` on `owner`.
    pub fn observer_count<T: 'static>(owner: &Rc<T>, key: &str) -> usize {
        let address = address_of(owner);
        REGISTRY
            .with(|registry| registry.borrow().lookup(address, key))
            .map_or(0, Runtime::observer_count)
    }

    /// Drop the entries of owners that no longer exist. Returns how many
    /// owners were released.
    pub fn purge() -> usize {
        let dead = REGISTRY.with(|registry| registry.borrow_mut().purge());
        let released = dead.len();
        release(dead);
        released
    }
}

/// Number of owners with live entries.
pub(crate) fn owner_count() -> usize {
    REGISTRY
        .try_with(|registry| {
            registry
                .borrow()
                .owners
                .values()
                .filter(|entry| entry.is_alive())
                .count()
        })
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{autorun, batch};
    use std::cell::Cell;

    struct Record {
        count: Cell<i32>,
        label: RefCell<String>,
    }

    impl Record {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                count: Cell::new(0),
                label: RefCell::new("start".into()),
            })
        }

        fn count(self: &Rc<Self>) -> i32 {
            Registry::track(self, "count");
            self.count.get()
        }

        fn set_count(self: &Rc<Self>, value: i32) {
            self.count.set(value);
            Registry::notify(self, "count");
        }

        fn set_label(self: &Rc<Self>, value: &str) {
            *self.label.borrow_mut() = value.to_string();
            Registry::notify(self, "label");
        }
    }

    #[test]
    fn track_outside_derivation_is_a_noop() {
        let record = Record::new();
        assert!(!Registry::track(&record, "count"));
        assert_eq!(owner_count(), 0);
    }

    #[test]
    fn notify_reruns_readers_of_that_key_only() {
        let record = Record::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (r, log) = (record.clone(), seen.clone());
        let disposer = autorun(move || log.borrow_mut().push(r.count()));

        record.set_count(1);
        record.set_label("ignored");
        batch(|| {
            record.set_count(2);
            record.set_count(3);
        });

        assert_eq!(*seen.borrow(), vec![0, 1, 3]);
        assert_eq!(Registry::observer_count(&record, "count"), 1);
        disposer.dispose();
        assert_eq!(Registry::observer_count(&record, "count"), 0);
    }

    #[test]
    fn registry_does_not_keep_owner_alive() {
        let record = Record::new();
        let weak = Rc::downgrade(&record);

        let r = record.clone();
        let disposer = autorun(move || {
            r.count();
        });
        disposer.dispose();
        drop(disposer);
        drop(record);

        // The reaction owned the last strong reference.
        assert!(weak.upgrade().is_none());
        assert_eq!(owner_count(), 0);
        assert_eq!(Registry::purge(), 1);
    }

    #[test]
    fn notify_all_reruns_once() {
        let record = Record::new();
        let runs = Rc::new(Cell::new(0));

        let (r, counter) = (record.clone(), runs.clone());
        let disposer = autorun(move || {
            r.count();
            Registry::track(&r, "label");
            counter.set(counter.get() + 1);
        });

        Registry::notify_all(&record);
        assert_eq!(runs.get(), 2);
        disposer.dispose();
    }
}
