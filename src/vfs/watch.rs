//! Path-keyed change subscriptions.
//!
//! A watcher registered at a path sees events raised at that exact path and
//! events raised for direct children of that path. Events are delivered
//! synchronously, before the mutating call returns.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::vfs::tree::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Creation, removal, or the entry moving away from or onto the path.
    Rename,
    /// In-place overwrite of an existing entry.
    Change,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Rename => "rename",
            EventKind::Change => "change",
        }
    }
}

/// What a listener receives: the kind and the last segment of the changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    kind: EventKind,
    name: String,
}

impl WatchEvent {
    pub fn new<S: Into<String>>(kind: EventKind, name: S) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) type Listener = Rc<RefCell<dyn FnMut(&WatchEvent)>>;

/// Handle of one subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Notifier {
    next_id: u64,
    subscriptions: HashMap<String, Vec<(SubscriptionId, Listener)>>,
}

impl Notifier {
    pub(crate) fn subscribe(&mut self, path: &str, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions
            .entry(path.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Drops a subscription. The path entry goes away with its last subscriber.
    pub(crate) fn unsubscribe(&mut self, path: &str, id: SubscriptionId) -> bool {
        let Some(list) = self.subscriptions.get_mut(path) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.subscriptions.remove(path);
        }
        removed
    }

    pub(crate) fn subscriber_count(&self, path: &str) -> usize {
        self.subscriptions.get(path).map(Vec::len).unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn watched_paths(&self) -> usize {
        self.subscriptions.len()
    }

    /// Listeners interested in a change at `path`: the parent's first, then the path's own.
    fn listeners_for(&self, path: &str, parent: &str) -> Vec<Listener> {
        let mut out = Vec::new();
        let keys = if path == parent {
            vec![path]
        } else {
            vec![parent, path]
        };
        for key in keys {
            if let Some(list) = self.subscriptions.get(key) {
                out.extend(list.iter().map(|(_, listener)| Rc::clone(listener)));
            }
        }
        out
    }
}

/// Delivers recorded events. The registry is not borrowed while a listener
/// runs, so listeners may watch, close or mutate the file system.
pub(crate) fn dispatch(notifier: &RefCell<Notifier>, events: Vec<Event>) {
    for event in events {
        let listeners = notifier.borrow().listeners_for(&event.path, &event.parent);
        if listeners.is_empty() {
            continue;
        }
        let payload = WatchEvent::new(event.kind, event.name);
        for listener in listeners {
            // a listener that re-enters itself is skipped for the nested event
            if let Ok(mut callback) = listener.try_borrow_mut() {
                (*callback)(&payload);
            }
        }
    }
}

/// An active subscription. Closing it, or dropping it, stops delivery.
#[must_use = "dropping a Watcher unsubscribes it immediately"]
pub struct Watcher {
    path: String,
    id: SubscriptionId,
    notifier: Weak<RefCell<Notifier>>,
    active: bool,
}

impl Watcher {
    pub(crate) fn new(path: String, id: SubscriptionId, notifier: Weak<RefCell<Notifier>>) -> Self {
        Self {
            path,
            id,
            notifier,
            active: true,
        }
    }

    /// The normalized path being watched.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn close(mut self) {
        self.unsubscribe();
    }

    fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(notifier) = self.notifier.upgrade() {
            if let Ok(mut notifier) = notifier.try_borrow_mut() {
                notifier.unsubscribe(&self.path, self.id);
            }
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
