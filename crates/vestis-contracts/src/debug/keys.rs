use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
}

/// Host-level key event hub.
///
/// Views subscribe for the keys they care about and receive them over a
/// channel. Dropping the returned [`KeySubscription`] unregisters it, so a
/// listener lives exactly as long as its owner keeps the handle.
#[derive(Debug, Clone, Default)]
pub struct KeyHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: u64,
    listeners: Vec<Listener>,
}

#[derive(Debug)]
struct Listener {
    id: u64,
    key: Key,
    sender: Sender<Key>,
}

#[derive(Debug)]
pub struct KeySubscription {
    id: u64,
    hub: Weak<Mutex<HubInner>>,
    receiver: Receiver<Key>,
}

impl KeyHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: Key) -> KeySubscription {
        let (sender, receiver) = mpsc::channel();
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                inner.next_id += 1;
                let id = inner.next_id;
                inner.listeners.push(Listener { id, key, sender });
                id
            }
            Err(_) => 0,
        };
        KeySubscription {
            id,
            hub: Arc::downgrade(&self.inner),
            receiver,
        }
    }

    /// Delivers `key` to every live listener registered for it.
    /// Returns how many listeners received it.
    pub fn dispatch(&self, key: Key) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        let mut delivered = 0;
        inner.listeners.retain(|listener| {
            if listener.key != key {
                return true;
            }
            match listener.sender.send(key) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.listeners.len())
            .unwrap_or(0)
    }
}

impl KeySubscription {
    /// Next pending key event, if any, without blocking.
    pub fn try_next(&self) -> Option<Key> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for KeySubscription {
    fn drop(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let Ok(mut inner) = hub.lock() else {
            return;
        };
        inner.listeners.retain(|listener| listener.id != self.id);
    }
}
