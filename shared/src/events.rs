//! Subscriber lists for protocol events
//!
//! Every event kind has its own `Listeners` list. Listeners run synchronously
//! on the task that emits the event, in the order they subscribed.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A control packet together with the endpoint that sent it
#[derive(Debug, Clone, PartialEq)]
pub struct PacketEvent<P> {
    pub sender: SocketAddr,
    pub packet: P,
}

pub struct Listeners<E> {
    callbacks: RwLock<Vec<Callback<E>>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
        }
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("count", &self.len()).finish()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Delivers `event` to every listener and returns how many received it
    pub fn emit(&self, event: &E) -> usize {
        // Snapshot first so a listener may subscribe without deadlocking
        let callbacks: Vec<Callback<E>> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_delivery_in_subscription_order() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let seen = Arc::clone(&seen);
            listeners.subscribe(move |value: &u32| seen.lock().unwrap().push((id, *value)));
        }

        assert_eq!(listeners.emit(&7), 3);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_emit_without_listeners() {
        let listeners: Listeners<String> = Listeners::new();
        assert!(listeners.is_empty());
        assert_eq!(listeners.emit(&"nobody".to_string()), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let listeners: Arc<Listeners<u8>> = Arc::new(Listeners::new());
        let inner = Arc::clone(&listeners);
        listeners.subscribe(move |_| inner.subscribe(|_| {}));

        listeners.emit(&1);
        assert_eq!(listeners.len(), 2);
    }
}
