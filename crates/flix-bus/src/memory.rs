use crate::{Bus, BusError, NotificationCallback, Subscription};
use async_trait::async_trait;
use flix_core::bus_ipc::Notification;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Process-local bus. Callbacks run synchronously on the publishing task.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Mutex<Observers>>,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    callbacks: BTreeMap<u64, NotificationCallback>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).callbacks.len()
    }
}

fn lock(inner: &Mutex<Observers>) -> std::sync::MutexGuard<'_, Observers> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, notification: Notification) -> Result<(), BusError> {
        let callbacks = lock(&self.inner)
            .callbacks
            .values()
            .cloned()
            .collect::<Vec<_>>();
        debug!(
            event = "bus_memory_publish",
            sender = %notification.sender,
            channel = %notification.channel,
            observers = callbacks.len()
        );
        for callback in callbacks {
            callback(&notification);
        }
        Ok(())
    }

    async fn subscribe(&self, callback: NotificationCallback) -> Result<Subscription, BusError> {
        let id = {
            let mut observers = lock(&self.inner);
            observers.next_id += 1;
            let id = observers.next_id;
            observers.callbacks.insert(id, callback);
            id
        };
        let weak: Weak<Mutex<Observers>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).callbacks.remove(&id);
            }
        }))
    }
}
