use async_trait::async_trait;
use flix_core::bus_ipc::{FrameError, Notification};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[cfg(unix)]
pub mod client;
pub mod hub;
pub mod memory;

#[cfg(unix)]
pub use client::UdsBus;
pub use memory::InMemoryBus;

pub const SOCKET_ENV: &str = "FLIX_BUS_SOCKET";

pub type NotificationCallback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bus frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("bus handshake failed: {0}")]
    Handshake(String),
    #[error("bus did not acknowledge {0} in time")]
    AckTimeout(&'static str),
    #[error("bus connection closed")]
    Closed,
}

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<(), BusError>;

    /// Returns only after the subscription is active: anything published
    /// after this resolves reaches `callback`.
    async fn subscribe(&self, callback: NotificationCallback) -> Result<Subscription, BusError>;
}

/// Active observer registration. Delivery stops on `unsubscribe` or drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

pub fn default_socket_path() -> PathBuf {
    if let Ok(value) = std::env::var("XDG_RUNTIME_DIR") {
        if !value.trim().is_empty() {
            return PathBuf::from(value).join("flix").join("bus.sock");
        }
    }
    std::env::temp_dir().join("flix").join("bus.sock")
}

pub fn resolve_socket_path(flag: &str) -> PathBuf {
    if !flag.trim().is_empty() {
        return PathBuf::from(flag);
    }
    if let Ok(value) = std::env::var(SOCKET_ENV) {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    default_socket_path()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_cancels_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = calls.clone();
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn explicit_socket_flag_wins() {
        assert_eq!(
            resolve_socket_path("/run/custom/bus.sock"),
            PathBuf::from("/run/custom/bus.sock")
        );
    }
}
