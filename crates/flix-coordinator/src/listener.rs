use crate::abort::AbortSignal;
use flix_bus::{Bus, BusError, NotificationCallback, Subscription};
use flix_core::bus_ipc::Notification;
use flix_core::{decode_response, Channel, ProviderId};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub type ArrivalHook = Arc<dyn Fn(&ProviderId, &Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Aborted,
}

#[derive(Debug)]
pub struct ListenerState {
    expected: IndexSet<ProviderId>,
    received: IndexMap<ProviderId, Value>,
    started: Instant,
}

impl ListenerState {
    fn new(expected: IndexSet<ProviderId>) -> Self {
        Self {
            expected,
            received: IndexMap::new(),
            started: Instant::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.expected.iter().all(|id| self.received.contains_key(id))
    }

    pub fn missing(&self) -> Vec<ProviderId> {
        self.expected
            .iter()
            .filter(|id| !self.received.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Records an answer. Returns false for strangers and repeat senders.
    fn accept(&mut self, sender: &ProviderId, value: Value) -> bool {
        if !self.expected.contains(sender) || self.received.contains_key(sender) {
            return false;
        }
        self.received.insert(sender.clone(), value);
        true
    }
}

pub struct ResponseListener {
    channel: String,
    state: Arc<Mutex<ListenerState>>,
    subscription: Option<Subscription>,
    on_arrival: Option<ArrivalHook>,
}

fn lock(state: &Mutex<ListenerState>) -> MutexGuard<'_, ListenerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ResponseListener {
    pub fn new(channel: &Channel, expected: impl IntoIterator<Item = ProviderId>) -> Self {
        Self {
            channel: channel.to_string(),
            state: Arc::new(Mutex::new(ListenerState::new(expected.into_iter().collect()))),
            subscription: None,
            on_arrival: None,
        }
    }

    pub fn with_arrival_hook(mut self, hook: ArrivalHook) -> Self {
        self.on_arrival = Some(hook);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Registers with the bus. Returns once the bus confirmed the
    /// subscription, so it must complete before any provider is started.
    pub async fn subscribe(&mut self, bus: &dyn Bus) -> Result<(), BusError> {
        let state = self.state.clone();
        let channel = self.channel.clone();
        let hook = self.on_arrival.clone();
        let callback: NotificationCallback = Arc::new(move |notification: &Notification| {
            handle_notification(&state, &channel, hook.as_ref(), notification);
        });
        self.subscription = Some(bus.subscribe(callback).await?);
        Ok(())
    }

    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    pub fn on_notification(&self, notification: &Notification) {
        handle_notification(
            &self.state,
            &self.channel,
            self.on_arrival.as_ref(),
            notification,
        );
    }

    pub fn forget(&self, provider: &ProviderId) {
        lock(&self.state).expected.shift_remove(provider);
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.state).is_complete()
    }

    pub fn missing(&self) -> Vec<ProviderId> {
        lock(&self.state).missing()
    }

    pub fn received(&self) -> IndexMap<ProviderId, Value> {
        lock(&self.state).received.clone()
    }

    pub fn elapsed(&self) -> Duration {
        lock(&self.state).started.elapsed()
    }

    /// Waits until every expected sender answered, `timeout` passed (zero
    /// means no deadline) or `abort` fired.
    pub async fn wait(&self, abort: &AbortSignal, timeout: Duration, poll: Duration) -> WaitOutcome {
        let started = lock(&self.state).started;
        let deadline = (!timeout.is_zero()).then(|| started + timeout);
        wait_with_deadline(abort, deadline, poll, || self.is_complete()).await
    }

    pub fn into_received(mut self) -> IndexMap<ProviderId, Value> {
        self.unsubscribe();
        let received = lock(&self.state).received.clone();
        received
    }
}

impl Drop for ResponseListener {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn handle_notification(
    state: &Mutex<ListenerState>,
    channel: &str,
    hook: Option<&ArrivalHook>,
    notification: &Notification,
) {
    if notification.channel != channel {
        return;
    }
    let sender = ProviderId::new(notification.sender.clone());
    let value = match decode_response(&notification.payload) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                event = "listener_decode_error",
                provider = %sender,
                channel = channel,
                error = %err
            );
            return;
        }
    };

    let accepted = {
        let mut state = lock(state);
        let accepted = state.accept(&sender, value.clone());
        if accepted {
            debug!(
                event = "listener_answer",
                provider = %sender,
                elapsed_ms = state.started.elapsed().as_millis() as u64,
                outstanding = state.missing().len()
            );
        } else {
            debug!(event = "listener_ignored", provider = %sender, channel = channel);
        }
        accepted
    };
    if accepted {
        if let Some(hook) = hook {
            hook(&sender, &value);
        }
    }
}

pub async fn wait_with_deadline<F>(
    abort: &AbortSignal,
    deadline: Option<Instant>,
    poll: Duration,
    mut done: F,
) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    loop {
        if done() {
            return WaitOutcome::Completed;
        }
        if abort.is_aborted() {
            return WaitOutcome::Aborted;
        }
        let nap = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut;
                }
                poll.min(deadline - now)
            }
            None => poll,
        };
        tokio::select! {
            _ = abort.aborted() => return WaitOutcome::Aborted,
            _ = tokio::time::sleep(nap) => {}
        }
    }
}
