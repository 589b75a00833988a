use crate::hub::FrameReader;
use crate::{Bus, BusError, NotificationCallback, Subscription};
use async_trait::async_trait;
use flix_core::bus_ipc::{
    encode_frame, BusEnvelope, BusMsg, ClientRole, HelloPayload, Notification,
    DEFAULT_MAX_FRAME_BYTES,
};
use std::{path::PathBuf, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    net::{unix::OwnedWriteHalf, UnixStream},
};
use tracing::{debug, warn};

/// Client side of the hub. Each publish uses a short-lived publisher
/// connection; each subscription owns a long-lived subscriber connection.
#[derive(Clone, Debug)]
pub struct UdsBus {
    socket_path: PathBuf,
    client_id: String,
    ack_timeout: Duration,
}

impl UdsBus {
    pub fn new(socket_path: impl Into<PathBuf>, client_id: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client_id: client_id.into(),
            ack_timeout: Duration::from_secs(3),
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    async fn connect(
        &self,
        client_id: &str,
        role: ClientRole,
    ) -> Result<(FrameReader, OwnedWriteHalf), BusError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();
        let hello = BusEnvelope::new(
            client_id,
            BusMsg::Hello(HelloPayload {
                client_id: client_id.to_string(),
                role,
            }),
        );
        send_frame(&mut writer, &hello).await?;
        Ok((FrameReader::new(reader), writer))
    }

    async fn await_ack<F>(
        &self,
        frames: &mut FrameReader,
        what: &'static str,
        want: F,
    ) -> Result<BusEnvelope, BusError>
    where
        F: Fn(&BusMsg) -> bool,
    {
        let wait = async {
            loop {
                let Some(envelope) = frames.next().await else {
                    return Err(BusError::Closed);
                };
                if want(&envelope.msg) {
                    return Ok(envelope);
                }
            }
        };
        tokio::time::timeout(self.ack_timeout, wait)
            .await
            .map_err(|_| BusError::AckTimeout(what))?
    }
}

async fn send_frame(writer: &mut OwnedWriteHalf, envelope: &BusEnvelope) -> Result<(), BusError> {
    let frame = encode_frame(envelope, DEFAULT_MAX_FRAME_BYTES)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl Bus for UdsBus {
    async fn publish(&self, notification: Notification) -> Result<(), BusError> {
        let sender = notification.sender.clone();
        let channel = notification.channel.clone();
        let (mut frames, mut writer) = self.connect(&sender, ClientRole::Publisher).await?;
        send_frame(
            &mut writer,
            &BusEnvelope::new(sender.as_str(), BusMsg::Publish(notification)),
        )
        .await?;
        let ack = self
            .await_ack(&mut frames, "publish", |msg| {
                matches!(msg, BusMsg::Published(_))
            })
            .await?;
        if let BusMsg::Published(payload) = ack.msg {
            debug!(
                event = "bus_client_published",
                sender = %sender,
                channel = %channel,
                delivered = payload.delivered
            );
        }
        let _ = writer.shutdown().await;
        Ok(())
    }

    async fn subscribe(&self, callback: NotificationCallback) -> Result<Subscription, BusError> {
        let (mut frames, writer) = self
            .connect(&self.client_id, ClientRole::Subscriber)
            .await?;
        self.await_ack(&mut frames, "subscribe", |msg| {
            matches!(msg, BusMsg::Subscribed(_))
        })
        .await?;

        let client_id = self.client_id.clone();
        let task = tokio::spawn(async move {
            // Held so the hub keeps this connection registered.
            let _writer = writer;
            while let Some(envelope) = frames.next().await {
                if let BusMsg::Notification(notification) = envelope.msg {
                    callback(&notification);
                }
            }
            warn!(event = "bus_subscription_closed", client_id = %client_id);
        });
        Ok(Subscription::new(move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{run, BusHubConfig};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::sync::watch;

    fn test_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("flix-bus-client-test-{name}-{nanos}"))
            .join("bus.sock")
    }

    async fn wait_for_socket(path: &Path) {
        for _ in 0..100 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("socket did not appear: {}", path.display());
    }

    async fn wait_for_count(seen: &Arc<Mutex<Vec<Notification>>>, count: usize) {
        for _ in 0..100 {
            if seen.lock().expect("lock").len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} notifications");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subscriber_receives_publish_after_subscribe_returns() {
        let path = test_path("roundtrip");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(BusHubConfig::new(path.clone()), shutdown_rx));
        wait_for_socket(&path).await;

        let coordinator = UdsBus::new(&path, "plugin.video.flix");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = coordinator
            .subscribe(Arc::new(move |notification: &Notification| {
                sink.lock().expect("lock").push(notification.clone());
            }))
            .await
            .expect("subscribe");

        let provider = UdsBus::new(&path, "script.flix.alpha");
        provider
            .publish(Notification::new(
                "script.flix.alpha",
                "plugin.video.flix.ping",
                "InNjcmlwdC5mbGl4LmFscGhhIg==",
            ))
            .await
            .expect("publish");

        wait_for_count(&seen, 1).await;
        assert_eq!(seen.lock().expect("lock")[0].sender, "script.flix.alpha");

        subscription.unsubscribe();
        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publish_without_hub_fails() {
        let bus = UdsBus::new(test_path("absent"), "script.flix.alpha");
        let result = bus
            .publish(Notification::new("script.flix.alpha", "c", ""))
            .await;
        assert!(matches!(result, Err(BusError::Io(_))));
    }
}
