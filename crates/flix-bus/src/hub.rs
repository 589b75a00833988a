#[cfg(unix)]
use flix_core::bus_ipc::{
    decode_frame, encode_frame, BusEnvelope, BusMsg, ClientRole, Notification, PublishedPayload,
    SubscribedPayload, CURRENT_PROTOCOL_VERSION, DEFAULT_MAX_FRAME_BYTES, HUB_SENDER_ID,
};
use std::{io, path::PathBuf, time::Duration};
#[cfg(unix)]
use std::{
    collections::HashMap,
    fs,
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
#[cfg(unix)]
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixListener, UnixStream,
    },
    sync::{mpsc, RwLock},
};
use tokio::sync::watch;
#[cfg(unix)]
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct BusHubConfig {
    pub socket_path: PathBuf,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
}

impl BusHubConfig {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            write_timeout: Duration::from_secs(2),
            queue_capacity: 256,
        }
    }
}

#[cfg(not(unix))]
pub async fn run(_config: BusHubConfig, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
    let _ = shutdown.changed().await;
    Ok(())
}

#[cfg(unix)]
pub async fn run(config: BusHubConfig, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
    let listener = bind_owner_only(&config.socket_path)?;
    info!(
        event = "bus_hub_start",
        socket = %config.socket_path.display(),
        queue_capacity = config.queue_capacity
    );

    let hub = Arc::new(BusHub::new(config.clone()));
    while let Some(accepted) = next_connection(&listener, &mut shutdown).await {
        match accepted {
            Ok(stream) => {
                tokio::spawn(hub.clone().handle_connection(stream));
            }
            Err(err) => warn!(event = "bus_hub_accept_error", error = %err),
        }
    }

    let _ = fs::remove_file(&config.socket_path);
    info!(event = "bus_hub_stop");
    Ok(())
}

/// Binds a fresh socket readable only by the current user, replacing any
/// stale one left by a previous hub.
#[cfg(unix)]
fn bind_owner_only(path: &Path) -> io::Result<UnixListener> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
    }
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => {
            debug!(event = "bus_stale_socket", path = %path.display(), error = %err);
        }
        _ => {}
    }
    let listener = UnixListener::bind(path)?;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    Ok(listener)
}

/// `None` once shutdown is requested or its sender is gone.
#[cfg(unix)]
async fn next_connection(
    listener: &UnixListener,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<io::Result<UnixStream>> {
    loop {
        if *shutdown.borrow_and_update() {
            return None;
        }
        tokio::select! {
            changed = shutdown.changed() => changed.ok()?,
            accepted = listener.accept() => return Some(accepted.map(|(stream, _)| stream)),
        }
    }
}

#[cfg(unix)]
#[derive(Clone)]
struct ClientEntry {
    conn_id: String,
    client_id: String,
    role: ClientRole,
    sender: mpsc::Sender<BusEnvelope>,
}

#[cfg(unix)]
struct BusHub {
    config: BusHubConfig,
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, ClientEntry>>,
    subscribers: RwLock<HashMap<String, mpsc::Sender<BusEnvelope>>>,
}

#[cfg(unix)]
impl BusHub {
    fn new(config: BusHubConfig) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("bus-conn-{id}")
    }

    async fn register_client(&self, client: ClientEntry) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client.clone());
        if client.role == ClientRole::Subscriber {
            self.subscribers
                .write()
                .await
                .insert(client.conn_id.clone(), client.sender.clone());
        }
        debug!(
            event = "bus_client_connected",
            conn_id = %client.conn_id,
            client_id = %client.client_id,
            role = ?client.role
        );
    }

    async fn unregister_client(&self, conn_id: &str) {
        let client = self.clients.write().await.remove(conn_id);
        if client.is_some() {
            self.subscribers.write().await.remove(conn_id);
            debug!(event = "bus_client_disconnected", conn_id = conn_id);
        }
    }

    async fn broadcast_to_subscribers(&self, notification: Notification) -> usize {
        let envelope = BusEnvelope::new(HUB_SENDER_ID, BusMsg::Notification(notification));
        let subscribers = self.subscribers.read().await.clone();
        let mut delivered = 0usize;
        let mut slow = Vec::new();

        for (conn_id, sender) in subscribers {
            match sender.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    slow.push(conn_id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(event = "bus_slow_consumer", conn_id = %conn_id);
                    slow.push(conn_id);
                }
            }
        }

        for conn_id in slow {
            self.unregister_client(&conn_id).await;
        }
        delivered
    }

    async fn send_to_conn(&self, conn_id: &str, envelope: BusEnvelope) -> bool {
        let sender = {
            let clients = self.clients.read().await;
            clients.get(conn_id).map(|c| c.sender.clone())
        };
        let Some(sender) = sender else {
            return false;
        };

        match sender.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister_client(conn_id).await;
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event = "bus_send_backpressure", conn_id = %conn_id);
                self.unregister_client(conn_id).await;
                false
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: UnixStream) {
        let conn_id = self.next_conn_id();
        let (reader_half, writer_half) = stream.into_split();
        let mut frames = FrameReader::new(reader_half);

        let Some(hello) = frames.next().await else {
            return;
        };

        if hello.version.0 > CURRENT_PROTOCOL_VERSION {
            warn!(
                event = "bus_unsupported_version",
                conn_id = %conn_id,
                version = hello.version.0
            );
            return;
        }

        let BusMsg::Hello(payload) = hello.msg else {
            warn!(event = "bus_expected_hello", conn_id = %conn_id);
            return;
        };
        if payload.client_id.trim().is_empty() {
            warn!(event = "bus_missing_client_id", conn_id = %conn_id);
            return;
        }

        let (tx, rx) = mpsc::channel::<BusEnvelope>(self.config.queue_capacity.max(1));
        let write_timeout = self.config.write_timeout;
        let conn_for_writer = conn_id.clone();
        let writer_task = tokio::spawn(drain_queue(conn_for_writer, writer_half, rx, write_timeout));

        let role = payload.role;
        let client_id = payload.client_id;
        self.register_client(ClientEntry {
            conn_id: conn_id.clone(),
            client_id: client_id.clone(),
            role,
            sender: tx.clone(),
        })
        .await;

        if role == ClientRole::Subscriber {
            let ack = BusEnvelope::new(
                HUB_SENDER_ID,
                BusMsg::Subscribed(SubscribedPayload {
                    conn_id: conn_id.clone(),
                }),
            );
            let _ = tx.send(ack).await;
        }

        while let Some(envelope) = frames.next().await {
            if envelope.version.0 > CURRENT_PROTOCOL_VERSION {
                warn!(
                    event = "bus_skip_version",
                    conn_id = %conn_id,
                    version = envelope.version.0
                );
                continue;
            }

            match (role, envelope.msg) {
                (ClientRole::Publisher, BusMsg::Publish(notification)) => {
                    let delivered = if notification.sender != client_id {
                        warn!(
                            event = "bus_sender_mismatch",
                            conn_id = %conn_id,
                            client_id = %client_id,
                            sender = %notification.sender
                        );
                        0
                    } else {
                        debug!(
                            event = "bus_publish",
                            conn_id = %conn_id,
                            sender = %notification.sender,
                            channel = %notification.channel
                        );
                        self.broadcast_to_subscribers(notification).await
                    };
                    let ack = BusEnvelope::new(
                        HUB_SENDER_ID,
                        BusMsg::Published(PublishedPayload { delivered }),
                    );
                    self.send_to_conn(&conn_id, ack).await;
                }
                (_, BusMsg::Hello(_)) => {
                    warn!(event = "bus_unexpected_hello", conn_id = %conn_id);
                }
                _ => {
                    debug!(event = "bus_ignored_message", conn_id = %conn_id);
                }
            }
        }

        self.unregister_client(&conn_id).await;
        drop(tx);
        let _ = writer_task.await;
    }
}

#[cfg(unix)]
#[derive(Debug)]
enum WriteFailure {
    Io(io::Error),
    TimedOut,
}

#[cfg(unix)]
async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &[u8],
    write_timeout: Duration,
) -> Result<(), WriteFailure> {
    let attempt = async {
        writer.write_all(frame).await?;
        writer.flush().await
    };
    tokio::time::timeout(write_timeout, attempt)
        .await
        .map_err(|_| WriteFailure::TimedOut)?
        .map_err(WriteFailure::Io)
}

#[cfg(unix)]
async fn drain_queue(
    conn_id: String,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<BusEnvelope>,
    write_timeout: Duration,
) {
    while let Some(envelope) = queue.recv().await {
        let frame = match encode_frame(&envelope, DEFAULT_MAX_FRAME_BYTES) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = "bus_encode_error", conn_id = %conn_id, error = %err);
                continue;
            }
        };
        match write_frame(&mut writer, &frame, write_timeout).await {
            Ok(()) => {}
            Err(WriteFailure::TimedOut) => {
                warn!(event = "bus_write_timeout", conn_id = %conn_id);
                return;
            }
            Err(WriteFailure::Io(err)) => {
                debug!(event = "bus_write_error", conn_id = %conn_id, error = %err);
                return;
            }
        }
    }
}

/// Newline-delimited envelope stream. Blank and undecodable lines are
/// skipped; `next` yields `None` at EOF or on a read error.
#[cfg(unix)]
pub(crate) struct FrameReader {
    inner: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
}

#[cfg(unix)]
impl FrameReader {
    pub(crate) fn new(half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(half),
            line: Vec::new(),
        }
    }

    pub(crate) async fn next(&mut self) -> Option<BusEnvelope> {
        loop {
            self.line.clear();
            match self.inner.read_until(b'\n', &mut self.line).await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => {
                    warn!(event = "bus_read_error", error = %err);
                    return None;
                }
            }
            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match decode_frame::<BusEnvelope>(&self.line, DEFAULT_MAX_FRAME_BYTES) {
                Ok(envelope) => return Some(envelope),
                Err(err) => warn!(event = "bus_decode_error", error = %err),
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use flix_core::bus_ipc::HelloPayload;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn test_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("flix-bus-hub-test-{name}-{nanos}"))
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

    fn hello(client_id: &str, role: ClientRole) -> BusEnvelope {
        BusEnvelope::new(
            client_id,
            BusMsg::Hello(HelloPayload {
                client_id: client_id.to_string(),
                role,
            }),
        )
    }

    async fn connect_client(
        path: &Path,
        hello: BusEnvelope,
    ) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        let stream = UnixStream::connect(path)
            .await
            .unwrap_or_else(|err| panic!("connect failed: {err}"));
        let (reader, mut writer) = stream.into_split();
        send_frame(&mut writer, &hello).await;
        (BufReader::new(reader), writer)
    }

    async fn send_frame(writer: &mut OwnedWriteHalf, envelope: &BusEnvelope) {
        let frame = encode_frame(envelope, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        writer.write_all(&frame).await.expect("write");
        writer.flush().await.expect("flush");
    }

    async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> BusEnvelope {
        let mut line = Vec::new();
        let read =
            tokio::time::timeout(Duration::from_secs(3), reader.read_until(b'\n', &mut line))
                .await
                .expect("read timeout")
                .expect("read error");
        assert!(read > 0, "unexpected EOF");
        decode_frame(&line, DEFAULT_MAX_FRAME_BYTES).expect("decode")
    }

    async fn read_frame_timeout(
        reader: &mut BufReader<OwnedReadHalf>,
        timeout: Duration,
    ) -> Option<BusEnvelope> {
        let mut line = Vec::new();
        let read = match tokio::time::timeout(timeout, reader.read_until(b'\n', &mut line)).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => return None,
            Err(_) => return None,
        };
        if read == 0 {
            return None;
        }
        decode_frame(&line, DEFAULT_MAX_FRAME_BYTES).ok()
    }

    async fn launch_hub(
        name: &str,
    ) -> (
        PathBuf,
        watch::Sender<bool>,
        tokio::task::JoinHandle<io::Result<()>>,
    ) {
        let path = test_path(name);
        let cfg = BusHubConfig {
            socket_path: path.clone(),
            write_timeout: Duration::from_secs(1),
            queue_capacity: 32,
        };
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(cfg, rx));
        wait_for_socket(&path).await;
        (path, tx, handle)
    }

    async fn subscribe(path: &Path, client_id: &str) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        let (mut reader, writer) =
            connect_client(path, hello(client_id, ClientRole::Subscriber)).await;
        let ack = read_frame(&mut reader).await;
        assert!(matches!(ack.msg, BusMsg::Subscribed(_)));
        (reader, writer)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publish_fans_out_to_all_subscribers_and_acks_count() {
        let (path, shutdown_tx, handle) = launch_hub("fanout").await;
        let (mut first, _first_writer) = subscribe(&path, "plugin.video.flix").await;
        let (mut second, _second_writer) = subscribe(&path, "observer").await;

        let (mut pub_reader, mut pub_writer) =
            connect_client(&path, hello("script.flix.alpha", ClientRole::Publisher)).await;
        let notification = Notification::new(
            "script.flix.alpha",
            "plugin.video.flix.search#c1",
            "W10=",
        );
        send_frame(
            &mut pub_writer,
            &BusEnvelope::new("script.flix.alpha", BusMsg::Publish(notification.clone())),
        )
        .await;

        let ack = read_frame(&mut pub_reader).await;
        assert_eq!(ack.sender_id, HUB_SENDER_ID);
        assert_eq!(ack.msg, BusMsg::Published(PublishedPayload { delivered: 2 }));

        for reader in [&mut first, &mut second] {
            let frame = read_frame(reader).await;
            assert_eq!(frame.msg, BusMsg::Notification(notification.clone()));
        }

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publisher_cannot_speak_for_another_sender() {
        let (path, shutdown_tx, handle) = launch_hub("spoof").await;
        let (mut subscriber, _subscriber_writer) = subscribe(&path, "plugin.video.flix").await;

        let (mut pub_reader, mut pub_writer) =
            connect_client(&path, hello("script.flix.alpha", ClientRole::Publisher)).await;
        send_frame(
            &mut pub_writer,
            &BusEnvelope::new(
                "script.flix.alpha",
                BusMsg::Publish(Notification::new("script.flix.beta", "plugin.video.flix.ping", "")),
            ),
        )
        .await;

        let ack = read_frame(&mut pub_reader).await;
        assert_eq!(ack.msg, BusMsg::Published(PublishedPayload { delivered: 0 }));
        assert!(read_frame_timeout(&mut subscriber, Duration::from_millis(200))
            .await
            .is_none());

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_lines_are_skipped() {
        let (path, shutdown_tx, handle) = launch_hub("malformed").await;
        let (mut subscriber, _subscriber_writer) = subscribe(&path, "plugin.video.flix").await;

        let (mut pub_reader, mut pub_writer) =
            connect_client(&path, hello("script.flix.alpha", ClientRole::Publisher)).await;
        pub_writer.write_all(b"not json\n\n").await.expect("write");
        send_frame(
            &mut pub_writer,
            &BusEnvelope::new(
                "script.flix.alpha",
                BusMsg::Publish(Notification::new("script.flix.alpha", "plugin.video.flix.ping", "")),
            ),
        )
        .await;

        let ack = read_frame(&mut pub_reader).await;
        assert_eq!(ack.msg, BusMsg::Published(PublishedPayload { delivered: 1 }));
        let frame = read_frame(&mut subscriber).await;
        assert!(matches!(frame.msg, BusMsg::Notification(_)));

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_socket_file_is_replaced() {
        let path = test_path("stale");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, b"left over").expect("stale file");

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(BusHubConfig::new(path.clone()), rx));
        let mut connected = false;
        for _ in 0..100 {
            if UnixStream::connect(&path).await.is_ok() {
                connected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(connected, "hub never accepted on {}", path.display());

        let _ = tx.send(true);
        handle.await.expect("join").expect("hub run");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn socket_is_owner_only_and_removed_on_shutdown() {
        let (path, shutdown_tx, handle) = launch_hub("perms").await;
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let _ = shutdown_tx.send(true);
        handle.await.expect("join").expect("hub run");
        assert!(!path.exists());
    }
}
