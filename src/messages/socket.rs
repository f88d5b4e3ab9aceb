//! # Unix socket transport.
//!
//! Each connection carries exactly one request frame and one response frame,
//! then closes. [`SocketServer`] answers requests from a [`LocalBus`];
//! [`SocketClient`] is the [`MessageBus`] children and the control API use.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::BusError;
use crate::messages::bus::{LocalBus, MessageBus};
use crate::messages::codec::{frame_codec, to_payload};
use crate::messages::message::{Message, Reply};
use crate::policies::BackoffPolicy;

/// Default number of connect attempts before giving up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;

/// Default time an accepted connection has to deliver its request frame.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Listening side of the bus, owned by the master.
pub struct SocketServer {
    path: PathBuf,
    listener: UnixListener,
    request_timeout: Duration,
}

impl SocketServer {
    /// Binds the socket, replacing a stale file left by a dead master.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, BusError> {
        let path = path.into();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666))?;
        Ok(Self {
            path,
            listener,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Closes connections that have not sent a full request within `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until the token is cancelled.
    ///
    /// Connections still waiting for their request are dropped on cancellation.
    pub fn serve(self, bus: Arc<LocalBus>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            let bus = bus.clone();
                            let token = token.clone();
                            let timeout = self.request_timeout;
                            tokio::spawn(async move {
                                tokio::select! {
                                    _ = token.cancelled() => debug!("bus connection dropped on shutdown"),
                                    answered = answer(stream, &bus, timeout) => {
                                        if let Err(e) = answered {
                                            debug!(error = %e, label = e.as_label(), "bus connection failed");
                                        }
                                    }
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "bus accept failed"),
                    }
                }
            }
            debug!(path = %self.path.display(), "bus server stopped");
        })
    }
}

async fn answer(stream: UnixStream, bus: &LocalBus, timeout: Duration) -> Result<(), BusError> {
    let mut framed = Framed::new(stream, frame_codec());
    let next = tokio::time::timeout(timeout, framed.next())
        .await
        .map_err(|_| BusError::Timeout { timeout })?;
    let Some(frame) = next.transpose()? else {
        return Ok(());
    };
    let message: Message = serde_json::from_slice(&frame)?;
    let reply = bus.dispatch_now(&message);
    framed.send(to_payload(&reply)?).await?;
    Ok(())
}

/// Connecting side of the bus.
#[derive(Debug, Clone)]
pub struct SocketClient {
    path: PathBuf,
    backoff: BackoffPolicy,
    attempts: u32,
}

impl SocketClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backoff: BackoffPolicy::default(),
            attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy, attempts: u32) -> Self {
        self.backoff = backoff;
        self.attempts = attempts.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<UnixStream, BusError> {
        for attempt in 0..self.attempts {
            match UnixStream::connect(&self.path).await {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    let delay = self.backoff.next(attempt);
                    debug!(
                        path = %self.path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "bus socket not ready, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BusError::Connect {
            path: self.path.clone(),
            attempts: self.attempts,
        })
    }
}

#[async_trait]
impl MessageBus for SocketClient {
    async fn dispatch(&self, message: Message) -> Result<Reply, BusError> {
        let stream = self.connect().await?;
        let mut framed = Framed::new(stream, frame_codec());
        framed.send(to_payload(&message)?).await?;
        let frame = framed.next().await.ok_or(BusError::Closed)??;
        Ok(serde_json::from_slice(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageBusExt, MessageHandler, MessageKind};
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    async fn assert_closed_by_server(stream: &mut UnixStream) {
        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("connection still open");
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn request_response_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.socket");

        let bus = LocalBus::new();
        bus.subscribe(
            MessageKind::ContainerGet,
            Arc::new(|m| match m {
                Message::ContainerGet { key } => json!(format!("value of {key}")),
                _ => Value::Null,
            }),
        );

        let token = CancellationToken::new();
        let server = SocketServer::bind(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);
        let handle = server.serve(bus, token.clone());

        let client = SocketClient::new(&path);
        let reply: Option<String> = client.request(Message::container_get("a")).await.unwrap();
        assert_eq!(reply.as_deref(), Some("value of a"));

        let none = client.dispatch(Message::StopServer).await.unwrap();
        assert_eq!(none, Value::Null);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.socket");
        std::fs::write(&path, b"stale").unwrap();
        assert!(SocketServer::bind(&path).is_ok());
    }

    #[tokio::test]
    async fn connect_gives_up_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let client = SocketClient::new(dir.path().join("missing.socket")).with_backoff(
            BackoffPolicy {
                first: Duration::from_millis(1),
                max: Duration::from_millis(2),
                ..BackoffPolicy::default()
            },
            3,
        );
        let err = client.dispatch(Message::StopServer).await.unwrap_err();
        assert!(matches!(err, BusError::Connect { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn silent_connection_is_closed_after_request_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.socket");
        let token = CancellationToken::new();
        let handle = SocketServer::bind(&path)
            .unwrap()
            .with_request_timeout(Duration::from_millis(50))
            .serve(LocalBus::new(), token.clone());

        let mut idle = UnixStream::connect(&path).await.unwrap();
        assert_closed_by_server(&mut idle).await;

        // a partial frame is treated the same way
        let mut partial = UnixStream::connect(&path).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut partial, &[10, 0, 0, 0, b'{'])
            .await
            .unwrap();
        assert_closed_by_server(&mut partial).await;

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_pending_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.socket");
        let token = CancellationToken::new();
        let handle = SocketServer::bind(&path)
            .unwrap()
            .with_request_timeout(Duration::from_secs(60))
            .serve(LocalBus::new(), token.clone());

        let mut idle = UnixStream::connect(&path).await.unwrap();
        // accepted in order, so the idle connection is in flight once this answers
        SocketClient::new(&path)
            .dispatch(Message::StopServer)
            .await
            .unwrap();

        token.cancel();
        handle.await.unwrap();
        assert_closed_by_server(&mut idle).await;
    }

    #[tokio::test]
    async fn composite_over_socket_reaches_subscribers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.socket");

        let bus = LocalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            MessageKind::ProcessBlocked,
            MessageKind::ProcessDetached,
            MessageKind::Heartbeat,
        ] {
            let seen = seen.clone();
            bus.subscribe(
                kind,
                Arc::new(move |m| {
                    seen.lock().push(m.clone());
                    json!("ignored")
                }),
            );
        }
        let token = CancellationToken::new();
        let handle = SocketServer::bind(&path).unwrap().serve(bus, token.clone());

        let batch = vec![
            Message::ProcessBlocked { pid: 1 },
            Message::Heartbeat { pid: 2, memory: 64 },
            Message::ProcessDetached { pid: 3 },
            Message::ProcessBlocked { pid: 4 },
        ];
        let reply = SocketClient::new(&path)
            .dispatch(Message::composite(batch.clone()))
            .await
            .unwrap();
        assert_eq!(reply, Value::Null);
        assert_eq!(*seen.lock(), batch);

        token.cancel();
        handle.await.unwrap();
    }
}
