//! Concurrent dispatcher multiplexing requests over one duplex stream.
//!
//! One dispatcher owns the stream pair and runs two background tasks: an
//! outbound drain that writes queued requests in submission order, and an
//! inbound pump that decodes frames and routes them to per-id queues. The
//! caller's task never touches the codec directly; it only enqueues work
//! and polls.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::codec::{MessageReader, MessageWriter};
use super::error::{ProtocolError, ServiceResult};

/// How long `shutdown` waits for the outbound task to drain and exit.
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Routing key for one exchange.
///
/// Inbound message ids may be JSON numbers or strings. Numeric ids (and
/// numeric strings) route to [`RouteId::Number`]; other strings, such as
/// owner-scope tokens, route to [`RouteId::Text`]. Messages with no id at
/// all land on the reserved event queue, [`RouteId::EVENT`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteId {
    Number(u64),
    Text(String),
}

impl RouteId {
    /// Reserved key for unsolicited events (id absent or null).
    pub const EVENT: RouteId = RouteId::Number(0);

    /// Routing key for a raw `id` value from a message envelope.
    pub fn of_id(id: &Value) -> RouteId {
        match id {
            Value::Number(n) => n.as_u64().map(RouteId::Number).unwrap_or(RouteId::EVENT),
            Value::String(s) => s
                .parse::<u64>()
                .map(RouteId::Number)
                .unwrap_or_else(|_| RouteId::Text(s.clone())),
            _ => RouteId::EVENT,
        }
    }

    /// Routing key for a decoded inbound message.
    pub fn of_message(message: &Value) -> RouteId {
        message.get("id").map(Self::of_id).unwrap_or(RouteId::EVENT)
    }
}

impl From<u64> for RouteId {
    fn from(n: u64) -> Self {
        RouteId::Number(n)
    }
}

impl From<&str> for RouteId {
    fn from(s: &str) -> Self {
        RouteId::Text(s.to_string())
    }
}

enum Outbound {
    Frame {
        method: String,
        params: Value,
        id: Value,
    },
    Shutdown,
}

/// Routing table plus the single failure slot, shared between the two
/// background tasks and the caller.
struct Routes {
    queues: HashMap<RouteId, VecDeque<Value>>,
    failure: Option<ProtocolError>,
}

impl Routes {
    fn new() -> Self {
        let mut queues = HashMap::new();
        // the event queue always exists
        queues.insert(RouteId::EVENT, VecDeque::new());
        Self {
            queues,
            failure: None,
        }
    }
}

/// Transport dispatcher for one tools-service stream pair.
pub struct Dispatcher {
    outbound: mpsc::UnboundedSender<Outbound>,
    routes: Mutex<Routes>,
    /// Pinged after every delivery and captured failure so `wait` callers
    /// re-check instead of busy-polling.
    delivered: Notify,
    cancelled: AtomicBool,
    outbound_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    inbound_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Launch the outbound and inbound loops over a codec pair.
    pub fn start<R, W>(reader: MessageReader<R>, writer: MessageWriter<W>) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Self {
            outbound: tx,
            routes: Mutex::new(Routes::new()),
            delivered: Notify::new(),
            cancelled: AtomicBool::new(false),
            outbound_task: std::sync::Mutex::new(None),
            inbound_task: std::sync::Mutex::new(None),
        });

        let outbound = tokio::spawn(Self::outbound_loop(dispatcher.clone(), rx, writer));
        let inbound = tokio::spawn(Self::inbound_loop(dispatcher.clone(), reader));
        if let Ok(mut slot) = dispatcher.outbound_task.lock() {
            *slot = Some(outbound);
        }
        if let Ok(mut slot) = dispatcher.inbound_task.lock() {
            *slot = Some(inbound);
        }
        dispatcher
    }

    /// Queue one request for the outbound loop.
    ///
    /// Rejects an empty method or null params with
    /// [`ProtocolError::InvalidRequest`] before anything is enqueued. Never
    /// blocks on network I/O. The routing entry for a non-null id is
    /// created here so the response has a home even if it races the
    /// inbound loop.
    pub async fn submit(&self, method: &str, params: Value, id: Value) -> ServiceResult<()> {
        if method.is_empty() {
            return Err(ProtocolError::InvalidRequest(
                "method must not be empty".to_string(),
            ));
        }
        if params.is_null() {
            return Err(ProtocolError::InvalidRequest(
                "params must not be null".to_string(),
            ));
        }

        if !id.is_null() {
            let route = RouteId::of_id(&id);
            let mut routes = self.routes.lock().await;
            routes.queues.entry(route).or_default();
        }

        self.outbound
            .send(Outbound::Frame {
                method: method.to_string(),
                params,
                id,
            })
            .map_err(|_| {
                ProtocolError::StreamClosed(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "dispatcher stopped",
                ))
            })
    }

    /// Take the oldest message for `id` without blocking.
    ///
    /// Priority order is fixed: id-specific message, then an unsolicited
    /// event, then the captured transport failure (returned once, slot
    /// cleared), then `None`.
    pub async fn poll(&self, id: impl Into<RouteId>) -> ServiceResult<Option<Value>> {
        let id = id.into();
        let mut routes = self.routes.lock().await;
        if let Some(queue) = routes.queues.get_mut(&id) {
            if let Some(message) = queue.pop_front() {
                return Ok(Some(message));
            }
        }
        if id != RouteId::EVENT {
            if let Some(queue) = routes.queues.get_mut(&RouteId::EVENT) {
                if let Some(message) = queue.pop_front() {
                    return Ok(Some(message));
                }
            }
        }
        if let Some(failure) = routes.failure.take() {
            return Err(failure);
        }
        Ok(None)
    }

    /// `poll` with a bounded wait, waking on deliveries instead of spinning.
    /// Returns `Ok(None)` when the timeout elapses with nothing routable.
    pub async fn wait(
        &self,
        id: impl Into<RouteId>,
        timeout: Duration,
    ) -> ServiceResult<Option<Value>> {
        let id = id.into();
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.delivered.notified();
            if let Some(message) = self.poll(id.clone()).await? {
                return Ok(Some(message));
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(None);
            };
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Drop the routing entry for a finished exchange. A late message for
    /// the same id lazily recreates the entry (the id is treated as a new
    /// exchange, not dropped). The event queue cannot be forgotten.
    pub async fn forget(&self, id: impl Into<RouteId>) {
        let id = id.into();
        if id == RouteId::EVENT {
            return;
        }
        let mut routes = self.routes.lock().await;
        routes.queues.remove(&id);
    }

    /// Stop both loops. Idempotent.
    ///
    /// Sets the cancellation flag, wakes the outbound loop with a sentinel
    /// and joins it within [`SHUTDOWN_JOIN_TIMEOUT`]. The inbound loop is
    /// left to exit on its own once the stream yields EOF; a blocked read
    /// is not interrupted.
    pub async fn shutdown(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Outbound::Shutdown);
        let handle = match self.outbound_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                tracing::warn!("outbound loop did not stop within the join timeout");
            }
        }
    }

    /// True once both background loops have exited.
    pub fn is_stopped(&self) -> bool {
        let outbound_done = match self.outbound_task.lock() {
            Ok(slot) => slot.as_ref().map(JoinHandle::is_finished).unwrap_or(true),
            Err(_) => true,
        };
        let inbound_done = match self.inbound_task.lock() {
            Ok(slot) => slot.as_ref().map(JoinHandle::is_finished).unwrap_or(true),
            Err(_) => true,
        };
        outbound_done && inbound_done
    }

    async fn outbound_loop<W>(
        dispatcher: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Outbound>,
        mut writer: MessageWriter<W>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        // records queued before the shutdown sentinel are still written;
        // the sentinel is the loop's exit path
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Shutdown => break,
                Outbound::Frame { method, params, id } => {
                    tracing::trace!(%method, "writing request");
                    if let Err(err) = writer.send(&method, &params, &id).await {
                        tracing::debug!(error = %err, "outbound loop stopping");
                        dispatcher.record_failure(err).await;
                        break;
                    }
                }
            }
        }
        if let Err(err) = writer.shutdown().await {
            tracing::trace!(error = %err, "writer shutdown");
        }
    }

    async fn inbound_loop<R>(dispatcher: Arc<Self>, mut reader: MessageReader<R>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        loop {
            match reader.read_message().await {
                Ok(message) => dispatcher.deliver(message).await,
                Err(err) => {
                    // EOF after shutdown is the expected way out
                    if !dispatcher.cancelled.load(Ordering::SeqCst) {
                        tracing::debug!(error = %err, "inbound loop stopping");
                        dispatcher.record_failure(err).await;
                    }
                    break;
                }
            }
            if dispatcher.cancelled.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    /// Push an inbound message onto its per-id queue, creating the routing
    /// entry lazily for ids this dispatcher has not seen.
    async fn deliver(&self, message: Value) {
        let route = RouteId::of_message(&message);
        tracing::trace!(?route, "inbound message");
        {
            let mut routes = self.routes.lock().await;
            routes.queues.entry(route).or_default().push_back(message);
        }
        self.delivered.notify_waiters();
    }

    /// First captured failure wins; later ones are only logged.
    async fn record_failure(&self, err: ProtocolError) {
        {
            let mut routes = self.routes.lock().await;
            if routes.failure.is_some() {
                tracing::debug!(error = %err, "dropping secondary transport failure");
            } else {
                routes.failure = Some(err);
            }
        }
        self.delivered.notify_waiters();
    }
}
