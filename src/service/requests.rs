//! Request contracts: typed completion state machines over the dispatcher.
//!
//! The three contracts share one shape and differ only in how messages are
//! decoded and which decoded event is terminal, so they are a single
//! [`Request`] struct with a [`RequestKind`] tag rather than a trait
//! hierarchy.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::dispatcher::Dispatcher;
use super::error::{ProtocolError, ServiceResult};
use super::protocol::{
    methods, ConnectionCompleteEvent, QueryCompleteEvent, QueryMessageEvent, Subset, SubsetResult,
};

/// Delay between polls when driving a contract to completion.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Which decoder and terminal event a [`Request`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Connect,
    ExecuteQuery,
    FetchResultSubset,
}

impl RequestKind {
    pub fn method(self) -> &'static str {
        match self {
            Self::Connect => methods::CONNECT,
            Self::ExecuteQuery => methods::EXECUTE_STRING,
            Self::FetchResultSubset => methods::SUBSET,
        }
    }
}

/// A decoded inbound message, as seen by a contract's completion loop.
#[derive(Debug)]
pub enum ResponseEvent {
    /// An id-matched `result` with no event semantics (e.g. the connect
    /// acknowledgement). Non-terminal.
    Acknowledged(Value),
    ConnectionComplete(ConnectionCompleteEvent),
    QueryComplete(QueryCompleteEvent),
    QueryMessage(QueryMessageEvent),
    ResultSubset(Subset),
    /// A service error response or a synthesized terminal error carrying a
    /// transport failure's message. Always terminal.
    Error(RequestFault),
    /// Unclassified message, passed through unchanged. Callers must
    /// tolerate these.
    Raw(Value),
}

/// Error payload delivered through the completion loop.
#[derive(Debug, Clone)]
pub struct RequestFault {
    pub code: Option<i64>,
    pub message: String,
}

/// One logical exchange with the tools service.
///
/// Lifecycle: [`execute`](Request::execute) enqueues the request, then
/// [`get_response`](Request::get_response) is called repeatedly until a
/// terminal event flips [`completed`](Request::completed). The completion
/// loop always observes a typed terminal value; transport failures are
/// converted, never propagated raw.
pub struct Request {
    id: u64,
    owner_uri: String,
    kind: RequestKind,
    params: Value,
    finished: bool,
    dispatcher: Arc<Dispatcher>,
}

impl Request {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        kind: RequestKind,
        id: u64,
        owner_uri: String,
        params: Value,
    ) -> Self {
        Self {
            id,
            owner_uri,
            kind,
            params,
            finished: false,
            dispatcher,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner_uri(&self) -> &str {
        &self.owner_uri
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Whether a terminal event has been observed.
    pub fn completed(&self) -> bool {
        self.finished
    }

    /// Enqueue the encoded request on the dispatcher.
    pub async fn execute(&self) -> ServiceResult<()> {
        self.dispatcher
            .submit(self.kind.method(), self.params.clone(), Value::from(self.id))
            .await
    }

    /// Pull and decode the next message for this exchange, if any.
    ///
    /// Returns `None` when nothing is routable yet; callers re-poll on a
    /// short delay (or use [`await_completion`](Request::await_completion)).
    pub async fn get_response(&mut self) -> Option<ResponseEvent> {
        if self.finished {
            return None;
        }
        match self.dispatcher.poll(self.id).await {
            Ok(None) => None,
            Ok(Some(message)) => {
                let event = self.decode(message);
                if is_terminal(self.kind, &event) {
                    self.finish().await;
                }
                Some(event)
            }
            Err(err) => {
                // the completion-loop contract still holds: the caller sees
                // a typed terminal error, not the raw transport failure
                self.finish().await;
                Some(ResponseEvent::Error(RequestFault {
                    code: None,
                    message: err.to_string(),
                }))
            }
        }
    }

    /// Drive the exchange to its terminal event, collecting intermediate
    /// events (query messages, acks, pass-throughs) along the way.
    pub async fn await_completion(
        &mut self,
        interval: Duration,
    ) -> ServiceResult<(Vec<ResponseEvent>, ResponseEvent)> {
        if self.finished {
            return Err(ProtocolError::InvalidRequest(
                "request already completed".to_string(),
            ));
        }
        let mut intermediate = Vec::new();
        loop {
            match self.get_response().await {
                Some(event) if self.finished => return Ok((intermediate, event)),
                Some(event) => intermediate.push(event),
                None => tokio::time::sleep(interval).await,
            }
        }
    }

    async fn finish(&mut self) {
        self.finished = true;
        self.dispatcher.forget(self.id).await;
        self.dispatcher.forget(self.owner_uri.as_str()).await;
    }

    /// Structural decode: dispatch on the presence of `error`, `result`,
    /// and `method`, then map known methods to named events.
    fn decode(&self, message: Value) -> ResponseEvent {
        if let Some(error) = message.get("error") {
            return ResponseEvent::Error(RequestFault {
                code: error.get("code").and_then(Value::as_i64),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown service error")
                    .to_string(),
            });
        }

        if let Some(result) = message.get("result") {
            if self.kind == RequestKind::FetchResultSubset {
                return match serde_json::from_value::<SubsetResult>(result.clone()) {
                    Ok(subset) => ResponseEvent::ResultSubset(subset.result_subset),
                    Err(err) => ResponseEvent::Error(RequestFault {
                        code: None,
                        message: format!("malformed query/subset result: {err}"),
                    }),
                };
            }
            return ResponseEvent::Acknowledged(result.clone());
        }

        let method = match message.get("method").and_then(Value::as_str) {
            Some(method) => method.to_string(),
            None => return ResponseEvent::Raw(message),
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        match method.as_str() {
            methods::CONNECTION_COMPLETE => match serde_json::from_value(params) {
                Ok(event) => ResponseEvent::ConnectionComplete(event),
                Err(_) => ResponseEvent::Raw(message),
            },
            methods::QUERY_COMPLETE => match serde_json::from_value(params) {
                Ok(event) => ResponseEvent::QueryComplete(event),
                Err(_) => ResponseEvent::Raw(message),
            },
            methods::QUERY_MESSAGE => match serde_json::from_value(params) {
                Ok(event) => ResponseEvent::QueryMessage(event),
                Err(_) => ResponseEvent::Raw(message),
            },
            _ => ResponseEvent::Raw(message),
        }
    }
}

fn is_terminal(kind: RequestKind, event: &ResponseEvent) -> bool {
    match event {
        ResponseEvent::Error(_) => true,
        ResponseEvent::ConnectionComplete(_) => kind == RequestKind::Connect,
        ResponseEvent::QueryComplete(_) => kind == RequestKind::ExecuteQuery,
        ResponseEvent::ResultSubset(_) => kind == RequestKind::FetchResultSubset,
        _ => false,
    }
}
