//! Gateway owning the tools-service subprocess and its dispatcher.
//!
//! Spawns the service with piped stdio, wires the pipes to one codec pair
//! and dispatcher, and hands out request contracts bound to that
//! dispatcher. For tests the same gateway runs over caller-supplied
//! in-memory streams instead of a child process.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::codec::{MessageReader, MessageWriter};
use super::dispatcher::Dispatcher;
use super::error::{ProtocolError, ServiceResult};
use super::protocol::{ConnectParams, ConnectionInfo, ExecuteStringParams, SubsetParams};
use super::requests::{Request, RequestKind};
use crate::config::Settings;

/// How long `shutdown` waits for the killed subprocess to exit.
const KILL_WAIT: Duration = Duration::from_millis(500);

/// Client for one tools-service instance.
pub struct ToolsServiceClient {
    dispatcher: Arc<Dispatcher>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ToolsServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsServiceClient").finish_non_exhaustive()
    }
}

impl ToolsServiceClient {
    /// Spawn the tools service at `service_path`.
    pub async fn spawn<P: AsRef<Path>>(service_path: P) -> ServiceResult<Self> {
        Self::spawn_with_args(service_path, &[]).await
    }

    /// Spawn the tools service resolved from settings, with its configured
    /// arguments.
    pub async fn spawn_with_settings(settings: &Settings) -> ServiceResult<Self> {
        let path = Self::resolve_service_path(settings)?;
        Self::spawn_with_args(&path, &settings.service.args).await
    }

    /// Spawn with explicit command-line arguments.
    pub async fn spawn_with_args<P: AsRef<Path>>(
        service_path: P,
        args: &[String],
    ) -> ServiceResult<Self> {
        let mut child = Command::new(service_path.as_ref())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProtocolError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ProtocolError::SpawnFailed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdin not captured",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ProtocolError::SpawnFailed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdout not captured",
            ))
        })?;

        let dispatcher = Dispatcher::start(MessageReader::new(stdout), MessageWriter::new(stdin));
        Ok(Self {
            dispatcher,
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
        })
    }

    /// Build a client over caller-supplied streams (no subprocess).
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let dispatcher = Dispatcher::start(MessageReader::new(reader), MessageWriter::new(writer));
        Self {
            dispatcher,
            child: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Resolve the tools-service binary: configured path first, then
    /// common locations, then `PATH`.
    fn resolve_service_path(settings: &Settings) -> ServiceResult<PathBuf> {
        if let Some(path) = settings.service_path() {
            return Ok(path);
        }

        let candidates = [
            "sqltoolsservice",
            "./sqltoolsservice",
            "./service/sqltoolsservice",
        ];
        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Ok(output) = std::process::Command::new("which")
            .arg("sqltoolsservice")
            .output()
        {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(PathBuf::from(path));
                }
            }
        }

        Err(ProtocolError::SpawnFailed(io::Error::new(
            io::ErrorKind::NotFound,
            "tools-service binary not found; set service.path in sqlsh.toml",
        )))
    }

    /// The dispatcher this client's contracts are bound to.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Fresh owner-scope token for a new logical session.
    pub fn new_owner_uri() -> String {
        format!("sqlsh://{}", uuid::Uuid::new_v4())
    }

    /// True while the background loops are still running.
    pub fn is_alive(&self) -> bool {
        !self.dispatcher.is_stopped()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Build a `connection/connect` contract for `owner_uri`.
    pub fn connect_request(
        &self,
        owner_uri: &str,
        options: HashMap<String, Value>,
    ) -> ServiceResult<Request> {
        let params = ConnectParams {
            owner_uri: owner_uri.to_string(),
            connection: ConnectionInfo { options },
        };
        let params = serde_json::to_value(&params).map_err(ProtocolError::SerializeFailed)?;
        Ok(Request::new(
            self.dispatcher.clone(),
            RequestKind::Connect,
            self.next_id(),
            owner_uri.to_string(),
            params,
        ))
    }

    /// Build a `query/executeString` contract.
    pub fn execute_query_request(&self, owner_uri: &str, query: &str) -> ServiceResult<Request> {
        let params = ExecuteStringParams {
            owner_uri: owner_uri.to_string(),
            query: query.to_string(),
        };
        let params = serde_json::to_value(&params).map_err(ProtocolError::SerializeFailed)?;
        Ok(Request::new(
            self.dispatcher.clone(),
            RequestKind::ExecuteQuery,
            self.next_id(),
            owner_uri.to_string(),
            params,
        ))
    }

    /// Build a `query/subset` contract for one declared result set.
    pub fn subset_request(&self, params: SubsetParams) -> ServiceResult<Request> {
        let owner_uri = params.owner_uri.clone();
        let params = serde_json::to_value(&params).map_err(ProtocolError::SerializeFailed)?;
        Ok(Request::new(
            self.dispatcher.clone(),
            RequestKind::FetchResultSubset,
            self.next_id(),
            owner_uri,
            params,
        ))
    }

    /// Stop the dispatcher, then terminate the subprocess.
    ///
    /// A subprocess that does not exit after the kill signal is a soft
    /// warning, not an error.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;

        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            if let Err(err) = child.start_kill() {
                tracing::debug!(error = %err, "kill signal not delivered");
            }
            match tokio::time::timeout(KILL_WAIT, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "tools service exited"),
                Ok(Err(err)) => tracing::warn!(error = %err, "failed to reap tools service"),
                Err(_) => tracing::warn!("tools service did not exit after kill"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let err = ToolsServiceClient::spawn("./definitely-not-a-real-service")
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_request_ids_are_monotonic() {
        let (near, _far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(near);
        let client = ToolsServiceClient::from_streams(read_half, write_half);

        let first = client.connect_request("conn-a", HashMap::new()).unwrap();
        let second = client
            .execute_query_request("conn-a", "select 1")
            .unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);

        client.shutdown().await;
    }

    #[test]
    fn test_owner_uris_are_unique() {
        let a = ToolsServiceClient::new_owner_uri();
        let b = ToolsServiceClient::new_owner_uri();
        assert_ne!(a, b);
        assert!(a.starts_with("sqlsh://"));
    }

    #[tokio::test]
    async fn test_shutdown_without_child_is_idempotent() {
        let (near, far) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(near);
        let client = ToolsServiceClient::from_streams(read_half, write_half);

        client.shutdown().await;
        client.shutdown().await;
        drop(far);
    }
}
