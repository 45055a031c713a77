//! Tools-service communication module.
//!
//! All query execution, connection management, and metadata retrieval are
//! delegated to a long-running tools-service process reachable only through
//! a Content-Length-framed JSON-RPC stream over its stdin/stdout. This
//! module is that transport: the wire codec, the dispatcher multiplexing
//! outstanding requests and unsolicited events over one duplex stream, the
//! typed request contracts, and the subprocess gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        sqlsh (Rust + Tokio)                    │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │ ToolsServiceClient                                       │  │
//! │  │   └─ Dispatcher ── outbound loop ──► MessageWriter       │  │
//! │  │                 ◄─ inbound loop ◄── MessageReader        │  │
//! │  │   Request contracts: connect / executeString / subset    │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! │            stdin (framed JSON) │ stdout (framed JSON)          │
//! └────────────────────────────────┼───────────────────────────────┘
//!                                  ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │           SQL Tools Service (long-running child process)       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sqlsh::service::ToolsServiceClient;
//!
//! let client = ToolsServiceClient::spawn("./sqltoolsservice").await?;
//! let owner = ToolsServiceClient::new_owner_uri();
//!
//! let mut connect = client.connect_request(&owner, options)?;
//! connect.execute().await?;
//! let (_, terminal) = connect.await_completion(POLL_INTERVAL).await?;
//! ```

mod codec;
mod dispatcher;
mod error;
mod gateway;
pub mod protocol;
mod requests;

pub use codec::{encode_body, encode_frame, MessageReader, MessageWriter, DEFAULT_BUFFER_SIZE};
pub use dispatcher::{Dispatcher, RouteId, SHUTDOWN_JOIN_TIMEOUT};
pub use error::{ProtocolError, ServiceResult};
pub use gateway::ToolsServiceClient;
pub use requests::{Request, RequestFault, RequestKind, ResponseEvent, POLL_INTERVAL};
