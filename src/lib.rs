//! # sqlsh
//!
//! An interactive SQL client that delegates query execution, connection
//! management, and metadata retrieval to a long-running SQL tools service,
//! reachable only through a Content-Length-framed JSON-RPC stream over the
//! service's stdin/stdout.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    CLI / caller code                    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [gateway]
//! ┌─────────────────────────────────────────────────────────┐
//! │  ToolsServiceClient (subprocess lifecycle + factories)  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [request contracts]
//! ┌─────────────────────────────────────────────────────────┐
//! │  Request: connect / executeString / subset              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [dispatcher]
//! ┌─────────────────────────────────────────────────────────┐
//! │  Dispatcher: outbound drain + inbound pump + routing    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [wire codec]
//! ┌─────────────────────────────────────────────────────────┐
//! │  MessageWriter / MessageReader (framed JSON)            │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod service;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::{ConnectionProfile, Settings, SettingsError};
    pub use crate::service::{
        protocol, ProtocolError, Request, RequestKind, ResponseEvent, ServiceResult,
        ToolsServiceClient, POLL_INTERVAL,
    };
}
