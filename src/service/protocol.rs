//! Typed payloads for the tools-service protocol.
//!
//! Field names follow the service's camelCase wire convention. Only the
//! request parameters and the server-pushed event shapes the client
//! consumes are modeled; anything else passes through as raw JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Request Parameters
// ============================================================================

/// Parameters for `connection/connect`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Owner-scope token correlating this logical session.
    pub owner_uri: String,
    /// Connection details.
    pub connection: ConnectionInfo,
}

/// Connection details nested in [`ConnectParams`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Driver-specific options (server, database, auth type, ...), passed
    /// through to the service untouched.
    pub options: HashMap<String, Value>,
}

/// Parameters for `query/executeString`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStringParams {
    pub owner_uri: String,
    /// SQL text to execute.
    pub query: String,
}

/// Parameters for `query/subset`: one slice of one result set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsetParams {
    pub owner_uri: String,
    /// Batch the result set belongs to.
    pub batch_index: i64,
    /// Result set within the batch.
    pub result_set_index: i64,
    /// First row to fetch (0-based).
    pub rows_start_index: i64,
    /// Number of rows to fetch.
    pub rows_count: i64,
}

// ============================================================================
// Server-Pushed Events
// ============================================================================

/// Payload of the `connection/complete` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCompleteEvent {
    #[serde(default)]
    pub owner_uri: Option<String>,
    /// Service-assigned connection id; absent when the connect failed.
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_number: Option<i64>,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

impl ConnectionCompleteEvent {
    /// True when the service established the connection.
    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some() && self.error_message.is_none()
    }
}

/// Server details attached to a successful `connection/complete`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub server_edition: Option<String>,
    #[serde(default)]
    pub is_cloud: Option<bool>,
}

/// Payload of the `query/complete` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCompleteEvent {
    #[serde(default)]
    pub owner_uri: Option<String>,
    /// One summary per executed batch.
    #[serde(default)]
    pub batch_summaries: Vec<BatchSummary>,
}

impl QueryCompleteEvent {
    /// True when any batch reported an error.
    pub fn has_error(&self) -> bool {
        self.batch_summaries.iter().any(|b| b.has_error)
    }
}

/// Summary of one batch in a completed query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub id: i64,
    #[serde(default)]
    pub has_error: bool,
    /// One summary per result set; each one is fetched with a separate
    /// `query/subset` request.
    #[serde(default)]
    pub result_set_summaries: Vec<ResultSetSummary>,
}

/// Summary of one result set in a batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetSummary {
    pub id: i64,
    #[serde(default)]
    pub batch_id: i64,
    pub row_count: i64,
}

/// Payload of the `query/message` event (streaming progress/messages).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMessageEvent {
    #[serde(default)]
    pub owner_uri: Option<String>,
    pub message: ServerMessage,
}

/// One message emitted by the server while a query runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub batch_id: Option<i64>,
    #[serde(default)]
    pub is_error: bool,
    pub message: String,
}

// ============================================================================
// Subset Response
// ============================================================================

/// `result` payload of a `query/subset` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsetResult {
    pub result_subset: Subset,
}

/// One fetched slice of a result set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subset {
    pub row_count: i64,
    /// Row-major cell values.
    pub rows: Vec<Vec<CellValue>>,
}

/// One rendered cell.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellValue {
    #[serde(default)]
    pub display_value: Option<String>,
    #[serde(default)]
    pub is_null: bool,
}

// ============================================================================
// Method Names
// ============================================================================

/// Method surface consumed by the request contracts.
pub mod methods {
    pub const CONNECT: &str = "connection/connect";
    pub const EXECUTE_STRING: &str = "query/executeString";
    pub const SUBSET: &str = "query/subset";

    pub const CONNECTION_COMPLETE: &str = "connection/complete";
    pub const QUERY_COMPLETE: &str = "query/complete";
    pub const QUERY_MESSAGE: &str = "query/message";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connect_params_wire_shape() {
        let mut options = HashMap::new();
        options.insert("server".to_string(), json!("localhost"));
        let params = ConnectParams {
            owner_uri: "conn-1".to_string(),
            connection: ConnectionInfo { options },
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["ownerUri"], json!("conn-1"));
        assert_eq!(value["connection"]["options"]["server"], json!("localhost"));
    }

    #[test]
    fn test_subset_params_wire_shape() {
        let params = SubsetParams {
            owner_uri: "conn-1".to_string(),
            batch_index: 0,
            result_set_index: 0,
            rows_start_index: 0,
            rows_count: 100,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["batchIndex"], json!(0));
        assert_eq!(value["rowsStartIndex"], json!(0));
        assert_eq!(value["rowsCount"], json!(100));
    }

    #[test]
    fn test_connection_complete_success() {
        let event: ConnectionCompleteEvent = serde_json::from_value(json!({
            "ownerUri": "conn-1",
            "connectionId": "4f2a",
            "serverInfo": {"serverVersion": "16.0", "serverEdition": "Developer", "isCloud": false}
        }))
        .unwrap();
        assert!(event.is_connected());
        let info = event.server_info.unwrap();
        assert_eq!(info.server_version.as_deref(), Some("16.0"));
        assert_eq!(info.is_cloud, Some(false));
    }

    #[test]
    fn test_connection_complete_failure() {
        let event: ConnectionCompleteEvent = serde_json::from_value(json!({
            "ownerUri": "conn-1",
            "errorMessage": "login failed",
            "errorNumber": 18456
        }))
        .unwrap();
        assert!(!event.is_connected());
        assert_eq!(event.error_number, Some(18456));
    }

    #[test]
    fn test_query_complete_summaries() {
        let event: QueryCompleteEvent = serde_json::from_value(json!({
            "ownerUri": "conn-1",
            "batchSummaries": [
                {"id": 0, "resultSetSummaries": [{"id": 0, "batchId": 0, "rowCount": 3}]}
            ]
        }))
        .unwrap();
        assert!(!event.has_error());
        assert_eq!(event.batch_summaries[0].result_set_summaries[0].row_count, 3);
    }

    #[test]
    fn test_subset_result_cells() {
        let result: SubsetResult = serde_json::from_value(json!({
            "resultSubset": {
                "rowCount": 2,
                "rows": [
                    [{"displayValue": "1", "isNull": false}],
                    [{"displayValue": "NULL", "isNull": true}]
                ]
            }
        }))
        .unwrap();
        assert_eq!(result.result_subset.row_count, 2);
        assert!(result.result_subset.rows[1][0].is_null);
    }
}
