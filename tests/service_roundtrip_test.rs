//! End-to-end tests: gateway, contracts, dispatcher, and codec over
//! in-memory streams against a scripted tools service.

use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use sqlsh::service::{
    protocol::SubsetParams, MessageReader, ResponseEvent, ToolsServiceClient, POLL_INTERVAL,
};

struct FakeService {
    reader: MessageReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeService {
    fn new(far: DuplexStream) -> Self {
        let (read_half, write_half) = tokio::io::split(far);
        Self {
            reader: MessageReader::new(read_half),
            writer: write_half,
        }
    }

    async fn expect_request(&mut self, method: &str) -> Value {
        let request = self.reader.read_message().await.unwrap();
        assert_eq!(request["jsonrpc"], json!("2.0"));
        assert_eq!(request["method"], json!(method));
        request
    }

    async fn push(&mut self, body: &Value) {
        let text = serde_json::to_string(body).unwrap();
        let frame = format!("Content-Length: {}\r\n\r\n{}", text.len(), text);
        self.writer.write_all(frame.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }
}

fn client_over_duplex() -> (ToolsServiceClient, FakeService) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (read_half, write_half) = tokio::io::split(near);
    let client = ToolsServiceClient::from_streams(read_half, write_half);
    (client, FakeService::new(far))
}

#[tokio::test]
async fn test_connect_execute_fetch_happy_path() {
    let (client, mut service) = client_over_duplex();
    let owner_uri = ToolsServiceClient::new_owner_uri();

    let service_task = {
        let owner_uri = owner_uri.clone();
        tokio::spawn(async move {
            // connect: ack, then the completion event
            let request = service.expect_request("connection/connect").await;
            assert_eq!(request["params"]["ownerUri"], json!(owner_uri.clone()));
            let id = request["id"].clone();
            service.push(&json!({"id": id, "result": true})).await;
            service
                .push(&json!({
                    "method": "connection/complete",
                    "params": {
                        "ownerUri": owner_uri,
                        "connectionId": "f00d",
                        "serverInfo": {"serverVersion": "16.0.4085", "serverEdition": "Developer", "isCloud": false}
                    }
                }))
                .await;

            // executeString: ack, a progress message, then completion with
            // one result set of two rows
            let request = service.expect_request("query/executeString").await;
            assert_eq!(request["params"]["query"], json!("select n from numbers"));
            let id = request["id"].clone();
            service.push(&json!({"id": id, "result": {}})).await;
            service
                .push(&json!({
                    "method": "query/message",
                    "params": {"ownerUri": owner_uri, "message": {"batchId": 0, "isError": false, "message": "(2 rows affected)"}}
                }))
                .await;
            service
                .push(&json!({
                    "method": "query/complete",
                    "params": {"ownerUri": owner_uri, "batchSummaries": [
                        {"id": 0, "resultSetSummaries": [{"id": 0, "batchId": 0, "rowCount": 2}]}
                    ]}
                }))
                .await;

            // subset: the rows themselves
            let request = service.expect_request("query/subset").await;
            assert_eq!(request["params"]["rowsCount"], json!(2));
            let id = request["id"].clone();
            service
                .push(&json!({
                    "id": id,
                    "result": {"resultSubset": {"rowCount": 2, "rows": [
                        [{"displayValue": "1", "isNull": false}],
                        [{"displayValue": "2", "isNull": false}]
                    ]}}
                }))
                .await;

            service
        })
    };

    // connect
    let mut connect = client.connect_request(&owner_uri, Default::default()).unwrap();
    connect.execute().await.unwrap();
    let (_, terminal) = connect.await_completion(POLL_INTERVAL).await.unwrap();
    match terminal {
        ResponseEvent::ConnectionComplete(event) => {
            assert!(event.is_connected());
            let info = event.server_info.unwrap();
            assert_eq!(info.server_version.as_deref(), Some("16.0.4085"));
        }
        other => panic!("expected connection complete, got {other:?}"),
    }
    assert!(connect.completed());

    // execute
    let mut query = client
        .execute_query_request(&owner_uri, "select n from numbers")
        .unwrap();
    query.execute().await.unwrap();
    let (events, terminal) = query.await_completion(POLL_INTERVAL).await.unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ResponseEvent::QueryMessage(m) if m.message.message == "(2 rows affected)")));
    let complete = match terminal {
        ResponseEvent::QueryComplete(event) => event,
        other => panic!("expected query complete, got {other:?}"),
    };
    let result_set = &complete.batch_summaries[0].result_set_summaries[0];
    assert_eq!(result_set.row_count, 2);

    // fetch
    let mut subset = client
        .subset_request(SubsetParams {
            owner_uri: owner_uri.clone(),
            batch_index: complete.batch_summaries[0].id,
            result_set_index: result_set.id,
            rows_start_index: 0,
            rows_count: result_set.row_count,
        })
        .unwrap();
    subset.execute().await.unwrap();
    let (_, terminal) = subset.await_completion(POLL_INTERVAL).await.unwrap();
    match terminal {
        ResponseEvent::ResultSubset(subset) => {
            assert_eq!(subset.row_count, 2);
            assert_eq!(subset.rows[0][0].display_value.as_deref(), Some("1"));
            assert_eq!(subset.rows[1][0].display_value.as_deref(), Some("2"));
        }
        other => panic!("expected subset, got {other:?}"),
    }

    let service = service_task.await.unwrap();
    drop(service);

    client.shutdown().await;
}

#[tokio::test]
async fn test_failed_connect_reports_error_event() {
    let (client, mut service) = client_over_duplex();
    let owner_uri = ToolsServiceClient::new_owner_uri();

    let service_task = {
        let owner_uri = owner_uri.clone();
        tokio::spawn(async move {
            let request = service.expect_request("connection/connect").await;
            let id = request["id"].clone();
            service.push(&json!({"id": id, "result": true})).await;
            service
                .push(&json!({
                    "method": "connection/complete",
                    "params": {"ownerUri": owner_uri, "errorMessage": "Login failed for user 'sa'", "errorNumber": 18456}
                }))
                .await;
            service
        })
    };

    let mut connect = client.connect_request(&owner_uri, Default::default()).unwrap();
    connect.execute().await.unwrap();
    let (_, terminal) = connect.await_completion(POLL_INTERVAL).await.unwrap();
    match terminal {
        ResponseEvent::ConnectionComplete(event) => {
            assert!(!event.is_connected());
            assert_eq!(event.error_number, Some(18456));
        }
        other => panic!("expected connection complete, got {other:?}"),
    }

    drop(service_task.await.unwrap());
    client.shutdown().await;
}

#[tokio::test]
async fn test_service_death_surfaces_as_terminal_error() {
    let (client, service) = client_over_duplex();
    let owner_uri = ToolsServiceClient::new_owner_uri();

    let mut connect = client.connect_request(&owner_uri, Default::default()).unwrap();
    connect.execute().await.unwrap();

    // the service dies before answering: EOF on the inbound stream
    drop(service);

    let (_, terminal) = connect.await_completion(POLL_INTERVAL).await.unwrap();
    match terminal {
        ResponseEvent::Error(fault) => {
            // either the reader's EOF or the writer's broken pipe wins the
            // failure slot; both end the exchange with a typed error
            assert!(!fault.message.is_empty());
        }
        other => panic!("expected terminal error, got {other:?}"),
    }
    assert!(connect.completed());

    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_background_loops() {
    let (client, service) = client_over_duplex();

    assert!(client.is_alive());
    client.shutdown().await;
    client.shutdown().await;
    drop(service);

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while client.is_alive() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "background loops still running"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
