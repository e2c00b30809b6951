use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

use super::*;
use crate::dialect::V8Dialect;
use crate::transport::{FramedTransport, write_frame};

struct Agent {
	reader: BufReader<DuplexStream>,
	writer: DuplexStream,
}

impl Agent {
	async fn read_request(&mut self) -> Value {
		let mut len = None;
		loop {
			let mut line = String::new();
			self.reader.read_line(&mut line).await.unwrap();
			let line = line.trim_end();
			if line.is_empty() {
				break;
			}
			if let Some(value) = line.strip_prefix("Content-Length: ") {
				len = Some(value.parse::<usize>().unwrap());
			}
		}
		let mut body = vec![0u8; len.unwrap()];
		self.reader.read_exact(&mut body).await.unwrap();
		serde_json::from_slice(&body).unwrap()
	}

	async fn respond(&mut self, request_seq: u64, body: Value) {
		let message = json!({
			"seq": 100 + request_seq,
			"type": "response",
			"request_seq": request_seq,
			"success": true,
			"body": body,
			"refs": [],
			"running": false
		});
		write_frame(&mut self.writer, &message).await.unwrap();
	}
}

fn create_test_connection() -> (Arc<Connection>, mpsc::UnboundedReceiver<ProtocolEvent>, Agent) {
	let (agent_read, transport_write) = duplex(64 * 1024);
	let (transport_read, agent_write) = duplex(64 * 1024);

	let (transport, message_rx) = FramedTransport::new(transport_write, transport_read);
	let parts = transport.into_transport_parts(message_rx);
	let (connection, events_rx, _handle) = Connection::spawn(parts, V8Dialect);

	(
		connection,
		events_rx,
		Agent {
			reader: BufReader::new(agent_read),
			writer: agent_write,
		},
	)
}

#[tokio::test]
async fn test_request_ids_start_at_one() {
	let (connection, _events, mut agent) = create_test_connection();

	let conn = Arc::clone(&connection);
	let first = tokio::spawn(async move { conn.request("backtrace", json!({"inlineRefs": true})).await });
	let request = agent.read_request().await;
	assert_eq!(request["seq"], 1);
	assert_eq!(request["command"], "backtrace");
	agent.respond(1, json!({"totalFrames": 0})).await;
	first.await.unwrap().unwrap();

	let conn = Arc::clone(&connection);
	let second = tokio::spawn(async move { conn.request("continue", Value::Null).await });
	let request = agent.read_request().await;
	assert_eq!(request["seq"], 2);
	assert!(request.get("arguments").is_none());
	agent.respond(2, Value::Null).await;
	second.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_out_of_order_responses() {
	let (connection, _events, mut agent) = create_test_connection();

	let mut tasks = Vec::new();
	for expr in ["a", "b", "c"] {
		let conn = Arc::clone(&connection);
		tasks.push(tokio::spawn(async move {
			conn.request("evaluate", json!({"expression": expr, "global": true}))
				.await
		}));
	}

	let mut requests = Vec::new();
	for _ in 0..3 {
		requests.push(agent.read_request().await);
	}

	// answer in reverse, echoing the expression so callers can check pairing
	for request in requests.iter().rev() {
		let seq = request["seq"].as_u64().unwrap();
		let expr = request["arguments"]["expression"].clone();
		agent.respond(seq, json!({"text": expr})).await;
	}

	for (task, expr) in tasks.into_iter().zip(["a", "b", "c"]) {
		let response = task.await.unwrap().unwrap();
		assert_eq!(response["body"]["text"], expr);
	}
	assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_failed_response_is_remote_error() {
	let (connection, _events, mut agent) = create_test_connection();

	let conn = Arc::clone(&connection);
	let task = tokio::spawn(async move { conn.request("evaluate", json!({"expression": "nope"})).await });
	let request = agent.read_request().await;

	let failure = json!({
		"seq": 5,
		"type": "response",
		"request_seq": request["seq"],
		"success": false,
		"message": "ReferenceError: nope is not defined"
	});
	write_frame(&mut agent.writer, &failure).await.unwrap();

	let err = task.await.unwrap().unwrap_err();
	assert_eq!(err.error_name(), Some("ReferenceError"));
}

#[tokio::test]
async fn test_unknown_response_id_is_dropped() {
	let (connection, _events, mut agent) = create_test_connection();

	let conn = Arc::clone(&connection);
	let task = tokio::spawn(async move { conn.request("scopes", json!({"frameNumber": 0})).await });
	let request = agent.read_request().await;

	agent.respond(999, json!({"bogus": true})).await;
	agent.respond(request["seq"].as_u64().unwrap(), json!({"scopes": []})).await;

	let response = task.await.unwrap().unwrap();
	assert_eq!(response["body"]["scopes"], json!([]));
	assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_events_are_forwarded() {
	let (_connection, mut events, mut agent) = create_test_connection();

	let event = json!({
		"seq": 1,
		"type": "event",
		"event": "break",
		"body": {"sourceLine": 3, "script": {"name": "/tmp/app.js"}}
	});
	write_frame(&mut agent.writer, &event).await.unwrap();

	let received = events.recv().await.unwrap();
	assert_eq!(received.name, "break");
	assert_eq!(received.body["sourceLine"], 3);
}

#[tokio::test]
async fn test_close_fails_pending_requests() {
	let (connection, mut events, mut agent) = create_test_connection();

	let conn = Arc::clone(&connection);
	let task = tokio::spawn(async move { conn.request("backtrace", Value::Null).await });
	agent.read_request().await;
	assert_eq!(connection.pending_count(), 1);

	connection.close();

	let err = task.await.unwrap().unwrap_err();
	assert!(err.is_session_closed());
	assert!(events.recv().await.is_none());

	let err = connection.request("continue", Value::Null).await.unwrap_err();
	assert!(err.is_session_closed());
}

#[tokio::test]
async fn test_transport_eof_fails_pending_requests() {
	let (connection, mut events, mut agent) = create_test_connection();

	let conn = Arc::clone(&connection);
	let task = tokio::spawn(async move { conn.request("backtrace", Value::Null).await });
	agent.read_request().await;

	agent.writer.shutdown().await.unwrap();
	drop(agent);

	let err = task.await.unwrap().unwrap_err();
	assert!(err.is_session_closed());
	assert!(events.recv().await.is_none());
	assert!(connection.is_closed());
}

#[tokio::test]
async fn test_cancelled_request_removes_callback() {
	let (connection, _events, mut agent) = create_test_connection();

	let result = tokio::time::timeout(
		Duration::from_millis(50),
		connection.request("evaluate", json!({"expression": "while(true){}"})),
	)
	.await;
	assert!(result.is_err());
	assert_eq!(connection.pending_count(), 0);

	// a late response for the abandoned id is harmless
	let request = agent.read_request().await;
	agent.respond(request["seq"].as_u64().unwrap(), Value::Null).await;
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert!(!connection.is_closed());
}

#[test]
fn test_dispatch_without_runtime() {
	let (agent_read, transport_write) = duplex(1024);
	let (transport_read, _agent_write) = duplex(1024);
	drop(agent_read);

	let (transport, message_rx) = FramedTransport::new(transport_write, transport_read);
	let (connection, mut events) = Connection::new(transport.into_transport_parts(message_rx), V8Dialect);

	let (tx, mut rx) = oneshot::channel();
	connection.callbacks.lock().insert(7, tx);
	connection.dispatch(json!({"type": "response", "request_seq": 7, "success": true, "body": {"ok": 1}}));
	let value = rx.try_recv().unwrap().unwrap();
	assert_eq!(value["body"]["ok"], 1);

	connection.dispatch(json!({"type": "event", "event": "afterCompile", "body": {}}));
	assert_eq!(events.try_recv().unwrap().name, "afterCompile");
}
