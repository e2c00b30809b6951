//! In-process debug agents speaking just enough V8 and DevTools protocol to
//! drive a session.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bugs::{SessionConfig, SessionEvent};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Answers one request: a body, or an error message.
pub type Handler = Arc<dyn Fn(&str, &Value) -> Result<Value, String> + Send + Sync>;

/// A request as the agent received it.
#[derive(Debug, Clone)]
pub struct Request {
	pub method: String,
	pub params: Value,
}

pub struct Agent {
	pub port: u16,
	requests: mpsc::UnboundedReceiver<Request>,
	outbound: mpsc::UnboundedSender<Value>,
	tasks: Vec<JoinHandle<()>>,
}

impl Agent {
	/// Next request, skipping any whose method is in `ignore`.
	pub async fn next_request_except(&mut self, ignore: &[&str]) -> Request {
		loop {
			let request = tokio::time::timeout(TIMEOUT, self.requests.recv())
				.await
				.expect("timed out waiting for a request")
				.expect("agent stopped");
			if !ignore.contains(&request.method.as_str()) {
				return request;
			}
		}
	}

	pub async fn next_request(&mut self) -> Request {
		self.next_request_except(&[]).await
	}

	/// Waits for a request with this method, skipping others.
	pub async fn expect(&mut self, method: &str) -> Request {
		loop {
			let request = self.next_request().await;
			if request.method == method {
				return request;
			}
		}
	}

	/// Sends a raw message to the client.
	pub fn send(&self, message: Value) {
		self.outbound.send(message).expect("agent stopped");
	}

	/// Drops the connection.
	pub fn hang_up(&mut self) {
		for task in self.tasks.drain(..) {
			task.abort();
		}
	}
}

impl Drop for Agent {
	fn drop(&mut self) {
		self.hang_up();
	}
}

// V8 agent

const GREETING: &[u8] =
	b"Type: connect\r\nV8-Version: 3.28.71.19\r\nProtocol-Version: 1\r\nEmbedding-Host: node v0.12.18\r\nContent-Length: 0\r\n\r\n";

/// Listens on an ephemeral port and serves one V8 client.
pub async fn v8_agent(handler: Handler) -> Agent {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let (requests_tx, requests) = mpsc::unbounded_channel();
	let (outbound, outbound_rx) = mpsc::unbounded_channel::<Value>();
	let reply_tx = outbound.clone();

	let task = tokio::spawn(async move {
		let (socket, _) = listener.accept().await.unwrap();
		let (read, write) = socket.into_split();
		tokio::join!(
			v8_writer(write, outbound_rx),
			v8_reader(BufReader::new(read), handler, requests_tx, reply_tx),
		);
	});

	Agent {
		port,
		requests,
		outbound,
		tasks: vec![task],
	}
}

async fn v8_writer(mut write: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Value>) {
	if write.write_all(GREETING).await.is_err() {
		return;
	}
	while let Some(message) = outbound.recv().await {
		let body = serde_json::to_vec(&message).unwrap();
		let header = format!("Content-Length: {}\r\n\r\n", body.len());
		if write.write_all(header.as_bytes()).await.is_err() || write.write_all(&body).await.is_err() {
			return;
		}
	}
}

async fn v8_reader(
	mut reader: BufReader<OwnedReadHalf>,
	handler: Handler,
	requests: mpsc::UnboundedSender<Request>,
	replies: mpsc::UnboundedSender<Value>,
) {
	let mut seq = 1000;
	while let Some(request) = read_frame(&mut reader).await {
		let method = request["command"].as_str().unwrap_or_default().to_string();
		let params = request.get("arguments").cloned().unwrap_or(Value::Null);
		let request_seq = request["seq"].as_u64().unwrap_or_default();
		seq += 1;

		let response = match handler(&method, &params) {
			Ok(reply) => json!({
				"seq": seq,
				"type": "response",
				"request_seq": request_seq,
				"command": method,
				"success": true,
				"body": reply.get("body").cloned().unwrap_or(reply.clone()),
				"refs": reply.get("refs").cloned().unwrap_or(json!([])),
				"running": method == "continue",
			}),
			Err(message) => json!({
				"seq": seq,
				"type": "response",
				"request_seq": request_seq,
				"command": method,
				"success": false,
				"message": message,
				"running": false,
			}),
		};
		let _ = requests.send(Request { method, params });
		if replies.send(response).is_err() {
			return;
		}
	}
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Option<Value> {
	let mut len = None;
	loop {
		let mut line = String::new();
		if reader.read_line(&mut line).await.ok()? == 0 {
			return None;
		}
		let line = line.trim_end();
		if line.is_empty() {
			break;
		}
		if let Some(value) = line.strip_prefix("Content-Length: ") {
			len = value.parse::<usize>().ok();
		}
	}
	let mut body = vec![0u8; len?];
	reader.read_exact(&mut body).await.ok()?;
	serde_json::from_slice(&body).ok()
}

/// A V8 `event` message.
pub fn v8_event(event: &str, body: Value) -> Value {
	json!({"seq": 0, "type": "event", "event": event, "body": body})
}

/// Wraps a body with `refs` for handlers that need them.
pub fn with_refs(body: Value, refs: Value) -> Value {
	json!({"body": body, "refs": refs})
}

/// Node-flavoured agent for `/tmp/app.js`: numbered breakpoints, one frame,
/// and a small object graph reachable through `point`.
pub fn node_handler() -> Handler {
	let next_breakpoint = Arc::new(std::sync::atomic::AtomicU64::new(1));
	Arc::new(move |command: &str, arguments: &Value| match command {
		"setexceptionbreak" | "continue" | "clearbreakpoint" | "disconnect" => Ok(json!({})),
		"setbreakpoint" => {
			let id = next_breakpoint.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			Ok(json!({"type": "scriptName", "breakpoint": id, "script_name": arguments["target"], "line": arguments["line"]}))
		}
		"backtrace" => Ok(json!({
			"fromFrame": 0,
			"toFrame": 1,
			"totalFrames": 1,
			"frames": [{
				"type": "frame",
				"index": 0,
				"func": {"type": "function", "name": "main", "inferredName": ""},
				"script": {"type": "script", "name": "/tmp/app.js"},
				"line": 2,
				"column": 4
			}]
		})),
		"scopes" => Ok(with_refs(
			json!({
				"fromScope": 0,
				"toScope": 1,
				"totalScopes": 1,
				"scopes": [{"type": 1, "index": 0, "object": {"ref": 10}}]
			}),
			json!([{"handle": 10, "type": "object", "className": "Object", "text": "#<Point>", "properties": []}]),
		)),
		"evaluate" => match arguments["expression"].as_str().unwrap_or_default() {
			"1+1" => Ok(json!({"handle": 5, "type": "number", "value": 2, "text": "2"})),
			"point" => Ok(json!({
				"handle": 10,
				"type": "object",
				"className": "Object",
				"text": "#<Point>",
				"properties": [
					{"name": "x", "propertyType": 0, "ref": 11},
					{"name": "self", "propertyType": 0, "ref": 10}
				]
			})),
			"boom()" => Err("ReferenceError: boom is not defined".to_string()),
			_ => Ok(json!({"type": "undefined", "text": "undefined"})),
		},
		"lookup" => {
			let mut body = serde_json::Map::new();
			for handle in arguments["handles"].as_array().cloned().unwrap_or_default() {
				let mirror = match handle.as_u64() {
					Some(10) => json!({
						"handle": 10,
						"type": "object",
						"className": "Object",
						"text": "#<Point>",
						"properties": [
							{"name": "x", "propertyType": 0, "ref": 11},
							{"name": "self", "propertyType": 0, "ref": 10}
						]
					}),
					Some(11) => json!({"handle": 11, "type": "number", "value": 1, "text": "1"}),
					_ => continue,
				};
				body.insert(handle.to_string(), mirror);
			}
			Ok(Value::Object(body))
		}
		other => Err(format!("unknown command {other}")),
	})
}

/// Attach config pointed at a local agent, retrying quickly.
pub fn node_attach_config(port: u16) -> SessionConfig {
	SessionConfig {
		attach: true,
		port: Some(port),
		hostname: Some("127.0.0.1".to_string()),
		connect_attempts: Some(3),
		retry_backoff_ms: 20,
		..SessionConfig::node("/tmp/app.js")
	}
}

// DevTools agent

/// Serves `/json` on one port and a single page WebSocket on another.
pub async fn cdp_agent(handler: Handler) -> Agent {
	let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let ws_port = ws_listener.local_addr().unwrap().port();
	let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = http_listener.local_addr().unwrap().port();

	let http = tokio::spawn(async move {
		loop {
			let Ok((mut socket, _)) = http_listener.accept().await else {
				return;
			};
			let mut buf = vec![0u8; 4096];
			let _ = socket.read(&mut buf).await;
			let body = json!([{
				"id": "P1",
				"type": "page",
				"title": "New Tab",
				"url": "chrome://newtab/",
				"webSocketDebuggerUrl": format!("ws://127.0.0.1:{ws_port}/devtools/page/P1")
			}])
			.to_string();
			let response = format!(
				"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
				body.len(),
				body
			);
			let _ = socket.write_all(response.as_bytes()).await;
		}
	});

	let (requests_tx, requests) = mpsc::unbounded_channel();
	let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
	let reply_tx = outbound.clone();

	let page = tokio::spawn(async move {
		let (stream, _) = ws_listener.accept().await.unwrap();
		let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let (mut sink, mut source) = ws.split();

		let writer = async move {
			while let Some(message) = outbound_rx.recv().await {
				if sink.send(Message::Text(message.to_string())).await.is_err() {
					return;
				}
			}
		};

		let reader = async move {
			while let Some(Ok(message)) = source.next().await {
				let Message::Text(text) = message else {
					continue;
				};
				let Ok(request) = serde_json::from_str::<Value>(&text) else {
					continue;
				};
				let id = request["id"].clone();
				let method = request["method"].as_str().unwrap_or_default().to_string();
				let params = request.get("params").cloned().unwrap_or(Value::Null);

				let response = match handler(&method, &params) {
					Ok(result) => json!({"id": id, "result": result}),
					Err(message) => json!({"id": id, "error": {"code": -32000, "message": message}}),
				};
				let _ = requests_tx.send(Request { method, params });
				if reply_tx.send(response).is_err() {
					return;
				}
			}
		};

		tokio::join!(writer, reader);
	});

	Agent {
		port,
		requests,
		outbound,
		tasks: vec![http, page],
	}
}

/// A DevTools event message.
pub fn cdp_event(method: &str, params: Value) -> Value {
	json!({"method": method, "params": params})
}

/// Page agent serving `http://localhost:8000/app.js` as script `7`.
pub fn chrome_handler() -> Handler {
	Arc::new(|method: &str, params: &Value| match method {
		"Debugger.setBreakpointByUrl" => Ok(json!({
			"breakpointId": format!("1:{}:0:{}", params["lineNumber"], params["url"].as_str().unwrap_or_default()),
			"locations": []
		})),
		"Debugger.evaluateOnCallFrame" | "Runtime.evaluate" => match params["expression"].as_str().unwrap_or_default() {
			"1+1" => Ok(json!({"result": {"type": "number", "value": 2, "description": "2"}})),
			"window" => Ok(json!({"result": {
				"type": "object",
				"className": "Window",
				"description": "Window",
				"objectId": "obj-1"
			}})),
			"boom()" => Ok(json!({
				"result": {"type": "object", "subtype": "error", "className": "ReferenceError", "description": "ReferenceError: boom is not defined", "objectId": "err-1"},
				"exceptionDetails": {"exceptionId": 1, "text": "Uncaught", "lineNumber": 0, "columnNumber": 0,
					"exception": {"type": "object", "subtype": "error", "className": "ReferenceError", "description": "ReferenceError: boom is not defined"}}
			})),
			_ => Ok(json!({"result": {"type": "undefined"}})),
		},
		"Runtime.getProperties" => match params["objectId"].as_str() {
			Some("obj-1") => Ok(json!({"result": [
				{"name": "title", "value": {"type": "string", "value": "Demo"}},
				{"name": "answer", "value": {"type": "number", "value": 42, "description": "42"}}
			]})),
			Some("scope-1") => Ok(json!({"result": [
				{"name": "count", "value": {"type": "number", "value": 3, "description": "3"}}
			]})),
			_ => Ok(json!({"result": []})),
		},
		_ => Ok(json!({})),
	})
}

pub fn chrome_config(port: u16) -> SessionConfig {
	SessionConfig {
		attach: true,
		port: Some(port),
		connect_attempts: Some(3),
		retry_backoff_ms: 20,
		cwd: Some("/srv/site".into()),
		sources: Some("public".into()),
		..SessionConfig::browser(Some("http://localhost:8000/".to_string()))
	}
}

/// A `Debugger.paused` event at `app.js` line 5, column 3 (0-based).
pub fn chrome_paused(reason: &str, hit: &[&str]) -> Value {
	cdp_event(
		"Debugger.paused",
		json!({
			"reason": reason,
			"hitBreakpoints": hit,
			"callFrames": [{
				"callFrameId": "frame-0",
				"functionName": "render",
				"location": {"scriptId": "7", "lineNumber": 4, "columnNumber": 2},
				"url": "http://localhost:8000/app.js",
				"scopeChain": [
					{"type": "local", "object": {"type": "object", "className": "Object", "objectId": "scope-1"}},
					{"type": "global", "object": {"type": "object", "className": "Window", "objectId": "obj-1"}}
				]
			}]
		}),
	)
}

/// Waits for the first event matching `predicate`, failing the test on
/// timeout.
pub async fn next_matching<F>(events: &mut bugs::EventStream<SessionEvent>, predicate: F) -> SessionEvent
where
	F: Fn(&SessionEvent) -> bool,
{
	tokio::time::timeout(TIMEOUT, async {
		loop {
			match events.recv().await {
				Some(event) if predicate(&event) => return event,
				Some(_) => {}
				None => panic!("event stream ended"),
			}
		}
	})
	.await
	.expect("timed out waiting for event")
}
