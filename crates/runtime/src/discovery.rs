//! DevTools target discovery over the `/json` HTTP endpoint.

use std::time::Duration;

use bugs_protocol::cdp::TargetInfo;

use crate::error::{Error, Result};

/// URL of the blank tab a freshly launched browser opens.
pub const NEW_TAB_URL: &str = "chrome://newtab/";

const HTTP_TIMEOUT: Duration = Duration::from_millis(400);

/// Lists debuggable targets from `http://host:port/json`.
pub async fn list_targets(host: &str, port: u16) -> Result<Vec<TargetInfo>> {
	let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
	let url = format!("http://{host}:{port}/json");

	let response = client.get(&url).send().await?;
	if !response.status().is_success() {
		return Err(Error::Discovery(format!("{url} returned status {}", response.status())));
	}

	let targets: Vec<TargetInfo> = response.json().await?;
	tracing::debug!(%url, count = targets.len(), "listed devtools targets");
	Ok(targets)
}

/// Picks the page to attach to.
///
/// Prefers a page already showing `home_page` or the new-tab page, then any
/// page. Targets without a WebSocket URL (already attached elsewhere) are
/// skipped.
pub fn select_target<'a>(targets: &'a [TargetInfo], home_page: Option<&str>) -> Option<&'a TargetInfo> {
	let pages = || {
		targets
			.iter()
			.filter(|t| t.kind == "page" && t.web_socket_debugger_url.is_some())
	};

	pages()
		.find(|t| home_page.is_some_and(|home| t.url == home) || t.url == NEW_TAB_URL)
		.or_else(|| pages().next())
}

/// Resolves the WebSocket URL of the page to debug.
pub async fn discover_websocket_url(host: &str, port: u16, home_page: Option<&str>) -> Result<String> {
	let targets = list_targets(host, port).await?;
	select_target(&targets, home_page)
		.and_then(|t| t.web_socket_debugger_url.clone())
		.ok_or_else(|| {
			Error::Discovery(format!(
				"no debuggable page among {} target(s) on {host}:{port}",
				targets.len()
			))
		})
}

#[cfg(test)]
mod tests {
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	use super::*;

	fn target(id: &str, kind: &str, url: &str, attached: bool) -> TargetInfo {
		TargetInfo {
			id: id.to_string(),
			kind: kind.to_string(),
			title: String::new(),
			url: url.to_string(),
			web_socket_debugger_url: (!attached).then(|| format!("ws://127.0.0.1:9222/devtools/page/{id}")),
		}
	}

	#[test]
	fn prefers_home_page() {
		let targets = vec![
			target("A", "page", "http://other/", false),
			target("B", "page", "http://localhost:8080/", false),
		];
		let selected = select_target(&targets, Some("http://localhost:8080/")).unwrap();
		assert_eq!(selected.id, "B");
	}

	#[test]
	fn falls_back_to_new_tab_then_first_page() {
		let targets = vec![
			target("W", "service_worker", NEW_TAB_URL, false),
			target("A", "page", "http://other/", false),
			target("N", "page", NEW_TAB_URL, false),
		];
		assert_eq!(select_target(&targets, Some("http://nope/")).unwrap().id, "N");

		let targets = vec![target("A", "page", "http://other/", false)];
		assert_eq!(select_target(&targets, None).unwrap().id, "A");
	}

	#[test]
	fn skips_attached_targets() {
		let targets = vec![target("N", "page", NEW_TAB_URL, true)];
		assert!(select_target(&targets, None).is_none());
	}

	#[tokio::test]
	async fn discovers_over_http() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();

		let server = tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			let mut buf = vec![0u8; 4096];
			let n = socket.read(&mut buf).await.unwrap();
			let request = String::from_utf8_lossy(&buf[..n]).to_string();

			let body = r#"[{"id":"P1","type":"page","title":"New Tab","url":"chrome://newtab/","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/page/P1"}]"#;
			let response = format!(
				"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
				body.len(),
				body
			);
			socket.write_all(response.as_bytes()).await.unwrap();
			request
		});

		let url = discover_websocket_url("127.0.0.1", port, None).await.unwrap();
		assert_eq!(url, "ws://127.0.0.1:9222/devtools/page/P1");

		let request = server.await.unwrap();
		assert!(request.starts_with("GET /json HTTP/1.1"));
	}
}
