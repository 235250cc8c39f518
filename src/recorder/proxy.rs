//! Loopback endpoint that routes an external process through a session
//!
//! Script interpreters run in their own process and cannot call a
//! [`ContextHandle`] directly. [`ContextProxy`] listens on `127.0.0.1` and
//! forwards every request it receives to the handle, rewriting the URI onto
//! the upstream base so recorded fixtures look the same as those written by
//! in-process clients. Scripts reach it through `SCENARIO_BASE_URI`.

use std::net::Ipv4Addr;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::context::ContextHandle;
use super::record::{HttpRequest, HttpResponse};
use crate::common::Result;

/// Headers that describe one hop, not the recorded exchange
const HOP_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "transfer-encoding",
];

/// How long shutdown waits for open connections to drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct ProxyState {
    handle: ContextHandle,
    upstream: String,
}

/// A running loopback endpoint for one session
pub struct ContextProxy {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ContextProxy {
    /// Listen on an ephemeral loopback port and serve `handle`
    ///
    /// `upstream` is the base URI requests are rewritten onto, normally the
    /// session's resource manager endpoint.
    pub async fn start(handle: ContextHandle, upstream: &str) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;

        let state = ProxyState {
            handle,
            upstream: upstream.trim_end_matches('/').to_string(),
        };
        let app = Router::new().fallback(forward).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::warn!("Context proxy stopped: {}", e);
            }
        });

        tracing::debug!(%addr, "Context proxy listening");

        Ok(Self {
            base_url: format!("http://{}/", addr),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Base URL to hand to the script, with a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop accepting requests and wait for open connections to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!("Context proxy did not drain in time");
                task.abort();
            }
        }
    }
}

impl Drop for ContextProxy {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn forward(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let mut request = HttpRequest::new(method.as_str(), format!("{}{}", state.upstream, path))
        .body(String::from_utf8_lossy(&body).into_owned());

    for name in headers.keys() {
        if is_hop_header(name.as_str()) {
            continue;
        }
        let value = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        request = request.header(name.as_str(), value);
    }

    match state.handle.send(request).await {
        Ok(response) => into_response(response),
        Err(e) => {
            tracing::warn!(%method, path, "Context proxy request failed: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

fn into_response(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, values) in &response.headers {
        if is_hop_header(name) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }

    (status, headers, response.body).into_response()
}

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::HttpMode;
    use crate::common::Error;
    use crate::recorder::{MatcherPolicy, MockContext, RecorderSettings, SessionMode, Transport};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const UPSTREAM: &str = "https://management.azure.com/";
    const VAULT: &str = "subscriptions/sub/resourceGroups/rg/providers/Microsoft.RecoveryServices/vaults/v?api-version=2016-06-01";

    #[derive(Default)]
    struct VaultTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for VaultTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                headers: BTreeMap::from([(
                    "x-ms-request-id".to_string(),
                    vec!["abc".to_string()],
                )]),
                body: format!("{{\"uri\":\"{}\"}}", request.uri),
            })
        }
    }

    fn settings(dir: &std::path::Path, mode: HttpMode) -> RecorderSettings {
        RecorderSettings {
            records_dir: dir.to_path_buf(),
            mode,
            policy: MatcherPolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_proxy_records_then_replays() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(VaultTransport::default());
        let client = reqwest::Client::new();

        let mut context = MockContext::start(
            &settings(dir.path(), HttpMode::Record),
            "Backup.Test.ShellTests",
            "TestProxy",
            transport.clone(),
        )
        .unwrap();
        let proxy = ContextProxy::start(context.handle(), UPSTREAM).await.unwrap();
        let live = client
            .get(format!("{}{}", proxy.base_url(), VAULT))
            .send()
            .await
            .unwrap();
        assert_eq!(live.status().as_u16(), 200);
        assert_eq!(live.headers()["x-ms-request-id"], "abc");
        let live_body = live.text().await.unwrap();
        assert!(live_body.contains(&format!("{}{}", UPSTREAM, VAULT)));
        proxy.shutdown().await;
        let summary = context.release().unwrap();
        assert_eq!(summary.entries, 1);

        let mut context = MockContext::start(
            &settings(dir.path(), HttpMode::Auto),
            "Backup.Test.ShellTests",
            "TestProxy",
            transport.clone(),
        )
        .unwrap();
        assert_eq!(context.mode(), SessionMode::Playback);
        let proxy = ContextProxy::start(context.handle(), UPSTREAM).await.unwrap();
        let replayed = client
            .get(format!("{}{}", proxy.base_url(), VAULT))
            .send()
            .await
            .unwrap();
        assert_eq!(replayed.status().as_u16(), 200);
        assert_eq!(replayed.text().await.unwrap(), live_body);

        // Fixture exhausted
        let missing = client
            .get(format!("{}{}", proxy.base_url(), VAULT))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 502);
        assert!(missing.text().await.unwrap().contains("No recorded entry"));

        proxy.shutdown().await;
        assert_eq!(context.release().unwrap().replayed, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_proxy_reports_released_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = MockContext::start(
            &settings(dir.path(), HttpMode::Record),
            "Backup.Test.ShellTests",
            "TestReleased",
            Arc::new(VaultTransport::default()),
        )
        .unwrap();
        let proxy = ContextProxy::start(context.handle(), UPSTREAM).await.unwrap();
        context.release().unwrap();

        let response = reqwest::get(format!("{}{}", proxy.base_url(), VAULT))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 502);
        let message = response.text().await.unwrap();
        assert!(message.contains(&Error::ContextReleased("TestReleased".into()).to_string()));
    }

    #[test]
    fn test_hop_headers_are_not_forwarded() {
        assert!(is_hop_header("Host"));
        assert!(is_hop_header("Content-Length"));
        assert!(!is_hop_header("User-Agent"));
    }
}
