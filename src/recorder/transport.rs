//! Live HTTP transport used while recording

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::record::{HttpRequest, HttpResponse};
use crate::common::{Error, Result};

/// Sends a request to a live endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Transport backed by reqwest
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Every value of every header, skipping values that are not visible ASCII
pub(crate) fn multi_valued_headers(
    headers: &reqwest::header::HeaderMap,
) -> BTreeMap<String, Vec<String>> {
    headers
        .keys()
        .map(|name| {
            let values = headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(str::to_string)
                .collect();
            (name.as_str().to_string(), values)
        })
        .collect()
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::Transport(format!("Invalid method '{}': {}", request.method, e)))?;

        let mut builder = self.client.request(method, &request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = multi_valued_headers(response.headers());
        let body = response.text().await?;

        tracing::debug!(method = %request.method, uri = %request.uri, status, "Live response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
