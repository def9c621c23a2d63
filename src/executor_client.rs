use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::query::Query;

/// Runs a query against one service and returns its raw GraphQL response.
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    async fn execute(&self, ctx: &CancellationToken, query: &Query) -> Result<Bytes, ClientError>;
}

/// Posts queries to a service's GraphQL endpoint.
pub struct HttpExecutorClient {
    client: reqwest::Client,
    url: String,
    headers: BTreeMap<String, String>,
}

impl HttpExecutorClient {
    pub fn new(url: impl Into<String>) -> Self {
        HttpExecutorClient {
            client: reqwest::Client::new(),
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Static headers sent with every request.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl ExecutorClient for HttpExecutorClient {
    async fn execute(&self, ctx: &CancellationToken, query: &Query) -> Result<Bytes, ClientError> {
        let request_body = json!({
            "query": query.to_string(),
            "variables": {}
        });

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request_body);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let send = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ClientError::Status(status.as_u16()));
            }
            Ok(response.bytes().await?)
        };

        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                debug!(url = %self.url, "request cancelled");
                Err(ClientError::Cancelled)
            }
            result = send => result,
        }
    }
}
