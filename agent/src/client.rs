//! Upstream Client: the three HTTP calls the agent makes against the
//! ingest API, sharing one connection pool and bearer credential.
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Error, Message};

/// Hard timeout applied to every upstream request.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Shared HTTP client for the upstream ingest API. Cheap to clone — clones
/// share the underlying connection pool — and safe under concurrent use
/// from both the Egress Worker and connection handlers.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    app_url: String,
    api_key: String,
}

impl UpstreamClient {
    /// Builds a client bound to `app_url`, authenticating every request
    /// with `api_key`.
    pub fn new(app_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, Error> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(UpstreamClient {
            http,
            app_url: app_url.into(),
            api_key: api_key.into(),
        })
    }

    /// POSTs a batch of messages to `{app_url}/messages`. Success is
    /// exactly HTTP 201; any other outcome is logged and the batch is
    /// dropped (fire-and-forget publishes are at-most-once).
    pub async fn post_batch(&self, messages: &[Message]) {
        let url = format!("{}/messages", self.app_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(messages)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == StatusCode::CREATED => {
                debug!(count = messages.len(), "batch accepted by upstream");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(
                    count = messages.len(),
                    status = status.as_u16(),
                    body = %body,
                    "batch rejected by upstream, dropping"
                );
            }
            Err(e) => {
                warn!(count = messages.len(), error = %e, "batch POST transport error, dropping");
            }
        }
    }

    /// POSTs a single message to `{app_url}/entities/message`. Returns the
    /// response body verbatim regardless of status code, so an upstream
    /// error body (e.g. `400 {"error":"bad message"}`) reaches the caller
    /// unchanged; only a transport/connect failure is surfaced instead as a
    /// synthesized `{"error": "<detail>"}`, since a synchronous publish
    /// always gets a reply.
    pub async fn post_single(&self, message: &Message) -> Value {
        let url = format!("{}/entities/message", self.app_url);
        let result = async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(message)
                .send()
                .await?;
            response.json::<Value>().await
        }
        .await;

        match result {
            Ok(body) => body,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        }
    }

    /// GETs `{app_url}/entities/check_messages?limit={limit}`. A 204
    /// response yields an empty list; a 200 response is parsed as
    /// `{"messages": [...]}`; anything else is an error.
    pub async fn poll(&self, limit: i64) -> Result<Vec<Message>, Error> {
        let url = format!("{}/entities/check_messages", self.app_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[("limit", limit.to_string())])
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(Vec::new()),
            StatusCode::OK => {
                #[derive(serde::Deserialize)]
                struct PollBody {
                    messages: Vec<Message>,
                }
                let body: PollBody = response.json().await?;
                Ok(body.messages)
            }
            other => Err(Error::UnexpectedStatus(other.as_u16())),
        }
    }
}
