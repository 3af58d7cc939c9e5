//! ARM client
//!
//! Thin JSON client over the Azure Resource Manager REST API. Requests go
//! through an [`ArmTransport`] so the HTTP layer can be swapped out.
//! Long-running operations are polled until they reach a terminal state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value as Json;
use thiserror::Error;

use crate::auth::{AuthError, Credential};

#[derive(Debug, Error)]
pub enum ArmError {
    #[error("unexpected status {status} with error: {code}: {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    #[error("sending request: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("the operation finished with status {status:?}: {message}")]
    OperationFailed { status: String, message: String },

    #[error("context deadline exceeded after {0:?}")]
    Timeout(Duration),
}

impl ArmError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ArmError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn was_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn was_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

pub type ArmResult<T> = Result<T, ArmError>;

/// A single request against the management endpoint
#[derive(Debug, Clone)]
pub struct ArmRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Json>,
}

impl ArmRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Json) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArmResponse {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub body: Option<Json>,
}

impl ArmResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Json) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Sends requests to ARM
#[async_trait]
pub trait ArmTransport: Send + Sync {
    async fn send(&self, request: ArmRequest) -> ArmResult<ArmResponse>;
}

/// reqwest-backed transport with bearer authentication
pub struct HttpTransport {
    http: reqwest::Client,
    credential: Credential,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, credential: Credential) -> Self {
        Self { http, credential }
    }
}

#[async_trait]
impl ArmTransport for HttpTransport {
    async fn send(&self, request: ArmRequest) -> ArmResult<ArmResponse> {
        let token = self.credential.token().await?;

        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .http
            .request(request.method, &request.url)
            .bearer_auth(token);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        Ok(ArmResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn status_error(response: &ArmResponse) -> ArmError {
    let (code, message) = response
        .body
        .as_ref()
        .and_then(|b| serde_json::from_value::<ErrorEnvelope>(b.clone()).ok())
        .map(|e| (e.error.code, e.error.message))
        .unwrap_or_else(|| ("Unknown".to_string(), String::new()));
    ArmError::Status {
        status: response.status,
        code,
        message,
    }
}

/// Run `fut` under `limit`
pub async fn with_timeout<T, E: From<ArmError>>(
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| E::from(ArmError::Timeout(limit)))?
}

/// Lower bound between polls of a long-running operation
const MIN_POLL_DELAY: Duration = Duration::from_millis(100);

/// `Retry-After` if ARM sent one, `fallback` otherwise, never below `MIN_POLL_DELAY`
fn poll_delay(response: &ArmResponse, fallback: Duration) -> Duration {
    response.retry_after().unwrap_or(fallback).max(MIN_POLL_DELAY)
}

/// JSON client for one subscription's management endpoint
#[derive(Clone)]
pub struct ArmClient {
    transport: Arc<dyn ArmTransport>,
    endpoint: String,
    subscription_id: String,
    poll_interval: Duration,
}

impl ArmClient {
    pub fn new(
        transport: Arc<dyn ArmTransport>,
        endpoint: impl Into<String>,
        subscription_id: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            poll_interval,
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    async fn send(&self, request: ArmRequest) -> ArmResult<ArmResponse> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(status_error(&response))
        }
    }

    /// GET a resource; a missing resource surfaces as a 404 `ArmError::Status`
    pub async fn get(&self, path: &str, api_version: &str) -> ArmResult<Json> {
        let response = self
            .send(ArmRequest::new(Method::GET, self.url(path, api_version)))
            .await?;
        Ok(response.body.unwrap_or(Json::Null))
    }

    /// PUT (create or replace) and wait for completion
    pub async fn put(
        &self,
        path: &str,
        api_version: &str,
        body: Json,
        if_match: Option<&str>,
    ) -> ArmResult<Json> {
        let url = self.url(path, api_version);
        let mut request = ArmRequest::new(Method::PUT, url.clone()).with_body(body);
        if let Some(etag) = if_match {
            request = request.with_header("If-Match", etag);
        }
        let response = self.send(request).await?;
        self.wait_for_completion(response, Some(&url)).await
    }

    /// PATCH (partial update) and wait for completion
    pub async fn patch(
        &self,
        path: &str,
        api_version: &str,
        body: Json,
        if_match: Option<&str>,
    ) -> ArmResult<Json> {
        let url = self.url(path, api_version);
        let mut request = ArmRequest::new(Method::PATCH, url.clone()).with_body(body);
        if let Some(etag) = if_match {
            request = request.with_header("If-Match", etag);
        }
        let response = self.send(request).await?;
        self.wait_for_completion(response, Some(&url)).await
    }

    /// POST to an action such as `listSecrets`
    pub async fn post(&self, path: &str, api_version: &str) -> ArmResult<Json> {
        let response = self
            .send(ArmRequest::new(Method::POST, self.url(path, api_version)))
            .await?;
        Ok(response.body.unwrap_or(Json::Null))
    }

    /// DELETE and wait for completion
    pub async fn delete(&self, path: &str, api_version: &str) -> ArmResult<()> {
        self.delete_with_query(path, api_version, &[]).await
    }

    /// DELETE with extra query parameters (e.g. `deleteRevisions=true`)
    pub async fn delete_with_query(
        &self,
        path: &str,
        api_version: &str,
        query: &[(&str, &str)],
    ) -> ArmResult<()> {
        let mut url = self.url(path, api_version);
        for (name, value) in query {
            url.push_str(&format!("&{}={}", name, value));
        }
        let response = self.send(ArmRequest::new(Method::DELETE, url)).await?;
        self.wait_for_completion(response, None).await?;
        Ok(())
    }

    /// GET a collection, following `nextLink` pages
    pub async fn list(&self, path: &str, api_version: &str) -> ArmResult<Vec<Json>> {
        let mut items = Vec::new();
        let mut next = Some(self.url(path, api_version));
        while let Some(url) = next.take() {
            let page = self
                .send(ArmRequest::new(Method::GET, url))
                .await?
                .body
                .unwrap_or(Json::Null);
            if let Some(values) = page.get("value").and_then(Json::as_array) {
                items.extend(values.iter().cloned());
            }
            next = page
                .get("nextLink")
                .and_then(Json::as_str)
                .map(str::to_string);
        }
        Ok(items)
    }

    /// Poll a long-running operation until it reaches a terminal state
    ///
    /// `resource_url` is re-read after an `Azure-AsyncOperation` succeeds so
    /// PUT/PATCH return the final representation.
    async fn wait_for_completion(
        &self,
        response: ArmResponse,
        resource_url: Option<&str>,
    ) -> ArmResult<Json> {
        if response.status != 201 && response.status != 202 {
            return Ok(response.body.unwrap_or(Json::Null));
        }

        if let Some(operation_url) = response.header("azure-asyncoperation") {
            let operation_url = operation_url.to_string();
            let mut delay = poll_delay(&response, self.poll_interval);
            loop {
                tokio::time::sleep(delay).await;
                let poll = self
                    .send(ArmRequest::new(Method::GET, operation_url.clone()))
                    .await?;
                let body = poll.body.clone().unwrap_or(Json::Null);
                let status = body
                    .get("status")
                    .and_then(Json::as_str)
                    .unwrap_or("InProgress")
                    .to_string();
                debug!("operation {} is {}", operation_url, status);

                match status.as_str() {
                    "Succeeded" => {
                        return match resource_url {
                            Some(url) => {
                                let final_state = self
                                    .send(ArmRequest::new(Method::GET, url.to_string()))
                                    .await?;
                                Ok(final_state.body.unwrap_or(Json::Null))
                            }
                            None => Ok(Json::Null),
                        };
                    }
                    "Failed" | "Canceled" | "Cancelled" => {
                        let message = body
                            .pointer("/error/message")
                            .and_then(Json::as_str)
                            .unwrap_or("no error message returned")
                            .to_string();
                        return Err(ArmError::OperationFailed { status, message });
                    }
                    _ => delay = poll_delay(&poll, self.poll_interval),
                }
            }
        }

        if let Some(location) = response.header("location") {
            let location = location.to_string();
            let mut delay = poll_delay(&response, self.poll_interval);
            loop {
                tokio::time::sleep(delay).await;
                let poll = self
                    .send(ArmRequest::new(Method::GET, location.clone()))
                    .await?;
                debug!("polled {} with status {}", location, poll.status);
                if poll.status != 202 {
                    return Ok(poll.body.unwrap_or(Json::Null));
                }
                delay = poll_delay(&poll, self.poll_interval);
            }
        }

        Ok(response.body.unwrap_or(Json::Null))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::FakeArm;

    const PATH: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/privateDnsZones/example.internal";

    #[tokio::test]
    async fn get_missing_resource_is_not_found() {
        let arm = FakeArm::new();
        let err = arm.client().get(PATH, "2020-06-01").await.unwrap_err();
        assert!(err.was_not_found());
        assert!(err.to_string().contains("ResourceNotFound"));
    }

    #[tokio::test]
    async fn put_then_get() {
        let arm = FakeArm::new();
        let client = arm.client();
        client
            .put(PATH, "2020-06-01", json!({"location": "global"}), None)
            .await
            .unwrap();

        let body = client.get(PATH, "2020-06-01").await.unwrap();
        assert_eq!(body["location"], "global");
        assert_eq!(body["id"], PATH);
    }

    #[tokio::test]
    async fn async_operation_is_polled_until_succeeded() {
        let arm = FakeArm::new();
        arm.respond(
            Method::PUT,
            PATH,
            ArmResponse::new(201).with_header(
                "Azure-AsyncOperation",
                format!("{}/operations/op1", FakeArm::ENDPOINT),
            ),
        );
        arm.respond(
            Method::GET,
            "/operations/op1",
            ArmResponse::new(200).with_body(json!({"status": "InProgress"})),
        );
        arm.respond(
            Method::GET,
            "/operations/op1",
            ArmResponse::new(200).with_body(json!({"status": "Succeeded"})),
        );

        let body = arm
            .client()
            .put(PATH, "2020-06-01", json!({"location": "global"}), None)
            .await
            .unwrap();
        assert_eq!(body["location"], "global");
        assert_eq!(arm.count(Method::GET, "/operations/op1"), 2);
    }

    #[tokio::test]
    async fn failed_operation_surfaces_error() {
        let arm = FakeArm::new();
        arm.respond(
            Method::PUT,
            PATH,
            ArmResponse::new(201).with_header(
                "Azure-AsyncOperation",
                format!("{}/operations/op2", FakeArm::ENDPOINT),
            ),
        );
        arm.respond(
            Method::GET,
            "/operations/op2",
            ArmResponse::new(200).with_body(
                json!({"status": "Failed", "error": {"code": "Conflict", "message": "zone busy"}}),
            ),
        );

        let err = arm
            .client()
            .put(PATH, "2020-06-01", json!({}), None)
            .await
            .unwrap_err();
        match err {
            ArmError::OperationFailed { status, message } => {
                assert_eq!(status, "Failed");
                assert_eq!(message, "zone busy");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn location_header_is_polled_until_done() {
        let arm = FakeArm::new();
        arm.respond(
            Method::DELETE,
            PATH,
            ArmResponse::new(202)
                .with_header("Location", format!("{}/operationResults/x", FakeArm::ENDPOINT)),
        );
        arm.respond(Method::GET, "/operationResults/x", ArmResponse::new(202));
        arm.respond(Method::GET, "/operationResults/x", ArmResponse::new(200));

        arm.client().delete(PATH, "2020-06-01").await.unwrap();
        assert_eq!(arm.count(Method::GET, "/operationResults/x"), 2);
    }

    #[tokio::test]
    async fn if_match_header_is_sent() {
        let arm = FakeArm::new();
        arm.client()
            .put(PATH, "2020-06-01", json!({}), Some("*"))
            .await
            .unwrap();
        let request = arm.last_request(Method::PUT).unwrap();
        assert!(
            request
                .headers
                .iter()
                .any(|(k, v)| k == "If-Match" && v == "*")
        );
        assert!(request.url.ends_with("?api-version=2020-06-01"));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let err = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), ArmError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ArmError::Timeout(_)));
    }

    #[tokio::test]
    async fn list_follows_next_link() {
        let arm = FakeArm::new();
        let collection = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ApiManagement/service/apim1/apis";
        arm.respond(
            Method::GET,
            collection,
            ArmResponse::new(200).with_body(json!({
                "value": [{"name": "echo-api"}],
                "nextLink": format!("{}/page2", FakeArm::ENDPOINT)
            })),
        );
        arm.respond(
            Method::GET,
            "/page2",
            ArmResponse::new(200).with_body(json!({"value": [{"name": "petstore"}]})),
        );

        let items = arm.client().list(collection, "2022-08-01").await.unwrap();
        let names: Vec<&str> = items.iter().filter_map(|i| i["name"].as_str()).collect();
        assert_eq!(names, vec!["echo-api", "petstore"]);
    }

    #[tokio::test]
    async fn delete_with_query_appends_parameters() {
        let arm = FakeArm::new();
        arm.client()
            .delete_with_query(PATH, "2022-08-01", &[("deleteRevisions", "true")])
            .await
            .unwrap();
        let request = arm.last_request(Method::DELETE).unwrap();
        assert!(request.url.ends_with("?api-version=2022-08-01&deleteRevisions=true"));
    }

    #[test]
    fn retry_after_is_parsed() {
        let response = ArmResponse::new(202).with_header("Retry-After", "7");
        assert_eq!(response.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ArmResponse::new(202).retry_after(), None);
    }

    #[tokio::test]
    async fn patch_merges_and_post_lists_secrets() {
        let arm = FakeArm::new();
        arm.seed(PATH, json!({"properties": {"enabled": false, "primaryKey": "k1"}}));

        let body = arm
            .client()
            .patch(PATH, "2020-06-01", json!({"properties": {"enabled": true}}), Some("*"))
            .await
            .unwrap();
        assert_eq!(body["properties"], json!({"enabled": true, "primaryKey": "k1"}));
        let request = arm.last_request(Method::PATCH).unwrap();
        assert!(request.headers.iter().any(|(k, v)| k == "If-Match" && v == "*"));

        let secrets = arm
            .client()
            .post(&format!("{}/listSecrets", PATH), "2020-06-01")
            .await
            .unwrap();
        assert_eq!(secrets, json!({"enabled": true, "primaryKey": "k1"}));
    }

    #[test]
    fn poll_delay_has_a_floor() {
        let immediate = ArmResponse::new(202).with_header("Retry-After", "0");
        assert_eq!(poll_delay(&immediate, Duration::ZERO), MIN_POLL_DELAY);
        assert_eq!(poll_delay(&ArmResponse::new(202), Duration::ZERO), MIN_POLL_DELAY);
        assert_eq!(
            poll_delay(&ArmResponse::new(202), Duration::from_secs(10)),
            Duration::from_secs(10)
        );
        let later = ArmResponse::new(202).with_header("Retry-After", "3");
        assert_eq!(poll_delay(&later, Duration::ZERO), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn zero_retry_after_still_waits_between_polls() {
        let arm = FakeArm::new();
        arm.respond(
            Method::DELETE,
            PATH,
            ArmResponse::new(202)
                .with_header("Location", format!("{}/operationResults/y", FakeArm::ENDPOINT))
                .with_header("Retry-After", "0"),
        );
        arm.respond(Method::GET, "/operationResults/y", ArmResponse::new(200));

        let started = std::time::Instant::now();
        arm.client().delete(PATH, "2020-06-01").await.unwrap();
        assert!(started.elapsed() >= MIN_POLL_DELAY);
        assert_eq!(arm.count(Method::GET, "/operationResults/y"), 1);
    }
}
