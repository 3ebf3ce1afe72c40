//! HTTP implementation of the provider trait
//!
//! Maps the provider surface onto the resource-management REST API:
//!
//!   POST   /resources/{kind}    start create
//!   GET    /resources/{id}      read
//!   PATCH  /resources/{id}      start update
//!   DELETE /resources/{id}      start delete
//!   GET    /operations/{id}     poll operation
//!
//! Mutations carry an Idempotency-Key header so retried requests are safe.

use super::{
    Operation, OperationStatus, Provider, ProviderError, ProviderResult, RemoteResource,
};
use crate::manifest::AttrMap;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpProvider {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    id: String,
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    resource: Option<ResourceResponse>,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    id: String,
    #[serde(default)]
    attributes: AttrMap,
}

impl From<ResourceResponse> for RemoteResource {
    fn from(r: ResourceResponse) -> Self {
        Self {
            id: r.id,
            attributes: r.attributes,
        }
    }
}

impl HttpProvider {
    pub fn new(base_url: &str, token: &str) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::permanent(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn send_operation(
        &self,
        builder: RequestBuilder,
        idempotency_token: &str,
    ) -> ProviderResult<Operation> {
        let response = builder
            .header("Idempotency-Key", idempotency_token)
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status(response).await?;
        let body: OperationResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::permanent(format!("invalid operation response: {}", e)))?;

        Ok(Operation { id: body.id })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(
        &self,
        kind: &str,
        attributes: &AttrMap,
        idempotency_token: &str,
    ) -> ProviderResult<Operation> {
        let builder = self
            .request(Method::POST, &format!("/resources/{}", kind))
            .json(attributes);
        self.send_operation(builder, idempotency_token).await
    }

    async fn read(&self, id: &str) -> ProviderResult<Option<RemoteResource>> {
        let response = self
            .request(Method::GET, &format!("/resources/{}", id))
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(response).await?;
        let body: ResourceResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::permanent(format!("invalid resource response: {}", e)))?;

        Ok(Some(body.into()))
    }

    async fn update(
        &self,
        id: &str,
        attributes: &AttrMap,
        idempotency_token: &str,
    ) -> ProviderResult<Operation> {
        let builder = self
            .request(Method::PATCH, &format!("/resources/{}", id))
            .json(attributes);
        self.send_operation(builder, idempotency_token).await
    }

    async fn delete(&self, id: &str, idempotency_token: &str) -> ProviderResult<Operation> {
        let builder = self.request(Method::DELETE, &format!("/resources/{}", id));
        self.send_operation(builder, idempotency_token).await
    }

    async fn poll(&self, operation: &Operation) -> ProviderResult<OperationStatus> {
        let response = self
            .request(Method::GET, &format!("/operations/{}", operation.id))
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status(response).await?;
        let body: OperationResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::permanent(format!("invalid operation response: {}", e)))?;

        match body.status.as_str() {
            "pending" | "running" => Ok(OperationStatus::Pending),
            "succeeded" => Ok(OperationStatus::Succeeded(
                body.resource.map(RemoteResource::from),
            )),
            "failed" => Ok(OperationStatus::Failed(
                body.error
                    .unwrap_or_else(|| "operation failed without detail".to_string()),
            )),
            other => Err(ProviderError::permanent(format!(
                "unknown operation status '{}'",
                other
            ))),
        }
    }
}

/// Classify a reqwest transport error
fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() || e.is_connect() {
        ProviderError::transient(format!("request failed: {}", e))
    } else {
        ProviderError::permanent(format!("request failed: {}", e))
    }
}

/// Turn HTTP error statuses into provider errors
///
/// 429 and 5xx are transient; other non-success statuses are permanent.
async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("API returned {}: {}", status, body.trim());

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(ProviderError::transient(message))
    } else {
        Err(ProviderError::permanent(message))
    }
}
