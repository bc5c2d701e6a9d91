//! Authenticated JSON transport shared by the Google Cloud clients.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RemoteError;

/// Thin wrapper around a reqwest client that adds the bearer token and
/// classifies every failure.
#[derive(Clone)]
pub struct GcpHttp {
    client: reqwest::Client,
    access_token: Option<String>,
}

impl GcpHttp {
    pub fn new(access_token: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Terminal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            access_token,
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get<R: DeserializeOwned>(&self, url: &str) -> Result<R, RemoteError> {
        self.send_json(self.request(Method::GET, url)).await
    }

    pub async fn post<B, R>(&self, url: &str, body: &B) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.send_json(self.request(Method::POST, url).json(body))
            .await
    }

    pub async fn patch<B, R>(&self, url: &str, body: &B) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.send_json(self.request(Method::PATCH, url).json(body))
            .await
    }

    pub async fn delete<R: DeserializeOwned>(&self, url: &str) -> Result<R, RemoteError> {
        self.send_json(self.request(Method::DELETE, url)).await
    }

    /// DELETE for endpoints that answer with an empty body.
    pub async fn delete_empty(&self, url: &str) -> Result<(), RemoteError> {
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn send_json<R: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<R, RemoteError> {
        self.send(request)
            .await?
            .json::<R>()
            .await
            .map_err(|e| RemoteError::Terminal(format!("unexpected response body: {}", e)))
    }
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Map an HTTP error response to a RemoteError.
pub fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = match &parsed {
        Some(env) if !env.error.message.is_empty() => {
            format!("HTTP {}: {}", status.as_u16(), env.error.message)
        }
        _ => format!("HTTP {}", status.as_u16()),
    };
    let api_status = parsed.map(|env| env.error.status).unwrap_or_default();

    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        // ABORTED also maps to 409 and is a concurrency conflict, not a name clash.
        StatusCode::CONFLICT if api_status == "ABORTED" => RemoteError::Transient(message),
        StatusCode::CONFLICT => RemoteError::AlreadyExists(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Transient(message)
        }
        s if s.is_server_error() => RemoteError::Transient(message),
        _ => RemoteError::Terminal(message),
    }
}

fn classify_transport(err: reqwest::Error) -> RemoteError {
    if err.is_builder() {
        RemoteError::Terminal(format!("invalid request: {}", err))
    } else {
        RemoteError::Transient(format!("request failed: {}", err))
    }
}
