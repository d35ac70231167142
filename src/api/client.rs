//! HTTP client for the platform's REST API

use super::error::{ApiError, StatusError};
use crate::api_span;
use crate::config::{ApplicationConfig, ConfigError};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, Instrument};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client for `https://{orgId}.{domain}/`
///
/// Requests carry the application's API key and token as basic auth. The
/// methods return raw responses; mapping status codes is left to callers.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    api_token: String,
}

impl ApiClient {
    /// Build a client from an application configuration
    ///
    /// Fails when the configuration has no API key or token.
    pub fn new(config: &ApplicationConfig) -> Result<Self, crate::IotError> {
        let api_key = config.api_key().ok_or_else(|| {
            ConfigError::invalid("Missing required property for API key based authentication: auth-key")
        })?;
        let api_token = config.api_token().ok_or_else(|| {
            ConfigError::invalid(
                "Missing required property for API key based authentication: auth-token",
            )
        })?;

        let base_url = format!("https://{}/", config.api_host());
        let client = Self::with_credentials(&base_url, api_key, api_token, config.options.http.verify)?;
        Ok(client)
    }

    /// Build a client for an explicit base URL
    pub fn with_credentials(
        base_url: &str,
        api_key: impl Into<String>,
        api_token: impl Into<String>,
        verify: bool,
    ) -> Result<Self, ApiError> {
        if !verify {
            debug!("TLS certificate verification disabled for API requests");
        }

        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .danger_accept_invalid_certs(!verify)
            .build()?;

        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            api_key: api_key.into(),
            api_token: api_token.into(),
        })
    }

    /// Point the client at another host, keeping its credentials
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ApiError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for a path relative to the API root
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    pub async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Response, ApiError> {
        let url = self.url(path)?;
        let request = self.request(Method::GET, url).query(params);
        Self::send(request, "GET", path).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        let url = self.url(path)?;
        let request = self.request(Method::POST, url).json(body);
        Self::send(request, "POST", path).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        let url = self.url(path)?;
        let request = self.request(Method::PUT, url).json(body);
        Self::send(request, "PUT", path).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, ApiError> {
        let url = self.url(path)?;
        let request = self.request(Method::DELETE, url);
        Self::send(request, "DELETE", path).await
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.api_key, Some(&self.api_token))
    }

    async fn send(
        request: reqwest::RequestBuilder,
        method: &'static str,
        path: &str,
    ) -> Result<Response, ApiError> {
        async move {
            let response = request.send().await?;
            debug!(status = response.status().as_u16(), "API response");
            Ok(response)
        }
        .instrument(api_span!(method, path = %path))
        .await
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, ApiError> {
    // join() replaces the last segment unless the base ends with a slash
    if base_url.ends_with('/') {
        Ok(Url::parse(base_url)?)
    } else {
        Ok(Url::parse(&format!("{base_url}/"))?)
    }
}

/// Pass the response through when its status is one of `accepted`
pub(crate) async fn expect_status(response: Response, accepted: &[u16]) -> Result<Response, ApiError> {
    if accepted.contains(&response.status().as_u16()) {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

/// Turn a rejected response into an error
pub(crate) async fn status_error(response: Response) -> ApiError {
    StatusError::from_response(response).await.into()
}

/// Read a JSON body
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let url = response.url().to_string();
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ApiError::UnexpectedBody {
        url,
        reason: e.to_string(),
    })
}
