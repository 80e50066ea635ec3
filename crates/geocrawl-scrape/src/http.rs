//! Thin HTTP client shared by the sources.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::error::FetchError;

/// HTTP client with status mapping suited to crawl sources.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    user_agent: String,
    timeout: Duration,
    cookies: bool,
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = ua.to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep cookies between requests, for sources behind a login.
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.cookies = enabled;
        self
    }

    pub fn build(self) -> Result<HttpClient, FetchError> {
        let client = Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .cookie_store(self.cookies)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Transient(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpClient { client })
    }
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder {
            user_agent: format!("geocrawl/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(180),
            cookies: false,
        }
    }

    /// GET a page and return its body.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        Ok(check_status(response)?.text().await?)
    }

    /// POST an url-encoded form and return the response body.
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String, FetchError> {
        debug!("POST {}", url);
        let response = self.client.post(url).form(form).send().await?;
        Ok(check_status(response)?.text().await?)
    }
}

/// Map a response status onto the crawl error taxonomy.
pub fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if is_rate_limited(status) {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Err(FetchError::RateLimited {
            status: status.as_u16(),
            retry_after_secs,
        });
    }

    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT
    ) {
        return Err(FetchError::Transient(format!("HTTP {}", status.as_u16())));
    }

    Err(FetchError::Status {
        status: status.as_u16(),
        url: response.url().to_string(),
    })
}

/// Check if a status indicates rate limiting (429 or 503).
pub fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}
