//! Authenticated JSON client shared by the remote connectors.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use domain::models::{EntityKind, Quota};
use domain::MigrationError;

/// How the token is presented to the remote API.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `PRIVATE-TOKEN: <token>`
    PrivateToken(String),
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Decode(String),

    /// 403 or 429 carrying an exhausted quota or a `Retry-After`.
    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },
}

impl RemoteError {
    /// True when the remote rejected the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            RemoteError::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Error for a call whose failure aborts the job. Rate limiting never
    /// does; the caller waits for `reset_at` and retries.
    pub fn fatal(self, context: &str) -> MigrationError {
        if let RemoteError::RateLimited { reset_at } = self {
            return MigrationError::RateLimited { reset_at };
        }
        if self.is_auth() {
            MigrationError::Connection(format!("{}: token rejected ({})", context, self))
        } else {
            MigrationError::Connection(format!("{}: {}", context, self))
        }
    }

    /// Error for a single item. Only a rejected token stays fatal.
    pub fn for_item(self, kind: EntityKind, source_id: impl ToString) -> MigrationError {
        if self.is_auth() || matches!(self, RemoteError::RateLimited { .. }) {
            self.fatal("remote source")
        } else {
            MigrationError::item_fetch(kind, source_id, self)
        }
    }
}

/// Reads `RateLimit-*` (GitLab) or `X-RateLimit-*` (GitHub) headers.
pub fn parse_quota_headers(headers: &HeaderMap) -> Option<Quota> {
    let number = |names: [&str; 2]| -> Option<i64> {
        names.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        })
    };

    let remaining = number(["ratelimit-remaining", "x-ratelimit-remaining"])?;
    let reset = number(["ratelimit-reset", "x-ratelimit-reset"])?;
    let reset_at = Utc.timestamp_opt(reset, 0).single()?;

    Some(Quota {
        remaining: remaining.clamp(0, i64::from(u32::MAX - 1)) as u32,
        reset_at,
    })
}

/// Window used when a 429 names no reset time.
const DEFAULT_RETRY_WINDOW_SECS: i64 = 60;

/// Reset time of a rate-limited response, or `None` when `status` is not a
/// rate-limit rejection.
///
/// `Retry-After` wins over the quota headers. A 403 counts only when it
/// carries either; without them it is a credential rejection.
pub fn rate_limit_reset(
    status: StatusCode,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }

    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());
    if let Some(secs) = retry_after {
        return Some(now + chrono::Duration::seconds(secs.max(0)));
    }

    match parse_quota_headers(headers) {
        Some(quota) if quota.remaining == 0 => Some(quota.reset_at),
        _ if status == StatusCode::TOO_MANY_REQUESTS => {
            Some(now + chrono::Duration::seconds(DEFAULT_RETRY_WINDOW_SECS))
        }
        _ => None,
    }
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    last_quota: Mutex<Option<Quota>>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        auth: &AuthScheme,
        accept: &'static str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, MigrationError> {
        let invalid_token =
            |_| MigrationError::InvalidSettings("auth_token contains invalid characters".into());

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        match auth {
            AuthScheme::Bearer(token) => {
                let mut value =
                    HeaderValue::from_str(&format!("Bearer {}", token)).map_err(invalid_token)?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            AuthScheme::PrivateToken(token) => {
                let mut value = HeaderValue::from_str(token).map_err(invalid_token)?;
                value.set_sensitive(true);
                headers.insert(HeaderName::from_static("private-token"), value);
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| MigrationError::Connection(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_quota: Mutex::new(None),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Quota seen on the most recent response, if the remote sent one.
    pub fn last_quota(&self) -> Option<Quota> {
        self.last_quota.lock().ok().and_then(|q| *q)
    }

    async fn send(&self, url: &str, query: &[(&str, String)]) -> Result<Response, RemoteError> {
        debug!(url = %url, "Remote GET");
        let response = self.client.get(url).query(query).send().await?;

        if let Some(quota) = parse_quota_headers(response.headers()) {
            if let Ok(mut last) = self.last_quota.lock() {
                *last = Some(quota);
            }
        }

        let status = response.status();
        if let Some(reset_at) = rate_limit_reset(status, response.headers(), Utc::now()) {
            debug!(url = %url, status = %status, reset_at = %reset_at, "Remote rate limit hit");
            return Err(RemoteError::RateLimited { reset_at });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status, body });
        }
        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let response = self.send(&self.url(path), query).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Fetches an absolute URL as text, for raw file contents.
    pub async fn get_text(&self, url: &str) -> Result<String, RemoteError> {
        let response = self.send(url, &[]).await?;
        Ok(response.text().await?)
    }
}

/// Query string for a 1-based page.
pub fn page_query(page: u32, per_page: u32) -> Vec<(&'static str, String)> {
    vec![("page", page.to_string()), ("per_page", per_page.to_string())]
}
