//! Provider API Client (C4): auth-ladder header selection, 401 fallback,
//! and the single seam through which every outbound call passes C2.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::gate::{GateAttempt, RequestGate};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Method, StatusCode};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const PROVIDER_ROW: &str = "challonge";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Refresh a bearer token this many seconds ahead of its expiry, per §4.4.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct OAuthCredentials {
    client_id: String,
    client_secret: String,
    redirect_uri: Option<String>,
}

pub struct ProviderClient {
    http: reqwest::Client,
    gate: Arc<RequestGate>,
    api_base: String,
    legacy_key: Option<String>,
    oauth: Option<OAuthCredentials>,
    pool: SqlitePool,
}

impl ProviderClient {
    pub fn new(gate: Arc<RequestGate>, config: &Config, pool: SqlitePool) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tournament-core/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let oauth = match (&config.challonge_oauth_client_id, &config.challonge_oauth_client_secret) {
            (Some(client_id), Some(client_secret)) => Some(OAuthCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                redirect_uri: config.challonge_oauth_redirect_uri.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            http,
            gate,
            api_base: config.challonge_api_base.clone(),
            legacy_key: config.challonge_legacy_key.clone(),
            oauth,
            pool,
        })
    }

    /// Completes the OAuth authorization code flow: exchanges the code
    /// the provider redirected back with for an access/refresh token
    /// pair and persists it to `oauth_tokens`.
    pub async fn exchange_authorization_code(&self, code: &str) -> CoreResult<()> {
        let oauth = self.oauth.as_ref().ok_or(CoreError::Unauthorized)?;
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("client_id", oauth.client_id.clone()),
            ("client_secret", oauth.client_secret.clone()),
            ("code", code.to_string()),
        ];
        if let Some(redirect_uri) = &oauth.redirect_uri {
            form.push(("redirect_uri", redirect_uri.clone()));
        }

        let token = request_token(&self.http, &self.api_base, &form).await?;
        store_token(&self.pool, &token).await?;
        Ok(())
    }

    /// `Request(method, endpoint, body?) -> response`, per §4.4. Wrapped
    /// and submitted as a single thunk so C4 never calls `reqwest`
    /// outside C2's dispatch loop.
    pub async fn request(&self, method: Method, endpoint: &str, body: Option<serde_json::Value>) -> CoreResult<serde_json::Value> {
        let http = self.http.clone();
        let url = format!("{}{}", self.api_base, endpoint);
        let api_base = self.api_base.clone();
        let legacy_key = self.legacy_key.clone();
        let oauth = self.oauth.clone();
        let pool = self.pool.clone();

        self.gate
            .submit(move || {
                let http = http.clone();
                let url = url.clone();
                let api_base = api_base.clone();
                let legacy_key = legacy_key.clone();
                let oauth = oauth.clone();
                let pool = pool.clone();
                let method = method.clone();
                let body = body.clone();
                Box::pin(async move { attempt(&http, &pool, &api_base, &url, method, body, legacy_key, oauth).await })
            })
            .await
    }

    pub async fn get(&self, endpoint: &str) -> CoreResult<serde_json::Value> {
        self.request(Method::GET, endpoint, None).await
    }

    pub async fn post(&self, endpoint: &str, body: serde_json::Value) -> CoreResult<serde_json::Value> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: serde_json::Value) -> CoreResult<serde_json::Value> {
        self.request(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn patch(&self, endpoint: &str, body: serde_json::Value) -> CoreResult<serde_json::Value> {
        self.request(Method::PATCH, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> CoreResult<serde_json::Value> {
        self.request(Method::DELETE, endpoint, None).await
    }
}

async fn load_token(pool: &SqlitePool) -> Option<StoredToken> {
    let row = sqlx::query_as::<_, (String, Option<String>, f64)>(
        "SELECT access_token, refresh_token, expires_at FROM oauth_tokens WHERE provider = ?",
    )
    .bind(PROVIDER_ROW)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten();

    row.and_then(|(access_token, refresh_token, expires_at)| {
        Utc.timestamp_opt(expires_at as i64, 0).single().map(|expires_at| StoredToken { access_token, refresh_token, expires_at })
    })
}

async fn store_token(pool: &SqlitePool, token: &StoredToken) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO oauth_tokens (provider, access_token, refresh_token, expires_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(provider) DO UPDATE SET access_token = excluded.access_token, refresh_token = excluded.refresh_token, expires_at = excluded.expires_at",
    )
    .bind(PROVIDER_ROW)
    .bind(&token.access_token)
    .bind(&token.refresh_token)
    .bind(token.expires_at.timestamp() as f64)
    .execute(pool)
    .await?;
    Ok(())
}

async fn delete_token(pool: &SqlitePool) {
    if let Err(err) = sqlx::query("DELETE FROM oauth_tokens WHERE provider = ?").bind(PROVIDER_ROW).execute(pool).await {
        warn!(error = %err, "failed to delete irrecoverable oauth token row");
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Posts a `grant_type`-keyed form to the provider's token endpoint and
/// turns the response into a `StoredToken` with an absolute expiry.
async fn request_token(http: &reqwest::Client, api_base: &str, form: &[(&str, String)]) -> CoreResult<StoredToken> {
    let url = format!("{api_base}/oauth/token");
    let response = http.post(&url).form(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::ProviderError { status: status.as_u16(), body });
    }

    let parsed: TokenResponse = response.json().await?;
    Ok(StoredToken {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token,
        expires_at: Utc::now() + chrono::Duration::seconds(parsed.expires_in),
    })
}

/// Returns a bearer token usable for the next request, refreshing it
/// ahead of expiry (§4.4's "refreshed automatically ≥ 5 minutes before
/// expiry") when a refresh token and OAuth client credentials are on
/// hand. Falls through to `None` — triggering the legacy-key rung — when
/// there is nothing to refresh with or the refresh call itself fails.
async fn ensure_fresh_token(http: &reqwest::Client, pool: &SqlitePool, api_base: &str, oauth: &Option<OAuthCredentials>) -> Option<StoredToken> {
    let token = load_token(pool).await?;

    if (token.expires_at - Utc::now()).num_seconds() > REFRESH_MARGIN_SECS {
        return Some(token);
    }

    let (Some(oauth), Some(refresh_token)) = (oauth, &token.refresh_token) else {
        return if token.expires_at > Utc::now() { Some(token) } else { None };
    };

    let form = vec![
        ("grant_type", "refresh_token".to_string()),
        ("client_id", oauth.client_id.clone()),
        ("client_secret", oauth.client_secret.clone()),
        ("refresh_token", refresh_token.clone()),
    ];

    match request_token(http, api_base, &form).await {
        Ok(refreshed) => {
            if let Err(err) = store_token(pool, &refreshed).await {
                warn!(error = %err, "refreshed oauth token but failed to persist it");
            }
            Some(refreshed)
        }
        Err(err) => {
            warn!(error = %err, "oauth token refresh failed");
            if token.expires_at > Utc::now() { Some(token) } else { None }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn attempt(
    http: &reqwest::Client,
    pool: &SqlitePool,
    api_base: &str,
    url: &str,
    method: Method,
    body: Option<serde_json::Value>,
    legacy_key: Option<String>,
    oauth: Option<OAuthCredentials>,
) -> GateAttempt {
    let usable_bearer = ensure_fresh_token(http, pool, api_base, &oauth).await;

    if let Some(token) = usable_bearer {
        match send(http, url, method.clone(), body.clone(), AuthHeader::Bearer(token.access_token.clone())).await {
            Ok(outcome) if outcome.status == StatusCode::UNAUTHORIZED => {
                delete_token(pool).await;
                fall_back_to_legacy(http, url, method, body, legacy_key).await
            }
            Ok(outcome) => classify(outcome),
            Err(err) => GateAttempt::Failure(err),
        }
    } else {
        fall_back_to_legacy(http, url, method, body, legacy_key).await
    }
}

async fn fall_back_to_legacy(
    http: &reqwest::Client,
    url: &str,
    method: Method,
    body: Option<serde_json::Value>,
    legacy_key: Option<String>,
) -> GateAttempt {
    let Some(legacy_key) = legacy_key else {
        return GateAttempt::Failure(CoreError::Unauthorized);
    };

    match send(http, url, method, body, AuthHeader::Legacy(legacy_key)).await {
        Ok(outcome) => classify(outcome),
        Err(err) => GateAttempt::Failure(err),
    }
}

enum AuthHeader {
    Bearer(String),
    Legacy(String),
}

struct SendOutcome {
    status: StatusCode,
    body: serde_json::Value,
    body_text: String,
}

async fn send(
    http: &reqwest::Client,
    url: &str,
    method: Method,
    body: Option<serde_json::Value>,
    auth: AuthHeader,
) -> CoreResult<SendOutcome> {
    let mut builder = http
        .request(method, url)
        .header("Accept", "application/json")
        .header("Content-Type", "application/vnd.api+json");

    builder = match auth {
        AuthHeader::Bearer(token) => builder.header("Authorization", format!("Bearer {token}")).header("Authorization-Type", "v2"),
        AuthHeader::Legacy(key) => builder.header("Authorization", key).header("Authorization-Type", "v1"),
    };

    if let Some(body) = body {
        builder = builder.json(&body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let body_text = response.text().await.unwrap_or_default();
    let body = if body_text.is_empty() { serde_json::Value::Null } else { serde_json::from_str(&body_text).unwrap_or(serde_json::Value::Null) };

    Ok(SendOutcome { status, body, body_text })
}

/// Maps an HTTP response to a `GateAttempt`, per §4.4's error taxonomy.
fn classify(outcome: SendOutcome) -> GateAttempt {
    if outcome.status.is_success() {
        return GateAttempt::Success(outcome.body);
    }

    match outcome.status.as_u16() {
        429 | 403 => GateAttempt::RetryableStatus(CoreError::RateLimited),
        401 => GateAttempt::Failure(CoreError::Unauthorized),
        404 => GateAttempt::Failure(CoreError::NotFound),
        status => GateAttempt::Failure(CoreError::ProviderError { status, body: outcome.body_text }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_yields_success_attempt() {
        let outcome = SendOutcome { status: StatusCode::OK, body: serde_json::json!({"ok": true}), body_text: "{}".into() };
        assert!(matches!(classify(outcome), GateAttempt::Success(_)));
    }

    #[test]
    fn rate_limit_statuses_are_retryable() {
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::FORBIDDEN] {
            let outcome = SendOutcome { status, body: serde_json::Value::Null, body_text: String::new() };
            assert!(matches!(classify(outcome), GateAttempt::RetryableStatus(CoreError::RateLimited)));
        }
    }

    #[test]
    fn not_found_maps_directly() {
        let outcome = SendOutcome { status: StatusCode::NOT_FOUND, body: serde_json::Value::Null, body_text: String::new() };
        assert!(matches!(classify(outcome), GateAttempt::Failure(CoreError::NotFound)));
    }
}
