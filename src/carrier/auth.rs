use crate::config::CarrierConfig;
use crate::errors::ServiceError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Tokens are refreshed this long after issue even if the carrier would
/// accept them longer; staying inside the real validity window avoids
/// mid-request expiry.
const TOKEN_TTL_MINUTES: i64 = 55;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Process-wide cached bearer credential for the carrier platform.
///
/// The cache mutex is held across the refresh itself, which makes refreshes
/// single-flight: concurrent callers queue on the lock and find the fresh
/// token already cached instead of issuing their own login.
pub struct CarrierAuthenticator {
    http: reqwest::Client,
    config: CarrierConfig,
    state: Mutex<Option<CachedToken>>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

impl CarrierAuthenticator {
    pub fn new(http: reqwest::Client, config: CarrierConfig) -> Self {
        Self {
            http,
            config,
            state: Mutex::new(None),
        }
    }

    /// Returns a valid bearer token, logging in only when the cached one is
    /// missing or past its expiry buffer.
    pub async fn bearer_token(&self) -> Result<String, ServiceError> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if Utc::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        match self.login().await {
            Ok(token) => {
                *state = Some(CachedToken {
                    token: token.clone(),
                    expires_at: Utc::now() + Duration::minutes(TOKEN_TTL_MINUTES),
                });
                info!("Carrier bearer token refreshed");
                Ok(token)
            }
            Err(err) => {
                *state = None;
                Err(err)
            }
        }
    }

    /// Drops the cached token so the next call logs in again. Used after a
    /// 401 from the carrier.
    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }

    async fn login(&self) -> Result<String, ServiceError> {
        let url = format!("{}/auth/login", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest {
                email: &self.config.email,
                password: &self.config.password,
            })
            .send()
            .await
            .map_err(|e| {
                warn!("Carrier login request failed: {}", e);
                ServiceError::ExternalServiceError("Carrier authentication failed".to_string())
            })?;

        if !response.status().is_success() {
            warn!("Carrier login rejected: {}", response.status());
            return Err(ServiceError::ExternalServiceError(
                "Carrier authentication failed".to_string(),
            ));
        }

        let body: LoginResponse = response.json().await.map_err(|e| {
            warn!("Carrier login returned malformed body: {}", e);
            ServiceError::ExternalServiceError("Invalid carrier auth response".to_string())
        })?;

        body.token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ServiceError::ExternalServiceError("Invalid carrier auth response".to_string())
            })
    }
}
