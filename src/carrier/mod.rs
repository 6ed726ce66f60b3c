//! Client for the external carrier platform: payable checkout sessions,
//! signed with a shared secret, plus the catalog sync surface used by the
//! admin flow.

pub mod auth;
pub mod signature;

use crate::config::CarrierConfig;
use crate::errors::ServiceError;
use auth::CarrierAuthenticator;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use signature::SignatureGenerator;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const SIGNATURE_HEADER: &str = "X-Api-HMAC-SHA256";

/// One checkout line as the carrier expects it.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutLineItem {
    pub variant_id: String,
    pub quantity: i32,
}

#[derive(Serialize)]
struct CartData<'a> {
    items: &'a [CheckoutLineItem],
}

#[derive(Serialize)]
struct CheckoutPayload<'a> {
    cart_data: CartData<'a>,
    redirect_url: &'a str,
    timestamp: String,
}

#[derive(Deserialize)]
struct CheckoutSessionResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    checkout_id: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

/// Carrier-issued payable checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSessionHandle {
    pub token: String,
    pub checkout_id: String,
    pub expires_at: Option<String>,
}

/// Carrier-side category, as returned by the sync API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierCategory {
    pub id: i64,
    pub name: String,
}

/// Product payload for the carrier catalog sync.
#[derive(Debug, Clone, Serialize)]
pub struct CarrierProductInput {
    pub name: String,
    pub sku: String,
    #[serde(rename = "type")]
    pub product_type: String,
    pub category_code: i64,
    pub brand: String,
    pub weight: f64,
    pub description: String,
    pub qty: i32,
    pub mrp: rust_decimal::Decimal,
    pub size: String,
    pub color: String,
    pub product_image: String,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// Carrier-side product identifier returned by the sync API.
#[derive(Debug, Clone, Deserialize)]
pub struct CarrierProduct {
    pub id: i64,
    #[serde(default)]
    pub variant_id: Option<String>,
}

/// HTTP client for the carrier platform.
///
/// Checkout-session calls authenticate with an API key plus an HMAC of the
/// exact request body; catalog sync calls use the cached bearer token.
pub struct CarrierClient {
    http: reqwest::Client,
    auth: CarrierAuthenticator,
    signer: SignatureGenerator,
    config: CarrierConfig,
    categories: Mutex<Option<Vec<CarrierCategory>>>,
}

impl CarrierClient {
    pub fn new(config: CarrierConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build carrier HTTP client: {}", e))
            })?;

        Ok(Self {
            auth: CarrierAuthenticator::new(http.clone(), config.clone()),
            signer: SignatureGenerator::new(config.api_secret.clone()),
            http,
            config,
            categories: Mutex::new(None),
        })
    }

    /// Creates a payable checkout session for the given lines.
    ///
    /// The payload is serialized once and that exact byte sequence is both
    /// signed and transmitted.
    #[instrument(skip(self, items))]
    pub async fn create_checkout_session(
        &self,
        items: &[CheckoutLineItem],
        redirect_url: &str,
    ) -> Result<CheckoutSessionHandle, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        let payload = CheckoutPayload {
            cart_data: CartData { items },
            redirect_url,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let body = serde_json::to_string(&payload)?;
        let signature = self.signer.sign(body.as_bytes());

        let response = self
            .http
            .post(&self.config.checkout_url)
            .header("Content-Type", "application/json")
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!("Carrier checkout request failed: {}", e);
                ServiceError::ExternalServiceError(
                    "Checkout session creation failed".to_string(),
                )
            })?;

        if !response.status().is_success() {
            warn!("Carrier rejected checkout session: {}", response.status());
            return Err(ServiceError::ExternalServiceError(
                "Checkout session creation failed".to_string(),
            ));
        }

        let body: CheckoutSessionResponse = response.json().await.map_err(|e| {
            warn!("Carrier checkout returned malformed body: {}", e);
            ServiceError::ExternalServiceError("Failed to generate checkout token".to_string())
        })?;

        match (body.token, body.checkout_id) {
            (Some(token), Some(checkout_id)) if !token.is_empty() => Ok(CheckoutSessionHandle {
                token,
                checkout_id,
                expires_at: body.expires_at,
            }),
            _ => Err(ServiceError::ExternalServiceError(
                "Failed to generate checkout token".to_string(),
            )),
        }
    }

    /// Pushes a product to the carrier catalog. Consumed by the admin sync
    /// flow; checkout requires the returned variant identifier.
    #[instrument(skip(self, input), fields(sku = %input.sku))]
    pub async fn create_product(
        &self,
        input: &CarrierProductInput,
    ) -> Result<CarrierProduct, ServiceError> {
        let token = self.auth.bearer_token().await?;
        let url = format!("{}/products", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(input)
            .send()
            .await
            .map_err(|e| {
                warn!("Carrier product sync failed: {}", e);
                ServiceError::ExternalServiceError(
                    "Carrier product creation failed".to_string(),
                )
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
        }
        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(
                "Carrier product creation failed".to_string(),
            ));
        }

        let body: DataEnvelope<CarrierProduct> = response.json().await.map_err(|e| {
            warn!("Carrier product sync returned malformed body: {}", e);
            ServiceError::ExternalServiceError("Carrier product creation failed".to_string())
        })?;
        Ok(body.data)
    }

    /// Creates a category on the carrier platform.
    pub async fn create_category(&self, name: &str) -> Result<CarrierCategory, ServiceError> {
        let token = self.auth.bearer_token().await?;
        let url = format!("{}/categories", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|_| {
                ServiceError::ExternalServiceError(
                    "Carrier category creation failed".to_string(),
                )
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(
                "Carrier category creation failed".to_string(),
            ));
        }

        let body: DataEnvelope<CarrierCategory> = response.json().await.map_err(|_| {
            ServiceError::ExternalServiceError("Carrier category creation failed".to_string())
        })?;

        // A new category invalidates the cached listing
        *self.categories.lock().await = None;
        Ok(body.data)
    }

    /// Lists carrier categories, cached for the process lifetime.
    pub async fn list_categories(&self) -> Result<Vec<CarrierCategory>, ServiceError> {
        let mut cache = self.categories.lock().await;
        if let Some(categories) = cache.as_ref() {
            return Ok(categories.clone());
        }

        let token = self.auth.bearer_token().await?;
        let url = format!("{}/categories", self.config.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|_| {
                ServiceError::ExternalServiceError(
                    "Failed to fetch carrier categories".to_string(),
                )
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(
                "Failed to fetch carrier categories".to_string(),
            ));
        }

        let body: DataEnvelope<Vec<CarrierCategory>> = response.json().await.map_err(|_| {
            ServiceError::ExternalServiceError("Failed to fetch carrier categories".to_string())
        })?;

        *cache = Some(body.data.clone());
        Ok(body.data)
    }

    /// Maps an internal category name to the carrier's category id.
    pub async fn resolve_category_code(&self, name: &str) -> Result<i64, ServiceError> {
        let categories = self.list_categories().await?;
        categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.id)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "No carrier category found for '{}'",
                    name
                ))
            })
    }
}
