#![allow(dead_code)] // not every suite uses every helper

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use storefront_api::{
    carrier::CarrierClient,
    config::{AppConfig, CarrierConfig},
    db,
    entities::{product, product_image, product_variant},
    events::EventSender,
    handlers::AppServices,
    AppState,
};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Test harness backed by a throwaway SQLite database file.
pub struct TestApp {
    pub state: Arc<AppState>,
    _db_file: NamedTempFile,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Boots app state with a fresh database and a carrier pointing at an
    /// unroutable address; use [`TestApp::with_carrier`] for checkout tests.
    pub async fn new() -> Self {
        Self::with_carrier("http://127.0.0.1:9", "http://127.0.0.1:9/checkout").await
    }

    /// Boots app state with the carrier endpoints overridden, typically to a
    /// wiremock server.
    pub async fn with_carrier(base_url: &str, checkout_url: &str) -> Self {
        let db_file = NamedTempFile::new().expect("failed to create temp database file");
        let database_url = format!(
            "sqlite://{}?mode=rwc",
            db_file.path().to_str().expect("temp path is not utf-8")
        );

        let cfg = AppConfig {
            database_url,
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            log_level: "warn".to_string(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            frontend_url: "http://localhost:3000".to_string(),
            currency: "INR".to_string(),
            flat_tax_rate: Decimal::from(18),
            shipping_flat_fee: Decimal::from(50),
            free_shipping_threshold: Decimal::from(1000),
            home_state: "MH".to_string(),
            carrier: CarrierConfig {
                base_url: base_url.to_string(),
                checkout_url: checkout_url.to_string(),
                api_key: "test-api-key".to_string(),
                api_secret: "test-api-secret-0123456789".to_string(),
                email: "ops@storefront.test".to_string(),
                password: "password".to_string(),
                timeout_secs: 2,
            },
        };

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let db = Arc::new(pool);
        let config = Arc::new(cfg);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(storefront_api::events::process_events(event_rx));

        let carrier = Arc::new(
            CarrierClient::new(config.carrier.clone()).expect("failed to build carrier client"),
        );

        let services = AppServices::new(
            db.clone(),
            Arc::new(event_sender.clone()),
            carrier,
            config.clone(),
        );

        let state = Arc::new(AppState {
            db,
            config,
            event_sender,
            services,
        });

        Self {
            state,
            _db_file: db_file,
            _event_task: event_task,
        }
    }
}

/// Inserts an active product and returns its id.
pub async fn seed_product(app: &TestApp, name: &str, price: Decimal, stock: i32) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    product::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        description: Set(None),
        sku: Set(format!("P-{}", id.simple())),
        price: Set(price),
        sale_price: Set(None),
        stock_quantity: Set(stock),
        is_active: Set(true),
        is_deleted: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed product");
    id
}

/// Variant seed parameters; defaults describe a checkout-ready variant.
pub struct VariantSpec {
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock: i32,
    pub tax_rate: Option<Decimal>,
    pub is_active: bool,
    pub carrier_variant_id: Option<String>,
}

impl Default for VariantSpec {
    fn default() -> Self {
        Self {
            price: Decimal::from(500),
            sale_price: None,
            stock: 10,
            tax_rate: Some(Decimal::from(18)),
            is_active: true,
            carrier_variant_id: Some("cv-test".to_string()),
        }
    }
}

/// Inserts a variant for the product and returns its id.
pub async fn seed_variant(app: &TestApp, product_id: Uuid, spec: VariantSpec) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now();
    product_variant::ActiveModel {
        id: Set(id),
        product_id: Set(product_id),
        color: Set(None),
        size: Set(None),
        sku: Set(format!("V-{}", id.simple())),
        price: Set(spec.price),
        sale_price: Set(spec.sale_price),
        stock_quantity: Set(spec.stock),
        weight: Set(0.5),
        tax_rate: Set(spec.tax_rate),
        is_default: Set(true),
        is_active: Set(spec.is_active),
        carrier_variant_id: Set(spec.carrier_variant_id),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed variant");
    id
}

/// Inserts a product-level or variant-level image.
pub async fn seed_image(
    app: &TestApp,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    url: &str,
) -> Uuid {
    let id = Uuid::new_v4();
    product_image::ActiveModel {
        id: Set(id),
        product_id: Set(product_id),
        variant_id: Set(variant_id),
        image_url: Set(url.to_string()),
        position: Set(0),
        created_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed image");
    id
}
