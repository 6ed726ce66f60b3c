use rust_decimal_macros::dec;
use storefront_api::{
    carrier::{auth::CarrierAuthenticator, CarrierClient, CarrierProductInput, CheckoutLineItem},
    config::CarrierConfig,
    errors::ServiceError,
};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn carrier_config(server: &MockServer) -> CarrierConfig {
    CarrierConfig {
        base_url: server.uri(),
        checkout_url: format!("{}/checkout", server.uri()),
        api_key: "test-api-key".to_string(),
        api_secret: "test-api-secret-0123456789".to_string(),
        email: "ops@storefront.test".to_string(),
        password: "password".to_string(),
        timeout_secs: 2,
    }
}

fn line(variant_id: &str, quantity: i32) -> CheckoutLineItem {
    CheckoutLineItem {
        variant_id: variant_id.to_string(),
        quantity,
    }
}

#[tokio::test]
async fn checkout_session_sends_api_key_and_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout"))
        .and(header("X-Api-Key", "test-api-key"))
        .and(header_exists("X-Api-HMAC-SHA256"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "tok-1",
            "checkout_id": "chk-9",
            "expires_at": "2030-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CarrierClient::new(carrier_config(&server)).unwrap();
    let handle = client
        .create_checkout_session(&[line("cv-1", 2)], "https://shop.example/done")
        .await
        .unwrap();

    assert_eq!(handle.token, "tok-1");
    assert_eq!(handle.checkout_id, "chk-9");
    assert_eq!(handle.expires_at.as_deref(), Some("2030-01-01T00:00:00Z"));
}

#[tokio::test]
async fn checkout_session_with_no_items_fails_fast() {
    let server = MockServer::start().await;
    let client = CarrierClient::new(carrier_config(&server)).unwrap();

    let err = client
        .create_checkout_session(&[], "https://shop.example/done")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn missing_token_in_response_is_a_dependency_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"checkout_id": "x"})),
        )
        .mount(&server)
        .await;

    let client = CarrierClient::new(carrier_config(&server)).unwrap();
    let err = client
        .create_checkout_session(&[line("cv-1", 1)], "https://shop.example/done")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));
}

#[tokio::test]
async fn carrier_rejection_maps_to_dependency_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let client = CarrierClient::new(carrier_config(&server)).unwrap();
    let err = client
        .create_checkout_session(&[line("cv-1", 1)], "https://shop.example/done")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));
}

#[tokio::test]
async fn concurrent_token_requests_share_one_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "bearer-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let auth = std::sync::Arc::new(CarrierAuthenticator::new(
        reqwest::Client::new(),
        carrier_config(&server),
    ));

    let (a, b, c) = tokio::join!(
        {
            let auth = auth.clone();
            async move { auth.bearer_token().await }
        },
        {
            let auth = auth.clone();
            async move { auth.bearer_token().await }
        },
        {
            let auth = auth.clone();
            async move { auth.bearer_token().await }
        },
    );

    assert_eq!(a.unwrap(), "bearer-1");
    assert_eq!(b.unwrap(), "bearer-1");
    assert_eq!(c.unwrap(), "bearer-1");

    // a later call still reuses the cached token; the mock's expect(1)
    // verifies no second login happened
    assert_eq!(auth.bearer_token().await.unwrap(), "bearer-1");
}

#[tokio::test]
async fn failed_login_clears_cache_and_surfaces_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let auth = CarrierAuthenticator::new(reqwest::Client::new(), carrier_config(&server));
    let err = auth.bearer_token().await.unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));
}

#[tokio::test]
async fn product_sync_uses_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "bearer-2"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/products"))
        .and(header("Authorization", "Bearer bearer-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"id": 77, "variant_id": "cv-77"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CarrierClient::new(carrier_config(&server)).unwrap();
    let product = client
        .create_product(&CarrierProductInput {
            name: "Tee".to_string(),
            sku: "TEE-1".to_string(),
            product_type: "Single".to_string(),
            category_code: 12,
            brand: "Generic".to_string(),
            weight: 0.5,
            description: String::new(),
            qty: 10,
            mrp: dec!(500),
            size: String::new(),
            color: String::new(),
            product_image: String::new(),
        })
        .await
        .unwrap();

    assert_eq!(product.id, 77);
    assert_eq!(product.variant_id.as_deref(), Some("cv-77"));
}

#[tokio::test]
async fn categories_are_cached_per_process() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "bearer-3"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/categories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"id": 1, "name": "Apparel"}, {"id": 2, "name": "Footwear"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CarrierClient::new(carrier_config(&server)).unwrap();
    let first = client.list_categories().await.unwrap();
    let second = client.list_categories().await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);

    let code = client.resolve_category_code("apparel").await.unwrap();
    assert_eq!(code, 1);

    let err = client.resolve_category_code("Gadgets").await.unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}
