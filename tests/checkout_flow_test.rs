mod common;

use common::{seed_image, seed_product, seed_variant, TestApp, VariantSpec};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use storefront_api::{
    entities::{order_item, product_variant, Order, OrderItem, OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::cart::AddItemInput,
};
use uuid::Uuid;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_carrier_checkout(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/checkout"))
        .and(header("X-Api-Key", "test-api-key"))
        .and(header_exists("X-Api-HMAC-SHA256"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "chk-token-1",
            "checkout_id": "chk-123",
            "expires_at": "2030-01-01T00:00:00Z"
        })))
        .mount(server)
        .await;
}

async fn app_with_mock_carrier(server: &MockServer) -> TestApp {
    TestApp::with_carrier(&server.uri(), &format!("{}/checkout", server.uri())).await
}

async fn fill_cart(app: &TestApp, user_id: Uuid, variant_id: Uuid, product_id: Uuid, qty: i32) {
    app.state
        .services
        .cart
        .add_item(
            user_id,
            AddItemInput {
                product_id,
                variant_id: Some(variant_id),
                quantity: qty,
            },
        )
        .await
        .expect("failed to fill cart");
}

async fn order_and_item_counts(app: &TestApp) -> (u64, u64) {
    let orders = Order::find().count(&*app.state.db).await.unwrap();
    let items = OrderItem::find().count(&*app.state.db).await.unwrap();
    (orders, items)
}

async fn variant_stock(app: &TestApp, variant_id: Uuid) -> i32 {
    product_variant::Entity::find_by_id(variant_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .stock_quantity
}

#[tokio::test]
async fn checkout_creates_order_with_snapshots_and_decrements_stock() {
    let server = MockServer::start().await;
    mock_carrier_checkout(&server).await;
    let app = app_with_mock_carrier(&server).await;

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&app, "Tee", dec!(500), 100).await;
    let variant_id = seed_variant(
        &app,
        product_id,
        VariantSpec {
            stock: 5,
            ..Default::default()
        },
    )
    .await;
    seed_image(&app, product_id, Some(variant_id), "https://img.example/v.jpg").await;
    fill_cart(&app, user_id, variant_id, product_id, 2).await;

    let outcome = app
        .state
        .services
        .checkout
        .create_checkout_session(user_id)
        .await
        .expect("checkout failed");

    assert_eq!(outcome.checkout_id, "chk-123");

    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.order_status, OrderStatus::Created);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.subtotal, dec!(1000));
    assert_eq!(order.tax_amount, dec!(180));
    assert_eq!(order.discount_amount, Decimal::ZERO);
    assert_eq!(order.total_amount, order.subtotal + order.tax_amount);
    assert_eq!(order.carrier_checkout_id.as_deref(), Some("chk-123"));
    assert!(order.order_number.starts_with("ORD-"));

    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].unit_price, dec!(500));
    assert_eq!(items[0].line_total, dec!(1000));
    assert_eq!(items[0].tax_amount, dec!(180));
    assert_eq!(items[0].carrier_variant_id, "cv-test");
    assert_eq!(
        items[0].image_url.as_deref(),
        Some("https://img.example/v.jpg")
    );

    assert_eq!(variant_stock(&app, variant_id).await, 3);
}

#[tokio::test]
async fn checkout_accounts_sale_price_savings() {
    let server = MockServer::start().await;
    mock_carrier_checkout(&server).await;
    let app = app_with_mock_carrier(&server).await;

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&app, "Tee", dec!(500), 100).await;
    let variant_id = seed_variant(
        &app,
        product_id,
        VariantSpec {
            price: dec!(500),
            sale_price: Some(dec!(400)),
            ..Default::default()
        },
    )
    .await;
    fill_cart(&app, user_id, variant_id, product_id, 2).await;

    let outcome = app
        .state
        .services
        .checkout
        .create_checkout_session(user_id)
        .await
        .unwrap();

    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.subtotal, dec!(800));
    assert_eq!(order.discount_amount, dec!(200));
    // discount is informational; the total nets subtotal plus tax only
    assert_eq!(order.total_amount, order.subtotal + order.tax_amount);
}

#[tokio::test]
async fn checkout_with_empty_cart_is_invalid() {
    let server = MockServer::start().await;
    let app = app_with_mock_carrier(&server).await;

    let err = app
        .state
        .services
        .checkout
        .create_checkout_session(Uuid::new_v4())
        .await
        .unwrap_err();

    match err {
        ServiceError::ValidationError(msg) => assert_eq!(msg, "Cart items are required"),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn stock_conflict_aborts_without_creating_order() {
    let server = MockServer::start().await;
    mock_carrier_checkout(&server).await;
    let app = app_with_mock_carrier(&server).await;

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&app, "Tee", dec!(500), 100).await;
    let variant_id = seed_variant(
        &app,
        product_id,
        VariantSpec {
            stock: 2,
            ..Default::default()
        },
    )
    .await;
    fill_cart(&app, user_id, variant_id, product_id, 2).await;

    // a concurrent sale drains the stock before checkout runs
    let variant = product_variant::Entity::find_by_id(variant_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: product_variant::ActiveModel = variant.into();
    active.stock_quantity = sea_orm::Set(1);
    sea_orm::ActiveModelTrait::update(active, &*app.state.db)
        .await
        .unwrap();

    let err = app
        .state
        .services
        .checkout
        .create_checkout_session(user_id)
        .await
        .unwrap_err();

    match err {
        ServiceError::Conflict(msg) => assert_eq!(msg, "Only 1 items left in stock"),
        other => panic!("expected conflict, got {:?}", other),
    }

    assert_eq!(order_and_item_counts(&app).await, (0, 0));
    assert_eq!(variant_stock(&app, variant_id).await, 1); // decrement rolled back
}

#[tokio::test]
async fn unsynced_variant_aborts_checkout() {
    let server = MockServer::start().await;
    mock_carrier_checkout(&server).await;
    let app = app_with_mock_carrier(&server).await;

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&app, "Tee", dec!(500), 100).await;
    let variant_id = seed_variant(
        &app,
        product_id,
        VariantSpec {
            carrier_variant_id: None,
            ..Default::default()
        },
    )
    .await;
    fill_cart(&app, user_id, variant_id, product_id, 1).await;

    let err = app
        .state
        .services
        .checkout
        .create_checkout_session(user_id)
        .await
        .unwrap_err();

    match err {
        ServiceError::ValidationError(msg) => {
            assert_eq!(msg, "Variant not synced with carrier")
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(order_and_item_counts(&app).await, (0, 0));
}

#[tokio::test]
async fn carrier_failure_rolls_back_everything() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let app = app_with_mock_carrier(&server).await;

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&app, "Tee", dec!(500), 100).await;
    let variant_id = seed_variant(
        &app,
        product_id,
        VariantSpec {
            stock: 5,
            ..Default::default()
        },
    )
    .await;
    fill_cart(&app, user_id, variant_id, product_id, 2).await;

    let err = app
        .state
        .services
        .checkout
        .create_checkout_session(user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));

    // no partial order, and the stock decrement rolled back with it
    assert_eq!(order_and_item_counts(&app).await, (0, 0));
    assert_eq!(variant_stock(&app, variant_id).await, 5);
}

#[tokio::test]
async fn failed_checkout_can_be_retried_from_scratch() {
    let server = MockServer::start().await;
    let app = app_with_mock_carrier(&server).await;

    let user_id = Uuid::new_v4();
    let product_id = seed_product(&app, "Tee", dec!(500), 100).await;
    let variant_id = seed_variant(
        &app,
        product_id,
        VariantSpec {
            stock: 5,
            ..Default::default()
        },
    )
    .await;
    fill_cart(&app, user_id, variant_id, product_id, 2).await;

    // first attempt: carrier down
    Mock::given(method("POST"))
        .and(path("/checkout"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;
    let err = app
        .state
        .services
        .checkout
        .create_checkout_session(user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));
    server.reset().await;

    // retry succeeds against the re-validated cart
    mock_carrier_checkout(&server).await;
    let outcome = app
        .state
        .services
        .checkout
        .create_checkout_session(user_id)
        .await
        .expect("retry should succeed");

    assert_eq!(order_and_item_counts(&app).await, (1, 1));
    assert_eq!(variant_stock(&app, variant_id).await, 3);
    assert_eq!(outcome.checkout_id, "chk-123");
}
