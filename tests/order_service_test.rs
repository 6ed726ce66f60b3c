mod common;

use common::{seed_product, seed_variant, TestApp, VariantSpec};
use rust_decimal_macros::dec;
use storefront_api::{
    entities::{OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::cart::AddItemInput,
};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Runs a full checkout to produce a real order to mutate.
async fn place_order(app: &TestApp, user_id: Uuid) -> Uuid {
    let product_id = seed_product(app, "Tee", dec!(500), 100).await;
    let variant_id = seed_variant(app, product_id, VariantSpec::default()).await;
    app.state
        .services
        .cart
        .add_item(
            user_id,
            AddItemInput {
                product_id,
                variant_id: Some(variant_id),
                quantity: 1,
            },
        )
        .await
        .unwrap();

    app.state
        .services
        .checkout
        .create_checkout_session(user_id)
        .await
        .unwrap()
        .order_id
}

async fn checkout_ready_app(server: &MockServer) -> TestApp {
    Mock::given(method("POST"))
        .and(path("/checkout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "t",
            "checkout_id": "chk-1",
            "expires_at": null
        })))
        .mount(server)
        .await;
    TestApp::with_carrier(&server.uri(), &format!("{}/checkout", server.uri())).await
}

#[tokio::test]
async fn order_status_walks_the_forward_chain() {
    let server = MockServer::start().await;
    let app = checkout_ready_app(&server).await;
    let user_id = Uuid::new_v4();
    let order_id = place_order(&app, user_id).await;

    let orders = &app.state.services.orders;
    for status in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        let updated = orders.update_order_status(order_id, status).await.unwrap();
        assert_eq!(updated.order_status, status);
    }

    // delivered is terminal
    let err = orders
        .update_order_status(order_id, OrderStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn skipping_states_is_rejected() {
    let server = MockServer::start().await;
    let app = checkout_ready_app(&server).await;
    let order_id = place_order(&app, Uuid::new_v4()).await;

    let err = app
        .state
        .services
        .orders
        .update_order_status(order_id, OrderStatus::Shipped)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn cancellation_works_from_any_non_terminal_state() {
    let server = MockServer::start().await;
    let app = checkout_ready_app(&server).await;
    let order_id = place_order(&app, Uuid::new_v4()).await;

    app.state
        .services
        .orders
        .update_order_status(order_id, OrderStatus::Confirmed)
        .await
        .unwrap();
    let cancelled = app
        .state
        .services
        .orders
        .update_order_status(order_id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn payment_status_is_independent_of_fulfillment() {
    let server = MockServer::start().await;
    let app = checkout_ready_app(&server).await;
    let order_id = place_order(&app, Uuid::new_v4()).await;

    let orders = &app.state.services.orders;
    let paid = orders
        .update_payment_status(order_id, PaymentStatus::Paid)
        .await
        .unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.order_status, OrderStatus::Created);

    let refunded = orders
        .update_payment_status(order_id, PaymentStatus::Refunded)
        .await
        .unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);

    let err = orders
        .update_payment_status(order_id, PaymentStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn get_order_scopes_to_the_owning_user() {
    let server = MockServer::start().await;
    let app = checkout_ready_app(&server).await;
    let user_id = Uuid::new_v4();
    let order_id = place_order(&app, user_id).await;

    let fetched = app
        .state
        .services
        .orders
        .get_order(user_id, order_id)
        .await
        .unwrap();
    assert_eq!(fetched.order.id, order_id);
    assert_eq!(fetched.items.len(), 1);

    let err = app
        .state
        .services
        .orders
        .get_order(Uuid::new_v4(), order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}
