pub mod cart;
pub mod checkout;
pub mod common;

use crate::{
    carrier::CarrierClient,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{CartService, CheckoutService, OrderService},
    AppState,
};
use axum::Router;
use std::sync::Arc;

/// Aggregated service instances shared by all HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        carrier: Arc<CarrierClient>,
        config: Arc<AppConfig>,
    ) -> Self {
        let cart = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            carrier,
            config,
        ));
        let orders = Arc::new(OrderService::new(db, event_sender));

        Self {
            cart,
            checkout,
            orders,
        }
    }
}

/// Versioned API router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/cart", cart::routes())
        .nest("/checkout", checkout::routes())
}
