use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input,
};
use crate::{
    auth::AuthenticatedUser,
    errors::ApiError,
    services::cart::{AddItemInput, GuestCartItem},
    services::pricing::TaxRegion,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{delete, patch, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Cart endpoints, mounted under `/cart`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(add_to_cart).get(get_cart))
        .route("/item/:cart_item_id", patch(update_cart_item))
        .route("/item/:cart_item_id", delete(remove_cart_item))
        .route("/merge", post(merge_guest_cart))
}

/// Add an item to the caller's cart
async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let item = state
        .services
        .cart
        .add_item(
            user.user_id,
            AddItemInput {
                product_id: payload.product_id,
                variant_id: payload.variant_id,
                quantity: payload.quantity,
            },
        )
        .await
        .map_err(map_service_error)?;

    Ok(created_response(item, "Item added to cart"))
}

/// Get the cart with live availability and the pricing summary
async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<GetCartQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let region = match &query.state {
        Some(s) if s.eq_ignore_ascii_case(&state.config.home_state) => TaxRegion::Domestic,
        _ => TaxRegion::Interstate,
    };

    let view = state
        .services
        .cart
        .get_cart(user.user_id, region, query.coupon_code.as_deref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(view, "Cart fetched"))
}

/// Update a cart line's quantity
async fn update_cart_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(cart_item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let item = state
        .services
        .cart
        .update_item_quantity(user.user_id, cart_item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(item, "Quantity updated"))
}

/// Remove a cart line
async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(cart_item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .cart
        .remove_item(user.user_id, cart_item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::Value::Null, "Item removed"))
}

/// Merge an anonymous cart into the caller's cart after login
async fn merge_guest_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<MergeGuestCartRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .cart
        .merge_guest_cart(user.user_id, payload.guest_items)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(outcome, "Guest cart merged"))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCartQuery {
    pub state: Option<String>,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeGuestCartRequest {
    #[serde(default)]
    pub guest_items: Vec<GuestCartItem>,
}
