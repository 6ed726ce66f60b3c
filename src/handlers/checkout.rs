use crate::handlers::common::{map_service_error, success_response};
use crate::{auth::AuthenticatedUser, errors::ApiError, AppState};
use axum::{extract::State, routing::post, Router};
use std::sync::Arc;

/// Checkout endpoints, mounted under `/checkout`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/create-checkout-session", post(create_checkout_session))
}

/// Convert the caller's cart into an order and a payable carrier session
async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .checkout
        .create_checkout_session(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(
        outcome,
        "Checkout session created successfully",
    ))
}
