use crate::{
    carrier::{CarrierClient, CheckoutLineItem},
    config::AppConfig,
    entities::{
        cart, cart_item, order, order_item, product_image, Cart, CartItem, OrderStatus,
        PaymentStatus, ProductImage, ProductVariant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{self, PricingLine},
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Converts a validated cart into an Order plus OrderItem snapshots and a
/// payable carrier checkout session — all inside one transaction.
///
/// Any failure (validation, stock conflict, carrier rejection) aborts the
/// whole transaction: a partial order is never observable, and the stock
/// decrements roll back with it. The carrier call is deliberately not
/// retried in-request; callers re-invoke checkout, which re-validates from
/// scratch since no order exists after a rollback.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    carrier: Arc<CarrierClient>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        carrier: Arc<CarrierClient>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            carrier,
            config,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_checkout_session(
        &self,
        user_id: Uuid,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError("Cart items are required".to_string())
            })?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cart items are required".to_string(),
            ));
        }

        let order_number = generate_order_number();
        let txn = self.db.begin().await?;

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            order_number: Set(order_number.clone()),
            currency: Set(self.config.currency.clone()),
            subtotal: Set(Decimal::ZERO),
            tax_amount: Set(Decimal::ZERO),
            shipping_amount: Set(Decimal::ZERO),
            discount_amount: Set(Decimal::ZERO),
            total_amount: Set(Decimal::ZERO),
            order_status: Set(OrderStatus::Created),
            payment_status: Set(PaymentStatus::Pending),
            carrier_checkout_id: Set(None),
            carrier_order_id: Set(None),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut subtotal = Decimal::ZERO;
        let mut total_tax = Decimal::ZERO;
        let mut total_discount = Decimal::ZERO;
        let mut carrier_items = Vec::with_capacity(items.len());

        // Lines are processed serially: every write shares the one
        // transaction, and line i+1 only starts after line i validated.
        for item in &items {
            let variant_id = item
                .variant_id
                .ok_or_else(|| ServiceError::ValidationError("Invalid cart item".to_string()))?;

            let variant = ProductVariant::find_by_id(variant_id)
                .one(&txn)
                .await?
                .filter(|v| v.is_active)
                .ok_or_else(|| {
                    ServiceError::NotFound("Product variant not found".to_string())
                })?;

            let carrier_variant_id = variant.carrier_variant_id.clone().ok_or_else(|| {
                ServiceError::ValidationError("Variant not synced with carrier".to_string())
            })?;

            // Atomic reservation: decrement only if enough stock remains.
            // Zero rows affected means a concurrent checkout got there first.
            let reservation = ProductVariant::update_many()
                .col_expr(
                    crate::entities::product_variant::Column::StockQuantity,
                    Expr::col(crate::entities::product_variant::Column::StockQuantity)
                        .sub(item.quantity),
                )
                .filter(crate::entities::product_variant::Column::Id.eq(variant.id))
                .filter(
                    crate::entities::product_variant::Column::StockQuantity.gte(item.quantity),
                )
                .exec(&txn)
                .await?;

            if reservation.rows_affected == 0 {
                return Err(ServiceError::Conflict(format!(
                    "Only {} items left in stock",
                    variant.stock_quantity
                )));
            }

            let image_url = self
                .resolve_display_image(&txn, variant.product_id, variant.id)
                .await?;

            let priced = pricing::price_line(&PricingLine {
                quantity: item.quantity,
                list_price: variant.price,
                sale_price: variant.sale_price,
                tax_rate: variant.tax_rate,
                available: true,
                in_stock: true,
            });

            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(variant.product_id),
                variant_id: Set(variant.id),
                carrier_variant_id: Set(carrier_variant_id.clone()),
                name: Set(item
                    .product_name
                    .clone()
                    .unwrap_or_else(|| variant.sku.clone())),
                sku: Set(variant.sku.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(priced.unit_price),
                line_total: Set(priced.line_subtotal),
                tax_rate: Set(variant.tax_rate.unwrap_or(Decimal::ZERO)),
                tax_amount: Set(priced.line_tax),
                discount_amount: Set(priced.line_savings),
                weight: Set(variant.weight),
                image_url: Set(image_url),
                created_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await?;

            subtotal += priced.line_subtotal;
            total_tax += priced.line_tax;
            total_discount += priced.line_savings;

            carrier_items.push(CheckoutLineItem {
                variant_id: carrier_variant_id,
                quantity: item.quantity,
            });
        }

        // Discount stays informational: line subtotals already use the sale
        // price, so the order total is subtotal plus tax.
        let mut active: order::ActiveModel = order.into();
        active.subtotal = Set(subtotal);
        active.tax_amount = Set(total_tax);
        active.discount_amount = Set(total_discount);
        active.total_amount = Set(subtotal + total_tax);
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;

        let redirect_url = format!(
            "{}/checkout-success?orderId={}",
            self.config.frontend_url, order.id
        );
        let session = self
            .carrier
            .create_checkout_session(&carrier_items, &redirect_url)
            .await?;

        let order_id = order.id;
        let mut active: order::ActiveModel = order.into();
        active.carrier_checkout_id = Set(Some(session.checkout_id.clone()));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                order_id,
                checkout_id: session.checkout_id.clone(),
            })
            .await;

        info!(
            "Checkout session {} created for order {} ({})",
            session.checkout_id, order_id, order_number
        );

        Ok(CheckoutOutcome {
            checkout_id: session.checkout_id,
            order_id,
        })
    }

    /// Variant-specific image first, then the product-level default.
    async fn resolve_display_image(
        &self,
        conn: &impl sea_orm::ConnectionTrait,
        product_id: Uuid,
        variant_id: Uuid,
    ) -> Result<Option<String>, ServiceError> {
        let variant_image = ProductImage::find()
            .filter(product_image::Column::ProductId.eq(product_id))
            .filter(product_image::Column::VariantId.eq(variant_id))
            .order_by_asc(product_image::Column::Position)
            .one(conn)
            .await?;

        if let Some(image) = variant_image {
            return Ok(Some(image.image_url));
        }

        let product_image = ProductImage::find()
            .filter(product_image::Column::ProductId.eq(product_id))
            .filter(product_image::Column::VariantId.is_null())
            .order_by_asc(product_image::Column::Position)
            .one(conn)
            .await?;

        Ok(product_image.map(|image| image.image_url))
    }
}

/// Result returned to the client for the payment redirect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    pub checkout_id: String,
    pub order_id: Uuid,
}

/// Unique human-readable order number: epoch millis plus a random suffix.
/// A collision only surfaces through the unique index on order_number.
fn generate_order_number() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1000);
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_format() {
        let number = generate_order_number();
        let parts: Vec<&str> = number.split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert!(parts[1].parse::<i64>().unwrap() > 0);
        assert!(parts[2].parse::<u32>().unwrap() < 1000);
    }
}
