use crate::{
    entities::{
        order, order_item, Order, OrderItem, OrderItemModel, OrderModel, OrderStatus,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Order retrieval and status updates.
///
/// Orders are append-only after checkout; the only permitted mutations are
/// the status fields, driven in production by carrier webhooks. Both state
/// machines are validated here before anything is written.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Loads one of the user's orders with its line items.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        Ok(OrderWithItems { order, items })
    }

    /// Lists the user's orders, newest first.
    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Moves an order to a new fulfillment status, rejecting transitions the
    /// state machine does not allow.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let old_status = order.order_status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::ValidationError(format!(
                "Cannot transition order from '{:?}' to '{:?}'",
                old_status, new_status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.order_status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        info!(
            "Order {} status: {:?} -> {:?}",
            order_id, old_status, new_status
        );
        Ok(updated)
    }

    /// Moves an order's payment to a new status, independent of fulfillment.
    #[instrument(skip(self))]
    pub async fn update_payment_status(
        &self,
        order_id: Uuid,
        new_status: PaymentStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let old_status = order.payment_status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::ValidationError(format!(
                "Cannot transition payment from '{:?}' to '{:?}'",
                old_status, new_status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        Ok(updated)
    }
}

/// Order with its immutable line-item snapshots.
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}
