use crate::{
    config::AppConfig,
    entities::{
        cart, cart_item, product_image, product_variant, Cart, CartItem, CartItemModel, CartModel,
        Product, ProductImage, ProductModel, ProductVariant, ProductVariantModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{
        self, CartSummary, PricingLine, ShippingPolicy, TaxPolicy, TaxRegion,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Shopping cart service.
///
/// Owns all Cart and CartItem mutations; no other component writes these
/// rows. Every operation validates against live catalog stock so a line's
/// quantity never persists above what the variant can actually cover.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Returns the user's active cart, creating one lazily on first use.
    async fn get_or_create_cart(
        &self,
        conn: &impl sea_orm::ConnectionTrait,
        user_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let existing = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::IsActive.eq(true))
            .one(conn)
            .await?;

        if let Some(cart) = existing {
            return Ok(cart);
        }

        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(cart.insert(conn).await?)
    }

    /// Adds an item to the user's cart, merging into an existing line for the
    /// same (product, variant) pair.
    ///
    /// The whole upsert runs in one transaction: when an increment would push
    /// the line past available stock the transaction rolls back, so neither
    /// the increment nor a freshly inserted row survives.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartItemModel, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = Product::find()
            .filter(crate::entities::product::Column::Id.eq(input.product_id))
            .filter(crate::entities::product::Column::IsActive.eq(true))
            .filter(crate::entities::product::Column::IsDeleted.eq(false))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

        let (unit_price, available_stock, sku) = match input.variant_id {
            Some(variant_id) => {
                let variant = ProductVariant::find()
                    .filter(product_variant::Column::Id.eq(variant_id))
                    .filter(product_variant::Column::ProductId.eq(input.product_id))
                    .filter(product_variant::Column::IsActive.eq(true))
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound("Product variant not found".to_string())
                    })?;
                (
                    variant.unit_price(),
                    variant.stock_quantity,
                    variant.sku.clone(),
                )
            }
            None => (product.unit_price(), product.stock_quantity, product.sku.clone()),
        };

        if available_stock < input.quantity {
            return Err(ServiceError::Conflict(format!(
                "Only {} item(s) available in stock",
                available_stock
            )));
        }

        let cart = self.get_or_create_cart(&txn, user_id).await?;

        let existing = CartItem::find()
            .filter(line_key_condition(cart.id, input.product_id, input.variant_id))
            .one(&txn)
            .await?;

        let item = match existing {
            Some(item) => {
                let new_quantity = item.quantity + input.quantity;
                if new_quantity > available_stock {
                    return Err(ServiceError::Conflict(format!(
                        "Cannot add more than {} item(s)",
                        available_stock
                    )));
                }
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(new_quantity);
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?
            }
            None => {
                let now = Utc::now();
                let fresh = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(input.product_id),
                    variant_id: Set(input.variant_id),
                    quantity: Set(input.quantity),
                    price: Set(unit_price),
                    product_name: Set(Some(product.name.clone())),
                    sku: Set(Some(sku)),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                fresh.insert(&txn).await?
            }
        };

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: input.product_id,
                variant_id: input.variant_id,
            })
            .await;

        info!(
            "Added to cart {}: product {} variant {:?} x{}",
            cart.id, input.product_id, input.variant_id, input.quantity
        );
        Ok(item)
    }

    /// Loads the user's cart, re-resolving every line against the live
    /// catalog, and returns per-item availability annotations plus the full
    /// pricing summary.
    ///
    /// Drifted price snapshots are refreshed in storage as a side effect;
    /// over-stock quantities are flagged but never clamped here.
    #[instrument(skip(self))]
    pub async fn get_cart(
        &self,
        user_id: Uuid,
        region: TaxRegion,
        coupon_code: Option<&str>,
    ) -> Result<CartView, ServiceError> {
        let shipping_policy = self.shipping_policy();

        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;

        let Some(cart) = cart else {
            return Ok(CartView::empty(region, &shipping_policy));
        };

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        if items.is_empty() {
            return Ok(CartView::empty(region, &shipping_policy));
        }

        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let variant_ids: Vec<Uuid> = items.iter().filter_map(|i| i.variant_id).collect();

        let products: HashMap<Uuid, ProductModel> = Product::find()
            .filter(crate::entities::product::Column::Id.is_in(product_ids.clone()))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let variants: HashMap<Uuid, ProductVariantModel> = if variant_ids.is_empty() {
            HashMap::new()
        } else {
            ProductVariant::find()
                .filter(product_variant::Column::Id.is_in(variant_ids.clone()))
                .all(&*self.db)
                .await?
                .into_iter()
                .map(|v| (v.id, v))
                .collect()
        };

        let image_map = self.load_image_map(&product_ids, &variant_ids).await?;

        let mut views = Vec::with_capacity(items.len());
        let mut lines = Vec::with_capacity(items.len());

        for item in items {
            let product = products
                .get(&item.product_id)
                .filter(|p| p.is_purchasable());
            let variant = item.variant_id.and_then(|id| variants.get(&id));
            let variant_ok = match item.variant_id {
                Some(_) => variant.map(|v| v.is_active).unwrap_or(false),
                None => true,
            };

            let Some(product) = product else {
                views.push(CartItemView::unavailable(&item));
                lines.push(PricingLine {
                    quantity: item.quantity,
                    list_price: Decimal::ZERO,
                    sale_price: None,
                    tax_rate: None,
                    available: false,
                    in_stock: false,
                });
                continue;
            };

            if !variant_ok {
                views.push(CartItemView::unavailable(&item));
                lines.push(PricingLine {
                    quantity: item.quantity,
                    list_price: Decimal::ZERO,
                    sale_price: None,
                    tax_rate: None,
                    available: false,
                    in_stock: false,
                });
                continue;
            }

            let (unit_price, list_price, sale_price, tax_rate, available_stock, sku) =
                match variant {
                    Some(v) => (
                        v.unit_price(),
                        v.price,
                        v.effective_sale_price(),
                        v.tax_rate,
                        v.stock_quantity,
                        v.sku.clone(),
                    ),
                    None => (
                        product.unit_price(),
                        product.price,
                        product.sale_price.filter(|s| *s < product.price),
                        None,
                        product.stock_quantity,
                        product.sku.clone(),
                    ),
                };

            // Silently refresh a stale price snapshot
            if item.price != unit_price {
                let mut active: cart_item::ActiveModel = item.clone().into();
                active.price = Set(unit_price);
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?;
            }

            let stock_warning = item.quantity > available_stock;
            let image = item
                .variant_id
                .and_then(|vid| image_map.get(&ImageKey::Variant(vid)))
                .or_else(|| image_map.get(&ImageKey::Product(product.id)))
                .cloned();

            views.push(CartItemView {
                cart_item_id: item.id,
                product_id: Some(product.id),
                variant_id: item.variant_id,
                name: product.name.clone(),
                sku: Some(sku),
                image,
                price: unit_price,
                quantity: item.quantity,
                subtotal: unit_price * Decimal::from(item.quantity),
                available_stock,
                in_stock: !stock_warning,
                stock_warning,
            });

            lines.push(PricingLine {
                quantity: item.quantity,
                list_price,
                sale_price,
                tax_rate,
                available: true,
                in_stock: !stock_warning,
            });
        }

        let summary = pricing::compute_cart_summary(
            &lines,
            self.tax_policy(&lines),
            &shipping_policy,
            region,
            coupon_code,
        );

        let can_checkout = summary.can_checkout;
        Ok(CartView {
            items: views,
            summary,
            can_checkout,
        })
    }

    /// Sets the quantity of one cart line, re-validating against live stock.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        cart_item_id: Uuid,
        quantity: i32,
    ) -> Result<CartItemModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let item = CartItem::find()
            .filter(cart_item::Column::Id.eq(cart_item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart item not found".to_string()))?;

        let available_stock = match item.variant_id {
            Some(variant_id) => {
                let variant = ProductVariant::find_by_id(variant_id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound("Product variant not found".to_string())
                    })?;
                if !variant.is_active {
                    return Err(ServiceError::Conflict(
                        "Product variant is no longer available".to_string(),
                    ));
                }
                variant.stock_quantity
            }
            None => {
                let product = Product::find_by_id(item.product_id)
                    .one(&*self.db)
                    .await?
                    .filter(|p| !p.is_deleted)
                    .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;
                if !product.is_active {
                    return Err(ServiceError::Conflict(
                        "Product is no longer available".to_string(),
                    ));
                }
                product.stock_quantity
            }
        };

        if quantity > available_stock {
            return Err(ServiceError::Conflict(format!(
                "Only {} item(s) available in stock",
                available_stock
            )));
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Removes one line from the user's cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        cart_item_id: Uuid,
    ) -> Result<(), ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let result = CartItem::delete_many()
            .filter(cart_item::Column::Id.eq(cart_item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("Cart item not found".to_string()));
        }

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                cart_item_id,
            })
            .await;

        Ok(())
    }

    /// Merges a guest session's cart lines into the user's persistent cart
    /// after login.
    ///
    /// Best-effort per line: unknown, inactive and out-of-stock variants are
    /// skipped and quantities clamp to available stock. Cart creation and all
    /// upserts share one transaction, so a failed merge leaves nothing
    /// half-written.
    #[instrument(skip(self, guest_items))]
    pub async fn merge_guest_cart(
        &self,
        user_id: Uuid,
        guest_items: Vec<GuestCartItem>,
    ) -> Result<MergeOutcome, ServiceError> {
        if guest_items.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let txn = self.db.begin().await?;
        let cart = self.get_or_create_cart(&txn, user_id).await?;

        let mut merged = 0usize;
        let mut skipped = 0usize;

        for guest in guest_items {
            if guest.quantity < 1 {
                skipped += 1;
                continue;
            }

            let product = Product::find()
                .filter(crate::entities::product::Column::Id.eq(guest.product_id))
                .filter(crate::entities::product::Column::IsActive.eq(true))
                .filter(crate::entities::product::Column::IsDeleted.eq(false))
                .one(&txn)
                .await?;
            let Some(product) = product else {
                skipped += 1;
                continue;
            };

            let (unit_price, available_stock, sku) = match guest.variant_id {
                Some(variant_id) => {
                    let variant = ProductVariant::find()
                        .filter(product_variant::Column::Id.eq(variant_id))
                        .filter(product_variant::Column::ProductId.eq(guest.product_id))
                        .filter(product_variant::Column::IsActive.eq(true))
                        .one(&txn)
                        .await?;
                    match variant {
                        Some(v) => (v.unit_price(), v.stock_quantity, v.sku.clone()),
                        None => {
                            skipped += 1;
                            continue;
                        }
                    }
                }
                None => (product.unit_price(), product.stock_quantity, product.sku.clone()),
            };

            if available_stock <= 0 {
                skipped += 1;
                continue;
            }

            let clamped = guest.quantity.min(available_stock);

            let existing = CartItem::find()
                .filter(line_key_condition(cart.id, guest.product_id, guest.variant_id))
                .one(&txn)
                .await?;

            match existing {
                Some(item) => {
                    let new_quantity = (item.quantity + clamped).min(available_stock);
                    let mut active: cart_item::ActiveModel = item.into();
                    active.quantity = Set(new_quantity);
                    active.updated_at = Set(Utc::now());
                    active.update(&txn).await?;
                }
                None => {
                    let now = Utc::now();
                    let fresh = cart_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        cart_id: Set(cart.id),
                        product_id: Set(guest.product_id),
                        variant_id: Set(guest.variant_id),
                        quantity: Set(clamped),
                        price: Set(unit_price),
                        product_name: Set(Some(product.name.clone())),
                        sku: Set(Some(sku)),
                        created_at: Set(now),
                        updated_at: Set(now),
                    };
                    fresh.insert(&txn).await?;
                }
            }
            merged += 1;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::GuestCartMerged {
                cart_id: cart.id,
                merged,
                skipped,
            })
            .await;

        info!(
            "Merged guest cart into {}: {} merged, {} skipped",
            cart.id, merged, skipped
        );
        Ok(MergeOutcome { merged, skipped })
    }

    fn shipping_policy(&self) -> ShippingPolicy {
        ShippingPolicy {
            flat_fee: self.config.shipping_flat_fee,
            free_threshold: self.config.free_shipping_threshold,
        }
    }

    /// Variant-level rates win; carts without any fall back to the flat rate.
    fn tax_policy(&self, lines: &[PricingLine]) -> TaxPolicy {
        if lines.iter().any(|l| l.tax_rate.is_some()) {
            TaxPolicy::PerLine
        } else {
            TaxPolicy::Flat(self.config.flat_tax_rate)
        }
    }

    async fn load_image_map(
        &self,
        product_ids: &[Uuid],
        variant_ids: &[Uuid],
    ) -> Result<HashMap<ImageKey, String>, ServiceError> {
        let mut condition = Condition::any().add(
            Condition::all()
                .add(product_image::Column::ProductId.is_in(product_ids.to_vec()))
                .add(product_image::Column::VariantId.is_null()),
        );
        if !variant_ids.is_empty() {
            condition =
                condition.add(product_image::Column::VariantId.is_in(variant_ids.to_vec()));
        }

        let images = ProductImage::find()
            .filter(condition)
            .order_by_asc(product_image::Column::Position)
            .all(&*self.db)
            .await?;

        let mut map = HashMap::new();
        for image in images {
            let key = match image.variant_id {
                Some(variant_id) => ImageKey::Variant(variant_id),
                None => ImageKey::Product(image.product_id),
            };
            map.entry(key).or_insert(image.image_url);
        }
        Ok(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ImageKey {
    Product(Uuid),
    Variant(Uuid),
}

/// Filter for the unique (cart, product, variant) line key. A missing
/// variant must compare with IS NULL, not `= NULL`.
fn line_key_condition(cart_id: Uuid, product_id: Uuid, variant_id: Option<Uuid>) -> Condition {
    let base = Condition::all()
        .add(cart_item::Column::CartId.eq(cart_id))
        .add(cart_item::Column::ProductId.eq(product_id));
    match variant_id {
        Some(variant_id) => base.add(cart_item::Column::VariantId.eq(variant_id)),
        None => base.add(cart_item::Column::VariantId.is_null()),
    }
}

/// Input for adding an item to the cart.
#[derive(Debug, Clone, Deserialize)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

/// One line from an anonymous (pre-login) cart.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestCartItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

/// Result of a guest-cart merge.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub merged: usize,
    pub skipped: usize,
}

/// Cart line annotated with live availability.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    pub cart_item_id: Uuid,
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub sku: Option<String>,
    pub image: Option<String>,
    pub price: Decimal,
    pub quantity: i32,
    pub subtotal: Decimal,
    pub available_stock: i32,
    pub in_stock: bool,
    pub stock_warning: bool,
}

impl CartItemView {
    fn unavailable(item: &CartItemModel) -> Self {
        Self {
            cart_item_id: item.id,
            product_id: None,
            variant_id: item.variant_id,
            name: "Product unavailable".to_string(),
            sku: None,
            image: None,
            price: Decimal::ZERO,
            quantity: item.quantity,
            subtotal: Decimal::ZERO,
            available_stock: 0,
            in_stock: false,
            stock_warning: true,
        }
    }
}

/// Cart contents plus the computed pricing summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub items: Vec<CartItemView>,
    pub summary: CartSummary,
    pub can_checkout: bool,
}

impl CartView {
    fn empty(region: TaxRegion, shipping_policy: &ShippingPolicy) -> Self {
        let summary = pricing::compute_cart_summary(
            &[],
            TaxPolicy::PerLine,
            shipping_policy,
            region,
            None,
        );
        Self {
            items: Vec::new(),
            summary,
            can_checkout: false,
        }
    }
}
