use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Actor,
    entities::menu_item::Entity as MenuItemEntity,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderStatus, OrderType, PaymentMethod, PaymentStatus,
    },
    entities::order_item::{self, Entity as OrderItemEntity},
    entities::stock_movement::{self, MovementType},
    errors::ServiceError,
    events::{Event, EventSender},
    services::recipes::RecipeResolver,
    services::stock_ledger::{
        NewMovement, StockLedgerService, REASON_AUTOMATIC_DEDUCTION, REFERENCE_TYPE_ORDER,
    },
};

/// Attempts at generating a collision-free order number before giving up.
/// A collision only happens when two orders race for the same per-day
/// sequence slot; the unique index on order_number is the arbiter.
const ORDER_NUMBER_RETRY_BUDGET: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderItemRequest {
    pub menu_item_id: Uuid,
    pub quantity: i32,
    pub special_instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    pub order_type: OrderType,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub table_number: Option<String>,
    pub delivery_address: Option<String>,
    pub payment_method: PaymentMethod,
    pub tax_amount: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<PlaceOrderItemRequest>,
}

/// An order together with its eagerly loaded line items. Loading is always
/// explicit here; nothing in the core relies on lazy relationship traversal.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<order_item::Model>,
}

/// Owns the order aggregate and orchestrates placement: totals from price
/// snapshots, recipe resolution, and stock deduction, all inside one
/// transaction so an order can never exist with partial deductions.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    resolver: RecipeResolver,
    ledger: StockLedgerService,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        ledger: StockLedgerService,
    ) -> Self {
        Self {
            db,
            event_sender,
            resolver: RecipeResolver::new(),
            ledger,
        }
    }

    /// Places an order: validates the cart, snapshots menu prices, computes
    /// totals, persists the order with its lines, and deducts recipe
    /// ingredients from stock, all or nothing.
    ///
    /// Deductions are aggregated per inventory item across all lines (one
    /// movement per (order, item) pair) and applied in ascending item-id
    /// order so two concurrent orders touching overlapping ingredient sets
    /// cannot deadlock. Any failure rolls the whole placement back.
    #[instrument(skip(self, request), fields(actor_id = %actor.id, order_type = %request.order_type, lines = request.items.len()))]
    pub async fn place_order(
        &self,
        actor: Actor,
        request: PlaceOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        self.validate_request(&request)?;

        let mut attempt = 0;
        let (placed, movements) = loop {
            attempt += 1;
            match self.try_place_order(actor, &request).await {
                Ok(result) => break result,
                Err(ServiceError::DatabaseError(e))
                    if is_unique_violation(&e) && attempt < ORDER_NUMBER_RETRY_BUDGET =>
                {
                    warn!(attempt, "Order number collision, regenerating");
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            order_id = %placed.order.id,
            order_number = %placed.order.order_number,
            total_amount = %placed.order.total_amount,
            deductions = movements.len(),
            "Order placed"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::OrderPlaced {
                order_id: placed.order.id,
                order_number: placed.order.order_number.clone(),
                total_amount: placed.order.total_amount,
            })
            .await
        {
            warn!(error = %e, order_id = %placed.order.id, "Failed to send order placed event");
        }
        for movement in &movements {
            self.ledger.emit_movement_events(movement).await;
        }

        Ok(placed)
    }

    /// Shape validation, rejected before any persistence.
    fn validate_request(&self, request: &PlaceOrderRequest) -> Result<(), ServiceError> {
        request.validate()?;

        for line in &request.items {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Item quantity must be positive, got {}",
                    line.quantity
                )));
            }
        }

        if let Some(discount) = request.discount_amount {
            if discount < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Discount amount cannot be negative".to_string(),
                ));
            }
        }
        if let Some(tax) = request.tax_amount {
            if tax < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Tax amount cannot be negative".to_string(),
                ));
            }
        }

        match request.order_type {
            OrderType::DineIn if none_or_blank(&request.table_number) => {
                Err(ServiceError::ValidationError(
                    "Dine-in orders require a table number".to_string(),
                ))
            }
            OrderType::Delivery if none_or_blank(&request.delivery_address) => {
                Err(ServiceError::ValidationError(
                    "Delivery orders require a delivery address".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn try_place_order(
        &self,
        actor: Actor,
        request: &PlaceOrderRequest,
    ) -> Result<(OrderWithItems, Vec<stock_movement::Model>), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order placement");
            ServiceError::DatabaseError(e)
        })?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        // Snapshot prices and aggregate recipe deductions per inventory item.
        // BTreeMap keeps the deduction batch in ascending item-id order, the
        // stable lock order shared by all placements.
        let mut line_models = Vec::with_capacity(request.items.len());
        let mut deductions: BTreeMap<Uuid, Decimal> = BTreeMap::new();
        let mut subtotal = Decimal::ZERO;

        for line in &request.items {
            let menu_item = MenuItemEntity::find_by_id(line.menu_item_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Menu item {} not found", line.menu_item_id))
                })?;

            if !menu_item.is_available {
                return Err(ServiceError::NotFound(format!(
                    "Menu item '{}' is not available",
                    menu_item.name
                )));
            }

            let quantity = Decimal::from(line.quantity);
            let item_total = menu_item.price * quantity;
            subtotal += item_total;

            line_models.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                menu_item_id: Set(menu_item.id),
                menu_item_name: Set(menu_item.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(menu_item.price),
                item_total: Set(item_total),
                special_instructions: Set(line.special_instructions.clone()),
                created_at: Set(now),
            });

            for recipe_line in self.resolver.resolve(&txn, menu_item.id).await? {
                *deductions
                    .entry(recipe_line.inventory_item_id)
                    .or_insert(Decimal::ZERO) += recipe_line.quantity_per_unit * quantity;
            }
        }

        let tax_amount = request.tax_amount.unwrap_or(Decimal::ZERO);
        let discount_amount = request.discount_amount.unwrap_or(Decimal::ZERO);
        let total_amount = subtotal + tax_amount - discount_amount;

        let order_number = next_order_number(&txn, now).await?;

        let order_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            order_type: Set(request.order_type.to_string()),
            customer_name: Set(request.customer_name.clone()),
            customer_phone: Set(request.customer_phone.clone()),
            table_number: Set(request.table_number.clone()),
            delivery_address: Set(request.delivery_address.clone()),
            subtotal: Set(subtotal),
            tax_amount: Set(tax_amount),
            discount_amount: Set(discount_amount),
            total_amount: Set(total_amount),
            payment_method: Set(request.payment_method.to_string()),
            payment_reference: Set(None),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            status: Set(OrderStatus::Pending.to_string()),
            notes: Set(None),
            cancellation_reason: Set(None),
            confirmed_at: Set(None),
            ready_at: Set(None),
            completed_at: Set(None),
            created_by: Set(actor.id),
            updated_by: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(line_models.len());
        for line_model in line_models {
            items.push(line_model.insert(&txn).await?);
        }

        // Apply the deduction batch. Any InsufficientStock or unknown-item
        // error propagates out and drops the transaction, rolling back the
        // order, its lines, and every prior deduction as one unit.
        let mut movements = Vec::with_capacity(deductions.len());
        for (inventory_item_id, quantity) in deductions {
            let movement = StockLedgerService::apply_movement(
                &txn,
                &NewMovement {
                    inventory_item_id,
                    movement_type: MovementType::Out,
                    quantity,
                    unit_cost: None,
                    reason: REASON_AUTOMATIC_DEDUCTION.to_string(),
                    notes: None,
                    reference: Some((REFERENCE_TYPE_ORDER.to_string(), order_id)),
                    actor_id: actor.id,
                },
            )
            .await?;
            movements.push(movement);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order placement");
            ServiceError::DatabaseError(e)
        })?;

        Ok((
            OrderWithItems {
                order: order_model,
                items,
            },
            movements,
        ))
    }

    /// Fetches an order with its line items, explicitly loaded.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = self.load_items(order_id).await?;
        Ok(OrderWithItems { order, items })
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    /// Lists orders newest-first. Visibility is an explicit capability of the
    /// acting user: cashiers only see orders they created.
    #[instrument(skip(self), fields(actor_id = %actor.id, role = %actor.role))]
    pub async fn list_orders(
        &self,
        actor: Actor,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if !actor.role.sees_all_orders() {
            query = query.filter(order::Column::CreatedBy.eq(actor.id));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Marks an order as paid, storing the opaque gateway reference (an
    /// M-Pesa confirmation code, or nothing for cash).
    #[instrument(skip(self, actor), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        actor: Actor,
        payment_reference: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status == OrderStatus::Cancelled.to_string() {
            return Err(ServiceError::InvalidOperation(
                "Cannot record payment for a cancelled order".to_string(),
            ));
        }
        if order.payment_status == PaymentStatus::Paid.to_string() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is already paid",
                order.order_number
            )));
        }

        let payment_method = order.payment_method.clone();
        let expected_status = order.status.clone();
        let expected_payment_status = order.payment_status.clone();
        let mut active: OrderActiveModel = order.into();
        active.payment_status = Set(PaymentStatus::Paid.to_string());
        active.payment_reference = Set(payment_reference.clone());
        active.updated_at = Set(Some(Utc::now()));
        active.updated_by = Set(Some(actor.id));

        // Only lands if the order is still unpaid and uncancelled; a
        // concurrent cancel or duplicate payment leaves zero rows matched.
        let updated = OrderEntity::update(active)
            .filter(order::Column::Status.eq(expected_status))
            .filter(order::Column::PaymentStatus.eq(expected_payment_status))
            .exec(&txn)
            .await
            .map_err(|e| match e {
                sea_orm::DbErr::RecordNotUpdated => {
                    warn!(order_id = %order_id, "Order changed concurrently during payment");
                    ServiceError::ConcurrentModification(order_id)
                }
                e => ServiceError::DatabaseError(e),
            })?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, "Payment recorded");

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentRecorded {
                order_id,
                payment_method,
                payment_reference,
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send payment event");
        }

        Ok(updated)
    }
}

fn none_or_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}

/// Generates the next store-scoped order number, `POS-YYYYMMDD-NNNN`. The
/// per-day sequence is derived from the count of today's orders inside the
/// placing transaction; the unique index on order_number catches races and
/// the caller retries with a fresh number.
async fn next_order_number(
    txn: &DatabaseTransaction,
    now: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let prefix = format!("POS-{}-", now.format("%Y%m%d"));
    let todays_orders = OrderEntity::find()
        .filter(order::Column::OrderNumber.starts_with(&prefix))
        .count(txn)
        .await?;
    Ok(format!("{}{:04}", prefix, todays_orders + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_request() -> PlaceOrderRequest {
        PlaceOrderRequest {
            order_type: OrderType::Takeaway,
            customer_name: None,
            customer_phone: None,
            table_number: None,
            delivery_address: None,
            payment_method: PaymentMethod::Cash,
            tax_amount: None,
            discount_amount: None,
            items: vec![PlaceOrderItemRequest {
                menu_item_id: Uuid::new_v4(),
                quantity: 1,
                special_instructions: None,
            }],
        }
    }

    fn service_for_validation() -> OrderService {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let sender = EventSender::new(tx);
        let db = Arc::new(DatabaseConnection::Disconnected);
        let ledger = StockLedgerService::new(db.clone(), sender.clone());
        OrderService::new(db, sender, ledger)
    }

    #[test]
    fn empty_cart_is_rejected() {
        let svc = service_for_validation();
        let mut request = base_request();
        request.items.clear();
        assert!(matches!(
            svc.validate_request(&request),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let svc = service_for_validation();
        let mut request = base_request();
        request.items[0].quantity = 0;
        assert!(matches!(
            svc.validate_request(&request),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn dine_in_requires_table_number() {
        let svc = service_for_validation();
        let mut request = base_request();
        request.order_type = OrderType::DineIn;
        assert!(svc.validate_request(&request).is_err());
        request.table_number = Some("T4".into());
        assert!(svc.validate_request(&request).is_ok());
    }

    #[test]
    fn delivery_requires_address() {
        let svc = service_for_validation();
        let mut request = base_request();
        request.order_type = OrderType::Delivery;
        request.delivery_address = Some("  ".into());
        assert!(svc.validate_request(&request).is_err());
    }

    #[test]
    fn negative_discount_is_rejected() {
        let svc = service_for_validation();
        let mut request = base_request();
        request.discount_amount = Some(dec!(-5));
        assert!(svc.validate_request(&request).is_err());
    }
}
