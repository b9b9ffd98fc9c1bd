use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::inventory_item::{self, Entity as InventoryItemEntity, StockStatus},
    entities::stock_movement::{self, Entity as StockMovementEntity, MovementType},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Retries for the compare-and-swap stock update before giving up. A retry is
/// only taken when a concurrent writer changed the same item's stock between
/// our read and our conditional write.
const CAS_RETRY_BUDGET: u32 = 5;

/// Reason recorded on movements created by order placement.
pub const REASON_AUTOMATIC_DEDUCTION: &str = "automatic_deduction";
/// Reason recorded on compensating movements created by order cancellation.
pub const REASON_CANCELLATION_REVERSAL: &str = "cancellation_reversal";

/// Reference type recorded on movements caused by an order.
pub const REFERENCE_TYPE_ORDER: &str = "order";

/// Input for one ledger write.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub inventory_item_id: Uuid,
    pub movement_type: MovementType,
    /// Positive magnitude; direction comes from `movement_type`.
    pub quantity: Decimal,
    /// Unit cost snapshot; falls back to the item's current unit cost.
    pub unit_cost: Option<Decimal>,
    pub reason: String,
    pub notes: Option<String>,
    pub reference: Option<(String, Uuid)>,
    pub actor_id: Uuid,
}

/// Inventory item plus its derived stock status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItemView {
    #[serde(flatten)]
    pub item: inventory_item::Model,
    pub stock_status: StockStatus,
}

/// Owns inventory stock levels and the append-only movement log.
///
/// Every mutation goes through [`apply_movement`](Self::apply_movement):
/// read the current stock, compute the new level, and commit it with a
/// conditional update that only succeeds if nobody else wrote in between.
/// Movements on different items never contend; movements on the same item
/// serialize through the retry loop. The ledger is append-only: there is no
/// code path that updates or deletes a movement row.
#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockLedgerService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Records a single movement in its own transaction and emits ledger
    /// events. Order placement instead calls [`Self::apply_movement`] inside
    /// the order's own transaction.
    #[instrument(skip(self, movement), fields(inventory_item_id = %movement.inventory_item_id, movement_type = %movement.movement_type))]
    pub async fn record_movement(
        &self,
        movement: NewMovement,
    ) -> Result<stock_movement::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for stock movement");
            ServiceError::DatabaseError(e)
        })?;

        let recorded = Self::apply_movement(&txn, &movement).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit stock movement transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            movement_id = %recorded.id,
            previous_stock = %recorded.previous_stock,
            new_stock = %recorded.new_stock,
            "Stock movement recorded"
        );

        self.emit_movement_events(&recorded).await;

        Ok(recorded)
    }

    /// Applies one movement on the given connection (plain connection or an
    /// enclosing transaction).
    ///
    /// Fails with `NotFound` for an unknown inventory item, `ValidationError`
    /// for a non-positive quantity, and `InsufficientStock` when an outbound
    /// movement would drive a tracked item below zero, in which case nothing
    /// is written. Untracked items skip the check entirely and may go
    /// negative; their movements are still recorded so the ledger stays
    /// complete.
    pub async fn apply_movement<C: ConnectionTrait>(
        conn: &C,
        movement: &NewMovement,
    ) -> Result<stock_movement::Model, ServiceError> {
        if movement.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Movement quantity must be positive, got {}",
                movement.quantity
            )));
        }

        for attempt in 0..CAS_RETRY_BUDGET {
            let item = InventoryItemEntity::find_by_id(movement.inventory_item_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Inventory item {} not found",
                        movement.inventory_item_id
                    ))
                })?;

            let previous_stock = item.current_stock;
            let new_stock = if movement.movement_type.is_inbound() {
                previous_stock + movement.quantity
            } else {
                previous_stock - movement.quantity
            };

            if new_stock < Decimal::ZERO && item.track_stock {
                return Err(ServiceError::InsufficientStock {
                    inventory_item_id: item.id,
                    item_name: item.name,
                    unit: item.unit_of_measure,
                    requested: movement.quantity,
                    available: previous_stock,
                });
            }

            // Conditional write: succeeds only if current_stock is still the
            // value we read, which makes per-item mutations linearizable.
            let update = InventoryItemEntity::update_many()
                .col_expr(inventory_item::Column::CurrentStock, Expr::value(new_stock))
                .col_expr(
                    inventory_item::Column::UpdatedAt,
                    Expr::value(Some(Utc::now())),
                )
                .filter(inventory_item::Column::Id.eq(item.id))
                .filter(inventory_item::Column::CurrentStock.eq(previous_stock))
                .exec(conn)
                .await?;

            if update.rows_affected == 0 {
                warn!(
                    inventory_item_id = %item.id,
                    attempt,
                    "Lost stock update race, retrying"
                );
                continue;
            }

            let now = Utc::now();
            let record = stock_movement::ActiveModel {
                id: Set(Uuid::new_v4()),
                inventory_item_id: Set(item.id),
                movement_type: Set(movement.movement_type.to_string()),
                quantity: Set(movement.quantity),
                unit_cost: Set(movement.unit_cost.unwrap_or(item.unit_cost)),
                previous_stock: Set(previous_stock),
                new_stock: Set(new_stock),
                reference_type: Set(movement.reference.as_ref().map(|(t, _)| t.clone())),
                reference_id: Set(movement.reference.as_ref().map(|(_, id)| *id)),
                reason: Set(movement.reason.clone()),
                notes: Set(movement.notes.clone()),
                movement_date: Set(now),
                created_by: Set(movement.actor_id),
                created_at: Set(now),
            };

            return record.insert(conn).await.map_err(ServiceError::from);
        }

        Err(ServiceError::ConcurrentModification(
            movement.inventory_item_id,
        ))
    }

    /// Fetches an inventory item together with its derived stock status.
    #[instrument(skip(self), fields(inventory_item_id = %id))]
    pub async fn get_inventory_item(&self, id: Uuid) -> Result<InventoryItemView, ServiceError> {
        let item = InventoryItemEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Inventory item {} not found", id)))?;

        let stock_status = item.stock_status();
        Ok(InventoryItemView { item, stock_status })
    }

    /// Lists inventory items with derived stock status, paginated.
    #[instrument(skip(self))]
    pub async fn list_inventory_items(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<InventoryItemView>, u64), ServiceError> {
        let paginator = InventoryItemEntity::find()
            .order_by_asc(inventory_item::Column::Name)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;

        let views = items
            .into_iter()
            .map(|item| {
                let stock_status = item.stock_status();
                InventoryItemView { item, stock_status }
            })
            .collect();

        Ok((views, total))
    }

    /// Lists an item's movements newest-first, paginated. Fails with
    /// `NotFound` when the item does not exist so stale clients can tell the
    /// difference from an empty ledger.
    #[instrument(skip(self), fields(inventory_item_id = %inventory_item_id))]
    pub async fn list_movements(
        &self,
        inventory_item_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        InventoryItemEntity::find_by_id(inventory_item_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inventory item {} not found", inventory_item_id))
            })?;

        let paginator = StockMovementEntity::find()
            .filter(stock_movement::Column::InventoryItemId.eq(inventory_item_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .order_by_desc(stock_movement::Column::Id)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let movements = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((movements, total))
    }

    /// Emits ledger events for a committed movement; failures are logged,
    /// never surfaced to the caller.
    pub(crate) async fn emit_movement_events(&self, recorded: &stock_movement::Model) {
        if let Err(e) = self
            .event_sender
            .send(Event::StockMovementRecorded {
                movement_id: recorded.id,
                inventory_item_id: recorded.inventory_item_id,
                movement_type: recorded.movement_type.clone(),
                quantity: recorded.quantity,
                new_stock: recorded.new_stock,
            })
            .await
        {
            warn!(error = %e, movement_id = %recorded.id, "Failed to send stock movement event");
        }

        if let Ok(Some(item)) = InventoryItemEntity::find_by_id(recorded.inventory_item_id)
            .one(&*self.db)
            .await
        {
            if item.track_stock && item.stock_status() != StockStatus::InStock {
                if let Err(e) = self
                    .event_sender
                    .send(Event::LowStock {
                        inventory_item_id: item.id,
                        item_name: item.name.clone(),
                        current_stock: item.current_stock,
                        minimum_stock: item.minimum_stock,
                    })
                    .await
                {
                    warn!(error = %e, inventory_item_id = %item.id, "Failed to send low stock event");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn movement_type_direction() {
        assert!(MovementType::In.is_inbound());
        assert!(MovementType::Adjustment.is_inbound());
        assert!(!MovementType::Out.is_inbound());
        assert!(!MovementType::Waste.is_inbound());
        assert!(!MovementType::Transfer.is_inbound());
    }

    #[test]
    fn movement_type_round_trips_through_strings() {
        use std::str::FromStr;
        assert_eq!(MovementType::Waste.to_string(), "waste");
        assert_eq!(MovementType::from_str("adjustment").unwrap(), MovementType::Adjustment);
        assert!(MovementType::from_str("misplaced").is_err());
    }

    #[test]
    fn stock_status_thresholds() {
        let mut item = inventory_item::Model {
            id: Uuid::new_v4(),
            name: "Potatoes".into(),
            unit_of_measure: "kg".into(),
            unit_cost: dec!(80),
            current_stock: dec!(100),
            minimum_stock: dec!(10),
            maximum_stock: None,
            track_stock: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        assert_eq!(item.stock_status(), StockStatus::InStock);
        item.current_stock = dec!(10);
        assert_eq!(item.stock_status(), StockStatus::LowStock);
        item.current_stock = dec!(0);
        assert_eq!(item.stock_status(), StockStatus::OutOfStock);
    }
}
