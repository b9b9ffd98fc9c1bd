use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::Actor,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderStatus, PaymentStatus,
    },
    entities::stock_movement::{self, Entity as StockMovementEntity, MovementType},
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock_ledger::{
        NewMovement, StockLedgerService, REASON_AUTOMATIC_DEDUCTION, REASON_CANCELLATION_REVERSAL,
        REFERENCE_TYPE_ORDER,
    },
};

/// Governs the order lifecycle:
/// pending → confirmed → preparing → ready → completed, with cancelled
/// reachable from any non-terminal state. Completed and cancelled are
/// terminal. Each transition's side effects (timestamps, kitchen
/// notification, deduction reversal on cancel) happen inside the same
/// transaction as the status write.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Whether `from → to` is a legal transition. Same-status calls are
    /// handled as no-ops before this check.
    pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (from, to) {
            (Pending, Confirmed)
            | (Confirmed, Preparing)
            | (Preparing, Ready)
            | (Ready, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Moves an order to `new_status` with validation.
    ///
    /// Calling with the order's current status is a no-op: the order is
    /// returned unchanged, no timestamps are re-stamped and no movements are
    /// written. Entering `cancelled` records the cancellation reason and
    /// reverses the order's automatic deductions with compensating `in`
    /// movements referencing the order; a paid order is marked refunded.
    #[instrument(skip(self, actor, notes), fields(order_id = %order_id, new_status = %new_status, actor_id = %actor.id))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: Actor,
        notes: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction for status update");
            ServiceError::DatabaseError(e)
        })?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let current: OrderStatus = order.status.parse().map_err(|_| {
            ServiceError::InternalError(format!(
                "Order {} has unrecognized status '{}'",
                order_id, order.status
            ))
        })?;

        if current == new_status {
            info!(status = %current, "Status unchanged; no-op");
            return Ok(order);
        }

        if !Self::is_valid_transition(current, new_status) {
            return Err(ServiceError::InvalidTransition {
                from: current.to_string(),
                to: new_status.to_string(),
            });
        }

        let now = Utc::now();
        let payment_status: PaymentStatus = order.payment_status.parse().map_err(|_| {
            ServiceError::InternalError(format!(
                "Order {} has unrecognized payment status '{}'",
                order_id, order.payment_status
            ))
        })?;

        let mut reversed_movements = Vec::new();
        if new_status == OrderStatus::Cancelled {
            reversed_movements = self.reverse_deductions(&txn, &order, actor).await?;
        }

        let mut active: OrderActiveModel = order.into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Some(now));
        active.updated_by = Set(Some(actor.id));

        match new_status {
            OrderStatus::Confirmed => {
                active.confirmed_at = Set(Some(now));
            }
            OrderStatus::Ready => {
                active.ready_at = Set(Some(now));
            }
            OrderStatus::Completed => {
                active.completed_at = Set(Some(now));
            }
            OrderStatus::Cancelled => {
                active.cancellation_reason = Set(notes.clone());
                if payment_status == PaymentStatus::Paid {
                    active.payment_status = Set(PaymentStatus::Refunded.to_string());
                }
            }
            _ => {}
        }

        if let Some(notes) = notes.clone() {
            active.notes = Set(Some(notes));
        }

        // Conditional write: only lands if the status is still the one this
        // transition was validated against. A concurrent writer that got in
        // first (say a cancel racing a confirm) leaves zero rows matched and
        // the caller must re-read and retry.
        let updated = OrderEntity::update(active)
            .filter(order::Column::Status.eq(current.to_string()))
            .exec(&txn)
            .await
            .map_err(|e| match e {
                DbErr::RecordNotUpdated => {
                    warn!(order_id = %order_id, "Order status changed concurrently");
                    ServiceError::ConcurrentModification(order_id)
                }
                e => {
                    error!(error = %e, order_id = %order_id, "Failed to update order status");
                    ServiceError::DatabaseError(e)
                }
            })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit status update");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order_id,
            old_status = %current,
            new_status = %new_status,
            reversed = reversed_movements.len(),
            "Order status updated"
        );

        self.emit_transition_events(&updated, current, new_status, notes)
            .await;

        Ok(updated)
    }

    /// Compensates every automatic deduction of this order with an `in`
    /// movement of the same magnitude, inside the caller's transaction. The
    /// original movements stay untouched; the ledger only ever grows.
    async fn reverse_deductions(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        order: &OrderModel,
        actor: Actor,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        // Ascending item-id order, matching the apply order used by
        // placement, so overlapping batches never deadlock.
        let deductions = StockMovementEntity::find()
            .filter(stock_movement::Column::ReferenceType.eq(REFERENCE_TYPE_ORDER))
            .filter(stock_movement::Column::ReferenceId.eq(order.id))
            .filter(stock_movement::Column::Reason.eq(REASON_AUTOMATIC_DEDUCTION))
            .order_by_asc(stock_movement::Column::InventoryItemId)
            .all(txn)
            .await?;

        let mut reversals = Vec::with_capacity(deductions.len());
        for deduction in deductions {
            let reversal = StockLedgerService::apply_movement(
                txn,
                &NewMovement {
                    inventory_item_id: deduction.inventory_item_id,
                    movement_type: MovementType::In,
                    quantity: deduction.quantity,
                    unit_cost: Some(deduction.unit_cost),
                    reason: REASON_CANCELLATION_REVERSAL.to_string(),
                    notes: Some(format!("Reversal for cancelled order {}", order.order_number)),
                    reference: Some((REFERENCE_TYPE_ORDER.to_string(), order.id)),
                    actor_id: actor.id,
                },
            )
            .await?;
            reversals.push(reversal);
        }
        Ok(reversals)
    }

    async fn emit_transition_events(
        &self,
        order: &OrderModel,
        old_status: OrderStatus,
        new_status: OrderStatus,
        notes: Option<String>,
    ) {
        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await
        {
            warn!(error = %e, order_id = %order.id, "Failed to send status change event");
        }

        match new_status {
            OrderStatus::Confirmed => {
                if let Err(e) = self
                    .event_sender
                    .send(Event::OrderConfirmed {
                        order_id: order.id,
                        order_number: order.order_number.clone(),
                    })
                    .await
                {
                    warn!(error = %e, order_id = %order.id, "Failed to send kitchen notification event");
                }
            }
            OrderStatus::Cancelled => {
                if let Err(e) = self
                    .event_sender
                    .send(Event::OrderCancelled {
                        order_id: order.id,
                        reason: notes,
                    })
                    .await
                {
                    warn!(error = %e, order_id = %order.id, "Failed to send cancellation event");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use OrderStatus::*;

    #[test_case(Pending, Confirmed => true)]
    #[test_case(Confirmed, Preparing => true)]
    #[test_case(Preparing, Ready => true)]
    #[test_case(Ready, Completed => true)]
    #[test_case(Pending, Cancelled => true)]
    #[test_case(Confirmed, Cancelled => true)]
    #[test_case(Preparing, Cancelled => true)]
    #[test_case(Ready, Cancelled => true)]
    #[test_case(Completed, Cancelled => false; "completed is terminal")]
    #[test_case(Cancelled, Cancelled => false; "cancelled is terminal")]
    #[test_case(Completed, Pending => false)]
    #[test_case(Pending, Preparing => false; "no skipping confirmation")]
    #[test_case(Ready, Preparing => false; "no going backwards")]
    fn transition_table(from: OrderStatus, to: OrderStatus) -> bool {
        OrderStatusService::is_valid_transition(from, to)
    }
}
