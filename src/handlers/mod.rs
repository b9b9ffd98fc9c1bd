pub mod inventory;
pub mod orders;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<crate::services::orders::OrderService>,
    pub order_status: Arc<crate::services::order_status::OrderStatusService>,
    pub stock_ledger: Arc<crate::services::stock_ledger::StockLedgerService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        let stock_ledger = crate::services::stock_ledger::StockLedgerService::new(
            db_pool.clone(),
            event_sender.clone(),
        );
        let orders = crate::services::orders::OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            stock_ledger.clone(),
        );
        let order_status =
            crate::services::order_status::OrderStatusService::new(db_pool, event_sender);

        Self {
            orders: Arc::new(orders),
            order_status: Arc::new(order_status),
            stock_ledger: Arc::new(stock_ledger),
        }
    }
}
