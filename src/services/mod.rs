//! Business services for the order/inventory core.
//!
//! `orders` owns the order aggregate and placement orchestration,
//! `order_status` the lifecycle state machine, `stock_ledger` the inventory
//! levels and movement log, and `recipes` the menu-item-to-ingredients
//! resolution.

pub mod order_status;
pub mod orders;
pub mod recipes;
pub mod stock_ledger;
