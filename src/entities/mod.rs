//! SeaORM entities for the POS core tables.

pub mod inventory_item;
pub mod menu_item;
pub mod menu_item_ingredient;
pub mod order;
pub mod order_item;
pub mod stock_movement;
