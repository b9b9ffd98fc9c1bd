#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use jikoni_api::{
    auth::{Actor, Role},
    config::AppConfig,
    db,
    entities::{inventory_item, menu_item, menu_item_ingredient},
    events::{self, EventSender},
    AppState,
};

/// Test harness: application state backed by a fresh on-disk SQLite database
/// with a single-connection pool, so concurrent service calls exercise the
/// same serialization the production store provides.
pub struct TestApp {
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir");
        let db_path = db_dir.path().join("jikoni_test.db");
        let cfg = AppConfig::for_tests(format!("sqlite://{}?mode=rwc", db_path.display()));

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("run migrations");

        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let state = AppState::new(Arc::new(pool), cfg, event_sender);

        Self {
            state,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    pub fn cashier(&self) -> Actor {
        Actor::new(Uuid::new_v4(), Role::Cashier)
    }

    pub fn manager(&self) -> Actor {
        Actor::new(Uuid::new_v4(), Role::Manager)
    }

    pub async fn seed_inventory_item(
        &self,
        name: &str,
        unit: &str,
        current_stock: Decimal,
        minimum_stock: Decimal,
        track_stock: bool,
    ) -> inventory_item::Model {
        inventory_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            unit_of_measure: Set(unit.to_string()),
            unit_cost: Set(Decimal::new(100, 0)),
            current_stock: Set(current_stock),
            minimum_stock: Set(minimum_stock),
            maximum_stock: Set(None),
            track_stock: Set(track_stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed inventory item")
    }

    pub async fn seed_menu_item(&self, name: &str, price: Decimal) -> menu_item::Model {
        self.seed_menu_item_with_availability(name, price, true).await
    }

    pub async fn seed_menu_item_with_availability(
        &self,
        name: &str,
        price: Decimal,
        is_available: bool,
    ) -> menu_item::Model {
        menu_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            cost_price: Set(Decimal::ZERO),
            is_available: Set(is_available),
            is_combo: Set(false),
            category: Set("mains".to_string()),
            allergens: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed menu item")
    }

    pub async fn seed_recipe_entry(
        &self,
        menu_item_id: Uuid,
        inventory_item_id: Uuid,
        quantity_needed: Decimal,
        unit: &str,
    ) -> menu_item_ingredient::Model {
        menu_item_ingredient::ActiveModel {
            id: Set(Uuid::new_v4()),
            menu_item_id: Set(menu_item_id),
            inventory_item_id: Set(inventory_item_id),
            quantity_needed: Set(quantity_needed),
            unit: Set(unit.to_string()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed recipe entry")
    }

    pub async fn current_stock(&self, inventory_item_id: Uuid) -> Decimal {
        self.state
            .services
            .stock_ledger
            .get_inventory_item(inventory_item_id)
            .await
            .expect("fetch inventory item")
            .item
            .current_stock
    }
}
