//! Order placement: totals from price snapshots, recipe-driven deduction,
//! and the all-or-nothing guarantee.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use jikoni_api::{
    entities::order::{Entity as OrderEntity, OrderType, PaymentMethod},
    entities::stock_movement::{self, Entity as StockMovementEntity},
    errors::ServiceError,
    services::orders::{PlaceOrderItemRequest, PlaceOrderRequest},
};

fn takeaway_order(items: Vec<PlaceOrderItemRequest>) -> PlaceOrderRequest {
    PlaceOrderRequest {
        order_type: OrderType::Takeaway,
        customer_name: Some("Wanjiku".to_string()),
        customer_phone: None,
        table_number: None,
        delivery_address: None,
        payment_method: PaymentMethod::Cash,
        tax_amount: None,
        discount_amount: None,
        items,
    }
}

fn line(menu_item_id: Uuid, quantity: i32) -> PlaceOrderItemRequest {
    PlaceOrderItemRequest {
        menu_item_id,
        quantity,
        special_instructions: None,
    }
}

#[tokio::test]
async fn placing_an_order_deducts_recipe_stock_with_snapshots() {
    let app = TestApp::new().await;

    // Chips Plain: 0.5kg potatoes, 0.1l oil, 0.01kg salt per plate
    let potatoes = app
        .seed_inventory_item("Potatoes", "kg", dec!(100), dec!(10), true)
        .await;
    let oil = app
        .seed_inventory_item("Cooking Oil", "l", dec!(20), dec!(2), true)
        .await;
    let salt = app
        .seed_inventory_item("Salt", "kg", dec!(5), dec!(1), true)
        .await;
    let chips = app.seed_menu_item("Chips Plain", dec!(150.00)).await;
    app.seed_recipe_entry(chips.id, potatoes.id, dec!(0.5), "kg").await;
    app.seed_recipe_entry(chips.id, oil.id, dec!(0.1), "l").await;
    app.seed_recipe_entry(chips.id, salt.id, dec!(0.01), "kg").await;

    let placed = app
        .state
        .services
        .orders
        .place_order(app.cashier(), takeaway_order(vec![line(chips.id, 3)]))
        .await
        .expect("order should be placed");

    assert_eq!(placed.order.subtotal, dec!(450.00));
    assert_eq!(placed.order.total_amount, dec!(450.00));
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].unit_price, dec!(150.00));

    assert_eq!(app.current_stock(potatoes.id).await, dec!(98.5));
    assert_eq!(app.current_stock(oil.id).await, dec!(19.7));
    assert_eq!(app.current_stock(salt.id).await, dec!(4.97));

    // One movement per (order, inventory item) pair, with write-time snapshots
    let movements = StockMovementEntity::find()
        .filter(stock_movement::Column::ReferenceId.eq(placed.order.id))
        .all(&*app.state.db)
        .await
        .expect("fetch movements");
    assert_eq!(movements.len(), 3);

    let potato_movement = movements
        .iter()
        .find(|m| m.inventory_item_id == potatoes.id)
        .expect("potato movement");
    assert_eq!(potato_movement.movement_type, "out");
    assert_eq!(potato_movement.quantity, dec!(1.5));
    assert_eq!(potato_movement.previous_stock, dec!(100));
    assert_eq!(potato_movement.new_stock, dec!(98.5));
    assert_eq!(potato_movement.reason, "automatic_deduction");
    assert_eq!(potato_movement.reference_type.as_deref(), Some("order"));
}

#[tokio::test]
async fn totals_are_sum_of_line_totals() {
    let app = TestApp::new().await;
    let pilau = app.seed_menu_item("Pilau", dec!(150.00)).await;
    let soda = app.seed_menu_item("Soda", dec!(80.00)).await;

    let placed = app
        .state
        .services
        .orders
        .place_order(
            app.cashier(),
            takeaway_order(vec![line(pilau.id, 2), line(soda.id, 1)]),
        )
        .await
        .expect("order should be placed");

    assert_eq!(placed.order.subtotal, dec!(380.00));
    assert_eq!(placed.order.tax_amount, dec!(0));
    assert_eq!(placed.order.discount_amount, dec!(0));
    assert_eq!(placed.order.total_amount, dec!(380.00));
}

#[tokio::test]
async fn discount_and_tax_are_applied_to_the_total() {
    let app = TestApp::new().await;
    let pilau = app.seed_menu_item("Pilau", dec!(150.00)).await;

    let mut request = takeaway_order(vec![line(pilau.id, 2)]);
    request.tax_amount = Some(dec!(48.00));
    request.discount_amount = Some(dec!(30.00));

    let placed = app
        .state
        .services
        .orders
        .place_order(app.cashier(), request)
        .await
        .expect("order should be placed");

    assert_eq!(placed.order.subtotal, dec!(300.00));
    assert_eq!(placed.order.total_amount, dec!(318.00));
}

#[tokio::test]
async fn insufficient_stock_rolls_back_the_entire_order() {
    let app = TestApp::new().await;

    let potatoes = app
        .seed_inventory_item("Potatoes", "kg", dec!(100), dec!(10), true)
        .await;
    let oil = app
        .seed_inventory_item("Cooking Oil", "l", dec!(0.02), dec!(2), true)
        .await;
    let chips = app.seed_menu_item("Chips Plain", dec!(150.00)).await;
    app.seed_recipe_entry(chips.id, potatoes.id, dec!(0.5), "kg").await;
    app.seed_recipe_entry(chips.id, oil.id, dec!(0.1), "l").await;

    let result = app
        .state
        .services
        .orders
        .place_order(app.cashier(), takeaway_order(vec![line(chips.id, 1)]))
        .await;

    let err = result.expect_err("placement must fail");
    assert_matches!(
        err,
        ServiceError::InsufficientStock { ref item_name, requested, available, .. } => {
            assert_eq!(item_name, "Cooking Oil");
            assert_eq!(requested, dec!(0.1));
            assert_eq!(available, dec!(0.02));
        }
    );

    // Nothing committed: no order row, and potato stock untouched even though
    // its deduction sorts before the failing one.
    let orders = OrderEntity::find()
        .count(&*app.state.db)
        .await
        .expect("count orders");
    assert_eq!(orders, 0);
    assert_eq!(app.current_stock(potatoes.id).await, dec!(100));
    assert_eq!(app.current_stock(oil.id).await, dec!(0.02));

    let movements = StockMovementEntity::find()
        .count(&*app.state.db)
        .await
        .expect("count movements");
    assert_eq!(movements, 0);
}

#[tokio::test]
async fn shared_ingredients_are_aggregated_into_one_movement() {
    let app = TestApp::new().await;

    let oil = app
        .seed_inventory_item("Cooking Oil", "l", dec!(10), dec!(1), true)
        .await;
    let chips = app.seed_menu_item("Chips Plain", dec!(150.00)).await;
    let bhajia = app.seed_menu_item("Bhajia", dec!(120.00)).await;
    app.seed_recipe_entry(chips.id, oil.id, dec!(0.1), "l").await;
    app.seed_recipe_entry(bhajia.id, oil.id, dec!(0.15), "l").await;

    let placed = app
        .state
        .services
        .orders
        .place_order(
            app.cashier(),
            takeaway_order(vec![line(chips.id, 2), line(bhajia.id, 2)]),
        )
        .await
        .expect("order should be placed");

    // 2×0.1 + 2×0.15 = 0.5, in a single aggregated movement
    let movements = StockMovementEntity::find()
        .filter(stock_movement::Column::ReferenceId.eq(placed.order.id))
        .all(&*app.state.db)
        .await
        .expect("fetch movements");
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].quantity, dec!(0.5));
    assert_eq!(app.current_stock(oil.id).await, dec!(9.5));
}

#[tokio::test]
async fn items_without_recipes_skip_deduction() {
    let app = TestApp::new().await;
    let soda = app.seed_menu_item("Soda", dec!(80.00)).await;

    let placed = app
        .state
        .services
        .orders
        .place_order(app.cashier(), takeaway_order(vec![line(soda.id, 2)]))
        .await
        .expect("order should be placed");

    assert_eq!(placed.order.total_amount, dec!(160.00));
    let movements = StockMovementEntity::find()
        .count(&*app.state.db)
        .await
        .expect("count movements");
    assert_eq!(movements, 0);
}

#[tokio::test]
async fn untracked_items_may_go_negative() {
    let app = TestApp::new().await;

    let garnish = app
        .seed_inventory_item("Parsley", "kg", dec!(0.05), dec!(0), false)
        .await;
    let fish = app.seed_menu_item("Fish Fillet", dec!(350.00)).await;
    app.seed_recipe_entry(fish.id, garnish.id, dec!(0.1), "kg").await;

    app.state
        .services
        .orders
        .place_order(app.cashier(), takeaway_order(vec![line(fish.id, 1)]))
        .await
        .expect("untracked stock must not block placement");

    assert_eq!(app.current_stock(garnish.id).await, dec!(-0.05));
}

#[tokio::test]
async fn unknown_menu_item_is_a_not_found_error() {
    let app = TestApp::new().await;
    let result = app
        .state
        .services
        .orders
        .place_order(app.cashier(), takeaway_order(vec![line(Uuid::new_v4(), 1)]))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn unavailable_menu_item_is_rejected() {
    let app = TestApp::new().await;
    let off_menu = app
        .seed_menu_item_with_availability("Seasonal Special", dec!(500.00), false)
        .await;
    let result = app
        .state
        .services
        .orders
        .place_order(app.cashier(), takeaway_order(vec![line(off_menu.id, 1)]))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn empty_cart_is_rejected_before_persistence() {
    let app = TestApp::new().await;
    let result = app
        .state
        .services
        .orders
        .place_order(app.cashier(), takeaway_order(vec![]))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn concurrent_orders_for_the_last_stock_admit_exactly_one() {
    let app = TestApp::new().await;

    let fish = app
        .seed_inventory_item("Tilapia", "kg", dec!(1.0), dec!(0.5), true)
        .await;
    let fillet = app.seed_menu_item("Fish Fillet", dec!(350.00)).await;
    app.seed_recipe_entry(fillet.id, fish.id, dec!(0.6), "kg").await;

    let service = app.state.services.orders.clone();
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let service = service.clone();
        let actor = app.cashier();
        let request = takeaway_order(vec![line(fillet.id, 1)]);
        tasks.push(tokio::spawn(async move {
            service.place_order(actor, request).await
        }));
    }

    let mut successes = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.expect("task join") {
            Ok(_) => successes += 1,
            Err(ServiceError::InsufficientStock { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1, "exactly one order may claim the last stock");
    assert_eq!(insufficient, 1);
    assert_eq!(app.current_stock(fish.id).await, dec!(0.4));
}

#[tokio::test]
async fn order_numbers_are_unique_under_concurrent_creation() {
    let app = TestApp::new().await;
    let soda = app.seed_menu_item("Soda", dec!(80.00)).await;

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let service = app.state.services.orders.clone();
        let actor = app.cashier();
        let request = takeaway_order(vec![line(soda.id, 1)]);
        tasks.push(tokio::spawn(async move {
            service.place_order(actor, request).await
        }));
    }

    let mut numbers = std::collections::HashSet::new();
    for task in tasks {
        let placed = task.await.expect("task join").expect("placement");
        assert!(
            numbers.insert(placed.order.order_number.clone()),
            "duplicate order number {}",
            placed.order.order_number
        );
    }
    assert_eq!(numbers.len(), 5);
}
