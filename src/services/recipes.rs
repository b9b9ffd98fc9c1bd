use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::menu_item_ingredient::{self, Entity as MenuItemIngredientEntity},
    errors::ServiceError,
};

/// One resolved ingredient line of a menu item's recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeLine {
    pub inventory_item_id: Uuid,
    pub quantity_per_unit: Decimal,
    pub unit: String,
}

/// Maps a menu item to its bill of materials. Pure lookup, no mutation; the
/// (menu item, ingredient) uniqueness invariant is enforced by the schema so
/// no deduplication happens here.
#[derive(Clone, Default)]
pub struct RecipeResolver;

impl RecipeResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolves a menu item's recipe, ordered by inventory item id so callers
    /// acquire per-item locks in a stable order. A menu item with no recipe
    /// entries resolves to an empty list. That is valid, not an error, and
    /// such items simply skip deduction.
    pub async fn resolve<C: ConnectionTrait>(
        &self,
        conn: &C,
        menu_item_id: Uuid,
    ) -> Result<Vec<RecipeLine>, ServiceError> {
        let entries = MenuItemIngredientEntity::find()
            .filter(menu_item_ingredient::Column::MenuItemId.eq(menu_item_id))
            .order_by_asc(menu_item_ingredient::Column::InventoryItemId)
            .all(conn)
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| RecipeLine {
                inventory_item_id: entry.inventory_item_id,
                quantity_per_unit: entry.quantity_needed,
                unit: entry.unit,
            })
            .collect())
    }
}
