use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Enumerated allergen tags. Stored in the database as a JSON array of the
/// snake_case names and validated into a typed set at the boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Allergen {
    Gluten,
    Dairy,
    Eggs,
    Fish,
    Shellfish,
    Peanuts,
    TreeNuts,
    Soy,
    Sesame,
}

/// A sellable catalog item. The catalog itself is maintained elsewhere; the
/// order core only reads it. Price is snapshotted onto order lines at order
/// time and never re-read afterwards.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "menu_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub cost_price: Decimal,
    pub is_available: bool,
    pub is_combo: bool,
    pub category: String,
    /// JSON array of allergen tag names, e.g. `["gluten","dairy"]`.
    pub allergens: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// Parses the stored allergen array into typed tags, rejecting unknown
    /// names instead of passing them through as opaque strings.
    pub fn allergen_tags(&self) -> Result<BTreeSet<Allergen>, String> {
        let Some(raw) = &self.allergens else {
            return Ok(BTreeSet::new());
        };
        let names: Vec<String> = serde_json::from_value(raw.clone())
            .map_err(|e| format!("allergens column is not a JSON string array: {e}"))?;
        names
            .iter()
            .map(|name| {
                Allergen::from_str(name).map_err(|_| format!("unknown allergen tag '{name}'"))
            })
            .collect()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::menu_item_ingredient::Entity")]
    Ingredients,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::menu_item_ingredient::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ingredients.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }
        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(now));
        }
        Ok(active_model)
    }
}
