//! Explicit capability passing. The acting user's identity and role travel as
//! a plain parameter into the query layer instead of ambient session state;
//! real authentication lives outside this crate.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Cashier,
    Manager,
    Admin,
}

impl Role {
    /// Cashiers only see their own orders; managers and admins see all.
    pub fn sees_all_orders(&self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }
}

/// The authenticated principal performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }
}

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Extracts the acting user from the `X-Actor-Id` / `X-Actor-Role` headers
/// set by the (out-of-scope) authentication front. Both headers are required.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::ValidationError("Missing X-Actor-Id header".to_string())
            })?;
        let id = Uuid::parse_str(id).map_err(|_| {
            ServiceError::ValidationError("X-Actor-Id must be a UUID".to_string())
        })?;

        let role = parts
            .headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::ValidationError("Missing X-Actor-Role header".to_string())
            })?;
        let role = Role::from_str(role).map_err(|_| {
            ServiceError::ValidationError(format!("Unknown actor role '{}'", role))
        })?;

        Ok(Actor::new(id, role))
    }
}
