pub mod health;
pub mod inventory;
pub mod orders;

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::ServiceError;

pub use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Role of the authenticated caller. Authentication itself happens in front
/// of this service; these headers are trusted as given.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Pharmacist,
    Admin,
}

/// Identity of the caller, taken from `x-user-id` and `x-user-role`.
/// A missing role header means `Customer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Pharmacist | Role::Admin)
    }

    pub fn require_privileged(&self) -> Result<(), ServiceError> {
        if self.is_privileged() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "This action requires a pharmacist or admin".to_string(),
            ))
        }
    }

    /// Ownership filter handed to the engine: customers may only touch their
    /// own orders, staff may touch any.
    pub fn requester_scope(&self) -> Option<Uuid> {
        if self.is_privileged() {
            None
        } else {
            Some(self.user_id)
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthenticated("Missing x-user-id header".to_string()))?;
        let user_id = Uuid::parse_str(raw_id.trim())
            .map_err(|_| ServiceError::Unauthenticated("Malformed x-user-id header".to_string()))?;

        let role = match parts.headers.get(USER_ROLE_HEADER) {
            None => Role::Customer,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| Role::from_str(v.trim()).ok())
                .ok_or_else(|| {
                    ServiceError::Unauthenticated("Unknown x-user-role header".to_string())
                })?,
        };

        Ok(Actor { user_id, role })
    }
}
