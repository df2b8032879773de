//! Actor identity and role based permission checks.
//!
//! Authentication happens upstream; every operation receives an [`Actor`]
//! and asks [`Actor::require`] whether its role carries the permission.

pub mod permissions;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use crate::errors::ServiceError;
pub use permissions::consts;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ActorRole {
    Admin,
    Technician,
    Clerk,
}

lazy_static! {
    pub static ref ROLE_PERMISSIONS: HashMap<ActorRole, Vec<&'static str>> = {
        let mut roles = HashMap::new();

        roles.insert(
            ActorRole::Admin,
            vec!["serviceorders:*", "payments:*", "inventory:*"],
        );

        // Bench staff: intake, diagnosis and repair work
        roles.insert(
            ActorRole::Technician,
            vec![
                consts::SERVICE_ORDERS_READ,
                consts::SERVICE_ORDERS_CREATE,
                consts::SERVICE_ORDERS_UPDATE,
                consts::SERVICE_ORDERS_REPAIR,
            ],
        );

        // Front counter: intake, hand-over and collections
        roles.insert(
            ActorRole::Clerk,
            vec![
                consts::SERVICE_ORDERS_READ,
                consts::SERVICE_ORDERS_CREATE,
                consts::SERVICE_ORDERS_UPDATE,
                consts::SERVICE_ORDERS_DELIVER,
                consts::PAYMENTS_CREATE,
            ],
        );

        roles
    };
}

/// The authenticated caller of an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, ActorRole::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        ROLE_PERMISSIONS
            .get(&self.role)
            .map(|grants| {
                grants
                    .iter()
                    .any(|granted| permissions::grant_covers(granted, permission))
            })
            .unwrap_or(false)
    }

    /// Fails with `Unauthorized` when the role lacks `permission`.
    pub fn require(&self, permission: &str) -> Result<(), ServiceError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            warn!(
                actor_id = %self.id,
                role = %self.role,
                permission,
                "permission denied"
            );
            Err(ServiceError::Unauthorized(format!(
                "{} lacks {}",
                self.role, permission
            )))
        }
    }
}

impl FromStr for Actor {
    type Err = ServiceError;

    /// Parses `"<uuid>:<role>"`, the compact form used by the CLI and tests.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, role) = s
            .split_once(':')
            .ok_or_else(|| ServiceError::ValidationError(format!("malformed actor '{}'", s)))?;
        let id = Uuid::parse_str(id)
            .map_err(|e| ServiceError::ValidationError(format!("invalid actor id: {}", e)))?;
        let role = ActorRole::from_str(role)
            .map_err(|_| ServiceError::ValidationError(format!("unknown role '{}'", role)))?;
        Ok(Actor::new(id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn cancellation_and_inventory_are_admin_only() {
        let id = Uuid::new_v4();
        for role in [ActorRole::Technician, ActorRole::Clerk] {
            let actor = Actor::new(id, role);
            assert_matches!(
                actor.require(consts::SERVICE_ORDERS_CANCEL),
                Err(ServiceError::Unauthorized(_))
            );
            assert!(!actor.has_permission(consts::INVENTORY_MANAGE));
        }
        let admin = Actor::admin(id);
        assert!(admin.require(consts::SERVICE_ORDERS_CANCEL).is_ok());
        assert!(admin.has_permission(consts::INVENTORY_MANAGE));
    }

    #[test]
    fn clerks_collect_payments_technicians_repair() {
        let clerk = Actor::new(Uuid::new_v4(), ActorRole::Clerk);
        let tech = Actor::new(Uuid::new_v4(), ActorRole::Technician);
        assert!(clerk.has_permission(consts::PAYMENTS_CREATE));
        assert!(!clerk.has_permission(consts::SERVICE_ORDERS_REPAIR));
        assert!(tech.has_permission(consts::SERVICE_ORDERS_REPAIR));
        assert!(!tech.has_permission(consts::PAYMENTS_CREATE));
    }

    #[test]
    fn parses_compact_actor_form() {
        let id = Uuid::new_v4();
        let actor: Actor = format!("{}:Technician", id).parse().unwrap();
        assert_eq!(actor, Actor::new(id, ActorRole::Technician));
        assert!("nope".parse::<Actor>().is_err());
        assert!(format!("{}:owner", id).parse::<Actor>().is_err());
    }
}
