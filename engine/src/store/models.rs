//! Persisted record types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Explicit decision for one (capability, member) pair.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MemberOverride {
    pub guild_id: Uuid,
    pub user_id: Uuid,
    pub capability: String,
    pub allow: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Explicit decision for one (capability, role) pair.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RoleOverride {
    pub guild_id: Uuid,
    pub role_id: Uuid,
    pub capability: String,
    pub allow: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Guild-scoped privilege definition row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PrivilegeRow {
    pub id: Uuid,
    pub guild_id: Uuid,
    pub name: String,
    pub description: String,
    pub everyone: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One granted or denied capability of a guild-scoped privilege.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PrivilegeGrant {
    pub privilege_id: Uuid,
    pub capability: String,
    pub allow: bool,
}

/// One included-privilege reference of a guild-scoped privilege.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PrivilegeInclude {
    pub privilege_id: Uuid,
    pub includes: String,
    pub created_at: DateTime<Utc>,
}
