//! Persistence boundary.
//!
//! Repository-style interfaces per record kind, a Postgres-backed
//! implementation, and an in-memory implementation for tests and
//! single-process embedding.

mod memory;
mod models;
mod postgres;

pub use memory::MemoryStore;
pub use models::{
    MemberOverride, PrivilegeGrant, PrivilegeInclude, PrivilegeRow, RoleOverride,
};
pub use postgres::PgStore;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;

/// Explicit allow/deny records per (capability, actor) pair.
///
/// Absence of a record means "no explicit decision", never "deny"; only
/// infrastructure failures surface as [`StoreError`].
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Member-specific record for one capability.
    async fn member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
    ) -> Result<Option<bool>, StoreError>;

    /// Role-specific record for one capability.
    async fn role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
    ) -> Result<Option<bool>, StoreError>;

    /// Records for any of `role_ids` on one capability, keyed by role id.
    async fn role_overrides(
        &self,
        guild_id: Uuid,
        capability: &str,
        role_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>, StoreError>;

    /// Create or update a member record.
    async fn set_member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError>;

    /// Remove a member record. Returns `true` if one existed.
    async fn clear_member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
    ) -> Result<bool, StoreError>;

    /// Create or update a role record.
    async fn set_role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError>;

    /// Remove a role record. Returns `true` if one existed.
    async fn clear_role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
    ) -> Result<bool, StoreError>;

    /// All records for one member, for the admin listing surface.
    async fn list_member_overrides(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<MemberOverride>, StoreError>;

    /// All records for one role, for the admin listing surface.
    async fn list_role_overrides(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
    ) -> Result<Vec<RoleOverride>, StoreError>;
}

/// Persisted guild-scoped privilege definitions: one definition row per
/// privilege, one row per grant, one row per include reference.
#[async_trait]
pub trait PrivilegeStore: Send + Sync {
    async fn list_privileges(&self, guild_id: Uuid) -> Result<Vec<PrivilegeRow>, StoreError>;

    async fn find_privilege(
        &self,
        guild_id: Uuid,
        name: &str,
    ) -> Result<Option<PrivilegeRow>, StoreError>;

    async fn insert_privilege(
        &self,
        guild_id: Uuid,
        name: &str,
        description: &str,
        everyone: bool,
    ) -> Result<PrivilegeRow, StoreError>;

    /// Update definition metadata (description, everyone flag).
    async fn update_privilege(
        &self,
        privilege_id: Uuid,
        description: &str,
        everyone: bool,
    ) -> Result<(), StoreError>;

    /// Delete a definition and its grant/include rows. Returns `true` if a
    /// definition existed.
    async fn delete_privilege(&self, privilege_id: Uuid) -> Result<bool, StoreError>;

    async fn list_grants(&self, privilege_id: Uuid) -> Result<Vec<PrivilegeGrant>, StoreError>;

    /// Create or update a grant row; at most one row per capability.
    async fn upsert_grant(
        &self,
        privilege_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError>;

    /// Remove a grant row. Returns `true` if one existed.
    async fn delete_grant(&self, privilege_id: Uuid, capability: &str)
        -> Result<bool, StoreError>;

    /// Include rows in insertion order.
    async fn list_includes(&self, privilege_id: Uuid)
        -> Result<Vec<PrivilegeInclude>, StoreError>;

    async fn insert_include(&self, privilege_id: Uuid, includes: &str) -> Result<(), StoreError>;

    /// Remove an include row. Returns `true` if one existed.
    async fn delete_include(
        &self,
        privilege_id: Uuid,
        includes: &str,
    ) -> Result<bool, StoreError>;
}
