//! In-memory store.
//!
//! Backs tests and single-process embedding without a database. Mirrors the
//! Postgres implementation's semantics: upserts keep one row per key,
//! deletes report whether a row existed, include rows keep insertion order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    MemberOverride, OverrideStore, PrivilegeGrant, PrivilegeInclude, PrivilegeRow, PrivilegeStore,
    RoleOverride,
};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy)]
struct OverrideEntry {
    allow: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory implementation of both store interfaces.
#[derive(Default)]
pub struct MemoryStore {
    member_overrides: DashMap<(Uuid, Uuid, String), OverrideEntry>,
    role_overrides: DashMap<(Uuid, Uuid, String), OverrideEntry>,
    privileges: DashMap<Uuid, PrivilegeRow>,
    grants: DashMap<(Uuid, String), bool>,
    includes: RwLock<Vec<PrivilegeInclude>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a simulated outage.
    ///
    /// Lets tests exercise the persistence-unavailable path.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(StoreError::Database("simulated outage".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl OverrideStore for MemoryStore {
    async fn member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
    ) -> Result<Option<bool>, StoreError> {
        self.check_available()?;
        Ok(self
            .member_overrides
            .get(&(guild_id, user_id, capability.to_owned()))
            .map(|e| e.allow))
    }

    async fn role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
    ) -> Result<Option<bool>, StoreError> {
        self.check_available()?;
        Ok(self
            .role_overrides
            .get(&(guild_id, role_id, capability.to_owned()))
            .map(|e| e.allow))
    }

    async fn role_overrides(
        &self,
        guild_id: Uuid,
        capability: &str,
        role_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>, StoreError> {
        self.check_available()?;
        let mut found = HashMap::new();
        for role_id in role_ids {
            let key = (guild_id, *role_id, capability.to_owned());
            if let Some(entry) = self.role_overrides.get(&key) {
                found.insert(*role_id, entry.allow);
            }
        }
        Ok(found)
    }

    async fn set_member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let now = Utc::now();
        self.member_overrides
            .entry((guild_id, user_id, capability.to_owned()))
            .and_modify(|e| {
                e.allow = allow;
                e.updated_at = now;
            })
            .or_insert(OverrideEntry {
                allow,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn clear_member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .member_overrides
            .remove(&(guild_id, user_id, capability.to_owned()))
            .is_some())
    }

    async fn set_role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let now = Utc::now();
        self.role_overrides
            .entry((guild_id, role_id, capability.to_owned()))
            .and_modify(|e| {
                e.allow = allow;
                e.updated_at = now;
            })
            .or_insert(OverrideEntry {
                allow,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn clear_role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .role_overrides
            .remove(&(guild_id, role_id, capability.to_owned()))
            .is_some())
    }

    async fn list_member_overrides(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<MemberOverride>, StoreError> {
        self.check_available()?;
        let mut records: Vec<MemberOverride> = self
            .member_overrides
            .iter()
            .filter(|entry| entry.key().0 == guild_id && entry.key().1 == user_id)
            .map(|entry| MemberOverride {
                guild_id,
                user_id,
                capability: entry.key().2.clone(),
                allow: entry.allow,
                created_at: entry.created_at,
                updated_at: entry.updated_at,
            })
            .collect();
        records.sort_by(|a, b| a.capability.cmp(&b.capability));
        Ok(records)
    }

    async fn list_role_overrides(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
    ) -> Result<Vec<RoleOverride>, StoreError> {
        self.check_available()?;
        let mut records: Vec<RoleOverride> = self
            .role_overrides
            .iter()
            .filter(|entry| entry.key().0 == guild_id && entry.key().1 == role_id)
            .map(|entry| RoleOverride {
                guild_id,
                role_id,
                capability: entry.key().2.clone(),
                allow: entry.allow,
                created_at: entry.created_at,
                updated_at: entry.updated_at,
            })
            .collect();
        records.sort_by(|a, b| a.capability.cmp(&b.capability));
        Ok(records)
    }
}

#[async_trait]
impl PrivilegeStore for MemoryStore {
    async fn list_privileges(&self, guild_id: Uuid) -> Result<Vec<PrivilegeRow>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<PrivilegeRow> = self
            .privileges
            .iter()
            .filter(|entry| entry.guild_id == guild_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn find_privilege(
        &self,
        guild_id: Uuid,
        name: &str,
    ) -> Result<Option<PrivilegeRow>, StoreError> {
        self.check_available()?;
        Ok(self
            .privileges
            .iter()
            .find(|entry| entry.guild_id == guild_id && entry.name == name)
            .map(|entry| entry.value().clone()))
    }

    async fn insert_privilege(
        &self,
        guild_id: Uuid,
        name: &str,
        description: &str,
        everyone: bool,
    ) -> Result<PrivilegeRow, StoreError> {
        self.check_available()?;
        if self.find_privilege(guild_id, name).await?.is_some() {
            return Err(StoreError::Database(format!(
                "unique constraint violation: privilege `{name}`"
            )));
        }

        let now = Utc::now();
        let row = PrivilegeRow {
            id: Uuid::new_v4(),
            guild_id,
            name: name.to_owned(),
            description: description.to_owned(),
            everyone,
            created_at: now,
            updated_at: now,
        };
        self.privileges.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_privilege(
        &self,
        privilege_id: Uuid,
        description: &str,
        everyone: bool,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(mut row) = self.privileges.get_mut(&privilege_id) {
            row.description = description.to_owned();
            row.everyone = everyone;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_privilege(&self, privilege_id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        let removed = self.privileges.remove(&privilege_id).is_some();
        self.grants.retain(|key, _| key.0 != privilege_id);
        self.includes
            .write()
            .retain(|row| row.privilege_id != privilege_id);
        Ok(removed)
    }

    async fn list_grants(&self, privilege_id: Uuid) -> Result<Vec<PrivilegeGrant>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<PrivilegeGrant> = self
            .grants
            .iter()
            .filter(|entry| entry.key().0 == privilege_id)
            .map(|entry| PrivilegeGrant {
                privilege_id,
                capability: entry.key().1.clone(),
                allow: *entry.value(),
            })
            .collect();
        rows.sort_by(|a, b| a.capability.cmp(&b.capability));
        Ok(rows)
    }

    async fn upsert_grant(
        &self,
        privilege_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.grants
            .insert((privilege_id, capability.to_owned()), allow);
        Ok(())
    }

    async fn delete_grant(
        &self,
        privilege_id: Uuid,
        capability: &str,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .grants
            .remove(&(privilege_id, capability.to_owned()))
            .is_some())
    }

    async fn list_includes(
        &self,
        privilege_id: Uuid,
    ) -> Result<Vec<PrivilegeInclude>, StoreError> {
        self.check_available()?;
        Ok(self
            .includes
            .read()
            .iter()
            .filter(|row| row.privilege_id == privilege_id)
            .cloned()
            .collect())
    }

    async fn insert_include(&self, privilege_id: Uuid, includes: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut rows = self.includes.write();
        let exists = rows
            .iter()
            .any(|row| row.privilege_id == privilege_id && row.includes == includes);
        if !exists {
            rows.push(PrivilegeInclude {
                privilege_id,
                includes: includes.to_owned(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn delete_include(
        &self,
        privilege_id: Uuid,
        includes: &str,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut rows = self.includes.write();
        let before = rows.len();
        rows.retain(|row| !(row.privilege_id == privilege_id && row.includes == includes));
        Ok(rows.len() != before)
    }
}
