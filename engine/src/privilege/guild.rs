//! Guild-scoped, persisted privileges.
//!
//! A guild privilege is an editable copy of the privilege concept owned by
//! one guild. Every mutation writes through to the privilege store before
//! the in-memory state reflects it, so a failed write never leaves memory
//! ahead of storage.

use uuid::Uuid;

use super::Privilege;
use crate::error::StoreError;
use crate::store::{PrivilegeGrant, PrivilegeInclude, PrivilegeRow, PrivilegeStore};

/// A persisted privilege owned by one guild.
#[derive(Debug, Clone)]
pub struct GuildPrivilege {
    id: Uuid,
    guild_id: Uuid,
    inner: Privilege,
}

impl GuildPrivilege {
    /// Assemble from persisted rows.
    ///
    /// Row contents are taken as-is; reference validation happens at the
    /// registry layer, which sees the whole guild's definitions at once.
    pub(crate) fn from_parts(
        row: &PrivilegeRow,
        grants: &[PrivilegeGrant],
        includes: &[PrivilegeInclude],
    ) -> Self {
        let mut inner = Privilege::new(&row.name, &row.description);
        inner.set_everyone(row.everyone);
        for grant in grants {
            inner.grant(&grant.capability, grant.allow);
        }
        for include in includes {
            inner.include(&include.includes);
        }

        Self {
            id: row.id,
            guild_id: row.guild_id,
            inner,
        }
    }

    /// Wrap a freshly inserted definition row with no grant rows yet.
    pub(crate) fn from_row(row: &PrivilegeRow) -> Self {
        Self::from_parts(row, &[], &[])
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn guild_id(&self) -> Uuid {
        self.guild_id
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The in-memory privilege state.
    pub const fn privilege(&self) -> &Privilege {
        &self.inner
    }

    /// Owned copy of the in-memory privilege state.
    pub fn snapshot(&self) -> Privilege {
        self.inner.clone()
    }

    /// Record an allow/deny decision, persisting before updating memory.
    pub async fn grant(
        &mut self,
        store: &dyn PrivilegeStore,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError> {
        store.upsert_grant(self.id, capability, allow).await?;
        self.inner.grant(capability, allow);
        Ok(())
    }

    /// Record an explicit deny, persisting before updating memory.
    pub async fn deny(
        &mut self,
        store: &dyn PrivilegeStore,
        capability: &str,
    ) -> Result<(), StoreError> {
        self.grant(store, capability, false).await
    }

    /// Remove the entry for a capability. Returns `true` if one existed.
    pub async fn revoke(
        &mut self,
        store: &dyn PrivilegeStore,
        capability: &str,
    ) -> Result<bool, StoreError> {
        let removed = store.delete_grant(self.id, capability).await?;
        self.inner.revoke(capability);
        Ok(removed)
    }

    /// Add an included privilege. Returns `true` if newly added.
    pub async fn include(
        &mut self,
        store: &dyn PrivilegeStore,
        name: &str,
    ) -> Result<bool, StoreError> {
        if name == self.name() || self.inner.includes().iter().any(|n| n == name) {
            return Ok(false);
        }
        store.insert_include(self.id, name).await?;
        Ok(self.inner.include(name))
    }

    /// Remove an included privilege. Returns `true` if a reference existed.
    pub async fn exclude(
        &mut self,
        store: &dyn PrivilegeStore,
        name: &str,
    ) -> Result<bool, StoreError> {
        let removed = store.delete_include(self.id, name).await?;
        self.inner.exclude(name);
        Ok(removed)
    }

    /// Update the description, persisting before updating memory.
    pub async fn set_description(
        &mut self,
        store: &dyn PrivilegeStore,
        text: &str,
    ) -> Result<(), StoreError> {
        store
            .update_privilege(self.id, text, self.inner.is_everyone())
            .await?;
        self.inner.set_description(text);
        Ok(())
    }

    /// Reconcile an edited definition against the stored rows.
    ///
    /// Three-way diff, not a blind rewrite: rows for grants and includes no
    /// longer present are deleted, new ones are inserted, changed allow/deny
    /// values are updated, and metadata is rewritten only when it changed.
    /// `target` must already be validated for this guild's scope.
    pub async fn reconcile(
        &mut self,
        store: &dyn PrivilegeStore,
        target: &Privilege,
    ) -> Result<(), StoreError> {
        for (capability, allow) in target.grants() {
            if self.inner.grants().get(capability) != Some(allow) {
                store.upsert_grant(self.id, capability, *allow).await?;
            }
        }

        let stale_grants: Vec<String> = self
            .inner
            .grants()
            .keys()
            .filter(|capability| !target.grants().contains_key(*capability))
            .cloned()
            .collect();
        for capability in &stale_grants {
            store.delete_grant(self.id, capability).await?;
        }

        for name in target.includes() {
            if !self.inner.includes().contains(name) {
                store.insert_include(self.id, name).await?;
            }
        }

        let stale_includes: Vec<String> = self
            .inner
            .includes()
            .iter()
            .filter(|name| !target.includes().contains(name))
            .cloned()
            .collect();
        for name in &stale_includes {
            store.delete_include(self.id, name).await?;
        }

        if self.inner.description() != target.description()
            || self.inner.is_everyone() != target.is_everyone()
        {
            store
                .update_privilege(self.id, target.description(), target.is_everyone())
                .await?;
        }

        self.inner = target.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn fresh(store: &MemoryStore) -> GuildPrivilege {
        let row = store
            .insert_privilege(Uuid::new_v4(), "dj", "Music controls", false)
            .await
            .unwrap();
        GuildPrivilege::from_row(&row)
    }

    #[tokio::test]
    async fn test_grant_writes_through() {
        let store = MemoryStore::new();
        let mut privilege = fresh(&store).await;

        privilege.grant(&store, "music.play", true).await.unwrap();
        privilege.grant(&store, "music.play", true).await.unwrap();

        // Exactly one persisted row and one in-memory entry.
        let rows = store.list_grants(privilege.id()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].allow);
        assert_eq!(privilege.privilege().grants().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let store = MemoryStore::new();
        let mut privilege = fresh(&store).await;

        store.set_failing(true);
        assert!(privilege.grant(&store, "music.play", true).await.is_err());
        assert!(privilege.privilege().grants().is_empty());
    }

    #[tokio::test]
    async fn test_include_and_exclude_write_through() {
        let store = MemoryStore::new();
        let mut privilege = fresh(&store).await;

        assert!(privilege.include(&store, "everyone").await.unwrap());
        assert!(!privilege.include(&store, "everyone").await.unwrap());
        assert_eq!(store.list_includes(privilege.id()).await.unwrap().len(), 1);

        assert!(privilege.exclude(&store, "everyone").await.unwrap());
        assert!(store.list_includes(privilege.id()).await.unwrap().is_empty());
        assert!(privilege.privilege().includes().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_deletes_row() {
        let store = MemoryStore::new();
        let mut privilege = fresh(&store).await;

        privilege.grant(&store, "music.play", true).await.unwrap();
        assert!(privilege.revoke(&store, "music.play").await.unwrap());
        assert!(!privilege.revoke(&store, "music.play").await.unwrap());
        assert!(store.list_grants(privilege.id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_applies_three_way_diff() {
        let store = MemoryStore::new();
        let mut privilege = fresh(&store).await;

        privilege.grant(&store, "music.play", true).await.unwrap();
        privilege.grant(&store, "music.stop", true).await.unwrap();
        privilege.include(&store, "everyone").await.unwrap();

        // Edited definition: music.play flips to deny, music.stop is gone,
        // bot.ping appears, the include moves from everyone to admin.
        let mut target = Privilege::new("dj", "Updated");
        target.deny("music.play");
        target.grant("bot.ping", true);
        target.include("admin");

        privilege.reconcile(&store, &target).await.unwrap();

        let grants = store.list_grants(privilege.id()).await.unwrap();
        let by_path: std::collections::HashMap<String, bool> = grants
            .into_iter()
            .map(|g| (g.capability, g.allow))
            .collect();
        assert_eq!(by_path.len(), 2);
        assert_eq!(by_path.get("music.play"), Some(&false));
        assert_eq!(by_path.get("bot.ping"), Some(&true));

        let includes: Vec<String> = store
            .list_includes(privilege.id())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.includes)
            .collect();
        assert_eq!(includes, vec!["admin"]);

        assert_eq!(privilege.privilege().description(), "Updated");
        assert_eq!(privilege.snapshot(), target);
    }

    #[tokio::test]
    async fn test_reconcile_unchanged_definition_is_a_noop_diff() {
        let store = MemoryStore::new();
        let mut privilege = fresh(&store).await;

        privilege.grant(&store, "music.play", true).await.unwrap();
        let target = privilege.snapshot();

        privilege.reconcile(&store, &target).await.unwrap();

        assert_eq!(store.list_grants(privilege.id()).await.unwrap().len(), 1);
        assert_eq!(privilege.snapshot(), target);
    }
}
