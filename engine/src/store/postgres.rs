//! Postgres-backed store.
//!
//! Row shapes:
//! - `member_overrides` / `role_overrides`: one row per (guild, actor,
//!   capability), unique on that key
//! - `guild_privileges`: one definition row per (guild, name)
//! - `privilege_grants` / `privilege_includes`: one row per granted
//!   capability / included privilege, keyed by the definition row id

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::{
    MemberOverride, OverrideStore, PrivilegeGrant, PrivilegeInclude, PrivilegeRow, PrivilegeStore,
    RoleOverride,
};
use crate::error::StoreError;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Store implementation over a `PostgreSQL` connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the pool health configuration used across the platform.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(2)
            .max_connections(10)
            // Prevent hanging requests on pool exhaustion
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OverrideStore for PgStore {
    async fn member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
    ) -> Result<Option<bool>, StoreError> {
        let allow: Option<bool> = sqlx::query_scalar(
            r"
            SELECT allow
            FROM member_overrides
            WHERE guild_id = $1
              AND user_id = $2
              AND capability = $3
            ",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(capability)
        .fetch_optional(&self.pool)
        .await?;

        Ok(allow)
    }

    async fn role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
    ) -> Result<Option<bool>, StoreError> {
        let allow: Option<bool> = sqlx::query_scalar(
            r"
            SELECT allow
            FROM role_overrides
            WHERE guild_id = $1
              AND role_id = $2
              AND capability = $3
            ",
        )
        .bind(guild_id)
        .bind(role_id)
        .bind(capability)
        .fetch_optional(&self.pool)
        .await?;

        Ok(allow)
    }

    async fn role_overrides(
        &self,
        guild_id: Uuid,
        capability: &str,
        role_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>, StoreError> {
        let rows: Vec<(Uuid, bool)> = sqlx::query_as(
            r"
            SELECT role_id, allow
            FROM role_overrides
            WHERE guild_id = $1
              AND capability = $2
              AND role_id = ANY($3)
            ",
        )
        .bind(guild_id)
        .bind(capability)
        .bind(role_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn set_member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO member_overrides (guild_id, user_id, capability, allow)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (guild_id, user_id, capability) DO UPDATE
            SET allow = EXCLUDED.allow,
                updated_at = NOW()
            ",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(capability)
        .bind(allow)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_member_override(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
        capability: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM member_overrides
            WHERE guild_id = $1
              AND user_id = $2
              AND capability = $3
            ",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(capability)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO role_overrides (guild_id, role_id, capability, allow)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (guild_id, role_id, capability) DO UPDATE
            SET allow = EXCLUDED.allow,
                updated_at = NOW()
            ",
        )
        .bind(guild_id)
        .bind(role_id)
        .bind(capability)
        .bind(allow)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_role_override(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
        capability: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM role_overrides
            WHERE guild_id = $1
              AND role_id = $2
              AND capability = $3
            ",
        )
        .bind(guild_id)
        .bind(role_id)
        .bind(capability)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_member_overrides(
        &self,
        guild_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<MemberOverride>, StoreError> {
        let rows = sqlx::query_as::<_, MemberOverride>(
            r"
            SELECT guild_id, user_id, capability, allow, created_at, updated_at
            FROM member_overrides
            WHERE guild_id = $1
              AND user_id = $2
            ORDER BY capability ASC
            ",
        )
        .bind(guild_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_role_overrides(
        &self,
        guild_id: Uuid,
        role_id: Uuid,
    ) -> Result<Vec<RoleOverride>, StoreError> {
        let rows = sqlx::query_as::<_, RoleOverride>(
            r"
            SELECT guild_id, role_id, capability, allow, created_at, updated_at
            FROM role_overrides
            WHERE guild_id = $1
              AND role_id = $2
            ORDER BY capability ASC
            ",
        )
        .bind(guild_id)
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl PrivilegeStore for PgStore {
    async fn list_privileges(&self, guild_id: Uuid) -> Result<Vec<PrivilegeRow>, StoreError> {
        let rows = sqlx::query_as::<_, PrivilegeRow>(
            r"
            SELECT id, guild_id, name, description, everyone, created_at, updated_at
            FROM guild_privileges
            WHERE guild_id = $1
            ORDER BY name ASC
            ",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_privilege(
        &self,
        guild_id: Uuid,
        name: &str,
    ) -> Result<Option<PrivilegeRow>, StoreError> {
        let row = sqlx::query_as::<_, PrivilegeRow>(
            r"
            SELECT id, guild_id, name, description, everyone, created_at, updated_at
            FROM guild_privileges
            WHERE guild_id = $1
              AND name = $2
            ",
        )
        .bind(guild_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn insert_privilege(
        &self,
        guild_id: Uuid,
        name: &str,
        description: &str,
        everyone: bool,
    ) -> Result<PrivilegeRow, StoreError> {
        let row = sqlx::query_as::<_, PrivilegeRow>(
            r"
            INSERT INTO guild_privileges (guild_id, name, description, everyone)
            VALUES ($1, $2, $3, $4)
            RETURNING id, guild_id, name, description, everyone, created_at, updated_at
            ",
        )
        .bind(guild_id)
        .bind(name)
        .bind(description)
        .bind(everyone)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_privilege(
        &self,
        privilege_id: Uuid,
        description: &str,
        everyone: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE guild_privileges
            SET description = $2,
                everyone = $3,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(privilege_id)
        .bind(description)
        .bind(everyone)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_privilege(&self, privilege_id: Uuid) -> Result<bool, StoreError> {
        // Grant and include rows reference the definition row with
        // ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM guild_privileges WHERE id = $1")
            .bind(privilege_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_grants(&self, privilege_id: Uuid) -> Result<Vec<PrivilegeGrant>, StoreError> {
        let rows = sqlx::query_as::<_, PrivilegeGrant>(
            r"
            SELECT privilege_id, capability, allow
            FROM privilege_grants
            WHERE privilege_id = $1
            ORDER BY capability ASC
            ",
        )
        .bind(privilege_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn upsert_grant(
        &self,
        privilege_id: Uuid,
        capability: &str,
        allow: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO privilege_grants (privilege_id, capability, allow)
            VALUES ($1, $2, $3)
            ON CONFLICT (privilege_id, capability) DO UPDATE
            SET allow = EXCLUDED.allow
            ",
        )
        .bind(privilege_id)
        .bind(capability)
        .bind(allow)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_grant(
        &self,
        privilege_id: Uuid,
        capability: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM privilege_grants
            WHERE privilege_id = $1
              AND capability = $2
            ",
        )
        .bind(privilege_id)
        .bind(capability)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_includes(
        &self,
        privilege_id: Uuid,
    ) -> Result<Vec<PrivilegeInclude>, StoreError> {
        let rows = sqlx::query_as::<_, PrivilegeInclude>(
            r"
            SELECT privilege_id, includes, created_at
            FROM privilege_includes
            WHERE privilege_id = $1
            ORDER BY created_at ASC
            ",
        )
        .bind(privilege_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_include(&self, privilege_id: Uuid, includes: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO privilege_includes (privilege_id, includes)
            VALUES ($1, $2)
            ON CONFLICT (privilege_id, includes) DO NOTHING
            ",
        )
        .bind(privilege_id)
        .bind(includes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_include(
        &self,
        privilege_id: Uuid,
        includes: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM privilege_includes
            WHERE privilege_id = $1
              AND includes = $2
            ",
        )
        .bind(privilege_id)
        .bind(includes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
