//! Postgres store integration tests.
//!
//! Run with: `cargo test --test postgres_test -- --ignored`
//! Requires a reachable database in `DATABASE_URL`.

use uuid::Uuid;
use warden_engine::store::{OverrideStore, PrivilegeStore};
use warden_engine::PgStore;

async fn create_test_store() -> PgStore {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/warden_test".into());

    let store = PgStore::connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::raw_sql(
        r"
        CREATE TABLE IF NOT EXISTS member_overrides (
            guild_id UUID NOT NULL,
            user_id UUID NOT NULL,
            capability TEXT NOT NULL,
            allow BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (guild_id, user_id, capability)
        );
        CREATE TABLE IF NOT EXISTS role_overrides (
            guild_id UUID NOT NULL,
            role_id UUID NOT NULL,
            capability TEXT NOT NULL,
            allow BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (guild_id, role_id, capability)
        );
        CREATE TABLE IF NOT EXISTS guild_privileges (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            guild_id UUID NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            everyone BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (guild_id, name)
        );
        CREATE TABLE IF NOT EXISTS privilege_grants (
            privilege_id UUID NOT NULL REFERENCES guild_privileges(id) ON DELETE CASCADE,
            capability TEXT NOT NULL,
            allow BOOLEAN NOT NULL,
            PRIMARY KEY (privilege_id, capability)
        );
        CREATE TABLE IF NOT EXISTS privilege_includes (
            privilege_id UUID NOT NULL REFERENCES guild_privileges(id) ON DELETE CASCADE,
            includes TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (privilege_id, includes)
        );
        ",
    )
    .execute(store.pool())
    .await
    .expect("Failed to create test tables");

    store
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_member_override_round_trip() {
    let store = create_test_store().await;
    let guild = Uuid::new_v4();
    let user = Uuid::new_v4();

    assert_eq!(
        store.member_override(guild, user, "music.play").await.unwrap(),
        None
    );

    store
        .set_member_override(guild, user, "music.play", false)
        .await
        .unwrap();
    store
        .set_member_override(guild, user, "music.play", true)
        .await
        .unwrap();

    assert_eq!(
        store.member_override(guild, user, "music.play").await.unwrap(),
        Some(true)
    );
    assert_eq!(
        store.list_member_overrides(guild, user).await.unwrap().len(),
        1
    );

    assert!(store
        .clear_member_override(guild, user, "music.play")
        .await
        .unwrap());
    assert!(!store
        .clear_member_override(guild, user, "music.play")
        .await
        .unwrap());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_role_override_batch_lookup() {
    let store = create_test_store().await;
    let guild = Uuid::new_v4();
    let with_record = Uuid::new_v4();
    let without_record = Uuid::new_v4();

    store
        .set_role_override(guild, with_record, "music.play", false)
        .await
        .unwrap();

    let records = store
        .role_overrides(guild, "music.play", &[with_record, without_record])
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records.get(&with_record), Some(&false));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_privilege_rows_round_trip() {
    let store = create_test_store().await;
    let guild = Uuid::new_v4();

    let row = store
        .insert_privilege(guild, "dj", "Music controls", false)
        .await
        .unwrap();

    store.upsert_grant(row.id, "music.play", true).await.unwrap();
    store.upsert_grant(row.id, "music.play", false).await.unwrap();
    store.insert_include(row.id, "everyone").await.unwrap();
    store.insert_include(row.id, "everyone").await.unwrap();

    let grants = store.list_grants(row.id).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert!(!grants[0].allow);
    assert_eq!(store.list_includes(row.id).await.unwrap().len(), 1);

    // Duplicate names in one guild violate the unique constraint.
    assert!(store.insert_privilege(guild, "dj", "", false).await.is_err());

    // Deleting the definition cascades its rows.
    assert!(store.delete_privilege(row.id).await.unwrap());
    assert!(store.list_grants(row.id).await.unwrap().is_empty());
    assert!(store.list_includes(row.id).await.unwrap().is_empty());
}
