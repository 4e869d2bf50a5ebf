// database/schema.rs - DDL for the system database and per-tenant chat databases

use sqlx::PgPool;

use super::DatabaseError;

/// Channel name used by the `chats` trigger for change notifications
pub const CHATS_CHANGED_CHANNEL: &str = "chats_changed";

const SYSTEM_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenants (
        phone_number TEXT PRIMARY KEY,
        database     TEXT NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS webbot_users (
        id         BIGSERIAL PRIMARY KEY,
        clerk_id   TEXT NOT NULL,
        form_data  JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS webbot_users_clerk_id_idx ON webbot_users (clerk_id)",
];

// Each chat is stored as its full JSON document; wa_id is lifted out as the key.
const TENANT_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS chats (
        wa_id      TEXT PRIMARY KEY,
        document   JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE OR REPLACE FUNCTION notify_chats_changed() RETURNS trigger AS $$
    BEGIN
        PERFORM pg_notify('chats_changed', COALESCE(NEW.wa_id, OLD.wa_id));
        RETURN NULL;
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS chats_changed ON chats",
    r#"
    CREATE TRIGGER chats_changed
        AFTER INSERT OR UPDATE OR DELETE ON chats
        FOR EACH ROW EXECUTE FUNCTION notify_chats_changed()
    "#,
];

async fn apply(pool: &PgPool, statements: &[&str]) -> Result<(), DatabaseError> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Create the registry tables in the system database
pub async fn bootstrap_system(pool: &PgPool) -> Result<(), DatabaseError> {
    apply(pool, SYSTEM_SCHEMA).await
}

/// Create the `chats` table and its change trigger in a tenant database
pub async fn bootstrap_tenant(pool: &PgPool) -> Result<(), DatabaseError> {
    apply(pool, TENANT_SCHEMA).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_notifies_on_the_listened_channel() {
        let function = TENANT_SCHEMA[1];
        assert!(function.contains(&format!("pg_notify('{}'", CHATS_CHANGED_CHANNEL)));
    }
}
