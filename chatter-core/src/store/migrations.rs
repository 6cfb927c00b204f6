//! Database migrations for the chat schema
//!
//! Each migration is applied in its own transaction and recorded in the
//! `schema_version` table, so running them again is a no-op.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::model::now_millis;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Users, communities, channels and messages",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id     INTEGER PRIMARY KEY,
                    uname       TEXT NOT NULL UNIQUE,
                    token       TEXT NOT NULL,
                    admin       INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS communities (
                    community_id    INTEGER PRIMARY KEY,
                    name            TEXT NOT NULL UNIQUE,
                    admin_id        INTEGER NOT NULL REFERENCES users(user_id),
                    public          INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS channels (
                    channel_id      INTEGER PRIMARY KEY,
                    name            TEXT NOT NULL UNIQUE,
                    community_id    INTEGER NOT NULL REFERENCES communities(community_id),
                    admin_id        INTEGER NOT NULL REFERENCES users(user_id),
                    allow_anon      INTEGER NOT NULL DEFAULT 1
                );

                CREATE INDEX IF NOT EXISTS idx_channels_community ON channels(community_id);

                CREATE TABLE IF NOT EXISTS messages (
                    msg_id          INTEGER PRIMARY KEY,
                    channel_id      INTEGER NOT NULL REFERENCES channels(channel_id),
                    user_id         INTEGER REFERENCES users(user_id),  -- NULL for anonymous
                    thread_id       INTEGER,
                    thread_child    INTEGER NOT NULL DEFAULT 0,
                    edited          INTEGER NOT NULL DEFAULT 0,
                    mtext           TEXT NOT NULL,
                    mdate           INTEGER NOT NULL                    -- unix millis
                );

                CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel_id, msg_id);
            "#,
        },
        Migration {
            version: 2,
            description: "User and IP bans",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS banned_users (
                    user_id     INTEGER PRIMARY KEY REFERENCES users(user_id),
                    expire      INTEGER NOT NULL                    -- unix millis
                );

                CREATE TABLE IF NOT EXISTS banned_ips (
                    ip          TEXT PRIMARY KEY,
                    expire      INTEGER NOT NULL                    -- unix millis
                );
            "#,
        },
    ]
}

/// Get current schema version from database
fn get_current_version(conn: &Connection) -> Result<i32, rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_current_version(conn)?;

    for migration in get_migrations().into_iter().filter(|m| m.version > current_version) {
        let tx = conn.unchecked_transaction()?;

        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, now_millis()],
        )?;

        tx.commit()?;

        info!(version = migration.version, "Applied migration: {}", migration.description);
    }

    Ok(())
}

/// Get the latest migration version available
pub fn get_latest_version() -> i32 {
    get_migrations().iter().map(|m| m.version).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("Failed to open database");
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_initial_migration() {
        let conn = setup_test_conn();
        migrate(&conn).expect("Migration failed");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for table in ["users", "communities", "channels", "messages", "banned_users", "banned_ips"] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }

    #[test]
    fn test_migration_version_tracking() {
        let conn = setup_test_conn();
        migrate(&conn).expect("Migration failed");

        assert_eq!(get_current_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(get_latest_version(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_migrations() {
        let conn = setup_test_conn();

        migrate(&conn).expect("First migration failed");
        migrate(&conn).expect("Second migration failed");

        let applied: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_key_constraints() {
        let conn = setup_test_conn();
        migrate(&conn).expect("Migration failed");

        // channel in a community that does not exist
        let result = conn.execute(
            "INSERT INTO channels (name, community_id, admin_id, allow_anon) VALUES ('general', 9, 9, 1)",
            [],
        );
        assert!(result.is_err());
    }
}
