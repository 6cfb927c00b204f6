//! SQLite-backed store

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{migrations, ChatStore, MessageQuery, StoreError, StoreResult, StoredCredential, DAY_MILLIS};
use crate::metrics::{Timer, STORE_OPERATION_DURATION};
use crate::model::{
    now_millis, Channel, ChannelId, Community, CommunityId, Message, MessageId, NewMessage, UserId,
};

const MESSAGE_COLUMNS: &str = "m.msg_id, m.channel_id, m.user_id, COALESCE(u.uname, ''), \
     m.thread_id, m.thread_child, m.edited, m.mtext, m.mdate";

/// SQL store over a pool of SQLite connections
pub struct SqlStore {
    pool: Pool<SqliteConnectionManager>,
}

fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: ChannelId(row.get(0)?),
        name: row.get(1)?,
        community_id: CommunityId(row.get(2)?),
        admin_id: UserId(row.get(3)?),
        anonymous: row.get(4)?,
    })
}

fn community_from_row(row: &Row<'_>) -> rusqlite::Result<Community> {
    Ok(Community {
        id: CommunityId(row.get(0)?),
        name: row.get(1)?,
        admin_id: UserId(row.get(2)?),
        public: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(row.get(0)?),
        channel_id: ChannelId(row.get(1)?),
        user_id: row.get::<_, Option<i64>>(2)?.map(UserId),
        uname: row.get(3)?,
        thread_id: row.get::<_, Option<i64>>(4)?.map(MessageId),
        thread_child: row.get(5)?,
        edited: row.get(6)?,
        text: row.get(7)?,
        date: row.get(8)?,
    })
}

impl SqlStore {
    /// Open (or create) the database file at `path`
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(init_connection);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        debug!(path = %path.display(), pool_size, "Opened SQLite store");
        Ok(Self { pool })
    }

    /// In-memory database on a single pooled connection
    ///
    /// Every `:memory:` connection is its own database, so the pool is capped at one.
    pub fn memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder().max_size(1).build(manager)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn require_channel(conn: &Connection, id: ChannelId) -> StoreResult<()> {
        let exists = conn
            .prepare_cached("SELECT 1 FROM channels WHERE channel_id = ?1")?
            .exists(params![id.0])?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("channel {}", id)))
        }
    }

    /// Current expiry for `key` in a ban table, deleting it if it has lapsed
    fn live_expiry(conn: &Connection, select: &str, delete: &str, key: &dyn rusqlite::ToSql) -> StoreResult<Option<i64>> {
        let expire: Option<i64> = conn
            .prepare_cached(select)?
            .query_row(params![key], |row| row.get(0))
            .optional()?;

        match expire {
            Some(expire) if expire <= now_millis() => {
                conn.prepare_cached(delete)?.execute(params![key])?;
                Ok(None)
            }
            other => Ok(other),
        }
    }
}

impl ChatStore for SqlStore {
    fn validate(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        migrations::migrate(&conn)?;
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "BEGIN;
             DELETE FROM messages;
             DELETE FROM banned_users;
             DELETE FROM banned_ips;
             DELETE FROM channels;
             DELETE FROM communities;
             DELETE FROM users;
             COMMIT;",
        )?;
        Ok(())
    }

    fn create_user(&self, uname: &str, token: &str, admin: bool) -> StoreResult<UserId> {
        let conn = self.conn()?;
        conn.prepare_cached("INSERT INTO users (uname, token, admin) VALUES (?1, ?2, ?3)")?
            .execute(params![uname, token, admin])
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => StoreError::Conflict(format!("user {}", uname)),
                other => other,
            })?;
        Ok(UserId(conn.last_insert_rowid()))
    }

    fn user_credential(&self, uname: &str) -> StoreResult<Option<StoredCredential>> {
        let conn = self.conn()?;
        let credential = conn
            .prepare_cached("SELECT user_id, uname, token, admin FROM users WHERE uname = ?1")?
            .query_row(params![uname], |row| {
                Ok(StoredCredential {
                    user_id: UserId(row.get(0)?),
                    uname: row.get(1)?,
                    token: row.get(2)?,
                    admin: row.get(3)?,
                })
            })
            .optional()?;
        Ok(credential)
    }

    fn create_community(&self, name: &str, admin_id: UserId, public: bool) -> StoreResult<Community> {
        let conn = self.conn()?;
        conn.prepare_cached("INSERT INTO communities (name, admin_id, public) VALUES (?1, ?2, ?3)")?
            .execute(params![name, admin_id.0, public])
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => StoreError::Conflict(format!("community {}", name)),
                StoreError::NotFound(_) => StoreError::NotFound(format!("user {}", admin_id)),
                other => other,
            })?;

        Ok(Community {
            id: CommunityId(conn.last_insert_rowid()),
            name: name.to_string(),
            admin_id,
            public,
        })
    }

    fn communities(&self) -> StoreResult<Vec<Community>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT community_id, name, admin_id, public FROM communities ORDER BY community_id",
        )?;
        let communities = stmt
            .query_map([], community_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(communities)
    }

    fn create_channel(
        &self,
        name: &str,
        community_id: CommunityId,
        admin_id: UserId,
        anonymous: bool,
    ) -> StoreResult<Channel> {
        let conn = self.conn()?;
        conn.prepare_cached(
            "INSERT INTO channels (name, community_id, admin_id, allow_anon) VALUES (?1, ?2, ?3, ?4)",
        )?
        .execute(params![name, community_id.0, admin_id.0, anonymous])
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => StoreError::Conflict(format!("channel {}", name)),
            StoreError::NotFound(_) => {
                StoreError::NotFound(format!("community {} or user {}", community_id, admin_id))
            }
            other => other,
        })?;

        Ok(Channel {
            id: ChannelId(conn.last_insert_rowid()),
            name: name.to_string(),
            community_id,
            admin_id,
            anonymous,
        })
    }

    fn channel(&self, id: ChannelId) -> StoreResult<Option<Channel>> {
        let conn = self.conn()?;
        let channel = conn
            .prepare_cached(
                "SELECT channel_id, name, community_id, admin_id, allow_anon FROM channels WHERE channel_id = ?1",
            )?
            .query_row(params![id.0], channel_from_row)
            .optional()?;
        Ok(channel)
    }

    fn community_channels(&self, community_id: CommunityId) -> StoreResult<Vec<Channel>> {
        let conn = self.conn()?;

        let exists = conn
            .prepare_cached("SELECT 1 FROM communities WHERE community_id = ?1")?
            .exists(params![community_id.0])?;
        if !exists {
            return Err(StoreError::NotFound(format!("community {}", community_id)));
        }

        let mut stmt = conn.prepare_cached(
            "SELECT channel_id, name, community_id, admin_id, allow_anon FROM channels
             WHERE community_id = ?1 ORDER BY channel_id",
        )?;
        let channels = stmt
            .query_map(params![community_id.0], channel_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(channels)
    }

    fn insert_message(&self, message: &NewMessage) -> StoreResult<Message> {
        let timer = Timer::new(STORE_OPERATION_DURATION, "insert_message");
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        Self::require_channel(&tx, message.channel_id)?;

        tx.prepare_cached(
            "INSERT INTO messages (channel_id, user_id, thread_id, thread_child, edited, mtext, mdate)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
        )?
        .execute(params![
            message.channel_id.0,
            message.user_id.map(|id| id.0),
            message.thread_id.map(|id| id.0),
            message.thread_child,
            message.text,
            now_millis(),
        ])
        .map_err(|e| match StoreError::from(e) {
            // the channel was checked above, so only the author can be missing
            StoreError::NotFound(_) => StoreError::NotFound(format!(
                "user {}",
                message.user_id.map(|id| id.to_string()).unwrap_or_default()
            )),
            other => other,
        })?;
        let id = tx.last_insert_rowid();

        let stored = tx
            .prepare_cached(&format!(
                "SELECT {} FROM messages m LEFT JOIN users u ON u.user_id = m.user_id WHERE m.msg_id = ?1",
                MESSAGE_COLUMNS
            ))?
            .query_row(params![id], message_from_row)?;

        tx.commit()?;
        timer.stop();
        Ok(stored)
    }

    fn channel_messages(&self, channel_id: ChannelId, query: &MessageQuery) -> StoreResult<Vec<Message>> {
        let conn = self.conn()?;
        Self::require_channel(&conn, channel_id)?;

        // LIMIT -1 is unbounded in SQLite
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        let after = query.after_id.map(|id| id.0).unwrap_or(0);

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM messages m LEFT JOIN users u ON u.user_id = m.user_id
             WHERE m.channel_id = ?1 AND m.msg_id > ?2 ORDER BY m.msg_id LIMIT ?3",
            MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![channel_id.0, after, limit], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn ban_user(&self, uname: &str, days: u32) -> StoreResult<()> {
        let conn = self.conn()?;

        let user_id: i64 = conn
            .prepare_cached("SELECT user_id FROM users WHERE uname = ?1")?
            .query_row(params![uname], |row| row.get(0))
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", uname)))?;

        let expire = now_millis() + i64::from(days) * DAY_MILLIS;
        conn.prepare_cached(
            "INSERT INTO banned_users (user_id, expire) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET expire = excluded.expire",
        )?
        .execute(params![user_id, expire])?;

        debug!(uname, days, "Stored user ban");
        Ok(())
    }

    fn is_ip_banned(&self, ip: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let expiry = Self::live_expiry(
            &conn,
            "SELECT expire FROM banned_ips WHERE ip = ?1",
            "DELETE FROM banned_ips WHERE ip = ?1",
            &ip,
        )?;
        Ok(expiry.is_some())
    }

    fn is_user_banned(&self, uname: &str, peer_ip: Option<&str>) -> StoreResult<bool> {
        let conn = self.conn()?;

        let user_id: Option<i64> = conn
            .prepare_cached("SELECT user_id FROM users WHERE uname = ?1")?
            .query_row(params![uname], |row| row.get(0))
            .optional()?;
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        let expiry = Self::live_expiry(
            &conn,
            "SELECT expire FROM banned_users WHERE user_id = ?1",
            "DELETE FROM banned_users WHERE user_id = ?1",
            &user_id,
        )?;
        let Some(expire) = expiry else {
            return Ok(false);
        };

        if let Some(ip) = peer_ip {
            conn.prepare_cached(
                "INSERT INTO banned_ips (ip, expire) VALUES (?1, ?2)
                 ON CONFLICT(ip) DO UPDATE SET expire = MAX(expire, excluded.expire)",
            )?
            .execute(params![ip, expire])?;
            debug!(uname, ip, "Propagated user ban to peer address");
        }

        Ok(true)
    }
}
