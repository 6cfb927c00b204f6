//! Store capability interface and its backends
//!
//! Everything durable (users, credentials, bans, communities, channels and
//! messages) lives behind [`ChatStore`]. Calls are synchronous and may block;
//! async callers run them on the blocking pool. [`SqlStore`] and
//! [`MemoryStore`] are independent implementations with the same observable
//! behaviour.

use std::sync::Arc;
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};
use crate::model::{Channel, ChannelId, Community, CommunityId, Message, MessageId, NewMessage, UserId};

mod memory_store;
mod migrations;
mod sql_store;

pub use memory_store::MemoryStore;
pub use migrations::{get_latest_version, CURRENT_SCHEMA_VERSION};
pub use sql_store::SqlStore;

/// Milliseconds in one ban day
pub const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique name is already taken
    #[error("already exists: {0}")]
    Conflict(String),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        let constraint = match &err {
            rusqlite::Error::SqliteFailure(e, msg) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Some((e.extended_code, msg.clone().unwrap_or_else(|| e.to_string())))
            }
            _ => None,
        };

        match constraint {
            Some((ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY, detail)) => {
                StoreError::Conflict(detail)
            }
            Some((ffi::SQLITE_CONSTRAINT_FOREIGNKEY, detail)) => StoreError::NotFound(detail),
            _ => StoreError::Sqlite(err),
        }
    }
}

/// Stored credential record for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub user_id: UserId,
    pub uname: String,
    pub token: String,
    pub admin: bool,
}

/// Backlog query over one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageQuery {
    /// Only messages with a larger id
    pub after_id: Option<MessageId>,
    /// At most this many, oldest first; `None` is unlimited
    pub limit: Option<usize>,
}

impl MessageQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn after(mut self, id: MessageId) -> Self {
        self.after_id = Some(id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Durable storage used by the chat services
pub trait ChatStore: Send + Sync {
    /// Create the schema if it is missing
    fn validate(&self) -> StoreResult<()>;

    /// Remove every row
    fn clear(&self) -> StoreResult<()>;

    fn create_user(&self, uname: &str, token: &str, admin: bool) -> StoreResult<UserId>;

    fn user_credential(&self, uname: &str) -> StoreResult<Option<StoredCredential>>;

    fn create_community(&self, name: &str, admin_id: UserId, public: bool) -> StoreResult<Community>;

    /// All communities, ordered by id
    fn communities(&self) -> StoreResult<Vec<Community>>;

    fn create_channel(
        &self,
        name: &str,
        community_id: CommunityId,
        admin_id: UserId,
        anonymous: bool,
    ) -> StoreResult<Channel>;

    fn channel(&self, id: ChannelId) -> StoreResult<Option<Channel>>;

    /// Channels of one community, ordered by id
    fn community_channels(&self, community_id: CommunityId) -> StoreResult<Vec<Channel>>;

    /// Commit a message, assigning its id and date
    fn insert_message(&self, message: &NewMessage) -> StoreResult<Message>;

    fn channel_messages(&self, channel_id: ChannelId, query: &MessageQuery) -> StoreResult<Vec<Message>>;

    /// Ban `uname` for `days` from now, replacing any existing expiry
    fn ban_user(&self, uname: &str, days: u32) -> StoreResult<()>;

    /// Expired entries are removed and reported as not banned
    fn is_ip_banned(&self, ip: &str) -> StoreResult<bool>;

    /// Expired entries are removed; a live ban also bans `peer_ip` until the same expiry
    fn is_user_banned(&self, uname: &str, peer_ip: Option<&str>) -> StoreResult<bool>;
}

/// Open the configured backend and make sure its schema exists
pub fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn ChatStore>> {
    let store: Arc<dyn ChatStore> = match config.backend {
        StoreBackend::Sqlite => Arc::new(SqlStore::open(&config.path, config.pool_size)?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    store.validate()?;
    if config.clear_on_start {
        tracing::warn!("Clearing all stored data on start-up");
        store.clear()?;
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_store() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };

        let store = open_store(&config).unwrap();
        assert!(store.communities().unwrap().is_empty());
    }

    #[test]
    fn test_open_sqlite_store_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: dir.path().join("chat.db"),
            pool_size: 2,
            clear_on_start: true,
        };

        let store = open_store(&config).unwrap();
        store.create_user("alice", "t", false).unwrap();
        assert!(config.path.exists());
    }

    #[test]
    fn test_message_query_builder() {
        let query = MessageQuery::all().after(MessageId(3)).limit(10);
        assert_eq!(query.after_id, Some(MessageId(3)));
        assert_eq!(query.limit, Some(10));
        assert_eq!(MessageQuery::all().limit, None);
    }
}
