//! Test fixtures for seeded stores and messages

use std::sync::Arc;
use std::time::Duration;

use crate::model::{Channel, ChannelId, Community, CommunityId, Message, MessageId, NewMessage, UserId};
use crate::store::{ChatStore, MemoryStore, MessageQuery, StoreError, StoreResult, StoredCredential};

pub const ADMIN_NAME: &str = "admin1";
pub const ADMIN_TOKEN: &str = "admin1-token";
pub const USER_NAME: &str = "user2";
pub const USER_TOKEN: &str = "user2-token";

/// Rows created by [`seed`]
#[derive(Debug, Clone)]
pub struct Seeded {
    pub admin: UserId,
    pub user: UserId,
    pub community: Community,
    /// Named "general", anonymous posting off
    pub channel: Channel,
    /// Named "lobby", anonymous posting on
    pub open_channel: Channel,
}

/// Create one admin, one plain user, a community and two channels
pub fn seed(store: &dyn ChatStore) -> Seeded {
    let admin = store.create_user(ADMIN_NAME, ADMIN_TOKEN, true).expect("seed admin");
    let user = store.create_user(USER_NAME, USER_TOKEN, false).expect("seed user");
    let community = store.create_community("rustaceans", admin, true).expect("seed community");
    let channel = store
        .create_channel("general", community.id, admin, false)
        .expect("seed channel");
    let open_channel = store
        .create_channel("lobby", community.id, admin, true)
        .expect("seed open channel");

    Seeded {
        admin,
        user,
        community,
        channel,
        open_channel,
    }
}

/// A seeded in-memory store
pub fn seeded_memory_store() -> (Arc<MemoryStore>, Seeded) {
    let store = Arc::new(MemoryStore::new());
    let seeded = seed(store.as_ref());
    (store, seeded)
}

pub fn new_message(channel_id: ChannelId, user_id: Option<UserId>, text: &str) -> NewMessage {
    NewMessage {
        channel_id,
        user_id,
        thread_id: None,
        thread_child: false,
        text: text.to_string(),
    }
}

/// A committed-looking message, for tests that bypass the store
pub fn message(channel_id: ChannelId, id: i64, text: &str) -> Message {
    Message {
        id: MessageId(id),
        channel_id,
        user_id: Some(UserId(1)),
        uname: ADMIN_NAME.to_string(),
        thread_id: None,
        thread_child: false,
        edited: false,
        text: text.to_string(),
        date: id,
    }
}

/// Store whose every operation fails
pub struct FailingStore;

impl FailingStore {
    fn fail<T>() -> StoreResult<T> {
        Err(StoreError::Poisoned)
    }
}

impl ChatStore for FailingStore {
    fn validate(&self) -> StoreResult<()> {
        Self::fail()
    }

    fn clear(&self) -> StoreResult<()> {
        Self::fail()
    }

    fn create_user(&self, _uname: &str, _token: &str, _admin: bool) -> StoreResult<UserId> {
        Self::fail()
    }

    fn user_credential(&self, _uname: &str) -> StoreResult<Option<StoredCredential>> {
        Self::fail()
    }

    fn create_community(&self, _name: &str, _admin_id: UserId, _public: bool) -> StoreResult<Community> {
        Self::fail()
    }

    fn communities(&self) -> StoreResult<Vec<Community>> {
        Self::fail()
    }

    fn create_channel(
        &self,
        _name: &str,
        _community_id: CommunityId,
        _admin_id: UserId,
        _anonymous: bool,
    ) -> StoreResult<Channel> {
        Self::fail()
    }

    fn channel(&self, _id: ChannelId) -> StoreResult<Option<Channel>> {
        Self::fail()
    }

    fn community_channels(&self, _community_id: CommunityId) -> StoreResult<Vec<Channel>> {
        Self::fail()
    }

    fn insert_message(&self, _message: &NewMessage) -> StoreResult<Message> {
        Self::fail()
    }

    fn channel_messages(&self, _channel_id: ChannelId, _query: &MessageQuery) -> StoreResult<Vec<Message>> {
        Self::fail()
    }

    fn ban_user(&self, _uname: &str, _days: u32) -> StoreResult<()> {
        Self::fail()
    }

    fn is_ip_banned(&self, _ip: &str) -> StoreResult<bool> {
        Self::fail()
    }

    fn is_user_banned(&self, _uname: &str, _peer_ip: Option<&str>) -> StoreResult<bool> {
        Self::fail()
    }
}

/// In-memory store that stalls after persisting a message with a given text
///
/// The stall happens after the insert has committed, before the caller sees
/// the result, which widens the gap between persisting and publishing.
pub struct SlowInsertStore {
    inner: MemoryStore,
    slow_text: &'static str,
    delay: Duration,
}

impl SlowInsertStore {
    pub fn new(slow_text: &'static str, delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            slow_text,
            delay,
        }
    }
}

impl ChatStore for SlowInsertStore {
    fn validate(&self) -> StoreResult<()> {
        self.inner.validate()
    }

    fn clear(&self) -> StoreResult<()> {
        self.inner.clear()
    }

    fn create_user(&self, uname: &str, token: &str, admin: bool) -> StoreResult<UserId> {
        self.inner.create_user(uname, token, admin)
    }

    fn user_credential(&self, uname: &str) -> StoreResult<Option<StoredCredential>> {
        self.inner.user_credential(uname)
    }

    fn create_community(&self, name: &str, admin_id: UserId, public: bool) -> StoreResult<Community> {
        self.inner.create_community(name, admin_id, public)
    }

    fn communities(&self) -> StoreResult<Vec<Community>> {
        self.inner.communities()
    }

    fn create_channel(
        &self,
        name: &str,
        community_id: CommunityId,
        admin_id: UserId,
        anonymous: bool,
    ) -> StoreResult<Channel> {
        self.inner.create_channel(name, community_id, admin_id, anonymous)
    }

    fn channel(&self, id: ChannelId) -> StoreResult<Option<Channel>> {
        self.inner.channel(id)
    }

    fn community_channels(&self, community_id: CommunityId) -> StoreResult<Vec<Channel>> {
        self.inner.community_channels(community_id)
    }

    fn insert_message(&self, message: &NewMessage) -> StoreResult<Message> {
        let stored = self.inner.insert_message(message)?;
        if stored.text == self.slow_text {
            std::thread::sleep(self.delay);
        }
        Ok(stored)
    }

    fn channel_messages(&self, channel_id: ChannelId, query: &MessageQuery) -> StoreResult<Vec<Message>> {
        self.inner.channel_messages(channel_id, query)
    }

    fn ban_user(&self, uname: &str, days: u32) -> StoreResult<()> {
        self.inner.ban_user(uname, days)
    }

    fn is_ip_banned(&self, ip: &str) -> StoreResult<bool> {
        self.inner.is_ip_banned(ip)
    }

    fn is_user_banned(&self, uname: &str, peer_ip: Option<&str>) -> StoreResult<bool> {
        self.inner.is_user_banned(uname, peer_ip)
    }
}
