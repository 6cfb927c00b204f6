//! In-memory store
//!
//! Holds everything in plain maps behind one lock. Ids start at 1 and increase
//! per table, matching the SQLite backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{ChatStore, MessageQuery, StoreError, StoreResult, StoredCredential, DAY_MILLIS};
use crate::model::{
    now_millis, Channel, ChannelId, Community, CommunityId, Message, MessageId, NewMessage, UserId,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, StoredCredential>,
    user_names: HashMap<String, UserId>,
    communities: BTreeMap<CommunityId, Community>,
    channels: BTreeMap<ChannelId, Channel>,
    messages: BTreeMap<MessageId, Message>,
    banned_users: HashMap<UserId, i64>,
    banned_ips: HashMap<String, i64>,
    next_user: i64,
    next_community: i64,
    next_channel: i64,
    next_message: i64,
}

impl Tables {
    fn next(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

/// Store kept entirely in process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

/// Remaining expiry for a ban entry, removing it if it has lapsed
fn live_expiry<K>(bans: &mut HashMap<K, i64>, key: &K) -> Option<i64>
where
    K: std::hash::Hash + Eq,
{
    match bans.get(key).copied() {
        Some(expire) if expire <= now_millis() => {
            bans.remove(key);
            None
        }
        other => other,
    }
}

impl ChatStore for MemoryStore {
    fn validate(&self) -> StoreResult<()> {
        // nothing to create, but surface a poisoned lock early
        self.read().map(|_| ())
    }

    fn clear(&self) -> StoreResult<()> {
        *self.write()? = Tables::default();
        Ok(())
    }

    fn create_user(&self, uname: &str, token: &str, admin: bool) -> StoreResult<UserId> {
        let mut tables = self.write()?;
        if tables.user_names.contains_key(uname) {
            return Err(StoreError::Conflict(format!("user {}", uname)));
        }

        let id = UserId(Tables::next(&mut tables.next_user));
        tables.user_names.insert(uname.to_string(), id);
        tables.users.insert(
            id,
            StoredCredential {
                user_id: id,
                uname: uname.to_string(),
                token: token.to_string(),
                admin,
            },
        );
        Ok(id)
    }

    fn user_credential(&self, uname: &str) -> StoreResult<Option<StoredCredential>> {
        let tables = self.read()?;
        Ok(tables
            .user_names
            .get(uname)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    fn create_community(&self, name: &str, admin_id: UserId, public: bool) -> StoreResult<Community> {
        let mut tables = self.write()?;
        if tables.communities.values().any(|c| c.name == name) {
            return Err(StoreError::Conflict(format!("community {}", name)));
        }
        if !tables.users.contains_key(&admin_id) {
            return Err(StoreError::NotFound(format!("user {}", admin_id)));
        }

        let community = Community {
            id: CommunityId(Tables::next(&mut tables.next_community)),
            name: name.to_string(),
            admin_id,
            public,
        };
        tables.communities.insert(community.id, community.clone());
        Ok(community)
    }

    fn communities(&self) -> StoreResult<Vec<Community>> {
        Ok(self.read()?.communities.values().cloned().collect())
    }

    fn create_channel(
        &self,
        name: &str,
        community_id: CommunityId,
        admin_id: UserId,
        anonymous: bool,
    ) -> StoreResult<Channel> {
        let mut tables = self.write()?;
        if tables.channels.values().any(|c| c.name == name) {
            return Err(StoreError::Conflict(format!("channel {}", name)));
        }
        if !tables.communities.contains_key(&community_id) || !tables.users.contains_key(&admin_id) {
            return Err(StoreError::NotFound(format!(
                "community {} or user {}",
                community_id, admin_id
            )));
        }

        let channel = Channel {
            id: ChannelId(Tables::next(&mut tables.next_channel)),
            name: name.to_string(),
            community_id,
            admin_id,
            anonymous,
        };
        tables.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    fn channel(&self, id: ChannelId) -> StoreResult<Option<Channel>> {
        Ok(self.read()?.channels.get(&id).cloned())
    }

    fn community_channels(&self, community_id: CommunityId) -> StoreResult<Vec<Channel>> {
        let tables = self.read()?;
        if !tables.communities.contains_key(&community_id) {
            return Err(StoreError::NotFound(format!("community {}", community_id)));
        }

        Ok(tables
            .channels
            .values()
            .filter(|c| c.community_id == community_id)
            .cloned()
            .collect())
    }

    fn insert_message(&self, message: &NewMessage) -> StoreResult<Message> {
        let mut tables = self.write()?;
        if !tables.channels.contains_key(&message.channel_id) {
            return Err(StoreError::NotFound(format!("channel {}", message.channel_id)));
        }

        let uname = match message.user_id {
            Some(user_id) => tables
                .users
                .get(&user_id)
                .map(|u| u.uname.clone())
                .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?,
            None => String::new(),
        };

        let stored = Message {
            id: MessageId(Tables::next(&mut tables.next_message)),
            channel_id: message.channel_id,
            user_id: message.user_id,
            uname,
            thread_id: message.thread_id,
            thread_child: message.thread_child,
            edited: false,
            text: message.text.clone(),
            date: now_millis(),
        };
        tables.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn channel_messages(&self, channel_id: ChannelId, query: &MessageQuery) -> StoreResult<Vec<Message>> {
        let tables = self.read()?;
        if !tables.channels.contains_key(&channel_id) {
            return Err(StoreError::NotFound(format!("channel {}", channel_id)));
        }

        let after = query.after_id.unwrap_or(MessageId(0));
        let matching = tables
            .messages
            .range(MessageId(after.0 + 1)..)
            .map(|(_, m)| m)
            .filter(|m| m.channel_id == channel_id)
            .cloned();

        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    fn ban_user(&self, uname: &str, days: u32) -> StoreResult<()> {
        let mut tables = self.write()?;
        let user_id = *tables
            .user_names
            .get(uname)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", uname)))?;

        let expire = now_millis() + i64::from(days) * DAY_MILLIS;
        tables.banned_users.insert(user_id, expire);
        Ok(())
    }

    fn is_ip_banned(&self, ip: &str) -> StoreResult<bool> {
        let mut tables = self.write()?;
        Ok(live_expiry(&mut tables.banned_ips, &ip.to_string()).is_some())
    }

    fn is_user_banned(&self, uname: &str, peer_ip: Option<&str>) -> StoreResult<bool> {
        let mut tables = self.write()?;
        let Some(user_id) = tables.user_names.get(uname).copied() else {
            return Ok(false);
        };
        let Some(expire) = live_expiry(&mut tables.banned_users, &user_id) else {
            return Ok(false);
        };

        if let Some(ip) = peer_ip {
            let entry = tables.banned_ips.entry(ip.to_string()).or_insert(expire);
            *entry = (*entry).max(expire);
        }
        Ok(true)
    }
}
