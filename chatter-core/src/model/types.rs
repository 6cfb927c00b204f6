//! Type definitions for users, communities, channels and messages

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw row id
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                $name(id)
            }
        }
    };
}

row_id!(
    /// Store-assigned user identifier
    UserId
);
row_id!(
    /// Store-assigned community identifier
    CommunityId
);
row_id!(
    /// Store-assigned channel identifier
    ChannelId
);
row_id!(
    /// Store-assigned message identifier, increasing in commit order
    MessageId
);

/// Current time as unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub uname: String,
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    pub admin_id: UserId,
    pub public: bool,
}

/// A named message stream scoped to a community
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub community_id: CommunityId,
    pub admin_id: UserId,
    /// Whether posts without an author are accepted
    pub anonymous: bool,
}

/// A message as submitted by a client, before the store assigns id and date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub channel_id: ChannelId,
    /// `None` posts anonymously
    pub user_id: Option<UserId>,
    pub thread_id: Option<MessageId>,
    pub thread_child: bool,
    pub text: String,
}

/// A committed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: Option<UserId>,
    /// Author display name, empty for anonymous posts
    pub uname: String,
    pub thread_id: Option<MessageId>,
    pub thread_child: bool,
    pub edited: bool,
    pub text: String,
    /// Unix milliseconds
    pub date: i64,
}

impl Message {
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Creation time, if `date` is representable
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.date).single()
    }
}

/// Permission level of a verified identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn from_admin_flag(admin: bool) -> Self {
        if admin {
            Role::Admin
        } else {
            Role::User
        }
    }

    /// Whether this role meets `required`
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// A verified (username, role) pair established from presented credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
