//! Wire types for the `chatter.v1` package
//!
//! Identifiers are int64 on the wire and `0` stands for "absent" wherever a
//! reference is optional (anonymous author, no parent thread, no cursor).

use chatter_core::model;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateUserRequest {
    #[prost(string, tag = "1")]
    pub uname: String,
    #[prost(string, tag = "2")]
    pub password: String,
    #[prost(bool, tag = "3")]
    pub admin: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateUserResponse {
    #[prost(int64, tag = "1")]
    pub user_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenerateUserRequest {}

/// A freshly generated account, token included
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    #[prost(int64, tag = "1")]
    pub user_id: i64,
    #[prost(string, tag = "2")]
    pub uname: String,
    #[prost(string, tag = "3")]
    pub token: String,
    #[prost(bool, tag = "4")]
    pub admin: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BanUserRequest {
    #[prost(string, tag = "1")]
    pub uname: String,
    #[prost(uint32, tag = "2")]
    pub days: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateCommunityRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub admin_id: i64,
    #[prost(bool, tag = "3")]
    pub public: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Community {
    #[prost(int64, tag = "1")]
    pub community_id: i64,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int64, tag = "3")]
    pub admin_id: i64,
    #[prost(bool, tag = "4")]
    pub public: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateChannelRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub community_id: i64,
    #[prost(int64, tag = "3")]
    pub admin_id: i64,
    #[prost(bool, tag = "4")]
    pub anonymous: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Channel {
    #[prost(int64, tag = "1")]
    pub channel_id: i64,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int64, tag = "3")]
    pub community_id: i64,
    #[prost(int64, tag = "4")]
    pub admin_id: i64,
    #[prost(bool, tag = "5")]
    pub anonymous: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListCommunitiesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListChannelsRequest {
    #[prost(int64, tag = "1")]
    pub community_id: i64,
}

/// A chat message, inbound or outbound
///
/// On ingest only `channel_id`, `user_id`, `thread_id`, `thread_child` and
/// `text` are read; the server assigns the rest.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(int64, tag = "1")]
    pub msg_id: i64,
    #[prost(int64, tag = "2")]
    pub channel_id: i64,
    #[prost(int64, tag = "3")]
    pub user_id: i64,
    #[prost(string, tag = "4")]
    pub uname: String,
    #[prost(int64, tag = "5")]
    pub thread_id: i64,
    #[prost(bool, tag = "6")]
    pub thread_child: bool,
    #[prost(bool, tag = "7")]
    pub edited: bool,
    #[prost(string, tag = "8")]
    pub text: String,
    /// Milliseconds since the Unix epoch
    #[prost(int64, tag = "9")]
    pub date: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListMessagesRequest {
    #[prost(int64, tag = "1")]
    pub channel_id: i64,
    /// Only messages with a larger id; `0` lists from the start
    #[prost(int64, tag = "2")]
    pub after_id: i64,
    /// `0` means no limit
    #[prost(uint32, tag = "3")]
    pub limit: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeMessagesRequest {
    #[prost(int64, tag = "1")]
    pub channel_id: i64,
}

include!(concat!(env!("OUT_DIR"), "/chatter.v1.UserService.rs"));
include!(concat!(env!("OUT_DIR"), "/chatter.v1.CommunityService.rs"));
include!(concat!(env!("OUT_DIR"), "/chatter.v1.MessageService.rs"));

/// A decoded request as the interceptor chain sees it
pub trait Inbound: std::fmt::Debug {
    const TYPE_NAME: &'static str;

    /// The username field, for types that carry one
    fn username(&self) -> Option<&str> {
        None
    }
}

macro_rules! inbound {
    ($($ty:ident),* $(,)?) => {
        $(impl Inbound for $ty {
            const TYPE_NAME: &'static str = concat!("chatter.v1.", stringify!($ty));
        })*
    };
}

inbound!(
    GenerateUserRequest,
    BanUserRequest,
    CreateCommunityRequest,
    CreateChannelRequest,
    ListCommunitiesRequest,
    ListChannelsRequest,
    ListMessagesRequest,
    SubscribeMessagesRequest,
);

impl Inbound for CreateUserRequest {
    const TYPE_NAME: &'static str = "chatter.v1.CreateUserRequest";

    fn username(&self) -> Option<&str> {
        Some(&self.uname)
    }
}

impl Inbound for Message {
    const TYPE_NAME: &'static str = "chatter.v1.Message";

    fn username(&self) -> Option<&str> {
        Some(&self.uname)
    }
}

impl From<model::Message> for Message {
    fn from(m: model::Message) -> Self {
        Self {
            msg_id: m.id.get(),
            channel_id: m.channel_id.get(),
            user_id: m.user_id.map_or(0, |u| u.get()),
            uname: m.uname,
            thread_id: m.thread_id.map_or(0, |t| t.get()),
            thread_child: m.thread_child,
            edited: m.edited,
            text: m.text,
            date: m.date,
        }
    }
}

impl From<model::Community> for Community {
    fn from(c: model::Community) -> Self {
        Self {
            community_id: c.id.get(),
            name: c.name,
            admin_id: c.admin_id.get(),
            public: c.public,
        }
    }
}

impl From<model::Channel> for Channel {
    fn from(c: model::Channel) -> Self {
        Self {
            channel_id: c.id.get(),
            name: c.name,
            community_id: c.community_id.get(),
            admin_id: c.admin_id.get(),
            anonymous: c.anonymous,
        }
    }
}

impl Message {
    /// The write request this message asks for
    pub fn to_new(&self) -> model::NewMessage {
        model::NewMessage {
            channel_id: model::ChannelId(self.channel_id),
            user_id: (self.user_id != 0).then_some(model::UserId(self.user_id)),
            thread_id: (self.thread_id != 0).then_some(model::MessageId(self.thread_id)),
            thread_child: self.thread_child,
            text: self.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatter_core::model::{ChannelId, MessageId, UserId};

    #[test]
    fn test_zero_means_absent() {
        let wire = Message {
            channel_id: 4,
            text: "hi".to_string(),
            ..Default::default()
        };
        let new = wire.to_new();
        assert_eq!(new.channel_id, ChannelId(4));
        assert_eq!(new.user_id, None);
        assert_eq!(new.thread_id, None);

        let stored = model::Message {
            id: MessageId(9),
            channel_id: ChannelId(4),
            user_id: None,
            uname: String::new(),
            thread_id: None,
            thread_child: false,
            edited: false,
            text: "hi".to_string(),
            date: 1,
        };
        let out = Message::from(stored);
        assert_eq!(out.user_id, 0);
        assert_eq!(out.thread_id, 0);
        assert_eq!(out.msg_id, 9);
    }

    #[test]
    fn test_author_carried_through() {
        let wire = Message {
            channel_id: 1,
            user_id: 7,
            thread_id: 3,
            thread_child: true,
            ..Default::default()
        };
        let new = wire.to_new();
        assert_eq!(new.user_id, Some(UserId(7)));
        assert_eq!(new.thread_id, Some(MessageId(3)));
        assert!(new.thread_child);
    }

    #[test]
    fn test_username_fields() {
        let create = CreateUserRequest {
            uname: "victim".to_string(),
            ..Default::default()
        };
        assert_eq!(create.username(), Some("victim"));
        assert_eq!(BanUserRequest::default().username(), None);
        assert_eq!(ListChannelsRequest::TYPE_NAME, "chatter.v1.ListChannelsRequest");
    }
}
