//! Data model shared by the store, the broadcast engine and the api

mod types;

pub use types::{
    now_millis, Channel, ChannelId, Community, CommunityId, Identity, Message, MessageId, NewMessage,
    Role, User, UserId,
};
