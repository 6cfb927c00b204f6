mod community_service;
mod message_service;
mod user_service;

pub use community_service::CommunityServiceImpl;
pub use message_service::{ingest, MessageServiceImpl};
pub use user_service::UserServiceImpl;

use std::pin::Pin;
use tokio_stream::Stream;
use tonic::Status;

/// Boxed server-streaming response
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// A finished list sent as a server stream
fn list_stream<T, U>(items: Vec<T>) -> ResponseStream<U>
where
    T: Into<U>,
    U: Send + 'static,
{
    let items: Vec<Result<U, Status>> = items.into_iter().map(|item| Ok(item.into())).collect();
    Box::pin(tokio_stream::iter(items))
}
