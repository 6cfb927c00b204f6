use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use chatter_core::metrics::{adjust_gauge, record_counter, MESSAGES_DELIVERED, MESSAGES_INGESTED, SUBSCRIPTIONS_ACTIVE};
use chatter_core::store::MessageQuery;
use chatter_core::shutdown::ShutdownSignal;
use chatter_core::{ChannelId, MessageId, Subscription};

use super::{list_stream, ResponseStream};
use crate::context::ServiceContext;
use crate::error::{ApiError, ApiResult};
use crate::interceptor::CallInfo;
use crate::proto::*;

const SEND_MESSAGES: &str = "/chatter.v1.MessageService/SendMessages";
const SEND_MESSAGE: &str = "/chatter.v1.MessageService/SendMessage";

pub struct MessageServiceImpl {
    ctx: Arc<ServiceContext>,
}

impl MessageServiceImpl {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }
}

/// Persist one message, then publish it to the channel's subscribers
async fn commit(ctx: &ServiceContext, message: &Message) -> ApiResult<chatter_core::Message> {
    let state = ctx.channel_state(ChannelId(message.channel_id)).await?;

    let new = message.to_new();
    if new.user_id.is_none() && !state.channel().anonymous {
        return Err(ApiError::InvalidArgument(format!(
            "Channel {} does not accept anonymous messages",
            state.id()
        )));
    }

    let _writer = state.writer().await;
    let stored = ctx.blocking(move |store| Ok(store.insert_message(&new)?)).await?;
    let seq = state.append(stored.clone());
    record_counter(MESSAGES_INGESTED, 1);
    debug!(channel_id = %stored.channel_id, msg_id = %stored.id, seq, "Message committed");

    Ok(stored)
}

/// Commit every message of an inbound stream in arrival order
///
/// Each message is committed on its own. The first invalid message ends the
/// call; messages before it stay committed and nothing after it is read.
pub async fn ingest<S>(ctx: &ServiceContext, info: &CallInfo, messages: S) -> ApiResult<usize>
where
    S: Stream<Item = Result<Message, Status>>,
{
    tokio::pin!(messages);
    let mut committed = 0;
    while let Some(message) = messages.next().await {
        let message = message?;
        ctx.received(info, SEND_MESSAGES, &message).await?;
        commit(ctx, &message).await?;
        committed += 1;
    }
    Ok(committed)
}

/// Forward a channel's new messages to one subscriber until it goes away
async fn forward(
    mut subscription: Subscription,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
    tx: mpsc::Sender<Result<Message, Status>>,
) {
    adjust_gauge(SUBSCRIPTIONS_ACTIVE, 1.0);
    debug!(channel_id = %subscription.channel_id(), from = subscription.position(), "Subscriber attached");

    loop {
        tokio::select! {
            message = subscription.next() => {
                if tx.send(Ok(message.into())).await.is_err() {
                    break;
                }
                record_counter(MESSAGES_DELIVERED, 1);
            }
            _ = tx.closed() => break,
            _ = shutdown.recv() => {
                let _ = tx.send(Err(Status::unavailable("Server is shutting down"))).await;
                break;
            }
        }
    }

    adjust_gauge(SUBSCRIPTIONS_ACTIVE, -1.0);
    debug!(channel_id = %subscription.channel_id(), until = subscription.position(), "Subscriber detached");
}

#[tonic::async_trait]
impl message_service_server::MessageService for MessageServiceImpl {
    type ListMessagesStream = ResponseStream<Message>;
    type SubscribeMessagesStream = ReceiverStream<Result<Message, Status>>;

    async fn send_messages(
        &self,
        request: Request<Streaming<Message>>,
    ) -> Result<Response<Empty>, Status> {
        let info = CallInfo::of(&request);
        let committed = ingest(&self.ctx, &info, request.into_inner()).await?;

        info!(committed, peer = info.peer.as_deref().unwrap_or("-"), "Message batch committed");
        Ok(Response::new(Empty {}))
    }

    async fn send_message(&self, request: Request<Message>) -> Result<Response<Message>, Status> {
        let info = CallInfo::of(&request);
        let message = request.into_inner();
        self.ctx.received(&info, SEND_MESSAGE, &message).await?;

        let stored = commit(&self.ctx, &message).await?;
        Ok(Response::new(stored.into()))
    }

    async fn list_messages(
        &self,
        request: Request<ListMessagesRequest>,
    ) -> Result<Response<Self::ListMessagesStream>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx
            .received(&info, "/chatter.v1.MessageService/ListMessages", &req)
            .await?;

        let mut query = MessageQuery::all();
        if req.after_id > 0 {
            query = query.after(MessageId(req.after_id));
        }
        if req.limit > 0 {
            query = query.limit(req.limit as usize);
        }

        let channel_id = ChannelId(req.channel_id);
        let messages = self
            .ctx
            .blocking(move |store| Ok(store.channel_messages(channel_id, &query)?))
            .await?;
        Ok(Response::new(list_stream(messages)))
    }

    async fn subscribe_messages(
        &self,
        request: Request<SubscribeMessagesRequest>,
    ) -> Result<Response<Self::SubscribeMessagesStream>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx
            .received(&info, "/chatter.v1.MessageService/SubscribeMessages", &req)
            .await?;

        let shutdown = self.ctx.shutdown.subscribe();
        if self.ctx.shutdown.is_shutting_down().await {
            return Err(Status::unavailable("Server is shutting down"));
        }

        let state = self.ctx.channel_state(ChannelId(req.channel_id)).await?;
        // live tail: the cursor starts at the current end of the channel
        let subscription = state.subscribe();
        let (tx, rx) = mpsc::channel(self.ctx.subscription_buffer);
        tokio::spawn(forward(subscription, shutdown, tx));

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
