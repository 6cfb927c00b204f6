use std::sync::Arc;

use chatter_core::intercept::InboundMessage;
use chatter_core::shutdown::ShutdownCoordinator;
use chatter_core::{AuthorizationGate, ChannelId, ChannelRegistry, ChannelState, ChatStore, InterceptorChain};

use crate::error::{ApiError, ApiResult};
use crate::interceptor::CallInfo;
use crate::proto::Inbound;

/// Shared state behind every service
pub struct ServiceContext {
    pub store: Arc<dyn ChatStore>,
    pub registry: Arc<ChannelRegistry>,
    pub gate: AuthorizationGate,
    pub chain: Arc<InterceptorChain>,
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Per-subscriber outbound queue depth
    pub subscription_buffer: usize,
}

impl ServiceContext {
    pub fn new(store: Arc<dyn ChatStore>, shutdown: Arc<ShutdownCoordinator>, subscription_buffer: usize) -> Self {
        Self {
            registry: Arc::new(ChannelRegistry::new(store.clone())),
            gate: AuthorizationGate::new(store.clone()),
            chain: Arc::new(InterceptorChain::standard(store.clone())),
            store,
            shutdown,
            subscription_buffer,
        }
    }

    /// Run store work off the async workers
    pub async fn blocking<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&dyn ChatStore) -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    /// Post-receive stages for one decoded inbound message
    pub async fn received<M: Inbound>(&self, info: &CallInfo, method: &'static str, message: &M) -> ApiResult<()> {
        let inbound = InboundMessage::new(M::TYPE_NAME, message, message.username());
        let chain = self.chain.clone();
        let info = info.clone();

        tokio::task::spawn_blocking(move || {
            let ctx = chatter_core::CallContext {
                message: Some(&inbound),
                ..info.context(method)
            };
            chain.post_receive(&ctx).map_err(ApiError::from)
        })
        .await?
    }

    /// The channel's live state, materializing it on first use
    pub async fn channel_state(&self, id: ChannelId) -> ApiResult<Arc<ChannelState>> {
        if let Some(state) = self.registry.get(id) {
            return Ok(state);
        }
        let registry = self.registry.clone();
        Ok(tokio::task::spawn_blocking(move || registry.resolve(id)).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatter_core::test_utils::{seeded_memory_store, FailingStore};
    use std::time::Duration;
    use tonic::Code;

    fn context(store: Arc<dyn ChatStore>) -> ServiceContext {
        ServiceContext::new(store, Arc::new(ShutdownCoordinator::new(Duration::from_secs(1))), 8)
    }

    #[tokio::test]
    async fn test_channel_state_materializes_once() {
        let (store, seeded) = seeded_memory_store();
        let ctx = context(store);

        let a = ctx.channel_state(seeded.channel.id).await.unwrap();
        let b = ctx.channel_state(seeded.channel.id).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(ctx.registry.len(), 1);

        let err = ctx.channel_state(ChannelId(999)).await.unwrap_err();
        assert_eq!(tonic::Status::from(err).code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_received_rejects_banned_username() {
        let (store, _) = seeded_memory_store();
        store.create_user("victim", "t", false).unwrap();
        store.ban_user("victim", 1).unwrap();
        let ctx = context(store.clone());

        let info = CallInfo {
            peer: Some("10.0.0.9".to_string()),
            ..Default::default()
        };
        let message = crate::proto::Message {
            uname: "victim".to_string(),
            ..Default::default()
        };
        let err = ctx.received(&info, "SendMessage", &message).await.unwrap_err();
        assert_eq!(tonic::Status::from(err).code(), Code::Unauthenticated);
        assert!(store.is_ip_banned("10.0.0.9").unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let ctx = context(Arc::new(FailingStore));
        let err = ctx.blocking(|store| Ok(store.communities()?)).await.unwrap_err();
        assert_eq!(tonic::Status::from(err).code(), Code::Internal);
    }
}
