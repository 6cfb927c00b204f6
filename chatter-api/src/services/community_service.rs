use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::info;

use chatter_core::{CommunityId, UserId};

use super::{list_stream, ResponseStream};
use crate::context::ServiceContext;
use crate::error::ApiError;
use crate::interceptor::CallInfo;
use crate::proto::*;

pub struct CommunityServiceImpl {
    ctx: Arc<ServiceContext>,
}

impl CommunityServiceImpl {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }
}

fn require_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::InvalidArgument("Name must not be empty".into()));
    }
    Ok(())
}

#[tonic::async_trait]
impl community_service_server::CommunityService for CommunityServiceImpl {
    type ListCommunitiesStream = ResponseStream<Community>;
    type ListChannelsStream = ResponseStream<Channel>;

    async fn create_community(
        &self,
        request: Request<CreateCommunityRequest>,
    ) -> Result<Response<Community>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx.received(&info, "/chatter.v1.CommunityService/CreateCommunity", &req).await?;
        require_name(&req.name)?;

        let community = self
            .ctx
            .blocking(move |store| Ok(store.create_community(&req.name, UserId(req.admin_id), req.public)?))
            .await?;

        info!(community_id = %community.id, name = %community.name, "Community created");
        Ok(Response::new(community.into()))
    }

    async fn create_channel(
        &self,
        request: Request<CreateChannelRequest>,
    ) -> Result<Response<Channel>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx.received(&info, "/chatter.v1.CommunityService/CreateChannel", &req).await?;
        require_name(&req.name)?;

        let channel = self
            .ctx
            .blocking(move |store| {
                Ok(store.create_channel(
                    &req.name,
                    CommunityId(req.community_id),
                    UserId(req.admin_id),
                    req.anonymous,
                )?)
            })
            .await?;

        // live before any subscriber asks for it
        self.ctx.registry.register(channel.clone());

        info!(channel_id = %channel.id, name = %channel.name, "Channel created");
        Ok(Response::new(channel.into()))
    }

    async fn list_communities(
        &self,
        request: Request<ListCommunitiesRequest>,
    ) -> Result<Response<Self::ListCommunitiesStream>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx.received(&info, "/chatter.v1.CommunityService/ListCommunities", &req).await?;

        let communities = self.ctx.blocking(|store| Ok(store.communities()?)).await?;
        Ok(Response::new(list_stream(communities)))
    }

    async fn list_channels(
        &self,
        request: Request<ListChannelsRequest>,
    ) -> Result<Response<Self::ListChannelsStream>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx.received(&info, "/chatter.v1.CommunityService/ListChannels", &req).await?;

        let community_id = CommunityId(req.community_id);
        let channels = self
            .ctx
            .blocking(move |store| Ok(store.community_channels(community_id)?))
            .await?;
        Ok(Response::new(list_stream(channels)))
    }
}
