use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing::info;

use crate::context::ServiceContext;
use crate::interceptor::CallGuard;
use crate::proto::community_service_server::CommunityServiceServer;
use crate::proto::message_service_server::MessageServiceServer;
use crate::proto::user_service_server::UserServiceServer;
use crate::services::{CommunityServiceImpl, MessageServiceImpl, UserServiceImpl};

/// All three services, each behind the call guard
pub fn router(ctx: Arc<ServiceContext>) -> Router {
    let guard = CallGuard::new(ctx.chain.clone());

    Server::builder()
        .add_service(UserServiceServer::with_interceptor(
            UserServiceImpl::new(ctx.clone()),
            guard.clone(),
        ))
        .add_service(CommunityServiceServer::with_interceptor(
            CommunityServiceImpl::new(ctx.clone()),
            guard.clone(),
        ))
        .add_service(MessageServiceServer::with_interceptor(
            MessageServiceImpl::new(ctx),
            guard,
        ))
}

/// Serve on `listener` until `signal` resolves
pub async fn serve<F>(listener: TcpListener, ctx: Arc<ServiceContext>, signal: F) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!("gRPC server listening on {}", addr);
    }

    router(ctx)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
        .await
}
