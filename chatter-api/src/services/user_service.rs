use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use chatter_core::auth::generate_credentials;
use chatter_core::{Role, StoreError};

use crate::context::ServiceContext;
use crate::error::ApiError;
use crate::interceptor::CallInfo;
use crate::proto::*;

/// Attempts at finding an unused generated username
const GENERATE_ATTEMPTS: usize = 5;

pub struct UserServiceImpl {
    ctx: Arc<ServiceContext>,
}

impl UserServiceImpl {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }
}

#[tonic::async_trait]
impl user_service_server::UserService for UserServiceImpl {
    async fn create_user(
        &self,
        request: Request<CreateUserRequest>,
    ) -> Result<Response<CreateUserResponse>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx.received(&info, "/chatter.v1.UserService/CreateUser", &req).await?;

        if req.uname.is_empty() {
            return Err(ApiError::InvalidArgument("Username must not be empty".into()).into());
        }

        let user_id = self
            .ctx
            .blocking(move |store| Ok(store.create_user(&req.uname, &req.password, req.admin)?))
            .await?;

        info!(user_id = %user_id, "User created");
        Ok(Response::new(CreateUserResponse {
            user_id: user_id.get(),
        }))
    }

    async fn generate_user(
        &self,
        request: Request<GenerateUserRequest>,
    ) -> Result<Response<User>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx.received(&info, "/chatter.v1.UserService/GenerateUser", &req).await?;

        let user = self
            .ctx
            .blocking(|store| {
                let mut last = None;
                for _ in 0..GENERATE_ATTEMPTS {
                    let credentials = generate_credentials();
                    match store.create_user(&credentials.username, &credentials.token, false) {
                        Ok(user_id) => {
                            return Ok(User {
                                user_id: user_id.get(),
                                uname: credentials.username,
                                token: credentials.token,
                                admin: false,
                            })
                        }
                        Err(StoreError::Conflict(what)) => {
                            warn!("Generated username collided: {}", what);
                            last = Some(StoreError::Conflict(what));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(last.unwrap_or(StoreError::Conflict("generated username".into())).into())
            })
            .await?;

        info!(uname = %user.uname, "User generated");
        Ok(Response::new(user))
    }

    async fn ban_user(&self, request: Request<BanUserRequest>) -> Result<Response<Empty>, Status> {
        let info = CallInfo::of(&request);
        let req = request.into_inner();
        self.ctx.received(&info, "/chatter.v1.UserService/BanUser", &req).await?;

        let gate = self.ctx.gate.clone();
        let admin = tokio::task::spawn_blocking(move || gate.authorize(info.credentials.as_ref(), Role::Admin))
            .await
            .map_err(ApiError::from)?
            .map_err(ApiError::from)?;

        if req.days == 0 {
            return Err(ApiError::InvalidArgument("Ban duration must be at least one day".into()).into());
        }
        if req.uname.is_empty() {
            return Err(ApiError::InvalidArgument("Username must not be empty".into()).into());
        }

        let uname = req.uname.clone();
        self.ctx
            .blocking(move |store| Ok(store.ban_user(&uname, req.days)?))
            .await?;

        warn!(by = %admin.username, uname = %req.uname, days = req.days, "User banned");
        Ok(Response::new(Empty {}))
    }
}
