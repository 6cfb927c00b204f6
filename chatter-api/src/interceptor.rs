//! Server-side call guard
//!
//! [`CallGuard`] runs the pre-dispatch stages when a call's metadata arrives
//! and stashes what the handlers need to know about the caller in a
//! [`CallInfo`] request extension.

use std::sync::Arc;

use chatter_core::{CallContext, Credentials, InterceptorChain};
use tokio::runtime::{Handle, RuntimeFlavor};
use tonic::metadata::{KeyRef, MetadataMap};
use tonic::service::Interceptor;
use tonic::{Request, Status};

use crate::credentials;
use crate::error::ApiError;

/// Caller details captured before dispatch
#[derive(Debug, Clone, Default)]
pub struct CallInfo {
    /// Peer IP address, without the port
    pub peer: Option<String>,
    pub credentials: Option<Credentials>,
    pub metadata_keys: Vec<String>,
}

impl CallInfo {
    fn capture<T>(request: &Request<T>) -> Self {
        Self {
            peer: request.remote_addr().map(|addr| addr.ip().to_string()),
            credentials: credentials::credentials(request.metadata()),
            metadata_keys: metadata_keys(request.metadata()),
        }
    }

    /// The guard's record, or a fresh capture for unguarded services
    pub fn of<T>(request: &Request<T>) -> Self {
        request
            .extensions()
            .get::<CallInfo>()
            .cloned()
            .unwrap_or_else(|| Self::capture(request))
    }

    pub fn context<'a>(&'a self, method: &'a str) -> CallContext<'a> {
        CallContext {
            method: Some(method),
            peer: self.peer.as_deref(),
            metadata_keys: &self.metadata_keys,
            message: None,
        }
    }
}

fn metadata_keys(metadata: &MetadataMap) -> Vec<String> {
    metadata
        .keys()
        .map(|key| match key {
            KeyRef::Ascii(k) => k.as_str().to_string(),
            KeyRef::Binary(k) => k.as_str().to_string(),
        })
        .collect()
}

/// Runs the pre-dispatch stages for every call of a service
#[derive(Clone)]
pub struct CallGuard {
    chain: Arc<InterceptorChain>,
}

impl CallGuard {
    pub fn new(chain: Arc<InterceptorChain>) -> Self {
        Self { chain }
    }

    fn check(&self, info: &CallInfo) -> Result<(), ApiError> {
        let ctx = CallContext {
            peer: info.peer.as_deref(),
            metadata_keys: &info.metadata_keys,
            ..Default::default()
        };
        // tonic interceptors are synchronous; the ban lookup may touch disk
        let run = || self.chain.pre_dispatch(&ctx);
        let outcome = match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(run),
            _ => run(),
        };
        Ok(outcome?)
    }
}

impl Interceptor for CallGuard {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let info = CallInfo::capture(&request);
        self.check(&info)?;
        request.extensions_mut().insert(info);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatter_core::auth::{AUTH_TOKEN_KEY, AUTH_UNAME_KEY};
    use chatter_core::test_utils::FailingStore;
    use chatter_core::MemoryStore;
    use tonic::Code;

    fn request() -> Request<()> {
        let mut request = Request::new(());
        request.metadata_mut().insert(AUTH_UNAME_KEY, "admin1".parse().unwrap());
        request.metadata_mut().insert(AUTH_TOKEN_KEY, "t".parse().unwrap());
        request
    }

    #[test]
    fn test_guard_records_call_info() {
        let chain = InterceptorChain::standard(Arc::new(MemoryStore::new()));
        let mut guard = CallGuard::new(Arc::new(chain));

        let request = guard.call(request()).unwrap();
        let info = CallInfo::of(&request);
        assert_eq!(info.credentials.unwrap().username, "admin1");
        assert!(info.metadata_keys.iter().any(|k| k == AUTH_TOKEN_KEY));
        // no transport, no peer
        assert_eq!(info.peer, None);
    }

    #[test]
    fn test_unguarded_request_is_captured_on_demand() {
        let info = CallInfo::of(&request());
        assert!(info.credentials.is_some());
        assert_eq!(info.context("/chatter.v1.UserService/BanUser").method, Some("/chatter.v1.UserService/BanUser"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_guard_passes_without_peer_even_if_store_fails() {
        // the IP stage has nothing to look up without a peer address
        let mut guard = CallGuard::new(Arc::new(InterceptorChain::standard(Arc::new(FailingStore))));
        assert!(guard.call(request()).is_ok());
    }

    #[test]
    fn test_rejection_becomes_status() {
        use chatter_core::intercept::{HookPoint, Stage, Verdict};
        use chatter_core::Rejection;

        struct Deny;
        impl Stage for Deny {
            fn name(&self) -> &'static str {
                "deny"
            }
            fn hook(&self) -> HookPoint {
                HookPoint::PreDispatch
            }
            fn evaluate(&self, _ctx: &CallContext<'_>) -> Verdict {
                Verdict::Abort(Rejection::banned("deny", "Address is banned"))
            }
        }

        let mut guard = CallGuard::new(Arc::new(InterceptorChain::new().with_stage(Deny)));
        let status = guard.call(request()).unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "Address is banned");
    }
}
