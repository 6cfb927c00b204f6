//! Ordered interceptor stages run around every call
//!
//! A stage is a check bound to one hook point. [`InterceptorChain`] runs the
//! stages of a hook point in insertion order and stops at the first abort.
//! Stages hold no mutable state of their own; ban records live in the store.

use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::metrics::CALLS_REJECTED;
use crate::store::ChatStore;

/// Longest message rendering kept in a call log line
pub const MAX_DUMP_LEN: usize = 256;

/// Where in a call a stage runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// After the call's metadata arrives, before any handler code
    PreDispatch,
    /// After each inbound message is decoded
    PostReceive,
}

/// A decoded inbound message, reduced to what stages look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub type_name: &'static str,
    /// Truncated debug rendering
    pub dump: String,
    /// The message's username field, if its type has one
    pub username: Option<String>,
}

impl InboundMessage {
    pub fn new(type_name: &'static str, message: &impl Debug, username: Option<&str>) -> Self {
        let mut dump = format!("{:?}", message);
        if dump.len() > MAX_DUMP_LEN {
            let mut cut = MAX_DUMP_LEN;
            while !dump.is_char_boundary(cut) {
                cut -= 1;
            }
            dump.truncate(cut);
            dump.push_str("...");
        }

        Self {
            type_name,
            dump,
            username: username.map(str::to_string),
        }
    }
}

/// What a stage can see of a call
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext<'a> {
    pub method: Option<&'a str>,
    /// Peer IP address
    pub peer: Option<&'a str>,
    /// Names of the metadata entries the caller sent
    pub metadata_keys: &'a [String],
    pub message: Option<&'a InboundMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The peer or user is banned
    Banned,
    /// The ban policy could not be consulted
    PolicyUnavailable,
}

/// A call aborted by a stage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Rejection {
    pub stage: &'static str,
    pub kind: RejectionKind,
    pub reason: String,
}

impl Rejection {
    pub fn banned(stage: &'static str, reason: impl Into<String>) -> Self {
        Self {
            stage,
            kind: RejectionKind::Banned,
            reason: reason.into(),
        }
    }

    pub fn policy_unavailable(stage: &'static str) -> Self {
        Self {
            stage,
            kind: RejectionKind::PolicyUnavailable,
            reason: "Ban policy unavailable".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Abort(Rejection),
}

/// One named check in the chain
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn hook(&self) -> HookPoint;

    /// May block on the store
    fn evaluate(&self, ctx: &CallContext<'_>) -> Verdict;
}

/// Rejects calls from banned peer addresses
pub struct IpBanStage {
    store: Arc<dyn ChatStore>,
}

impl IpBanStage {
    pub const NAME: &'static str = "ip-ban";

    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }
}

impl Stage for IpBanStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn hook(&self) -> HookPoint {
        HookPoint::PreDispatch
    }

    fn evaluate(&self, ctx: &CallContext<'_>) -> Verdict {
        let Some(peer) = ctx.peer else {
            return Verdict::Continue;
        };

        match self.store.is_ip_banned(peer) {
            Ok(false) => Verdict::Continue,
            Ok(true) => Verdict::Abort(Rejection::banned(Self::NAME, "Address is banned")),
            Err(e) => {
                error!(peer, error = %e, "IP ban lookup failed");
                Verdict::Abort(Rejection::policy_unavailable(Self::NAME))
            }
        }
    }
}

/// Logs each inbound message with its call metadata
pub struct CallLogStage;

impl CallLogStage {
    pub const NAME: &'static str = "call-log";
}

impl Stage for CallLogStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn hook(&self) -> HookPoint {
        HookPoint::PostReceive
    }

    fn evaluate(&self, ctx: &CallContext<'_>) -> Verdict {
        if let Some(message) = ctx.message {
            info!(
                method = ctx.method.unwrap_or("-"),
                peer = ctx.peer.unwrap_or("-"),
                request_type = message.type_name,
                "Received {}",
                message.dump
            );
        }
        debug!(keys = ?ctx.metadata_keys, "Client metadata");
        Verdict::Continue
    }
}

/// Rejects messages whose username field names a banned user
///
/// A live user ban also bans the caller's address.
pub struct UserBanStage {
    store: Arc<dyn ChatStore>,
}

impl UserBanStage {
    pub const NAME: &'static str = "user-ban";

    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }
}

impl Stage for UserBanStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn hook(&self) -> HookPoint {
        HookPoint::PostReceive
    }

    fn evaluate(&self, ctx: &CallContext<'_>) -> Verdict {
        let Some(username) = ctx
            .message
            .and_then(|m| m.username.as_deref())
            .filter(|u| !u.is_empty())
        else {
            return Verdict::Continue;
        };

        match self.store.is_user_banned(username, ctx.peer) {
            Ok(false) => Verdict::Continue,
            Ok(true) => Verdict::Abort(Rejection::banned(Self::NAME, "User is banned")),
            Err(e) => {
                error!(uname = username, error = %e, "User ban lookup failed");
                Verdict::Abort(Rejection::policy_unavailable(Self::NAME))
            }
        }
    }
}

/// Ordered list of stages
#[derive(Default)]
pub struct InterceptorChain {
    stages: Vec<Box<dyn Stage>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// IP ban check, call logging, then user ban check
    pub fn standard(store: Arc<dyn ChatStore>) -> Self {
        Self::new()
            .with_stage(IpBanStage::new(store.clone()))
            .with_stage(CallLogStage)
            .with_stage(UserBanStage::new(store))
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage bound to `hook`, stopping at the first abort
    pub fn run(&self, hook: HookPoint, ctx: &CallContext<'_>) -> Result<(), Rejection> {
        for stage in self.stages.iter().filter(|s| s.hook() == hook) {
            if let Verdict::Abort(rejection) = stage.evaluate(ctx) {
                warn!(
                    stage = rejection.stage,
                    method = ctx.method.unwrap_or("-"),
                    peer = ctx.peer.unwrap_or("-"),
                    "Call rejected: {}",
                    rejection.reason
                );
                metrics::counter!(CALLS_REJECTED, "stage" => rejection.stage).increment(1);
                return Err(rejection);
            }
        }
        Ok(())
    }

    pub fn pre_dispatch(&self, ctx: &CallContext<'_>) -> Result<(), Rejection> {
        self.run(HookPoint::PreDispatch, ctx)
    }

    pub fn post_receive(&self, ctx: &CallContext<'_>) -> Result<(), Rejection> {
        self.run(HookPoint::PostReceive, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_utils::FailingStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.create_user("victim", "t", false).unwrap();
        store.create_user("bystander", "t", false).unwrap();
        store.ban_user("victim", 3).unwrap();
        Arc::new(store)
    }

    struct Counting {
        hook: HookPoint,
        calls: Arc<AtomicUsize>,
    }

    impl Stage for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn hook(&self) -> HookPoint {
            self.hook
        }

        fn evaluate(&self, _ctx: &CallContext<'_>) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Verdict::Continue
        }
    }

    #[test]
    fn test_standard_order() {
        let chain = InterceptorChain::standard(store());
        assert_eq!(chain.stage_names(), vec!["ip-ban", "call-log", "user-ban"]);
    }

    #[test]
    fn test_banned_user_bans_peer() {
        let store = store();
        let chain = InterceptorChain::standard(store.clone());

        let message = InboundMessage::new("Message", &"hello", Some("victim"));
        let ctx = CallContext {
            method: Some("/chatter.v1.MessageService/SendMessage"),
            peer: Some("10.1.1.1"),
            message: Some(&message),
            ..Default::default()
        };

        let rejection = chain.post_receive(&ctx).unwrap_err();
        assert_eq!(rejection.stage, UserBanStage::NAME);
        assert_eq!(rejection.kind, RejectionKind::Banned);

        // the address is now refused before dispatch
        let rejection = chain.pre_dispatch(&ctx).unwrap_err();
        assert_eq!(rejection.stage, IpBanStage::NAME);
    }

    #[test]
    fn test_unbanned_calls_pass() {
        let chain = InterceptorChain::standard(store());

        let message = InboundMessage::new("Message", &"hello", Some("bystander"));
        let ctx = CallContext {
            peer: Some("10.1.1.2"),
            message: Some(&message),
            ..Default::default()
        };
        assert!(chain.pre_dispatch(&ctx).is_ok());
        assert!(chain.post_receive(&ctx).is_ok());

        // messages without a username field are not ban-checked
        let anonymous = InboundMessage::new("ChannelRequest", &5, None);
        let ctx = CallContext {
            message: Some(&anonymous),
            ..Default::default()
        };
        assert!(chain.post_receive(&ctx).is_ok());
    }

    #[test]
    fn test_abort_stops_later_stages() {
        let store = store();
        store.ban_user("bystander", 1).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let chain = InterceptorChain::new()
            .with_stage(UserBanStage::new(store))
            .with_stage(Counting {
                hook: HookPoint::PostReceive,
                calls: calls.clone(),
            });

        let message = InboundMessage::new("Message", &"x", Some("bystander"));
        let ctx = CallContext {
            message: Some(&message),
            ..Default::default()
        };
        assert!(chain.post_receive(&ctx).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // pre-dispatch does not run post-receive stages
        assert!(chain.pre_dispatch(&ctx).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lookup_failure_fails_closed() {
        let chain = InterceptorChain::standard(Arc::new(FailingStore));

        let ctx = CallContext {
            peer: Some("10.1.1.3"),
            ..Default::default()
        };
        let rejection = chain.pre_dispatch(&ctx).unwrap_err();
        assert_eq!(rejection.kind, RejectionKind::PolicyUnavailable);
        assert_eq!(rejection.stage, IpBanStage::NAME);

        // no peer address means nothing to look up
        assert!(chain.pre_dispatch(&CallContext::default()).is_ok());
    }

    #[test]
    fn test_dump_is_truncated() {
        let long = "x".repeat(MAX_DUMP_LEN * 2);
        let message = InboundMessage::new("Message", &long, None);
        assert!(message.dump.len() <= MAX_DUMP_LEN + 3);
        assert!(message.dump.ends_with("..."));
    }
}
