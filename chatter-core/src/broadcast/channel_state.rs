//! Append-only message log for one channel with async wake-ups

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, MutexGuard, Notify};
use tracing::trace;

use crate::model::{Channel, ChannelId, Message};

/// In-memory message sequence of one channel
///
/// Messages are kept in arrival order and never removed. Every append wakes
/// all tasks currently waiting on the state. Positions in the sequence are
/// plain indices starting at 0.
#[derive(Debug)]
pub struct ChannelState {
    channel: Channel,
    messages: RwLock<Vec<Message>>,
    appended: Notify,
    writer: Mutex<()>,
}

impl ChannelState {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            messages: RwLock::new(Vec::new()),
            appended: Notify::new(),
            writer: Mutex::new(()),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn id(&self) -> ChannelId {
        self.channel.id
    }

    // append-only, so a poisoned guard still holds a consistent prefix
    fn read(&self) -> RwLockReadGuard<'_, Vec<Message>> {
        self.messages.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Message>> {
        self.messages.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive write path of the channel
    ///
    /// Held from the store insert until [`ChannelState::append`] returns, so the
    /// sequence follows the order the store assigned ids in.
    pub async fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// Append `message` and wake every waiter, returning its position
    ///
    /// The caller is responsible for `message.channel_id` matching this channel.
    pub fn append(&self, message: Message) -> u64 {
        let seq = {
            let mut messages = self.write();
            messages.push(message);
            (messages.len() - 1) as u64
        };

        // after the push: a waiter that registered before this point is woken,
        // one that registers later finds the message on its re-check
        self.appended.notify_waiters();
        trace!(channel = %self.channel.id, seq, "Appended message");
        seq
    }

    pub fn len(&self) -> u64 {
        self.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn last_message(&self) -> Option<Message> {
        self.read().last().cloned()
    }

    pub fn message_at(&self, seq: u64) -> Option<Message> {
        let index = usize::try_from(seq).ok()?;
        self.read().get(index).cloned()
    }

    /// Point-in-time copy of every message recorded so far
    pub fn snapshot(&self) -> Vec<Message> {
        self.read().clone()
    }

    /// Wait until the message at `seq` exists and return it
    pub async fn wait_at(&self, seq: u64) -> Message {
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // register before checking so an append between the check and the
            // await still wakes us
            notified.as_mut().enable();

            if let Some(message) = self.message_at(seq) {
                return message;
            }

            notified.await;
        }
    }

    /// Wait for the first message appended after this call
    pub async fn wait_next(&self) -> Message {
        let seq = self.len();
        self.wait_at(seq).await
    }

    /// Cursor positioned at the current tail
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        Subscription {
            next: self.len(),
            state: Arc::clone(self),
        }
    }

    /// Cursor positioned at `seq`; earlier positions are skipped
    pub fn subscribe_from(self: &Arc<Self>, seq: u64) -> Subscription {
        Subscription {
            next: seq,
            state: Arc::clone(self),
        }
    }
}

/// Per-subscriber cursor over a [`ChannelState`]
///
/// Yields every message from its starting position on, in order, without
/// skipping or repeating any.
#[derive(Debug)]
pub struct Subscription {
    state: Arc<ChannelState>,
    next: u64,
}

impl Subscription {
    /// Position of the next message this subscription will yield
    pub fn position(&self) -> u64 {
        self.next
    }

    pub fn channel_id(&self) -> ChannelId {
        self.state.id()
    }

    /// Next message, waiting for it if necessary
    ///
    /// Cancel safe: dropping the future before it completes does not advance
    /// the cursor.
    pub async fn next(&mut self) -> Message {
        let message = self.state.wait_at(self.next).await;
        self.next += 1;
        message
    }

    /// Next message if it has already been appended
    pub fn try_next(&mut self) -> Option<Message> {
        let message = self.state.message_at(self.next)?;
        self.next += 1;
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommunityId, MessageId, UserId};
    use crate::test_utils::{stays_pending, within};
    use std::time::Duration;

    fn state() -> Arc<ChannelState> {
        Arc::new(ChannelState::new(Channel {
            id: ChannelId(5),
            name: "general".to_string(),
            community_id: CommunityId(1),
            admin_id: UserId(1),
            anonymous: false,
        }))
    }

    fn message(id: i64, text: &str) -> Message {
        Message {
            id: MessageId(id),
            channel_id: ChannelId(5),
            user_id: Some(UserId(1)),
            uname: "admin1".to_string(),
            thread_id: None,
            thread_child: false,
            edited: false,
            text: text.to_string(),
            date: 0,
        }
    }

    #[test]
    fn test_append_and_snapshot() {
        let state = state();
        assert!(state.is_empty());
        assert!(state.last_message().is_none());

        assert_eq!(state.append(message(1, "a")), 0);
        assert_eq!(state.append(message(2, "b")), 1);

        let snapshot = state.snapshot();
        state.append(message(3, "c"));

        let texts: Vec<_> = snapshot.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(state.len(), 3);
        assert_eq!(state.last_message().unwrap().text, "c");
        assert_eq!(state.message_at(1).unwrap().text, "b");
        assert!(state.message_at(3).is_none());
    }

    #[tokio::test]
    async fn test_wait_next_ignores_backlog() {
        let state = state();
        state.append(message(1, "old"));

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.append(message(2, "new"));

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();
        assert_eq!(received.text, "new");
    }

    #[tokio::test]
    async fn test_all_blocked_waiters_are_woken() {
        let state = state();

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { state.wait_next().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.append(message(1, "hello"));

        for waiter in waiters {
            let received = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter was not woken")
                .unwrap();
            assert_eq!(received.text, "hello");
        }
    }

    #[tokio::test]
    async fn test_subscription_does_not_skip_back_to_back_appends() {
        let state = state();
        let mut subscription = state.subscribe();

        // appended before the subscriber ever polls
        state.append(message(1, "a"));
        state.append(message(2, "b"));
        state.append(message(3, "c"));

        let mut texts = Vec::new();
        for _ in 0..3 {
            texts.push(subscription.next().await.text);
        }
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(subscription.position(), 3);
        assert!(subscription.try_next().is_none());
    }

    #[tokio::test]
    async fn test_subscription_starts_at_tail() {
        let state = state();
        state.append(message(1, "before"));

        let mut subscription = state.subscribe();
        state.append(message(2, "after"));

        assert_eq!(subscription.next().await.text, "after");
        assert_eq!(state.subscribe_from(0).next().await.text, "before");
    }

    #[tokio::test]
    async fn test_writer_is_exclusive() {
        let state = state();

        let held = state.writer().await;
        assert!(stays_pending(Duration::from_millis(20), state.writer()).await);

        drop(held);
        let _next = within("second writer", state.writer()).await;
    }

    #[tokio::test]
    async fn test_cancelled_next_does_not_advance() {
        let state = state();
        let mut subscription = state.subscribe();

        assert!(stays_pending(Duration::from_millis(20), subscription.next()).await);
        assert_eq!(subscription.position(), 0);

        state.append(message(1, "late"));
        assert_eq!(subscription.next().await.text, "late");
    }
}
