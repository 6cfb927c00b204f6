//! Concurrency tests for the channel broadcast engine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatter_core::model::{Channel, ChannelId, CommunityId, Message, MessageId, UserId};
use chatter_core::store::{ChatStore, MemoryStore};
use chatter_core::{ChannelRegistry, ChannelState};
use futures::future::join_all;
use proptest::prelude::*;

fn channel(id: i64) -> Channel {
    Channel {
        id: ChannelId(id),
        name: format!("channel-{}", id),
        community_id: CommunityId(1),
        admin_id: UserId(1),
        anonymous: true,
    }
}

/// `text` encodes the producer and its per-producer sequence number
fn message(producer: usize, n: usize) -> Message {
    Message {
        id: MessageId((producer * 1_000_000 + n) as i64),
        channel_id: ChannelId(1),
        user_id: None,
        uname: String::new(),
        thread_id: None,
        thread_child: false,
        edited: false,
        text: format!("{}:{}", producer, n),
        date: 0,
    }
}

fn parse(message: &Message) -> (usize, usize) {
    let (producer, n) = message.text.split_once(':').unwrap();
    (producer.parse().unwrap(), n.parse().unwrap())
}

/// Each producer's messages appear in the order it appended them
fn assert_per_producer_order(messages: &[Message]) {
    let mut last: HashMap<usize, usize> = HashMap::new();
    for message in messages {
        let (producer, n) = parse(message);
        if let Some(previous) = last.insert(producer, n) {
            assert!(n > previous, "producer {} reordered: {} after {}", producer, n, previous);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_keep_order() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 200;

    let state = Arc::new(ChannelState::new(channel(1)));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let state = state.clone();
            tokio::spawn(async move {
                for n in 0..PER_PRODUCER {
                    state.append(message(p, n));
                    if n % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    // snapshots taken mid-flight must be prefixes of the final sequence
    let mut snapshots = Vec::new();
    for _ in 0..20 {
        snapshots.push(state.snapshot());
        tokio::task::yield_now().await;
    }

    for result in join_all(producers).await {
        result.unwrap();
    }

    let full = state.snapshot();
    assert_eq!(full.len(), PRODUCERS * PER_PRODUCER);
    assert_per_producer_order(&full);

    for snapshot in snapshots {
        assert_eq!(snapshot.as_slice(), &full[..snapshot.len()]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscribers_see_every_message_in_order() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 250;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let state = Arc::new(ChannelState::new(channel(1)));

    let subscribers: Vec<_> = (0..3)
        .map(|_| {
            let mut subscription = state.subscribe();
            tokio::spawn(async move {
                let mut received = Vec::with_capacity(TOTAL);
                while received.len() < TOTAL {
                    received.push(subscription.next().await);
                }
                received
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let state = state.clone();
            tokio::spawn(async move {
                for n in 0..PER_PRODUCER {
                    state.append(message(p, n));
                }
            })
        })
        .collect();
    for result in join_all(producers).await {
        result.unwrap();
    }

    let full = state.snapshot();
    for subscriber in subscribers {
        let received = tokio::time::timeout(Duration::from_secs(5), subscriber)
            .await
            .expect("subscriber stalled")
            .unwrap();
        assert_eq!(received, full);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocked_waiter_is_woken_from_another_thread() {
    let state = Arc::new(ChannelState::new(channel(1)));

    for round in 0..50 {
        // whether the waiter parks before or after the append, it must return it
        let seq = state.len();
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_at(seq).await })
        };
        tokio::task::yield_now().await;

        let appender = {
            let state = state.clone();
            std::thread::spawn(move || state.append(message(0, round)))
        };
        assert_eq!(appender.join().unwrap(), seq);

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("lost wake-up")
            .unwrap();
        assert_eq!(parse(&received).1, round);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_materializes_once_under_contention() {
    let store = MemoryStore::new();
    let admin = store.create_user("admin1", "t", true).unwrap();
    let community = store.create_community("c", admin, true).unwrap();
    let channel = store.create_channel("general", community.id, admin, true).unwrap();

    let registry = Arc::new(ChannelRegistry::new(Arc::new(store)));

    let resolvers: Vec<_> = (0..32)
        .map(|_| {
            let registry = registry.clone();
            tokio::task::spawn_blocking(move || registry.resolve(channel.id).unwrap())
        })
        .collect();

    let mut states = Vec::new();
    for resolver in resolvers {
        states.push(resolver.await.unwrap());
    }

    assert!(states.iter().all(|s| Arc::ptr_eq(s, &states[0])));
    assert_eq!(registry.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_subscription_replays_exactly_what_was_appended(
        texts in prop::collection::vec("[a-z]{0,8}", 0..64),
        start in 0usize..8,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let state = Arc::new(ChannelState::new(channel(1)));

        for (n, text) in texts.iter().enumerate().take(start) {
            let mut m = message(0, n);
            m.text = text.clone();
            state.append(m);
        }

        let mut subscription = state.subscribe();
        let skipped = state.len() as usize;

        for (n, text) in texts.iter().enumerate().skip(start) {
            let mut m = message(0, n);
            m.text = text.clone();
            state.append(m);
        }

        let received: Vec<String> = runtime.block_on(async {
            let mut out = Vec::new();
            for _ in skipped..texts.len() {
                out.push(subscription.next().await.text);
            }
            out
        });

        prop_assert_eq!(&received[..], &texts[skipped..]);
        prop_assert!(subscription.try_next().is_none());
        prop_assert_eq!(state.snapshot().len(), texts.len());
    }
}
