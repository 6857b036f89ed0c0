use std::sync::Arc;

use futures_util::TryStreamExt;
use pretty_assertions::assert_eq;

use super::*;
use crate::gateway::{KvGateway, MemoryGateway};
use crate::topic::{FilterListMatcher, TopicMatcher};

fn setup() -> (Arc<MemoryGateway>, Persistence) {
    let gateway = Arc::new(MemoryGateway::new());
    let persistence = Persistence::new(
        gateway.clone(),
        PersistenceOptions {
            broker_id: "b1".to_string(),
            scan_count: 2,
            ..Default::default()
        },
    );
    (gateway, persistence)
}

async fn exists(gateway: &MemoryGateway, key: &str) -> bool {
    gateway
        .execute(Command::Exists(key.to_string()))
        .await
        .unwrap()
        .as_int()
        .unwrap()
        == 1
}

fn sorted_topics(packets: &[Packet]) -> Vec<&str> {
    let mut topics: Vec<&str> = packets.iter().map(|p| p.topic.as_str()).collect();
    topics.sort_unstable();
    topics
}

#[tokio::test]
async fn test_retained_store_and_stream() {
    let (_, persistence) = setup();

    for topic in ["a/b", "a/c", "a/b/c", "x/y", "$SYS/uptime"] {
        persistence
            .store_retained(&Packet::publish(topic, b"v".to_vec(), QoS::AtMostOnce))
            .await
            .unwrap();
    }

    let found: Vec<Packet> = persistence
        .create_retained_stream("a/+")
        .try_collect()
        .await
        .unwrap();
    assert_eq!(sorted_topics(&found), vec!["a/b", "a/c"]);

    let found: Vec<Packet> = persistence
        .create_retained_stream("#")
        .try_collect()
        .await
        .unwrap();
    assert_eq!(
        sorted_topics(&found),
        vec!["$SYS/uptime", "a/b", "a/b/c", "a/c", "x/y"]
    );

    let found: Vec<Packet> = persistence
        .create_retained_stream("+/uptime")
        .try_collect()
        .await
        .unwrap();
    assert_eq!(sorted_topics(&found), vec!["$SYS/uptime"]);

    let found: Vec<Packet> = persistence
        .create_retained_stream("$SYS/#")
        .try_collect()
        .await
        .unwrap();
    assert_eq!(sorted_topics(&found), vec!["$SYS/uptime"]);
}

#[tokio::test]
async fn test_empty_retained_payload_clears_topic() {
    let (gateway, persistence) = setup();

    persistence
        .store_retained(&Packet::publish("x/y", vec![1, 2, 3], QoS::AtLeastOnce))
        .await
        .unwrap();
    assert!(exists(&gateway, "retained:x/y").await);

    persistence
        .store_retained(&Packet::publish("x/y", Vec::new(), QoS::AtLeastOnce))
        .await
        .unwrap();
    assert!(!exists(&gateway, "retained:x/y").await);

    let found: Vec<Packet> = persistence
        .create_retained_stream("x/#")
        .try_collect()
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_retained_stream_restarts() {
    let (_, persistence) = setup();
    persistence
        .store_retained(&Packet::publish("t", b"1".to_vec(), QoS::AtMostOnce))
        .await
        .unwrap();

    for _ in 0..2 {
        let found: Vec<Packet> = persistence
            .create_retained_stream("t")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload, b"1".to_vec());
    }
}

#[tokio::test]
async fn test_subscriptions_by_client() {
    let (_, persistence) = setup();
    assert_eq!(persistence.subscriptions_by_client("c1").await.unwrap(), None);

    persistence
        .add_subscriptions(
            "c1",
            &[
                Subscription::new("a/+", QoS::AtLeastOnce),
                Subscription::new("b", QoS::AtMostOnce),
            ],
        )
        .await
        .unwrap();

    let mut subs = persistence
        .subscriptions_by_client("c1")
        .await
        .unwrap()
        .unwrap();
    subs.sort_by(|a, b| a.topic.cmp(&b.topic));
    assert_eq!(
        subs,
        vec![
            Subscription::new("a/+", QoS::AtLeastOnce),
            Subscription::new("b", QoS::AtMostOnce),
        ]
    );
}

#[tokio::test]
async fn test_subscriptions_by_topic_skips_qos0() {
    let (_, persistence) = setup();

    persistence
        .add_subscriptions(
            "c1",
            &[
                Subscription::new("a/+", QoS::AtLeastOnce),
                Subscription::new("a/#", QoS::AtMostOnce),
            ],
        )
        .await
        .unwrap();
    persistence
        .add_subscriptions("c2", &[Subscription::new("a/b", QoS::ExactlyOnce)])
        .await
        .unwrap();
    persistence
        .add_subscriptions("c3", &[Subscription::new("z", QoS::AtLeastOnce)])
        .await
        .unwrap();

    let mut found = persistence.subscriptions_by_topic("a/b").await.unwrap();
    found.sort_by(|a, b| a.client_id.cmp(&b.client_id));
    assert_eq!(
        found,
        vec![
            TopicSubscriber {
                client_id: "c1".to_string(),
                topic: "a/+".to_string(),
                qos: QoS::AtLeastOnce,
            },
            TopicSubscriber {
                client_id: "c2".to_string(),
                topic: "a/b".to_string(),
                qos: QoS::ExactlyOnce,
            },
        ]
    );
}

#[tokio::test]
async fn test_subscriptions_by_topic_matches_dollar_topics() {
    let (_, persistence) = setup();

    persistence
        .add_subscriptions("c1", &[Subscription::new("#", QoS::AtLeastOnce)])
        .await
        .unwrap();
    persistence
        .add_subscriptions("c2", &[Subscription::new("+/uptime", QoS::AtLeastOnce)])
        .await
        .unwrap();
    persistence
        .add_subscriptions("c3", &[Subscription::new("$SYS/load", QoS::AtLeastOnce)])
        .await
        .unwrap();

    let mut found = persistence.subscriptions_by_topic("$SYS/uptime").await.unwrap();
    found.sort_by(|a, b| a.client_id.cmp(&b.client_id));
    assert_eq!(
        found,
        vec![
            TopicSubscriber {
                client_id: "c1".to_string(),
                topic: "#".to_string(),
                qos: QoS::AtLeastOnce,
            },
            TopicSubscriber {
                client_id: "c2".to_string(),
                topic: "+/uptime".to_string(),
                qos: QoS::AtLeastOnce,
            },
        ]
    );
}

#[tokio::test]
async fn test_subscriptions_by_topic_with_wildcard_query() {
    let (_, persistence) = setup();

    for (client_id, pattern) in [("c1", "a/+"), ("c2", "a/#"), ("c3", "#"), ("c4", "a/b")] {
        persistence
            .add_subscriptions(client_id, &[Subscription::new(pattern, QoS::AtLeastOnce)])
            .await
            .unwrap();
    }

    // Query levels are taken literally: only stored wildcards cover them
    for query in ["a/#", "a/+"] {
        let mut found = persistence.subscriptions_by_topic(query).await.unwrap();
        found.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        let patterns: Vec<(&str, &str)> = found
            .iter()
            .map(|sub| (sub.client_id.as_str(), sub.topic.as_str()))
            .collect();
        assert_eq!(
            patterns,
            vec![("c1", "a/+"), ("c2", "a/#"), ("c3", "#")],
            "query {}",
            query
        );
    }

    let found = persistence.subscriptions_by_topic("a/b/#").await.unwrap();
    let mut clients: Vec<&str> = found.iter().map(|sub| sub.client_id.as_str()).collect();
    clients.sort_unstable();
    assert_eq!(clients, vec!["c2", "c3"]);
}

#[tokio::test]
async fn test_offline_counters_track_subscriptions() {
    let (_, persistence) = setup();
    assert_eq!(persistence.count_offline().await.unwrap(), OfflineCount::default());

    persistence
        .add_subscriptions(
            "c1",
            &[
                Subscription::new("a", QoS::AtLeastOnce),
                Subscription::new("b", QoS::ExactlyOnce),
                Subscription::new("c", QoS::AtMostOnce),
            ],
        )
        .await
        .unwrap();
    persistence
        .add_subscriptions("c2", &[Subscription::new("a", QoS::AtLeastOnce)])
        .await
        .unwrap();

    assert_eq!(
        persistence.count_offline().await.unwrap(),
        OfflineCount {
            subscriptions: 3,
            clients: 2,
        }
    );

    persistence.remove_subscriptions("c1", &["a", "b", "c"]).await.unwrap();
    persistence.remove_subscriptions("c2", &["a"]).await.unwrap();

    assert_eq!(persistence.count_offline().await.unwrap(), OfflineCount::default());
    assert_eq!(persistence.subscriptions_by_client("c1").await.unwrap(), None);
}

#[tokio::test]
async fn test_resubscribe_does_not_double_count() {
    let (_, persistence) = setup();
    let subs = [Subscription::new("a", QoS::AtLeastOnce)];

    persistence.add_subscriptions("c1", &subs).await.unwrap();
    persistence.add_subscriptions("c1", &subs).await.unwrap();
    assert_eq!(
        persistence.count_offline().await.unwrap(),
        OfflineCount {
            subscriptions: 1,
            clients: 1,
        }
    );

    // Downgrading to QoS 0 drops the client from the topic index
    persistence
        .add_subscriptions("c1", &[Subscription::new("a", QoS::AtMostOnce)])
        .await
        .unwrap();
    assert_eq!(
        persistence.count_offline().await.unwrap(),
        OfflineCount {
            subscriptions: 0,
            clients: 1,
        }
    );
    assert!(persistence.subscriptions_by_topic("a").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_remove_keeps_client() {
    let (_, persistence) = setup();
    persistence
        .add_subscriptions(
            "c1",
            &[
                Subscription::new("a", QoS::AtLeastOnce),
                Subscription::new("b", QoS::AtLeastOnce),
            ],
        )
        .await
        .unwrap();

    persistence.remove_subscriptions("c1", &["a", "missing"]).await.unwrap();

    assert_eq!(
        persistence.count_offline().await.unwrap(),
        OfflineCount {
            subscriptions: 1,
            clients: 1,
        }
    );
    assert_eq!(
        persistence.subscriptions_by_client("c1").await.unwrap(),
        Some(vec![Subscription::new("b", QoS::AtLeastOnce)])
    );
}

#[tokio::test]
async fn test_clean_subscriptions() {
    let (gateway, persistence) = setup();
    persistence
        .add_subscriptions(
            "c1",
            &[
                Subscription::new("a", QoS::AtLeastOnce),
                Subscription::new("b", QoS::AtMostOnce),
            ],
        )
        .await
        .unwrap();

    persistence.clean_subscriptions("c1").await.unwrap();

    assert_eq!(persistence.subscriptions_by_client("c1").await.unwrap(), None);
    assert!(!exists(&gateway, "sub:client:a").await);
    assert_eq!(persistence.count_offline().await.unwrap(), OfflineCount::default());

    // Cleaning again is a no-op
    persistence.clean_subscriptions("c1").await.unwrap();
    assert_eq!(persistence.count_offline().await.unwrap(), OfflineCount::default());
}

#[tokio::test]
async fn test_outgoing_lifecycle_leaves_no_keys() {
    let (gateway, persistence) = setup();
    let sub = TopicSubscriber {
        client_id: "c1".to_string(),
        topic: "t".to_string(),
        qos: QoS::AtLeastOnce,
    };
    let packet = Packet::publish("t", b"hello".to_vec(), QoS::AtLeastOnce).with_broker("b1", 7);

    persistence.outgoing_enqueue(&sub, &packet).await.unwrap();
    assert!(exists(&gateway, "outgoing:c1:b1:7").await);

    let queued: Vec<Packet> = persistence.outgoing_stream("c1").try_collect().await.unwrap();
    assert_eq!(queued, vec![packet.clone()]);

    let delivered = packet.with_message_id(42);
    persistence.outgoing_update("c1", &delivered).await.unwrap();
    assert!(exists(&gateway, "outgoing-id:c1:42").await);

    let cleared = persistence
        .outgoing_clear_message_id("c1", &Packet::default().with_message_id(42))
        .await
        .unwrap();
    assert_eq!(cleared, delivered);

    assert!(!exists(&gateway, "outgoing:c1:b1:7").await);
    assert!(!exists(&gateway, "outgoing-id:c1:42").await);
    assert!(gateway.is_empty());
}

#[tokio::test]
async fn test_enqueue_drops_message_id() {
    let (_, persistence) = setup();
    let sub = TopicSubscriber {
        client_id: "c1".to_string(),
        topic: "t".to_string(),
        qos: QoS::AtLeastOnce,
    };
    let packet = Packet::publish("t", b"p".to_vec(), QoS::AtLeastOnce)
        .with_broker("b1", 1)
        .with_message_id(5);

    persistence.outgoing_enqueue(&sub, &packet).await.unwrap();

    let queued: Vec<Packet> = persistence.outgoing_stream("c1").try_collect().await.unwrap();
    assert_eq!(queued[0].message_id, None);
}

#[tokio::test]
async fn test_enqueue_requires_broker_id() {
    let (_, persistence) = setup();
    let sub = TopicSubscriber {
        client_id: "c1".to_string(),
        topic: "t".to_string(),
        qos: QoS::AtLeastOnce,
    };

    let result = persistence
        .outgoing_enqueue(&sub, &Packet::publish("t", b"p".to_vec(), QoS::AtLeastOnce))
        .await;
    assert!(matches!(result, Err(PersistenceError::InvalidPacket(_))));
}

#[tokio::test]
async fn test_outgoing_update_fills_broker_coordinates() {
    let (_, persistence) = setup();
    let sub = TopicSubscriber {
        client_id: "c1".to_string(),
        topic: "t".to_string(),
        qos: QoS::ExactlyOnce,
    };
    let packet = Packet::publish("t", b"p".to_vec(), QoS::ExactlyOnce).with_broker("b2", 3);
    persistence.outgoing_enqueue(&sub, &packet).await.unwrap();
    persistence
        .outgoing_update("c1", &packet.clone().with_message_id(9))
        .await
        .unwrap();

    // A pubrel-style packet only knows its message id
    let mut pubrel = Packet::default().with_message_id(9);
    pubrel.cmd = "pubrel".to_string();
    let stored = persistence.outgoing_update("c1", &pubrel).await.unwrap();

    assert_eq!(stored.cmd, "pubrel");
    assert_eq!(stored.broker_id.as_deref(), Some("b2"));
    assert_eq!(stored.broker_counter, 3);

    let queued: Vec<Packet> = persistence.outgoing_stream("c1").try_collect().await.unwrap();
    assert_eq!(queued, vec![stored]);
}

#[tokio::test]
async fn test_outgoing_update_unknown_message_id() {
    let (_, persistence) = setup();
    let result = persistence
        .outgoing_update("c1", &Packet::default().with_message_id(1))
        .await;
    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_outgoing_update_replaces_stale_message_id() {
    let (gateway, persistence) = setup();
    let sub = TopicSubscriber {
        client_id: "c1".to_string(),
        topic: "t".to_string(),
        qos: QoS::AtLeastOnce,
    };
    let packet = Packet::publish("t", b"p".to_vec(), QoS::AtLeastOnce).with_broker("b1", 1);
    persistence.outgoing_enqueue(&sub, &packet).await.unwrap();

    persistence
        .outgoing_update("c1", &packet.clone().with_message_id(1))
        .await
        .unwrap();
    persistence
        .outgoing_update("c1", &packet.clone().with_message_id(2))
        .await
        .unwrap();

    assert!(!exists(&gateway, "outgoing-id:c1:1").await);
    assert!(exists(&gateway, "outgoing-id:c1:2").await);
}

#[tokio::test]
async fn test_clear_unknown_message_id_is_not_found() {
    let (gateway, persistence) = setup();

    let result = persistence
        .outgoing_clear_message_id("c1", &Packet::default().with_message_id(42))
        .await;

    assert!(result.unwrap_err().is_not_found());
    assert!(gateway.is_empty());
}

#[tokio::test]
async fn test_incoming_packets() {
    let (_, persistence) = setup();
    let packet = Packet::publish("t", b"p".to_vec(), QoS::ExactlyOnce).with_message_id(11);

    persistence.incoming_store_packet("c1", &packet).await.unwrap();
    assert_eq!(persistence.incoming_get_packet("c1", 11).await.unwrap(), packet);

    persistence.incoming_del_packet("c1", 11).await.unwrap();
    let result = persistence.incoming_get_packet("c1", 11).await;
    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_incoming_requires_message_id() {
    let (_, persistence) = setup();
    let result = persistence
        .incoming_store_packet("c1", &Packet::publish("t", b"p".to_vec(), QoS::ExactlyOnce))
        .await;
    assert!(matches!(result, Err(PersistenceError::InvalidPacket(_))));
}

#[tokio::test]
async fn test_will_roundtrip() {
    let (_, persistence) = setup();
    let will = Packet::publish("last/words", b"bye".to_vec(), QoS::AtLeastOnce);

    persistence.put_will("c1", &will).await.unwrap();

    let stored = persistence.get_will("c1").await.unwrap().unwrap();
    assert_eq!(stored.client_id.as_deref(), Some("c1"));
    assert_eq!(stored.broker_id.as_deref(), Some("b1"));
    assert_eq!(stored.payload, b"bye".to_vec());

    let deleted = persistence.del_will("c1").await.unwrap();
    assert_eq!(deleted, Some(stored));
    assert_eq!(persistence.get_will("c1").await.unwrap(), None);
    assert_eq!(persistence.del_will("c1").await.unwrap(), None);
}

#[tokio::test]
async fn test_stream_will_skips_live_brokers() {
    let gateway: Arc<dyn KvGateway> = Arc::new(MemoryGateway::new());
    let b1 = Persistence::new(
        gateway.clone(),
        PersistenceOptions {
            broker_id: "b1".to_string(),
            ..Default::default()
        },
    );
    let b2 = Persistence::new(
        gateway,
        PersistenceOptions {
            broker_id: "b2".to_string(),
            ..Default::default()
        },
    );

    let will = Packet::publish("w", b"x".to_vec(), QoS::AtMostOnce);
    b1.put_will("c1", &will).await.unwrap();
    b2.put_will("c2", &will).await.unwrap();

    let orphans: Vec<Packet> = b1.stream_will(["b1"]).try_collect().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].client_id.as_deref(), Some("c2"));
    assert_eq!(orphans[0].broker_id.as_deref(), Some("b2"));

    let all: Vec<Packet> = b1.stream_will(Vec::<String>::new()).try_collect().await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_filter_list_matcher_gives_same_results() {
    let (_, persistence) = setup();
    let persistence = persistence.with_matcher(Arc::new(|| -> Box<dyn TopicMatcher> {
        Box::new(FilterListMatcher::default())
    }));

    persistence
        .add_subscriptions("c1", &[Subscription::new("a/+", QoS::AtLeastOnce)])
        .await
        .unwrap();
    persistence
        .store_retained(&Packet::publish("a/b", b"v".to_vec(), QoS::AtMostOnce))
        .await
        .unwrap();

    let subs = persistence.subscriptions_by_topic("a/b").await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].client_id, "c1");

    let retained: Vec<Packet> = persistence
        .create_retained_stream("a/#")
        .try_collect()
        .await
        .unwrap();
    assert_eq!(sorted_topics(&retained), vec!["a/b"]);
}

#[tokio::test]
async fn test_destroy_flushes_and_closes() {
    let (gateway, persistence) = setup();
    persistence
        .put_will("c1", &Packet::publish("w", b"x".to_vec(), QoS::AtMostOnce))
        .await
        .unwrap();

    persistence.destroy().await.unwrap();

    let result = gateway.execute(Command::Get("will:b1:c1".to_string())).await;
    assert!(matches!(result, Err(PersistenceError::Unavailable(_))));
}
