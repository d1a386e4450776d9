use std::{sync::Arc, time::Duration};

use gdp::{
    channel::{Channel, ChannelEvent, LoopbackChannel},
    datum::Datum,
    event::ActiveQueue,
    pdu::{Ack, Command, PduBody},
    request::{Request, RequestFlags, RidGenerator},
    subscription::{Subscriber, SubscriptionTable},
};

use crate::integration_tests::common::new_published_log;

/// A subscriber registered before any data arrives receives the first
/// appended datum through the channel, addressed back to the
/// subscribing client and correlated by the subscription's own rid.
#[tokio::test]
async fn a_fresh_subscriber_receives_the_first_append() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (name, log) = new_published_log(dir.path(), 1).await;

    let client = gdp::metadata::LogName([0xAB; 32]);
    let rid_gen = RidGenerator::default();
    let active = ActiveQueue::new();
    let sub_request = Request::new(
        Some(log.clone()),
        PduBody::Command(Command::SubscribeByRecno { name, start: 1, nrecs: None, timeout: None }),
        client,
        name,
        0,
        RequestFlags::SERVER_SUBSCR,
        &rid_gen,
        &active,
    );
    let expected_rid = sub_request.rid;

    let subscriptions = SubscriptionTable::new();
    subscriptions.add(name, Arc::new(Subscriber::new(sub_request, 1, None, Duration::from_secs(60))));

    let channel: Arc<dyn Channel> = Arc::new(LoopbackChannel::new());
    let mut events = channel.subscribe();

    log.append(Datum::new(b"payload one".to_vec())).await.expect("append");
    subscriptions.notify_append(name, &log, &channel).await;

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no timeout")
        .expect("event");
    match event {
        ChannelEvent::Received(pdu) => {
            assert_eq!(pdu.src, name);
            assert_eq!(pdu.dst, client);
            assert_eq!(pdu.rid, expected_rid);
            match pdu.body {
                PduBody::Ack(Ack::Content { datums }) => {
                    assert_eq!(datums.len(), 1);
                    assert_eq!(datums[0].payload, b"payload one");
                },
                other => panic!("unexpected body: {other:?}"),
            }
        },
        other => panic!("unexpected event: {other:?}"),
    }
}

/// A log with no subscribers never touches the channel on append.
#[tokio::test]
async fn appends_with_no_subscribers_produce_no_delivery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (name, log) = new_published_log(dir.path(), 2).await;
    let subscriptions = SubscriptionTable::new();
    let channel: Arc<dyn Channel> = Arc::new(LoopbackChannel::new());
    let mut events = channel.subscribe();

    log.append(Datum::new(b"lonely".to_vec())).await.expect("append");
    subscriptions.notify_append(name, &log, &channel).await;

    let outcome = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
    assert!(outcome.is_err(), "no event should have been delivered");
}
