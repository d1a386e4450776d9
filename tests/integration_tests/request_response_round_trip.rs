use std::{sync::Arc, time::Duration};

use gdp::{
    cache::Cache,
    channel::{Channel, ChannelEvent, LoopbackChannel},
    event::ActiveQueue,
    metadata::LogName,
    pdu::{Ack, Command, Nak, PduBody},
    request::{Request, RequestFlags, RequestTable, RidGenerator},
};

/// Drives a command through [`Request::invoke`] against a loopback
/// channel with a hand-rolled "server" task playing the responder,
/// mirroring the client/server split `logd`'s own event loop makes
/// between sending a command and routing its matched response.
#[tokio::test]
async fn invoke_resolves_once_the_matching_ack_arrives() {
    let client = LogName([1u8; 32]);
    let server = LogName([2u8; 32]);
    let channel: Arc<dyn Channel> = Arc::new(LoopbackChannel::new());

    let rid_gen = RidGenerator::default();
    let active = ActiveQueue::new();
    let req = Request::new(
        None,
        PduBody::Command(Command::Ping),
        client,
        server,
        0,
        RequestFlags::empty(),
        &rid_gen,
        &active,
    );

    let table = Arc::new(RequestTable::new());
    table.insert(req.clone());

    let responder_channel = channel.clone();
    let mut responder_events = channel.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = responder_events.recv().await {
            if let ChannelEvent::Received(pdu) = event {
                if let PduBody::Command(Command::Ping) = pdu.body {
                    let response = gdp::pdu::Pdu {
                        src: pdu.dst,
                        dst: pdu.src,
                        l4_seqno: pdu.l4_seqno,
                        rid: pdu.rid,
                        l5_seqno: None,
                        body: PduBody::Ack(Ack::Success { recno: None, ts: None, hash: None, metadata: None }),
                    };
                    let _ = responder_channel.send(response.src, response.dst, response.encode(), 0).await;
                }
            }
        }
    });

    let router_table = table.clone();
    let router_cache = Cache::new();
    let mut router_events = channel.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = router_events.recv().await {
            if let ChannelEvent::Received(pdu) = event {
                if matches!(pdu.body, PduBody::Ack(_) | PduBody::Nak(_)) {
                    if let Some(matched) = router_table.find(&pdu) {
                        matched.deliver_response(pdu, &router_cache).await;
                    }
                }
            }
        }
    });

    let response = req
        .invoke(channel.clone(), Duration::from_secs(2), 1, Duration::from_millis(10))
        .await
        .expect("invoke must resolve");
    assert!(matches!(response.body, PduBody::Ack(Ack::Success { .. })));
}

/// A router-no-route nak is retried until retries are exhausted, then
/// surfaced as [`gdp::error::GdpError::NoRoute`].
#[tokio::test]
async fn invoke_gives_up_after_retries_are_exhausted_on_no_route() {
    let client = LogName([3u8; 32]);
    let server = LogName([4u8; 32]);
    let channel: Arc<dyn Channel> = Arc::new(LoopbackChannel::new());

    let rid_gen = RidGenerator::default();
    let active = ActiveQueue::new();
    let req = Request::new(
        None,
        PduBody::Command(Command::Ping),
        client,
        server,
        0,
        RequestFlags::empty(),
        &rid_gen,
        &active,
    );

    let naking_channel = channel.clone();
    let mut naking_events = channel.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = naking_events.recv().await {
            if let ChannelEvent::Received(pdu) = event {
                if let PduBody::Command(Command::Ping) = pdu.body {
                    let response = gdp::pdu::Pdu {
                        src: pdu.dst,
                        dst: pdu.src,
                        l4_seqno: pdu.l4_seqno,
                        rid: pdu.rid,
                        l5_seqno: None,
                        body: PduBody::Nak(Nak::RouterNoRoute),
                    };
                    let _ = naking_channel.send(response.src, response.dst, response.encode(), 0).await;
                }
            }
        }
    });

    let table = Arc::new(RequestTable::new());
    table.insert(req.clone());
    let router_table = table.clone();
    let router_cache = Cache::new();
    let mut router_events = channel.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = router_events.recv().await {
            if let ChannelEvent::Received(pdu) = event {
                if matches!(pdu.body, PduBody::Ack(_) | PduBody::Nak(_)) {
                    if let Some(matched) = router_table.find(&pdu) {
                        matched.deliver_response(pdu, &router_cache).await;
                    }
                }
            }
        }
    });

    let err = req
        .invoke(channel.clone(), Duration::from_secs(2), 1, Duration::from_millis(5))
        .await
        .unwrap_err();
    assert_eq!(err, gdp::error::GdpError::NoRoute);
}
