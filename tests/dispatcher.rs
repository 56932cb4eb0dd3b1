//! Dispatcher behavior against mock agents: correlation, retransmission
//! and walks.

mod common;

use std::pin::pin;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use futures::StreamExt;
use snmp_engine::dispatcher::WalkMode;
use snmp_engine::{
    CommunityEntry, CommunityMessage, Dispatcher, Error, MessageProcessor, MockTransport, Pdu, PduType, Retry, Target,
    Value, VarBind,
};

fn v2c_agent(mock: &MockTransport, n: u8) -> MockAgent {
    let processor = MessageProcessor::builder()
        .community(CommunityEntry::new(COMMUNITY_RO, "public"))
        .build();
    let agent = MockAgent::new(processor, system_mib());
    agent.attach(mock, agent_addr(n));
    agent
}

fn dispatcher(mock: &MockTransport, retry: Retry) -> Dispatcher<MockTransport> {
    init_tracing();
    Dispatcher::builder()
        .timeout(Duration::from_secs(1))
        .retry(retry)
        .build(mock.clone())
        .0
}

fn answer(request: &Bytes, value: Value) -> Bytes {
    let msg = CommunityMessage::decode(request.clone()).unwrap();
    let request_id = msg.pdu.request_id().unwrap();
    let varbinds = vec![VarBind::new(sys_name(), value)];
    CommunityMessage::new(msg.version, msg.community, Pdu::response(request_id, varbinds))
        .unwrap()
        .encode()
        .unwrap()
}

// =============================================================================
// Correlation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_requests_answered_in_reverse_order() {
    let mock = MockTransport::new(manager_addr());
    let dispatcher = dispatcher(&mock, Retry::none());

    let mut exchanges = Vec::new();
    for n in 1..=3 {
        let target = Target::v2c(agent_addr(n), COMMUNITY_RO);
        exchanges.push(
            dispatcher
                .submit(&target, Pdu::get_request(0, &[sys_name()]))
                .await
                .unwrap(),
        );
    }
    assert_eq!(dispatcher.pending_count(), 3);

    let mut sent = Vec::new();
    for _ in 0..3 {
        sent.push(mock.next_sent().await);
    }
    for (request, to) in sent.iter().rev() {
        let host = to.ip().to_string();
        mock.deliver(answer(request, Value::OctetString(host.into())), *to);
    }

    for exchange in exchanges {
        let target = exchange.target();
        let response = exchange.response().await.unwrap();
        assert_eq!(response.pdu_type, PduType::Response);
        assert_eq!(
            response.varbinds[0].value,
            Value::OctetString(target.ip().to_string().into())
        );
    }
    assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_response_is_dropped() {
    let mock = MockTransport::new(manager_addr());
    let dispatcher = dispatcher(&mock, Retry::none());
    let target = Target::v2c(agent_addr(1), COMMUNITY_RO);

    let exchange = dispatcher
        .submit(&target, Pdu::get_request(0, &[sys_name()]))
        .await
        .unwrap();
    let (request, to) = mock.next_sent().await;
    mock.deliver(answer(&request, Value::Integer(1)), to);
    mock.deliver(answer(&request, Value::Integer(2)), to);

    let response = exchange.response().await.unwrap();
    assert_eq!(response.varbinds[0].value, Value::Integer(1));

    // The second copy finds nothing pending and is discarded.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(dispatcher.pending_count(), 0);
}

// =============================================================================
// Retransmission
// =============================================================================

#[tokio::test(start_paused = true)]
async fn retries_exhausted_after_three_sends() {
    let mock = MockTransport::new(manager_addr());
    let dispatcher = dispatcher(&mock, Retry::immediate(2));
    let target = Target::v2c(agent_addr(1), COMMUNITY_RO);

    let started = tokio::time::Instant::now();
    let err = dispatcher
        .send(&target, Pdu::get_request(0, &[sys_descr()]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { retries: 2, .. }));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3100), "{elapsed:?}");
    assert_eq!(mock.sent_count(), 3);

    // Every retransmission repeats the original datagram.
    let first = mock.try_next_sent().unwrap();
    for _ in 0..2 {
        assert_eq!(mock.try_next_sent().unwrap(), first);
    }
    assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn target_overrides_dispatcher_retry() {
    let mock = MockTransport::new(manager_addr());
    let dispatcher = dispatcher(&mock, Retry::immediate(5));
    let target = Target::v2c(agent_addr(1), COMMUNITY_RO)
        .timeout(Duration::from_millis(200))
        .retry(Retry::none());

    let err = dispatcher
        .send(&target, Pdu::get_request(0, &[sys_descr()]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { retries: 0, .. }));
    assert_eq!(mock.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_request_recovered_by_retry() {
    let mock = MockTransport::new(manager_addr());
    let agent = v2c_agent(&mock, 1);
    agent.ignore_next(1);
    let dispatcher = dispatcher(&mock, Retry::immediate(2));

    let varbinds = dispatcher
        .request(&Target::v2c(agent_addr(1), COMMUNITY_RO), Pdu::get_request(0, &[sys_name()]))
        .await
        .unwrap();
    assert_eq!(varbinds[0].value, Value::OctetString("agent-1".into()));
    assert_eq!(agent.received(), 2);
}

#[tokio::test(start_paused = true)]
async fn fixed_backoff_delays_retransmissions() {
    let mock = MockTransport::new(manager_addr());
    let dispatcher = dispatcher(&mock, Retry::fixed(1, Duration::from_millis(500)));
    let target = Target::v2c(agent_addr(1), COMMUNITY_RO);

    let started = tokio::time::Instant::now();
    let err = dispatcher
        .send(&target, Pdu::get_request(0, &[sys_descr()]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { retries: 1, .. }));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2500) && elapsed < Duration::from_millis(2600), "{elapsed:?}");
    assert_eq!(mock.sent_count(), 2);
}

// =============================================================================
// Walks
// =============================================================================

#[tokio::test(start_paused = true)]
async fn bulk_walk_stops_at_end_of_mib_without_extra_request() {
    let mock = MockTransport::new(manager_addr());
    let agent = v2c_agent(&mock, 1);
    let dispatcher = dispatcher(&mock, Retry::none());
    let target = Target::v2c(agent_addr(1), COMMUNITY_RO);

    let items: Vec<_> = dispatcher
        .bulk_walk(&target, mib2())
        .mode(WalkMode::ToEndOfMib)
        .collect()
        .await;
    let oids: Vec<_> = items.into_iter().map(|item| item.unwrap().oid).collect();
    assert_eq!(oids, system_mib().into_keys().collect::<Vec<_>>());
    assert_eq!(agent.received(), 1);
}

#[tokio::test(start_paused = true)]
async fn bulk_walk_pages_through_subtree() {
    let mock = MockTransport::new(manager_addr());
    let agent = v2c_agent(&mock, 1);
    let dispatcher = dispatcher(&mock, Retry::none());
    let target = Target::v2c(agent_addr(1), COMMUNITY_RO);

    let walk = dispatcher.bulk_walk(&target, system_subtree()).max_repetitions(2);
    let items = collect_stream(pin!(walk), 100).await;
    assert_eq!(items.len(), 6);
    assert!(items.iter().all(Result::is_ok));
    // Three full pages of two, then a page whose first varbind leaves the subtree.
    assert_eq!(agent.received(), 4);
}

#[tokio::test(start_paused = true)]
async fn v1_walk_ends_on_no_such_name() {
    let mock = MockTransport::new(manager_addr());
    let agent = v2c_agent(&mock, 1);
    let dispatcher = dispatcher(&mock, Retry::none());
    let target = Target::v1(agent_addr(1), COMMUNITY_RO);

    let items: Vec<_> = dispatcher
        .walk(&target, interfaces_subtree())
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap().oid, if_number());
    assert_eq!(agent.received(), 2);
}

#[tokio::test(start_paused = true)]
async fn walk_limit_leaves_walk_resumable() {
    let mock = MockTransport::new(manager_addr());
    let _agent = v2c_agent(&mock, 1);
    let dispatcher = dispatcher(&mock, Retry::none());
    let target = Target::v2c(agent_addr(1), COMMUNITY_RO);

    let mut walk = dispatcher.walk(&target, system_subtree());
    let first = collect_stream(pin!(&mut walk), 2).await;
    assert_eq!(first.len(), 2);
    let rest = collect_stream(pin!(&mut walk), 100).await;
    assert_eq!(rest.len(), 4);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_new_requests() {
    let mock = MockTransport::new(manager_addr());
    let dispatcher = dispatcher(&mock, Retry::none());
    dispatcher.shutdown();
    assert!(dispatcher.is_closed());

    let err = dispatcher
        .send(&Target::v2c(agent_addr(1), COMMUNITY_RO), Pdu::get_request(0, &[sys_name()]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert_eq!(mock.sent_count(), 0);
}
