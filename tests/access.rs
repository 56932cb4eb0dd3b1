//! View-based access control seen from the manager side.
//!
//! The agent's view includes mib-2 but excludes the system group.

mod common;

use std::time::Duration;

use common::*;
use snmp_engine::security::SecurityModel;
use snmp_engine::{
    CommunityEntry, Dispatcher, Error, ErrorStatus, MessageProcessor, MockTransport, Pdu, Retry, Target, Value,
    VacmBuilder, VarBind,
};

fn vacm_agent(mock: &MockTransport) -> MockAgent {
    let vacm = VacmBuilder::new()
        .group("public", SecurityModel::Any, "readers")
        .group("private", SecurityModel::Any, "writers")
        .access("readers", |a| a.read_view("mib2"))
        .access("writers", |a| a.read_view("mib2").write_view("mib2"))
        .view("mib2", |v| v.include(mib2()).exclude(system_subtree()))
        .build();
    let processor = MessageProcessor::builder()
        .community(CommunityEntry::new(COMMUNITY_RO, "public"))
        .community(CommunityEntry::new(COMMUNITY_RW, "private"))
        .access(vacm)
        .build();
    let agent = MockAgent::new(processor, system_mib());
    agent.attach(mock, agent_addr(1));
    agent
}

fn dispatcher(mock: &MockTransport) -> Dispatcher<MockTransport> {
    Dispatcher::builder()
        .timeout(Duration::from_secs(1))
        .retry(Retry::none())
        .build(mock.clone())
        .0
}

#[tokio::test(start_paused = true)]
async fn included_subtree_readable() {
    let mock = MockTransport::new(manager_addr());
    let _agent = vacm_agent(&mock);
    let dispatcher = dispatcher(&mock);

    let varbinds = dispatcher
        .request(&Target::v2c(agent_addr(1), COMMUNITY_RO), Pdu::get_request(0, &[if_number()]))
        .await
        .unwrap();
    assert_eq!(varbinds, vec![VarBind::new(if_number(), Value::Integer(2))]);
}

#[tokio::test(start_paused = true)]
async fn excluded_subtree_is_authorization_error() {
    let mock = MockTransport::new(manager_addr());
    let _agent = vacm_agent(&mock);
    let dispatcher = dispatcher(&mock);

    let err = dispatcher
        .request(
            &Target::v2c(agent_addr(1), COMMUNITY_RO),
            Pdu::get_request(0, &[if_number(), sys_descr()]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Snmp {
            status: ErrorStatus::AuthorizationError,
            index: 0,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn v1_denial_is_no_such_name_at_index() {
    let mock = MockTransport::new(manager_addr());
    let _agent = vacm_agent(&mock);
    let dispatcher = dispatcher(&mock);

    let err = dispatcher
        .request(
            &Target::v1(agent_addr(1), COMMUNITY_RO),
            Pdu::get_request(0, &[if_number(), sys_descr()]),
        )
        .await
        .unwrap_err();
    let Error::Snmp { status, index, oid, .. } = err else {
        panic!("unexpected {err:?}");
    };
    assert_eq!(status, ErrorStatus::NoSuchName);
    assert_eq!(index, 2);
    assert_eq!(oid, Some(sys_descr()));
}

#[tokio::test(start_paused = true)]
async fn write_without_write_view_is_no_access() {
    let mock = MockTransport::new(manager_addr());
    let agent = vacm_agent(&mock);
    let dispatcher = dispatcher(&mock);
    let set = Pdu::set_request(0, vec![VarBind::new(if_number(), Value::Integer(3))]);

    let err = dispatcher
        .request(&Target::v2c(agent_addr(1), COMMUNITY_RO), set.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Snmp {
            status: ErrorStatus::NoAccess,
            index: 1,
            ..
        }
    ));
    assert_eq!(agent.value(&if_number()), Some(Value::Integer(2)));

    dispatcher
        .request(&Target::v2c(agent_addr(1), COMMUNITY_RW), set)
        .await
        .unwrap();
    assert_eq!(agent.value(&if_number()), Some(Value::Integer(3)));
}

#[tokio::test(start_paused = true)]
async fn unknown_community_times_out() {
    let mock = MockTransport::new(manager_addr());
    let agent = vacm_agent(&mock);
    let dispatcher = dispatcher(&mock);

    let err = dispatcher
        .request(&Target::v2c(agent_addr(1), "guess"), Pdu::get_request(0, &[if_number()]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(agent.received(), 1);
}

#[tokio::test(start_paused = true)]
async fn outbound_request_checked_against_local_view() {
    let mock = MockTransport::new(manager_addr());
    let _agent = vacm_agent(&mock);
    let local = VacmBuilder::new()
        .group("public", SecurityModel::Any, "managers")
        .access("managers", |a| a.read_view("interfaces"))
        .view("interfaces", |v| v.include(interfaces_subtree()))
        .build();
    let (dispatcher, _) = Dispatcher::builder()
        .processor(MessageProcessor::builder().access(local).build())
        .build(mock.clone());

    let err = dispatcher
        .request(&Target::v2c(agent_addr(1), COMMUNITY_RO), Pdu::get_request(0, &[sys_descr()]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AccessDenied { .. }));
    assert_eq!(mock.sent_count(), 0);
}
