#![no_main]

use std::net::SocketAddr;
use std::sync::LazyLock;

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use snmp_engine::message::{CommunityMessage, Message, MessageHeader, V3Message};
use snmp_engine::pdu::Pdu;
use snmp_engine::security::{CommunityEntry, UsmUser};
use snmp_engine::v3::{AuthProtocol, PrivProtocol};
use snmp_engine::MessageProcessor;

/// Agent with one community and one authPriv user, so inbound datagrams
/// reach every validation stage.
static AGENT: LazyLock<MessageProcessor> = LazyLock::new(|| {
    let mut builder = MessageProcessor::builder()
        .engine_id(&b"\x80\x00\x1f\x88\x04fuzz"[..])
        .community(CommunityEntry::new("public", "public"));
    if let Ok(user) = UsmUser::new("fuzzer")
        .with_auth(AuthProtocol::Sha1, "fuzz-auth-pass")
        .and_then(|user| user.with_priv(PrivProtocol::Aes128, "fuzz-priv-pass"))
    {
        builder = builder.user(user);
    }
    builder.build()
});

fuzz_target!(|data: &[u8]| {
    let bytes = Bytes::copy_from_slice(data);

    let _ = MessageHeader::peek(&bytes);
    let _ = Message::decode(bytes.clone());
    let _ = CommunityMessage::decode(bytes.clone());
    let _ = V3Message::decode(bytes.clone());
    let _ = Pdu::decode(&mut snmp_engine::ber::Decoder::new(bytes.clone()));

    // Full inbound path: decode, security, access control, reports.
    let source = SocketAddr::from(([192, 0, 2, 1], 161));
    let _ = AGENT.process_incoming(bytes, Some(source));
});
