#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use snmp_engine::ber::Decoder;
use snmp_engine::pdu::TrapV1Pdu;
use snmp_engine::v3::UsmSecurityParams;
use snmp_engine::value::Value;
use snmp_engine::varbind::{VarBind, decode_varbind_list};

fuzz_target!(|data: &[u8]| {
    let bytes = Bytes::copy_from_slice(data);

    // Primitives
    let _ = Decoder::new(bytes.clone()).read_integer();
    let _ = Decoder::new(bytes.clone()).read_counter64();
    let _ = Decoder::new(bytes.clone()).read_octet_string();
    let _ = Decoder::new(bytes.clone()).read_oid();
    let _ = Decoder::new(bytes.clone()).read_ip_address();

    let mut decoder = Decoder::new(bytes.clone());
    if let Ok(mut seq) = decoder.read_sequence() {
        while seq.skip_tlv().is_ok() {}
    }

    // Values and varbinds
    let _ = Value::decode(&mut Decoder::new(bytes.clone()));
    let _ = VarBind::decode(&mut Decoder::new(bytes.clone()));
    let _ = decode_varbind_list(&mut Decoder::new(bytes.clone()));

    // Structures with their own layout
    let _ = TrapV1Pdu::decode(&mut Decoder::new(bytes.clone()));
    let _ = UsmSecurityParams::decode_marked(bytes);
});
