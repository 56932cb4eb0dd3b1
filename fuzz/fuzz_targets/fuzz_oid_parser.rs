#![no_main]

use libfuzzer_sys::fuzz_target;

use snmp_engine::oid::Oid;

fuzz_target!(|data: &[u8]| {
    // BER content octets; anything accepted must re-encode and decode equal
    if let Ok(oid) = Oid::from_ber(data) {
        if oid.validate().is_ok() {
            assert_eq!(Oid::from_ber(&oid.to_ber()).ok(), Some(oid));
        }
    }

    // Dotted notation
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(oid) = Oid::parse(s) {
            assert_eq!(Oid::parse(&oid.to_string()).ok(), Some(oid));
        }
    }
});
