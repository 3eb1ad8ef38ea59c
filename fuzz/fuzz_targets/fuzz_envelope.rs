//! Fuzz target: envelope inspector
//!
//! Feeds arbitrary bytes to the message-begin parser under both wire
//! encodings.  It must never panic, and any name it reports must fit in
//! the input.
//!
//! cargo fuzz run fuzz_envelope

#![no_main]

use libfuzzer_sys::fuzz_target;
use rpcbridge::rpc::envelope::{method_name, parse_message_begin};
use rpcbridge::rpc::header::ProtocolId;

fuzz_target!(|data: &[u8]| {
    for proto in [ProtocolId::Binary, ProtocolId::Compact] {
        if let Ok(begin) = parse_message_begin(data, proto) {
            assert!(begin.name.len() <= data.len(), "name longer than input");
        }
        let _ = method_name(data, proto as i16);
    }

    // Unknown protocol ids degrade to an empty name.
    assert!(method_name(data, 1).is_empty());
});
