//! Fuzz target: `InboundMessage::decode`
//!
//! Any frame type and payload either decodes to a message that encodes
//! back to the same frame, or is refused with a typed error.
//!
//! cargo fuzz run fuzz_inbound_message

#![no_main]

use crema::rpc::codec::Frame;
use crema::rpc::message::InboundMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&ty, payload)) = data.split_first() else {
        return;
    };
    let Ok(frame) = Frame::new(ty, payload) else {
        return;
    };
    if let Ok(msg) = InboundMessage::decode(&frame) {
        let encoded = msg.encode().expect("decoded message must re-encode");
        assert_eq!(encoded.msg_type, frame.msg_type);
        assert_eq!(
            InboundMessage::decode(&encoded).ok(),
            Some(msg),
            "re-encoded message decodes differently"
        );
    }
});
