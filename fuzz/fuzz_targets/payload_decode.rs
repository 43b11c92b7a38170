//! Fuzz target for Payload::from_frame
//!
//! Feeds the same bytes as the payload of every opcode, covering:
//! - Malformed CBOR
//! - Bytes valid for one payload type presented under another opcode
//! - Unknown enum tags (roles, commands, close reasons)
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use ridelink_proto::{Frame, FrameHeader, Opcode, Payload};

fuzz_target!(|data: &[u8]| {
    for opcode in Opcode::ALL {
        let frame = Frame::new(FrameHeader::new(opcode), Bytes::copy_from_slice(data));

        if let Ok(payload) = Payload::from_frame(&frame) {
            assert_eq!(payload.opcode(), opcode);
        }
    }
});
