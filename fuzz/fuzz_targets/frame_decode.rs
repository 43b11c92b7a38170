//! Fuzz target for Frame::decode
//!
//! Decodes arbitrary byte sequences as frames, looking for:
//! - Parser panics
//! - Integer overflows in size calculations
//! - Headers with a bad magic or oversize payload slipping through
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ridelink_proto::{Frame, FrameHeader};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert_eq!(frame.header.magic(), FrameHeader::MAGIC);
        assert!(frame.payload.len() <= FrameHeader::MAX_PAYLOAD_SIZE as usize);
        assert_eq!(frame.payload.len(), frame.header.payload_size() as usize);
    }
});
