//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes must never panic the decoder. A successful decode must
//! re-encode to exactly the bytes it consumed.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skein_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let encoded = frame.to_vec().expect("decoded frame must re-encode");
        assert_eq!(encoded.as_slice(), &data[..frame.encoded_len()]);
    }
});
