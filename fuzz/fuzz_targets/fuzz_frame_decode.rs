// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use nlbus::MessageCodec;

fuzz_target!(|data: &[u8]| {
    let codec = MessageCodec::default();
    let Ok(frame) = codec.decode(data) else { return };
    if frame.payload.len() <= codec.max_payload() {
        let again = codec
            .encode_with_flags(
                &frame.payload,
                frame.header.sender,
                frame.header.kind,
                frame.header.flags,
                frame.header.sequence,
            )
            .expect("decoded payload fits the codec");
        let back = codec.decode(&again).expect("re-encoded frame decodes");
        assert_eq!(back.payload, frame.payload);
    }
});
