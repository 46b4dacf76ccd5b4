// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use nlbus::FrameIter;

fuzz_target!(|data: &[u8]| {
    let mut iter = FrameIter::new(data);
    for item in iter.by_ref() {
        if let Ok(view) = item {
            assert!(view.payload.len() <= data.len());
        }
    }
    assert!(iter.offset() <= data.len());
});
