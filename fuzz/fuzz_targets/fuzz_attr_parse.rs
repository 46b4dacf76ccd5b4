// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use nlbus::attr;

fuzz_target!(|data: &[u8]| {
    let max_type = data.first().copied().unwrap_or(0) as u16;
    let _ = attr::parse(data, max_type);

    let (table, _) = attr::parse_partial(data, max_type);
    for raw in table.iter() {
        if raw.is_nested() {
            let _ = raw.nested(max_type);
        }
        let _ = raw.as_str();
    }
});
