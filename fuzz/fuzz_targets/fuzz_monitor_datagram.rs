// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use nlbus::{EventMonitor, LoopbackBus, NetworkEvent};

fuzz_target!(|data: &[u8]| {
    let bus = LoopbackBus::new();
    let Ok(source) = bus.open(0) else { return };
    let mut monitor = EventMonitor::new(source, Vec::<NetworkEvent>::new());
    let dispatched = monitor.process_datagram(data);
    assert_eq!(dispatched, monitor.sink().len());
});
