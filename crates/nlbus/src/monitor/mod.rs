// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Long-running consumer of network state notifications.
//!
//! [`EventMonitor`] polls a [`DatagramSource`] without blocking, walks the
//! frames of each datagram, decodes link / address / route notifications and
//! hands them to an [`EventSink`]. Nothing it receives can stop it: bad
//! frames are counted and skipped, I/O errors are logged and retried after a
//! backoff.

pub mod event;
pub mod rtnl;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::transport::DatagramSource;
use crate::wire::{msg_type, FrameIter, HEADER_LEN};

pub use event::{AddressInfo, EventSink, LinkInfo, LinkState, LogSink, NetworkEvent};

/// Default sleep when nothing is pending.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Default receive buffer size.
pub const DEFAULT_RECV_BUFFER: usize = 8192;

/// Monitor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorStats {
    pub datagrams: u64,
    pub frames: u64,
    pub events: u64,
    /// Frames dropped for inconsistent lengths or truncated sub-headers.
    pub discarded: u64,
    /// Events dispatched with some attributes abandoned.
    pub partial: u64,
    pub io_errors: u64,
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// A datagram was processed; carries the number of events dispatched.
    Datagram(usize),
    /// Nothing was pending.
    Idle,
}

pub struct EventMonitor<S, K> {
    source: S,
    sink: K,
    buf: Vec<u8>,
    backoff: Duration,
    stats: MonitorStats,
}

impl<S: DatagramSource, K: EventSink> EventMonitor<S, K> {
    pub fn new(source: S, sink: K) -> Self {
        Self {
            source,
            sink,
            buf: vec![0u8; DEFAULT_RECV_BUFFER],
            backoff: DEFAULT_BACKOFF,
            stats: MonitorStats::default(),
        }
    }

    pub fn from_config(source: S, sink: K, config: &MonitorConfig) -> Self {
        Self::new(source, sink)
            .with_backoff(Duration::from_millis(config.backoff_ms))
            .with_buffer_size(config.recv_buffer)
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buf = vec![0u8; size.max(HEADER_LEN)];
        self
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// One non-blocking receive. Never sleeps.
    pub fn poll_once(&mut self) -> Result<Poll> {
        let mut buf = std::mem::take(&mut self.buf);
        let outcome = match self.source.try_recv(&mut buf) {
            Ok(Some(n)) => Ok(Poll::Datagram(self.process_datagram(&buf[..n]))),
            Ok(None) => Ok(Poll::Idle),
            Err(e) => {
                self.stats.io_errors += 1;
                Err(e)
            }
        };
        self.buf = buf;
        outcome
    }

    /// Poll until `running` is cleared, sleeping `backoff` whenever the
    /// source is idle or failing.
    pub fn run(&mut self, running: &AtomicBool) {
        log::info!("[monitor] started (backoff {:?})", self.backoff);
        while running.load(Ordering::Relaxed) {
            match self.poll_once() {
                Ok(Poll::Datagram(_)) => {}
                Ok(Poll::Idle) => std::thread::sleep(self.backoff),
                Err(e) => {
                    log::error!("[monitor] receive failed: {}", e);
                    std::thread::sleep(self.backoff);
                }
            }
        }
        log::info!(
            "[monitor] stopped: {} datagrams, {} events, {} discarded",
            self.stats.datagrams,
            self.stats.events,
            self.stats.discarded
        );
    }

    /// Decode and dispatch every frame of one datagram.
    ///
    /// A frame with an inconsistent length ends processing of this
    /// datagram. Returns the number of events dispatched.
    pub fn process_datagram(&mut self, datagram: &[u8]) -> usize {
        self.stats.datagrams += 1;
        let mut dispatched = 0;

        for item in FrameIter::new(datagram) {
            let frame = match item {
                Ok(f) => f,
                Err(e) => {
                    self.stats.discarded += 1;
                    log::warn!("[monitor] discarding rest of datagram: {}", e);
                    break;
                }
            };
            self.stats.frames += 1;

            match frame.header.kind {
                msg_type::DONE | msg_type::NOOP | msg_type::ERROR | msg_type::OVERRUN => {
                    log::debug!("[monitor] control frame type {}", frame.header.kind);
                    continue;
                }
                _ => {}
            }

            match rtnl::decode_event(&frame.header, frame.payload) {
                Ok(Some(decoded)) => {
                    if let Some(e) = decoded.attr_error {
                        self.stats.partial += 1;
                        log::warn!("[monitor] {}: {}", decoded.event.kind_name(), e);
                    }
                    self.stats.events += 1;
                    dispatched += 1;
                    self.sink.on_event(decoded.event);
                }
                Ok(None) => {
                    log::debug!("[monitor] ignoring frame type {}", frame.header.kind);
                }
                Err(e) => {
                    self.stats.discarded += 1;
                    log::warn!("[monitor] frame type {} discarded: {}", frame.header.kind, e);
                }
            }
        }
        dispatched
    }
}

/// Open a routing socket subscribed to `groups`, non-blocking.
#[cfg(target_os = "linux")]
pub fn route_source(
    groups: &[crate::registry::GroupId],
) -> Result<crate::transport::NetlinkSocket> {
    let socket = crate::transport::NetlinkSocket::bind(crate::transport::protocol::ROUTE, 0)?;
    for group in groups {
        socket.add_membership(*group)?;
    }
    socket.set_nonblocking(true)?;
    log::info!("[monitor] listening on groups {}", socket.groups());
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NlError;
    use crate::wire::MessageCodec;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted source: yields queued results in order, then idles.
    #[derive(Default)]
    struct Script(Mutex<VecDeque<Result<Vec<u8>>>>);

    impl DatagramSource for Script {
        fn try_recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
            match self.0.lock().pop_front() {
                Some(Ok(d)) => {
                    buf[..d.len()].copy_from_slice(&d);
                    Ok(Some(d.len()))
                }
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }
    }

    #[test]
    fn test_io_error_is_counted_and_survived() {
        let codec = MessageCodec::default();
        let link = rtnl::link_payload(2, rtnl::IFF_UP, "eth0").unwrap();
        let script = Script::default();
        script.0.lock().push_back(Err(NlError::Io("boom".into())));
        script
            .0
            .lock()
            .push_back(Ok(codec.encode(&link, 0, rtnl::RTM_NEWLINK, 1).unwrap()));

        let mut mon = EventMonitor::new(script, Vec::<NetworkEvent>::new());
        assert!(mon.poll_once().is_err());
        assert_eq!(mon.poll_once().unwrap(), Poll::Datagram(1));
        assert_eq!(mon.poll_once().unwrap(), Poll::Idle);
        assert_eq!(mon.stats().io_errors, 1);
        assert_eq!(mon.sink().len(), 1);
    }

    #[test]
    fn test_control_and_unknown_frames_are_skipped() {
        let codec = MessageCodec::default();
        let mut datagram = codec.encode_done(0, 1).unwrap();
        datagram.extend(codec.encode(b"??", 0, 0x60, 2).unwrap());
        datagram.extend(codec.encode(&[], 0, rtnl::RTM_DELROUTE, 3).unwrap());

        let mut mon = EventMonitor::new(Script::default(), Vec::<NetworkEvent>::new());
        assert_eq!(mon.process_datagram(&datagram), 1);
        assert_eq!(mon.stats().frames, 3);
        assert_eq!(mon.sink()[0], NetworkEvent::RouteChanged { removed: true });
    }

    #[test]
    fn test_truncated_sub_header_discards_only_that_frame() {
        let codec = MessageCodec::default();
        let mut datagram = codec.encode(&[0u8; 4], 0, rtnl::RTM_NEWLINK, 1).unwrap();
        datagram.extend(codec.encode(&[], 0, rtnl::RTM_NEWROUTE, 2).unwrap());

        let mut mon = EventMonitor::new(Script::default(), Vec::<NetworkEvent>::new());
        assert_eq!(mon.process_datagram(&datagram), 1);
        assert_eq!(mon.stats().discarded, 1);
    }

    #[test]
    fn test_run_stops_when_flag_cleared() {
        let running = AtomicBool::new(false);
        let mut mon = EventMonitor::new(Script::default(), Vec::<NetworkEvent>::new())
            .with_backoff(Duration::from_millis(1));
        mon.run(&running);
        assert_eq!(mon.stats(), MonitorStats::default());
    }
}
