// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Unicast request/reply service.
//
// One inbound frame produces exactly one reply, addressed to the identity the
// transport stamped on the request. A frame that does not decode produces
// nothing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::NlbusConfig;
use crate::error::Result;
use crate::registry::{AddressRegistry, EndpointId};
use crate::transport::{MessageHandler, Transport};
use crate::wire::{msg_type, payload_text, until_nul, MessageCodec, MessageFrame};

// ---------------------------------------------------------------------------
// Handler state
// ---------------------------------------------------------------------------

/// Whether a handler is currently working on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Idle,
    Processing,
}

/// Marks one message in flight for as long as it lives.
pub(crate) struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    pub(crate) fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) fn state_of(counter: &AtomicUsize) -> HandlerState {
    if counter.load(Ordering::Acquire) == 0 {
        HandlerState::Idle
    } else {
        HandlerState::Processing
    }
}

// ---------------------------------------------------------------------------
// Reply policy
// ---------------------------------------------------------------------------

/// How the reply payload is produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// Send the request text back, up to its first NUL.
    #[default]
    Echo,
    /// Always send the given text.
    Template(String),
}

/// Counters, updated without locks.
#[derive(Debug, Default)]
pub struct ResponderStats {
    handled: AtomicU64,
    replied: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`ResponderStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponderStatsSnapshot {
    /// Datagrams delivered to the handler.
    pub handled: u64,
    /// Replies accepted by the transport.
    pub replied: u64,
    /// Replies that could not be built or sent.
    pub dropped: u64,
    /// Datagrams that did not decode.
    pub malformed: u64,
}

impl ResponderStats {
    pub fn snapshot(&self) -> ResponderStatsSnapshot {
        ResponderStatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Answers every request with a single `DONE` frame sent back to its sender.
#[derive(Debug)]
pub struct UnicastResponder {
    codec: MessageCodec,
    mode: ReplyMode,
    in_flight: AtomicUsize,
    stats: ResponderStats,
}

impl UnicastResponder {
    pub fn new(codec: MessageCodec, mode: ReplyMode) -> Self {
        Self {
            codec,
            mode,
            in_flight: AtomicUsize::new(0),
            stats: ResponderStats::default(),
        }
    }

    pub fn from_config(config: &NlbusConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            MessageCodec::new(config.codec.max_payload),
            config.responder.reply_mode(),
        ))
    }

    pub fn mode(&self) -> &ReplyMode {
        &self.mode
    }

    pub fn state(&self) -> HandlerState {
        state_of(&self.in_flight)
    }

    pub fn stats(&self) -> ResponderStatsSnapshot {
        self.stats.snapshot()
    }

    /// Reply payload for a request payload.
    pub fn reply_payload<'a>(&'a self, request: &'a [u8]) -> &'a [u8] {
        match &self.mode {
            ReplyMode::Echo => until_nul(request),
            ReplyMode::Template(text) => text.as_bytes(),
        }
    }

    /// Build the reply for a decoded request: destination and encoded frame.
    ///
    /// The reply is a `DONE` frame carrying the request's sequence number and
    /// the module's own identity as sender.
    pub fn build_reply(&self, request: &MessageFrame) -> Result<(EndpointId, Vec<u8>)> {
        let to = AddressRegistry::reply_address_of(&request.header);
        let frame = self.codec.encode(
            self.reply_payload(&request.payload),
            EndpointId::KERNEL.get(),
            msg_type::DONE,
            request.sequence(),
        )?;
        Ok((to, frame))
    }
}

impl MessageHandler for UnicastResponder {
    fn handle(&self, transport: &dyn Transport, datagram: &[u8]) {
        let _busy = InFlight::enter(&self.in_flight);
        self.stats.handled.fetch_add(1, Ordering::Relaxed);

        let request = match self.codec.decode(datagram) {
            Ok(f) => f,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!("[responder] discarding {} byte datagram: {}", datagram.len(), e);
                return;
            }
        };
        log::info!(
            "[responder] received from {}: {}",
            request.sender(),
            payload_text(&request.payload)
        );

        let (to, reply) = match self.build_reply(&request) {
            Ok(r) => r,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("[responder] reply to {} dropped: {}", request.sender(), e);
                return;
            }
        };

        match transport.send_unicast(to, &reply) {
            Ok(()) => {
                self.stats.replied.fetch_add(1, Ordering::Relaxed);
                log::debug!("[responder] replied {} bytes to {}", reply.len(), to);
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("[responder] send to {} failed: {}", to, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NlError;
    use crate::registry::GroupId;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CaptureTransport {
        sent: Mutex<Vec<(EndpointId, Vec<u8>)>>,
        fail: bool,
    }

    impl Transport for CaptureTransport {
        fn send_unicast(&self, to: EndpointId, frame: &[u8]) -> Result<()> {
            if self.fail {
                return Err(NlError::UnknownEndpoint(to.get()));
            }
            self.sent.lock().push((to, frame.to_vec()));
            Ok(())
        }

        fn send_multicast(&self, _: GroupId, _: &[u8], _: Option<EndpointId>) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_echo_reply() {
        let codec = MessageCodec::default();
        let responder = UnicastResponder::new(codec, ReplyMode::Echo);
        let transport = CaptureTransport::default();

        let request = codec.encode(b"ping\0\0\0", 42, 0x11, 9).unwrap();
        responder.handle(&transport, &request);

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, EndpointId(42));
        let reply = codec.decode(&sent[0].1).unwrap();
        assert_eq!(reply.payload, b"ping");
        assert_eq!(reply.kind(), msg_type::DONE);
        assert_eq!(reply.sequence(), 9);
        assert_eq!(reply.sender(), 0);
        assert_eq!(responder.state(), HandlerState::Idle);
    }

    #[test]
    fn test_echo_stops_at_first_nul() {
        // A C client sending a fixed-size buffer: string, terminator, junk.
        let codec = MessageCodec::default();
        let responder = UnicastResponder::new(codec, ReplyMode::Echo);
        let transport = CaptureTransport::default();

        let mut buf = b"hello\0".to_vec();
        buf.extend_from_slice(&[0xAA; 26]);
        responder.handle(&transport, &codec.encode(&buf, 42, 0x11, 3).unwrap());

        let reply = codec.decode(&transport.sent.lock()[0].1).unwrap();
        assert_eq!(reply.payload, b"hello");
    }

    #[test]
    fn test_template_reply() {
        let codec = MessageCodec::default();
        let responder = UnicastResponder::new(codec, ReplyMode::Template("hello".into()));
        let transport = CaptureTransport::default();
        responder.handle(&transport, &codec.encode(b"anything", 5, 0x11, 0).unwrap());
        let reply = codec.decode(&transport.sent.lock()[0].1).unwrap();
        assert_eq!(reply.payload_text(), "hello");
    }

    #[test]
    fn test_malformed_request_gets_no_reply() {
        let responder = UnicastResponder::new(MessageCodec::default(), ReplyMode::Echo);
        let transport = CaptureTransport::default();
        responder.handle(&transport, &[1, 2, 3]);
        assert!(transport.sent.lock().is_empty());
        let stats = responder.stats();
        assert_eq!(stats.handled, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.replied, 0);
    }

    #[test]
    fn test_oversized_reply_is_dropped() {
        // Requests decode regardless of size; the reply is bound by the limit.
        let codec = MessageCodec::new(4);
        let responder = UnicastResponder::new(codec, ReplyMode::Template("too long".into()));
        let transport = CaptureTransport::default();
        let request = MessageCodec::default().encode(b"hi", 3, 0x11, 0).unwrap();
        responder.handle(&transport, &request);
        assert!(transport.sent.lock().is_empty());
        assert_eq!(responder.stats().dropped, 1);
        assert_eq!(responder.state(), HandlerState::Idle);
    }

    #[test]
    fn test_send_failure_is_counted() {
        let codec = MessageCodec::default();
        let responder = UnicastResponder::new(codec, ReplyMode::Echo);
        let transport = CaptureTransport {
            fail: true,
            ..Default::default()
        };
        responder.handle(&transport, &codec.encode(b"x", 3, 0x11, 0).unwrap());
        let stats = responder.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.replied, 0);
    }

    #[test]
    fn test_in_flight_guard() {
        let counter = AtomicUsize::new(0);
        {
            let _g = InFlight::enter(&counter);
            assert_eq!(state_of(&counter), HandlerState::Processing);
        }
        assert_eq!(state_of(&counter), HandlerState::Idle);
    }
}
