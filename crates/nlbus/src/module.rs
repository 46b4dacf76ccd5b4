// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Startup and teardown of a set of protocol services.
//!
//! A [`NetlinkModule`] owns the registration handles of its services. There
//! is no process-wide handle: whoever holds the module holds the services.

use std::sync::Arc;

use crate::error::{NlError, Result};
use crate::transport::{LoopbackBus, MessageHandler, Registration};

/// One service to install: a handler on a protocol number.
pub struct Service {
    pub protocol: u32,
    pub handler: Arc<dyn MessageHandler>,
}

impl Service {
    pub fn new(protocol: u32, handler: Arc<dyn MessageHandler>) -> Self {
        Self { protocol, handler }
    }
}

/// Registered services, released in reverse order of registration.
#[derive(Debug)]
pub struct NetlinkModule {
    name: String,
    registrations: Vec<Registration>,
}

impl NetlinkModule {
    /// Register every service on `bus`.
    ///
    /// If any registration fails, the ones already made are released in
    /// reverse order and `TransportCreation` is returned.
    pub fn init(bus: &LoopbackBus, name: &str, services: Vec<Service>) -> Result<Self> {
        log::info!("[{}] init: {} service(s)", name, services.len());
        let mut registrations: Vec<Registration> = Vec::with_capacity(services.len());

        for service in services {
            match bus.register(service.protocol, service.handler) {
                Ok(reg) => registrations.push(reg),
                Err(e) => {
                    log::error!(
                        "[{}] cannot register protocol {}: {}",
                        name,
                        service.protocol,
                        e
                    );
                    release(name, &mut registrations);
                    return Err(match e {
                        NlError::TransportCreation(_) => e,
                        other => NlError::TransportCreation(other.to_string()),
                    });
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            registrations,
        })
    }

    /// Single-service convenience.
    pub fn single(
        bus: &LoopbackBus,
        name: &str,
        protocol: u32,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        Self::init(bus, name, vec![Service::new(protocol, handler)])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocols held, in registration order.
    pub fn protocols(&self) -> Vec<u32> {
        self.registrations.iter().map(Registration::protocol).collect()
    }

    /// Explicit teardown.
    pub fn exit(mut self) {
        log::info!("[{}] exit", self.name);
        release(&self.name, &mut self.registrations);
    }
}

impl Drop for NetlinkModule {
    fn drop(&mut self) {
        if !self.registrations.is_empty() {
            log::warn!("[{}] dropped without exit(); releasing", self.name);
            release(&self.name, &mut self.registrations);
        }
    }
}

fn release(name: &str, registrations: &mut Vec<Registration>) {
    while let Some(reg) = registrations.pop() {
        log::debug!("[{}] releasing protocol {}", name, reg.protocol());
        drop(reg);
    }
}
