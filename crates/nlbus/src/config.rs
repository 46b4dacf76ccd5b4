// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration, loadable from TOML.
//!
//! ```toml
//! [codec]
//! max_payload = 8192
//!
//! [responder]
//! mode = "echo"
//! template = "Hello from nlbus"
//!
//! [broker]
//! group = 17
//! deliver_to_sender = true
//!
//! [monitor]
//! backoff_ms = 250
//! recv_buffer = 8192
//! groups = [1, 5, 7]
//! ```
//!
//! Every section and field is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NlError, Result};
use crate::registry::{GroupId, MAX_GROUPS};
use crate::responder::ReplyMode;
use crate::wire::{DEFAULT_MAX_PAYLOAD, HEADER_LEN, MAX_PAYLOAD_LIMIT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NlbusConfig {
    pub codec: CodecConfig,
    pub responder: ResponderConfig,
    pub broker: BrokerConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Largest payload an outbound frame may carry.
    pub max_payload: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Reply payload policy as written in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    #[default]
    Echo,
    Template,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub mode: ReplyKind,
    /// Reply text in template mode.
    pub template: String,
}

fn default_template() -> String {
    "Hello from nlbus".to_string()
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            mode: ReplyKind::Echo,
            template: default_template(),
        }
    }
}

impl ResponderConfig {
    pub fn reply_mode(&self) -> ReplyMode {
        match self.mode {
            ReplyKind::Echo => ReplyMode::Echo,
            ReplyKind::Template => ReplyMode::Template(self.template.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Group every inbound message is re-published to.
    pub group: u32,
    /// Whether the publisher receives its own message.
    pub deliver_to_sender: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            group: GroupId::APP.get(),
            deliver_to_sender: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sleep between polls when nothing is pending.
    pub backoff_ms: u64,
    pub recv_buffer: usize,
    /// Groups to join.
    pub groups: Vec<u32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 250,
            recv_buffer: 8192,
            groups: vec![
                GroupId::LINK.get(),
                GroupId::IPV4_IFADDR.get(),
                GroupId::IPV4_ROUTE.get(),
            ],
        }
    }
}

impl MonitorConfig {
    pub fn group_ids(&self) -> Result<Vec<GroupId>> {
        self.groups.iter().map(|g| GroupId::new(*g)).collect()
    }
}

impl NlbusConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NlError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| NlError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| NlError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.codec.max_payload == 0 {
            return Err(NlError::Config("codec.max_payload must be > 0".into()));
        }
        if self.codec.max_payload > MAX_PAYLOAD_LIMIT {
            return Err(NlError::Config(format!(
                "codec.max_payload must be <= {}",
                MAX_PAYLOAD_LIMIT
            )));
        }
        if self.responder.mode == ReplyKind::Template && self.responder.template.is_empty() {
            return Err(NlError::Config(
                "responder.template must not be empty in template mode".into(),
            ));
        }
        if self.responder.mode == ReplyKind::Template
            && self.responder.template.len() > self.codec.max_payload
        {
            return Err(NlError::Config(
                "responder.template exceeds codec.max_payload".into(),
            ));
        }
        if self.broker.group >= MAX_GROUPS {
            return Err(NlError::Config(format!(
                "broker.group must be < {}",
                MAX_GROUPS
            )));
        }
        if self.monitor.backoff_ms == 0 {
            return Err(NlError::Config("monitor.backoff_ms must be > 0".into()));
        }
        if self.monitor.recv_buffer < HEADER_LEN {
            return Err(NlError::Config(format!(
                "monitor.recv_buffer must be >= {}",
                HEADER_LEN
            )));
        }
        if self.monitor.groups.is_empty() {
            return Err(NlError::Config("monitor.groups must not be empty".into()));
        }
        if let Some(g) = self.monitor.groups.iter().find(|g| **g >= MAX_GROUPS) {
            return Err(NlError::Config(format!(
                "monitor.groups: {} is not < {}",
                g, MAX_GROUPS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = NlbusConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.broker.deliver_to_sender);
        assert_eq!(cfg.broker.group, 17);
        assert_eq!(cfg.monitor.groups, vec![1, 5, 7]);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg = NlbusConfig::from_toml(
            r#"
            [responder]
            mode = "template"
            template = "pong"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.responder.reply_mode(), ReplyMode::Template("pong".into()));
        assert_eq!(cfg.codec.max_payload, DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut cfg = NlbusConfig::default();
        cfg.broker.deliver_to_sender = false;
        cfg.monitor.groups = vec![9, 11];
        let text = cfg.to_toml().unwrap();
        assert_eq!(NlbusConfig::from_toml(&text).unwrap(), cfg);
    }

    #[test]
    fn test_validation_errors() {
        let cases: [(&str, fn(&mut NlbusConfig)); 8] = [
            ("max_payload", |c| c.codec.max_payload = 0),
            ("max_payload", |c| c.codec.max_payload = MAX_PAYLOAD_LIMIT + 1),
            ("template", |c| {
                c.responder.mode = ReplyKind::Template;
                c.responder.template.clear();
            }),
            ("broker.group", |c| c.broker.group = 32),
            ("backoff_ms", |c| c.monitor.backoff_ms = 0),
            ("recv_buffer", |c| c.monitor.recv_buffer = 8),
            ("monitor.groups", |c| c.monitor.groups.clear()),
            ("monitor.groups", |c| c.monitor.groups = vec![1, 40]),
        ];
        for (needle, mutate) in cases {
            let mut cfg = NlbusConfig::default();
            mutate(&mut cfg);
            match cfg.validate() {
                Err(NlError::Config(msg)) => assert!(msg.contains(needle), "{}: {}", needle, msg),
                other => panic!("{}: expected config error, got {:?}", needle, other),
            }
        }
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = NlbusConfig::from_toml("[responder]\nmode = \"shout\"\n").unwrap_err();
        assert!(matches!(err, NlError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nlbus.toml");
        std::fs::write(&path, "[broker]\ngroup = 3\n").unwrap();
        assert_eq!(NlbusConfig::from_file(&path).unwrap().broker.group, 3);
        assert!(NlbusConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
