// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! nlbus command-line front end
//!
//! # Usage
//!
//! ```bash
//! # Watch link / address / route changes
//! nlbusctl monitor --groups 1,5,7
//!
//! # Serve the echo responder on protocol 17
//! nlbusctl respond --protocol 17
//!
//! # Serve the group broker
//! nlbusctl broadcast --protocol 17 --group 17
//!
//! # One request against a responder bound to port 4242
//! nlbusctl send --protocol 17 --to 4242 "hello"
//!
//! # Configuration files
//! nlbusctl gen-config -o nlbus.toml
//! nlbusctl validate -c nlbus.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nlbus::NlbusConfig;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// nlbus datagram messaging tool
#[derive(Parser, Debug)]
#[command(name = "nlbusctl")]
#[command(about = "Netlink-style messaging services and network event monitor")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log network state notifications until Ctrl+C
    Monitor {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Groups to join (comma-separated), overrides the file
        #[arg(short, long, value_delimiter = ',')]
        groups: Option<Vec<u32>>,
    },

    /// Serve the unicast responder
    Respond {
        /// Netlink protocol number
        #[arg(short, long)]
        protocol: u32,

        /// Port to bind (0 lets the kernel choose)
        #[arg(long, default_value = "0")]
        port: u32,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Serve the multicast broker
    Broadcast {
        /// Netlink protocol number
        #[arg(short, long)]
        protocol: u32,

        /// Group to publish on, overrides the file
        #[arg(short, long)]
        group: Option<u32>,

        /// Port to bind (0 lets the kernel choose)
        #[arg(long, default_value = "0")]
        port: u32,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Send one message and print what comes back
    Send {
        /// Netlink protocol number
        #[arg(short, long)]
        protocol: u32,

        /// Destination port of the serving process
        #[arg(long, default_value = "0")]
        to: u32,

        /// Also join this group and print traffic received on it
        #[arg(short, long)]
        group: Option<u32>,

        /// Seconds to wait for a reply
        #[arg(long, default_value = "2")]
        wait: u64,

        /// Message text
        message: String,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "nlbus.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::GenConfig { output } => cmd_gen_config(&output),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Monitor { config, groups } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(groups) = groups {
                cfg.monitor.groups = groups;
                cfg.validate()?;
            }
            os::cmd_monitor(&cfg)
        }
        Commands::Respond {
            protocol,
            port,
            config,
        } => os::cmd_respond(&load_config(config.as_deref())?, protocol, port),
        Commands::Broadcast {
            protocol,
            group,
            port,
            config,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(group) = group {
                cfg.broker.group = group;
                cfg.validate()?;
            }
            check_netlink_broker(&cfg)?;
            os::cmd_broadcast(&cfg, protocol, port)
        }
        Commands::Send {
            protocol,
            to,
            group,
            wait,
            message,
        } => os::cmd_send(protocol, to, group, wait, &message),
    }
}

fn load_config(path: Option<&Path>) -> Result<NlbusConfig> {
    match path {
        Some(path) => NlbusConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(NlbusConfig::default()),
    }
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    let content = NlbusConfig::default().to_toml()?;
    std::fs::write(output, content).with_context(|| format!("writing {}", output.display()))?;
    println!("Generated configuration: {}", output.display());
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let cfg = NlbusConfig::from_file(path).with_context(|| format!("validating {}", path.display()))?;
    println!("Configuration is valid");
    println!("  max payload: {}", cfg.codec.max_payload);
    println!("  reply mode:  {:?}", cfg.responder.reply_mode());
    println!(
        "  broker:      group {}, deliver to sender {}",
        cfg.broker.group, cfg.broker.deliver_to_sender
    );
    println!("  monitor:     groups {:?}", cfg.monitor.groups);
    Ok(())
}

/// A netlink group delivers to every member socket, the publisher included.
fn check_netlink_broker(cfg: &NlbusConfig) -> Result<()> {
    if !cfg.broker.deliver_to_sender {
        return Err(nlbus::NlError::Config(
            "broker.deliver_to_sender = false is not supported over netlink: \
             the kernel cannot exclude a group member"
                .into(),
        )
        .into());
    }
    Ok(())
}

/// Install the Ctrl+C handler and return the flag it clears.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn running_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

#[cfg(target_os = "linux")]
mod os {
    use super::running_flag;
    use anyhow::{bail, Result};
    use nlbus::monitor::route_source;
    use nlbus::wire::msg_type;
    use nlbus::{
        EventMonitor, GroupId, LogSink, MessageCodec, MulticastBroker, NetlinkSocket, NlbusConfig,
        UnicastResponder,
    };
    use std::time::{Duration, Instant};

    pub fn cmd_monitor(cfg: &NlbusConfig) -> Result<()> {
        let running = running_flag()?;
        let source = route_source(&cfg.monitor.group_ids()?)?;
        let mut monitor = EventMonitor::from_config(source, LogSink, &cfg.monitor);

        println!("Press Ctrl+C to stop...");
        monitor.run(&running);

        let stats = monitor.stats();
        println!(
            "\n{} datagrams, {} events, {} discarded, {} partial",
            stats.datagrams, stats.events, stats.discarded, stats.partial
        );
        Ok(())
    }

    pub fn cmd_respond(cfg: &NlbusConfig, protocol: u32, port: u32) -> Result<()> {
        let running = running_flag()?;
        let responder = UnicastResponder::from_config(cfg)?;
        let socket = NetlinkSocket::bind(protocol, port)?;
        println!(
            "Responder on protocol {} port {} ({:?})",
            protocol,
            socket.port(),
            responder.mode()
        );
        socket.serve(&responder, &running, cfg.codec.max_payload + nlbus::HEADER_LEN)?;

        let stats = responder.stats();
        println!(
            "\n{} handled, {} replied, {} dropped, {} malformed",
            stats.handled, stats.replied, stats.dropped, stats.malformed
        );
        Ok(())
    }

    pub fn cmd_broadcast(cfg: &NlbusConfig, protocol: u32, port: u32) -> Result<()> {
        let running = running_flag()?;
        let broker = MulticastBroker::from_config(cfg)?;
        let socket = NetlinkSocket::bind(protocol, port)?;
        println!(
            "Broker on protocol {} port {}, publishing to group {}",
            protocol,
            socket.port(),
            broker.group()
        );
        socket.serve(&broker, &running, cfg.codec.max_payload + nlbus::HEADER_LEN)?;

        let stats = broker.stats();
        println!(
            "\n{} handled, {} published, {} dropped, {} malformed",
            stats.handled, stats.published, stats.dropped, stats.malformed
        );
        Ok(())
    }

    pub fn cmd_send(protocol: u32, to: u32, group: Option<u32>, wait: u64, message: &str) -> Result<()> {
        let codec = MessageCodec::default();
        let socket = NetlinkSocket::bind(protocol, 0)?;
        if let Some(group) = group {
            socket.add_membership(GroupId::new(group)?)?;
        }

        let request = codec.encode(message.as_bytes(), socket.port().get(), msg_type::MIN_TYPE, 1)?;
        nlbus::Transport::send_unicast(&socket, nlbus::EndpointId(to), &request)?;
        tracing::debug!("sent {} bytes to port {}", request.len(), to);

        socket.set_read_timeout(Some(Duration::from_millis(200)))?;
        let deadline = Instant::now() + Duration::from_secs(wait);
        let mut buf = vec![0u8; codec.max_payload() + nlbus::HEADER_LEN];
        let mut received = 0usize;
        while Instant::now() < deadline {
            let Some((n, from)) = socket.recv_from(&mut buf)? else {
                continue;
            };
            for frame in codec.frames(&buf[..n]) {
                match frame {
                    Ok(view) => {
                        received += 1;
                        println!(
                            "[port {}] type {} seq {}: {}",
                            from,
                            view.header.kind,
                            view.header.sequence,
                            nlbus::wire::payload_text(view.payload)
                        );
                    }
                    Err(e) => tracing::warn!("bad frame from port {}: {}", from, e),
                }
            }
            if group.is_none() && received > 0 {
                return Ok(());
            }
        }
        if received == 0 {
            bail!("no reply within {}s", wait);
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod os {
    use anyhow::{bail, Result};
    use nlbus::NlbusConfig;

    pub fn cmd_monitor(_cfg: &NlbusConfig) -> Result<()> {
        bail!("netlink sockets are only available on Linux")
    }

    pub fn cmd_respond(_cfg: &NlbusConfig, _protocol: u32, _port: u32) -> Result<()> {
        bail!("netlink sockets are only available on Linux")
    }

    pub fn cmd_broadcast(_cfg: &NlbusConfig, _protocol: u32, _port: u32) -> Result<()> {
        bail!("netlink sockets are only available on Linux")
    }

    pub fn cmd_send(_protocol: u32, _to: u32, _group: Option<u32>, _wait: u64, _message: &str) -> Result<()> {
        bail!("netlink sockets are only available on Linux")
    }
}
