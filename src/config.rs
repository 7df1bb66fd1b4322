//! Node configuration: command line plus an optional YAML file.

use crate::storage::KvSettings;
use crate::transfer::TransferSettings;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Federated transfer and sharded KV node.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct CmdArgs {
    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:7100")]
    pub bind: SocketAddr,
    /// YAML node configuration.
    #[arg(long)]
    pub config: Option<String>,
    /// Overrides `party_id` from the configuration file.
    #[arg(long)]
    pub party: Option<String>,
}

/// A storage node seeded into the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeEntry {
    pub node_id: u64,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub party_id: String,
    /// Other parties' HTTP addresses, by party id.
    pub parties: HashMap<String, SocketAddr>,
    /// Storage nodes hosting fragments. Empty means this node alone.
    pub nodes: Vec<NodeEntry>,
    pub default_fragment_count: u32,
    pub broker_capacity: usize,
    pub broker_wait_ms: u64,
    pub iterate_page_size: usize,
    pub transfer_batch_size: usize,
    pub status_poll_interval_ms: u64,
    pub status_deadline_secs: u64,
    pub arrival_timeout_secs: u64,
    pub finished_retention_secs: u64,
    pub janitor_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            party_id: "local".to_string(),
            parties: HashMap::new(),
            nodes: Vec::new(),
            default_fragment_count: 4,
            broker_capacity: 10_000,
            broker_wait_ms: 1000,
            iterate_page_size: 1000,
            transfer_batch_size: 500,
            status_poll_interval_ms: 500,
            status_deadline_secs: 300,
            arrival_timeout_secs: 300,
            finished_retention_secs: 3600,
            janitor_interval_secs: 60,
        }
    }
}

impl NodeConfig {
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("parse yaml node config")
    }

    pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_yaml(&text)
    }

    /// Loads the file named on the command line, if any, and applies overrides.
    pub fn load(args: &CmdArgs) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::read(path)?,
            None => Self::default(),
        };
        if let Some(party) = &args.party {
            config.party_id = party.clone();
        }
        if config.nodes.is_empty() {
            config.nodes.push(NodeEntry {
                node_id: 1,
                addr: args.bind,
            });
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would stall or spin the node: zero sizes, and zero
    /// intervals for timers and wait loops.
    pub fn validate(&self) -> anyhow::Result<()> {
        let required = [
            ("default_fragment_count", u64::from(self.default_fragment_count)),
            ("broker_capacity", self.broker_capacity as u64),
            ("broker_wait_ms", self.broker_wait_ms),
            ("iterate_page_size", self.iterate_page_size as u64),
            ("transfer_batch_size", self.transfer_batch_size as u64),
            ("status_poll_interval_ms", self.status_poll_interval_ms),
            ("status_deadline_secs", self.status_deadline_secs),
            ("arrival_timeout_secs", self.arrival_timeout_secs),
            ("finished_retention_secs", self.finished_retention_secs),
            ("janitor_interval_secs", self.janitor_interval_secs),
        ];
        for (name, value) in required {
            if value == 0 {
                anyhow::bail!("config: {} must be greater than zero", name);
            }
        }
        Ok(())
    }

    pub fn kv_settings(&self) -> KvSettings {
        KvSettings {
            default_fragment_count: self.default_fragment_count,
            broker_capacity: self.broker_capacity,
            broker_wait: Duration::from_millis(self.broker_wait_ms),
            page_size: self.iterate_page_size,
        }
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            broker_capacity: self.broker_capacity,
            broker_wait: Duration::from_millis(self.broker_wait_ms),
            batch_size: self.transfer_batch_size,
            arrival_timeout: Duration::from_secs(self.arrival_timeout_secs),
            status_poll_interval: Duration::from_millis(self.status_poll_interval_ms),
            status_deadline: Duration::from_secs(self.status_deadline_secs),
            finished_retention: Duration::from_secs(self.finished_retention_secs),
            janitor_interval: Duration::from_secs(self.janitor_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = NodeConfig::from_yaml(
            r#"
party_id: "9999"
parties:
  "10000": 10.0.0.2:7100
nodes:
  - node_id: 1
    addr: 10.0.0.1:7100
  - node_id: 2
    addr: 10.0.0.3:7100
default_fragment_count: 16
"#,
        )
        .unwrap();

        assert_eq!(config.party_id, "9999");
        assert_eq!(config.parties["10000"], "10.0.0.2:7100".parse().unwrap());
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.default_fragment_count, 16);
        assert_eq!(config.status_deadline_secs, 300);
        assert_eq!(config.transfer_settings().status_poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_load_without_file_seeds_this_node() {
        let args = CmdArgs::parse_from(["fedplane", "--bind", "127.0.0.1:7200", "--party", "host-1"]);

        let config = NodeConfig::load(&args).unwrap();

        assert_eq!(config.party_id, "host-1");
        assert_eq!(
            config.nodes,
            vec![NodeEntry {
                node_id: 1,
                addr: "127.0.0.1:7200".parse().unwrap()
            }]
        );
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for field in ["janitor_interval_secs", "status_poll_interval_ms", "broker_wait_ms"] {
            let config = NodeConfig::from_yaml(&format!("{}: 0", field)).unwrap();

            let err = config.validate().unwrap_err();

            assert!(err.to_string().contains(field), "{}: {}", field, err);
        }
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_rejects_zero_janitor_interval() {
        let path = std::env::temp_dir().join(format!("fedplane-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "janitor_interval_secs: 0\n").unwrap();
        let args = CmdArgs::parse_from(["fedplane", "--config", path.to_str().unwrap()]);

        let result = NodeConfig::load(&args);

        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        assert!(NodeConfig::from_yaml("nodes: [not-a-node").is_err());
    }
}
