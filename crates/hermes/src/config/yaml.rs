// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML channel QoS loader.
//!
//! # Example YAML
//!
//! ```yaml
//! default:
//!   depth: 2
//!   reliability: RELIABLE
//! shm: prefer
//! channels:
//!   camera:
//!     depth: 5
//!     reliability: BEST_EFFORT
//!   imu:
//!     queue_depth: 64
//! ```
//!
//! Fields missing from a channel entry inherit from `default`.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::RuntimeConfig;
use crate::role::{QosProfile, Reliability};
use crate::transport::shm::ShmPolicy;
use crate::{Error, Result};

/// YAML QoS loader.
pub struct YamlLoader;

/// Root YAML document.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct YamlDocument {
    /// Default profile for unlisted channels.
    pub default: YamlQos,
    /// `prefer` or `disable`.
    pub shm: Option<String>,
    /// Per-channel overrides.
    pub channels: HashMap<String, YamlQos>,
}

/// One QoS entry.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct YamlQos {
    /// History depth.
    pub depth: Option<usize>,
    /// RELIABLE or BEST_EFFORT.
    pub reliability: Option<String>,
    /// Scheduler queue bound.
    pub queue_depth: Option<usize>,
}

impl YamlLoader {
    /// Load and parse a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a YAML document into a [`RuntimeConfig`].
    pub fn parse(yaml_content: &str) -> Result<RuntimeConfig> {
        let doc: YamlDocument = serde_yaml::from_str(yaml_content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse YAML: {}", e)))?;
        Self::to_config(&doc)
    }

    /// Convert a parsed document.
    pub fn to_config(doc: &YamlDocument) -> Result<RuntimeConfig> {
        let config = RuntimeConfig::new();

        let default = apply(QosProfile::default(), &doc.default)?;
        config.set_default_qos(default);

        if let Some(shm) = &doc.shm {
            config.set_shm_policy(parse_shm(shm)?);
        }

        for (name, entry) in &doc.channels {
            if name.is_empty() {
                return Err(Error::InvalidConfig("empty channel name in YAML".into()));
            }
            let qos = apply(default, entry)?;
            config.set_channel_qos(name, qos);
        }

        log::debug!(
            "[config] Loaded YAML: default={:?} channels={}",
            default,
            doc.channels.len()
        );
        Ok(config)
    }
}

fn apply(base: QosProfile, entry: &YamlQos) -> Result<QosProfile> {
    let mut qos = base;
    if let Some(depth) = entry.depth {
        qos.history_depth = depth;
    }
    if let Some(queue) = entry.queue_depth {
        qos.queue_depth = queue;
    }
    if let Some(raw) = &entry.reliability {
        qos.reliability = Reliability::parse(raw)
            .ok_or_else(|| Error::InvalidConfig(format!("Unknown reliability: {}", raw)))?;
    }
    qos.validate()?;
    Ok(qos)
}

fn parse_shm(raw: &str) -> Result<ShmPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "prefer" => Ok(ShmPolicy::Prefer),
        "disable" | "disabled" | "off" => Ok(ShmPolicy::Disable),
        other => Err(Error::InvalidConfig(format!("Unknown shm policy: {}", other))),
    }
}
