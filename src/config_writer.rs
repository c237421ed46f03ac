//! Config files consumed by the external binaries.
//!
//! Daemons, proxies and maintenance agents read JSON; the metadata cluster
//! reads INI. Records serialize in field declaration order, so the same
//! record always produces the same bytes.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Capacity threshold when each daemon owns a dedicated filesystem.
pub const LIMIT_SEPARATE_FS: u8 = 90;

/// Capacity threshold when daemons share the host filesystem.
pub const LIMIT_SHARED_FS: u8 = 99;

/// Manifest cache entries per proxy.
pub const MANIFEST_CACHE_SIZE: u64 = 100 * 1000;

/// Fragment cache bytes per proxy.
pub const FRAGMENT_CACHE_SIZE: u64 = 100 * 1000 * 1000;

/// Multicast discovery setting of a storage daemon.
///
/// `Disabled` is written as an explicit `null`; `Enabled` leaves the key
/// out so the daemon falls back to its built-in default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multicast {
    #[default]
    Enabled,
    Disabled,
}

impl Multicast {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Multicast::Enabled
        } else {
            Multicast::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Multicast::Enabled)
    }
}

impl Serialize for Multicast {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_none()
    }
}

impl<'de> Deserialize<'de> for Multicast {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match value {
            None => Multicast::Disabled,
            Some(_) => Multicast::Enabled,
        })
    }
}

/// Leaf certificate and key of a TLS-enabled daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Client-side TLS material for proxies and maintenance agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsClient {
    pub ca_cert: PathBuf,
    /// Certificate and key, in that order.
    pub creds: (PathBuf, PathBuf),
}

/// Config of one ASD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsdConfig {
    pub port: u16,
    pub node_id: String,
    pub home: PathBuf,
    pub log_level: String,
    pub asd_id: String,
    pub limit: u8,
    #[serde(rename = "__sync_dont_use")]
    pub sync_dont_use: bool,
    #[serde(default, skip_serializing_if = "Multicast::is_enabled")]
    pub multicast: Multicast,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsFiles>,
}

/// Capacity threshold for a daemon, by filesystem layout.
pub fn capacity_limit(separate_fs: bool) -> u8 {
    if separate_fs {
        LIMIT_SEPARATE_FS
    } else {
        LIMIT_SHARED_FS
    }
}

/// Config of one proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub port: u16,
    pub albamgr_cfg_file: PathBuf,
    pub log_level: String,
    pub fragment_cache_dir: PathBuf,
    pub manifest_cache_size: u64,
    pub fragment_cache_size: u64,
    pub chattiness: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client: Option<TlsClient>,
}

/// Config shared by a batch of maintenance agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub albamgr_cfg_file: PathBuf,
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client: Option<TlsClient>,
}

/// Writes and reads back config files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigWriter;

impl ConfigWriter {
    pub fn new() -> Self {
        Self
    }

    /// Serialize `record` as JSON to `path`, replacing any previous file.
    pub fn write_json<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        ensure_parent(path)?;
        let content = serde_json::to_string(record)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "Wrote JSON config");
        Ok(())
    }

    /// Read a JSON record back.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Render `document` to `path`, replacing any previous file.
    pub fn write_ini(&self, path: &Path, document: &IniDocument) -> Result<()> {
        ensure_parent(path)?;
        std::fs::write(path, document.to_string())?;
        tracing::debug!(path = %path.display(), "Wrote INI config");
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// An INI file with ordered sections and keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

/// One `[name]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl IniSection {
    /// Set `key`, replacing an earlier value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        let key = key.into();
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// The section called `name`, created at the end if missing.
    pub fn section(&mut self, name: &str) -> &mut IniSection {
        let position = match self.sections.iter().position(|s| s.name == name) {
            Some(position) => position,
            None => {
                self.sections.push(IniSection {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[position]
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == section)
            .and_then(|s| s.get(key))
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.name)?;
            for (key, value) in &section.entries {
                writeln!(f, "{} = {}", key, value)?;
            }
        }
        Ok(())
    }
}
