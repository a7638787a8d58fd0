//! Kernel configuration
//!
//! Everything tunable at boot lives in [`KernelConfig`]. Hosts usually
//! take the defaults, or hand over a JSON document via
//! [`KernelConfig::from_json`]; missing fields keep their defaults.

use crate::error::KResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `PATH` of the kernel context unless the config says otherwise
pub const DEFAULT_PATH: &str = "/usr/bin:/bin";

/// Body of `/etc/profile` in the default image
pub const DEFAULT_PROFILE: &str = "\nexport PATH=/usr/bin:/bin\nexport TEST=test123\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Nested symlink expansions allowed before ELOOP
    pub max_symlink_depth: usize,
    /// Pipe buffer size in bytes (`None` = unbounded)
    pub pipe_capacity: Option<usize>,
    /// Chunk size for read-to-end, getLine and the terminal bridge
    pub read_chunk: usize,
    /// Per-process descriptor limit
    pub max_fds: usize,
    /// Largest regular file, in bytes; bigger writes and truncates fail
    /// with EFBIG
    pub max_file_size: u64,
    /// umask of the kernel context, inherited by every process
    pub umask: u32,
    /// Program spawned behind each terminal connection
    pub shell: String,
    /// Contents of /etc/profile
    pub profile: String,
    /// Environment of the kernel context
    pub env: BTreeMap<String, String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_symlink_depth: 20,
            pipe_capacity: Some(64 * 1024),
            read_chunk: 64,
            max_fds: 1024,
            max_file_size: 64 * 1024 * 1024,
            umask: 0o022,
            shell: "/usr/bin/rosh".into(),
            profile: DEFAULT_PROFILE.into(),
            env: BTreeMap::from([("PATH".to_string(), DEFAULT_PATH.to_string())]),
        }
    }
}

impl KernelConfig {
    /// Parse a (possibly partial) JSON config
    pub fn from_json(json: &str) -> KResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> KResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = KernelConfig::from_json(r#"{"max_symlink_depth": 5, "pipe_capacity": null}"#)
            .unwrap();
        assert_eq!(config.max_symlink_depth, 5);
        assert_eq!(config.pipe_capacity, None);
        assert_eq!(config.read_chunk, 64);
        assert_eq!(config.umask, 0o022);
        assert_eq!(config.env.get("PATH").map(String::as_str), Some(DEFAULT_PATH));
    }

    #[test]
    fn test_json_roundtrip_preserves_env() {
        let mut config = KernelConfig::default();
        config.env.insert("HOME".into(), "/root".into());
        let json = config.to_json().unwrap();
        assert_eq!(KernelConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_bad_json_is_einval() {
        let err = KernelConfig::from_json("{").unwrap_err();
        assert_eq!(err.code(), "EINVAL");
    }
}
