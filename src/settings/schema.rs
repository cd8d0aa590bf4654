//! Settings schema definitions for kdbg.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root settings structure.
///
/// Loaded from `~/.kdbg/settings.toml` with environment variable interpolation support.
/// Version field enables future migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdbgSettings {
    /// Schema version for migrations
    pub version: u32,

    pub logging: LoggingSettings,

    /// Debug endpoint to connect to
    pub connection: ConnectionSettings,

    /// Saved debugger state
    pub state: StateSettings,

    /// Hashing and temp-file parameters per engine, used before the kernel
    /// reports its own
    #[serde(default)]
    pub engines: HashMap<String, EngineSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "error" | "warn" | "info" | "debug" | "trace"
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// `host:port` of a Content-Length framed debug endpoint
    pub address: String,

    /// Engine identifier (kernel name)
    pub kernel_name: String,

    /// Display name of the kernel session
    pub name: String,

    /// Document the kernel belongs to
    pub path: String,

    /// Per-command deadline in the CLI
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// Where `save` and `load` read and write the debugger state.
    /// Defaults to `~/.kdbg/state.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Start the debugger on connect when the kernel has not started it
    pub auto_start: bool,
}

/// Identity parameters for one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Only "Murmur2" is supported
    pub hash_method: String,
    pub hash_seed: u32,
    pub tmp_file_prefix: String,
    pub tmp_file_suffix: String,
}

// =============================================================================
// Default implementations
// =============================================================================

impl Default for KdbgSettings {
    fn default() -> Self {
        Self {
            version: 1,
            logging: LoggingSettings::default(),
            connection: ConnectionSettings::default(),
            state: StateSettings::default(),
            engines: HashMap::new(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5678".to_string(),
            kernel_name: "python3".to_string(),
            name: "kernel".to_string(),
            path: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            path: None,
            auto_start: true,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hash_method: "Murmur2".to_string(),
            hash_seed: 0,
            tmp_file_prefix: String::new(),
            tmp_file_suffix: ".py".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = KdbgSettings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.logging.level, "warn");
        assert_eq!(settings.connection.kernel_name, "python3");
        assert_eq!(settings.connection.request_timeout_secs, 30);
        assert!(settings.state.auto_start);
        assert!(settings.engines.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            version = 1
            [connection]
            address = "10.0.0.2:9000"

            [engines.python3]
            hash_seed = 3339675911
            tmp_file_prefix = "/tmp/ipykernel_7/"
        "#;

        let settings: KdbgSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.connection.address, "10.0.0.2:9000");
        // Defaults should fill in missing fields
        assert_eq!(settings.connection.kernel_name, "python3");
        let engine = &settings.engines["python3"];
        assert_eq!(engine.hash_method, "Murmur2");
        assert_eq!(engine.hash_seed, 3339675911);
        assert_eq!(engine.tmp_file_suffix, ".py");
    }

    #[test]
    fn test_serialize_settings() {
        let settings = KdbgSettings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("version = 1"));
        assert!(toml_str.contains("[connection]"));
    }
}
