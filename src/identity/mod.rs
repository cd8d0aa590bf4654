//! Content identity for dumped source cells.
//!
//! A cell has no stable file on the kernel side: every dump may land on a new
//! physical path. Breakpoints are therefore keyed by a content id derived from
//! the cell text, `prefix + murmur2(code, seed) + suffix`, with the hashing and
//! naming parameters registered per engine (kernel name).
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut registry = CodeIdentityRegistry::new();
//! registry.register_hash_params("python3", "Murmur2", 1)?;
//! registry.register_file_params("python3", "/tmp/ipykernel_42/", ".py");
//! let id = registry.compute_id("x = 1", "python3")?;
//! ```

mod murmur;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{DebuggerError, Result};
use crate::settings::schema::EngineSettings;

pub use murmur::murmur2;

/// Registry shared between the service (which re-registers parameters on every
/// state restore) and whoever constructed it.
pub type SharedIdentityRegistry = Arc<RwLock<CodeIdentityRegistry>>;

/// Supported hashing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashMethod {
    Murmur2,
}

impl HashMethod {
    fn hash(self, code: &str, seed: u32) -> u32 {
        match self {
            HashMethod::Murmur2 => murmur2(code.as_bytes(), seed),
        }
    }
}

impl FromStr for HashMethod {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Murmur2" => Ok(HashMethod::Murmur2),
            other => Err(DebuggerError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashMethod::Murmur2 => write!(f, "Murmur2"),
        }
    }
}

/// Hashing parameters for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub method: HashMethod,
    pub seed: u32,
}

/// Temp-file naming parameters for one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileParams {
    pub prefix: String,
    pub suffix: String,
}

/// Per-engine hash and file-name parameters.
#[derive(Debug, Default, Clone)]
pub struct CodeIdentityRegistry {
    hash_params: HashMap<String, HashParams>,
    file_params: HashMap<String, FileParams>,
}

impl CodeIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedIdentityRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Build a registry pre-seeded from the `[engines.<name>]` settings tables.
    pub fn from_settings(engines: &HashMap<String, EngineSettings>) -> Result<Self> {
        let mut registry = Self::new();
        for (engine, settings) in engines {
            registry.register_hash_params(engine, &settings.hash_method, settings.hash_seed)?;
            registry.register_file_params(
                engine,
                &settings.tmp_file_prefix,
                &settings.tmp_file_suffix,
            );
        }
        Ok(registry)
    }

    /// Register the hashing parameters for `engine`, replacing any previous ones.
    pub fn register_hash_params(&mut self, engine: &str, method: &str, seed: u32) -> Result<()> {
        ensure_engine(engine)?;
        let method = method.parse::<HashMethod>()?;
        self.hash_params
            .insert(engine.to_string(), HashParams { method, seed });
        tracing::debug!(
            "[identity] Registered hash params for {}: {} seed={}",
            engine,
            method,
            seed
        );
        Ok(())
    }

    /// Register the temp-file naming parameters for `engine`, replacing any previous ones.
    pub fn register_file_params(&mut self, engine: &str, prefix: &str, suffix: &str) {
        self.file_params.insert(
            engine.to_string(),
            FileParams {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            },
        );
    }

    pub fn hash_params(&self, engine: &str) -> Option<HashParams> {
        self.hash_params.get(engine).copied()
    }

    pub fn file_params(&self, engine: &str) -> Option<&FileParams> {
        self.file_params.get(engine)
    }

    /// Compute the content id of `code` for `engine`.
    pub fn compute_id(&self, code: &str, engine: &str) -> Result<String> {
        ensure_engine(engine)?;
        let files = self.file_params.get(engine).ok_or_else(|| {
            DebuggerError::Configuration(format!("Kernel ({engine}) has no tmp file params."))
        })?;
        let params = self.hash_params.get(engine).ok_or_else(|| {
            DebuggerError::Configuration(format!("Kernel ({engine}) has no hashing params."))
        })?;

        let hash = params.method.hash(code, params.seed);
        Ok(format!("{}{}{}", files.prefix, hash, files.suffix))
    }

    /// Re-home an id produced by another engine instance onto `engine`'s
    /// current prefix and suffix, keeping its hash segment.
    ///
    /// Returns `None` when no hash segment can be found in `old_id`.
    pub fn rewrite_id(&self, old_id: &str, engine: &str) -> Result<Option<String>> {
        let files = self.file_params.get(engine).ok_or_else(|| {
            DebuggerError::Configuration(format!("Kernel ({engine}) has no tmp file params."))
        })?;
        Ok(extract_hash(old_id, &files.suffix)
            .map(|hash| format!("{}{}{}", files.prefix, hash, files.suffix)))
    }
}

/// Pull the decimal hash segment out of a content id.
///
/// The suffix is stripped when present, otherwise the file extension; the hash
/// is the trailing run of ASCII digits of what remains.
pub fn extract_hash<'a>(id: &'a str, suffix: &str) -> Option<&'a str> {
    let stem = if !suffix.is_empty() && id.ends_with(suffix) {
        &id[..id.len() - suffix.len()]
    } else {
        strip_extension(id)
    };

    let start = stem
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);

    let hash = &stem[start..];
    (!hash.is_empty()).then_some(hash)
}

fn strip_extension(id: &str) -> &str {
    let name_start = id.rfind('/').map(|i| i + 1).unwrap_or(0);
    match id[name_start..].rfind('.') {
        Some(dot) => &id[..name_start + dot],
        None => id,
    }
}

fn ensure_engine(engine: &str) -> Result<()> {
    if engine.is_empty() {
        return Err(DebuggerError::Configuration(
            "Kernel name is not defined.".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn python_registry() -> CodeIdentityRegistry {
        let mut registry = CodeIdentityRegistry::new();
        registry.register_hash_params("py", "Murmur2", 1).unwrap();
        registry.register_file_params("py", "jupyter_", ".py");
        registry
    }

    #[test]
    fn test_compute_id_shape() {
        let registry = python_registry();
        let id = registry.compute_id("x=1", "py").unwrap();

        assert_eq!(id, "jupyter_3908581943.py");
        let digits = id
            .strip_prefix("jupyter_")
            .and_then(|rest| rest.strip_suffix(".py"))
            .unwrap();
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(registry.compute_id("x=1", "py").unwrap(), id);
    }

    #[test]
    fn test_compute_id_requires_file_params() {
        let mut registry = CodeIdentityRegistry::new();
        registry.register_hash_params("py", "Murmur2", 1).unwrap();

        let err = registry.compute_id("x=1", "py").unwrap_err();
        assert!(matches!(err, DebuggerError::Configuration(_)));
    }

    #[test]
    fn test_compute_id_requires_hash_params() {
        let mut registry = CodeIdentityRegistry::new();
        registry.register_file_params("py", "jupyter_", ".py");

        let err = registry.compute_id("x=1", "py").unwrap_err();
        assert!(matches!(err, DebuggerError::Configuration(_)));
    }

    #[test]
    fn test_unknown_engine_is_configuration_error() {
        let registry = python_registry();
        assert!(matches!(
            registry.compute_id("x=1", "julia"),
            Err(DebuggerError::Configuration(_))
        ));
        assert!(matches!(
            registry.compute_id("x=1", ""),
            Err(DebuggerError::Configuration(_))
        ));
    }

    #[test]
    fn test_unsupported_method() {
        let mut registry = CodeIdentityRegistry::new();
        let err = registry.register_hash_params("py", "Sha256", 1).unwrap_err();
        assert!(matches!(err, DebuggerError::UnsupportedMethod(m) if m == "Sha256"));
        assert!(registry.hash_params("py").is_none());
    }

    #[test]
    fn test_registration_overwrites() {
        let mut registry = python_registry();
        let before = registry.compute_id("x=1", "py").unwrap();

        registry.register_hash_params("py", "Murmur2", 0).unwrap();
        registry.register_file_params("py", "/tmp/ipykernel_7/", ".py");
        let after = registry.compute_id("x=1", "py").unwrap();

        assert_ne!(before, after);
        assert_eq!(after, "/tmp/ipykernel_7/2878563358.py");
    }

    #[test]
    fn test_extract_hash_variants() {
        assert_eq!(
            extract_hash("/tmp/ipykernel_1/1626409200.py", ".py"),
            Some("1626409200")
        );
        assert_eq!(extract_hash("jupyter_1626409200.py", ".py"), Some("1626409200"));
        assert_eq!(extract_hash("/tmp/x/1626409200.jl", ".py"), Some("1626409200"));
        assert_eq!(extract_hash("/tmp/x/notes.py", ".py"), None);
    }

    #[test]
    fn test_rewrite_id_moves_to_current_prefix() {
        let mut registry = python_registry();
        registry.register_file_params("py", "/tmp/ipykernel_99/", ".py");

        let rewritten = registry
            .rewrite_id("/tmp/ipykernel_1/1626409200.py", "py")
            .unwrap();
        assert_eq!(rewritten.as_deref(), Some("/tmp/ipykernel_99/1626409200.py"));

        let prefixless = registry.rewrite_id("jupyter_1626409200.py", "py").unwrap();
        assert_eq!(prefixless.as_deref(), Some("/tmp/ipykernel_99/1626409200.py"));
    }

    #[test]
    fn test_from_settings_seeds_engines() {
        let mut engines = HashMap::new();
        engines.insert(
            "py".to_string(),
            EngineSettings {
                hash_method: "Murmur2".to_string(),
                hash_seed: 1,
                tmp_file_prefix: "jupyter_".to_string(),
                tmp_file_suffix: ".py".to_string(),
            },
        );

        let registry = CodeIdentityRegistry::from_settings(&engines).unwrap();
        assert_eq!(
            registry.compute_id("x=1", "py").unwrap(),
            "jupyter_3908581943.py"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: ids are stable across calls for the same text
        #[test]
        fn prop_compute_id_is_idempotent(code in ".{0,200}") {
            let registry = python_registry();
            let first = registry.compute_id(&code, "py").unwrap();
            let second = registry.compute_id(&code, "py").unwrap();
            prop_assert_eq!(first, second);
        }

        /// Property: different texts get different ids
        #[test]
        fn prop_distinct_code_distinct_ids(a in "[a-z0-9=() ]{1,64}", b in "[a-z0-9=() ]{1,64}") {
            prop_assume!(a != b);
            let registry = python_registry();
            prop_assert_ne!(
                registry.compute_id(&a, "py").unwrap(),
                registry.compute_id(&b, "py").unwrap()
            );
        }
    }
}
