//! TOML-based settings for kdbg.
//!
//! Settings are loaded from `~/.kdbg/settings.toml` with environment variable
//! interpolation support. Command-line flags take precedence over the file.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kdbg_lib::settings::SettingsManager;
//!
//! let manager = SettingsManager::new().await?;
//! let settings = manager.get().await;
//! let registry = CodeIdentityRegistry::from_settings(&settings.engines);
//! ```

pub mod loader;
pub mod schema;

pub use loader::{
    default_state_path, get_with_env_fallback, settings_path, SettingsManager, STATE_PATH_ENV,
};
pub use schema::{ConnectionSettings, EngineSettings, KdbgSettings, StateSettings};
