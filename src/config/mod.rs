//! Configuration module for sqlsh.
//!
//! Handles connection profiles, environment variable expansion, and
//! tools-service settings.

mod settings;

pub use settings::{
    expand_env_vars, ConnectionProfile, ServiceSettings, Settings, SettingsError,
};
