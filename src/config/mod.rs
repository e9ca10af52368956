//! Relay Configuration Module
//!
//! Provides the relay configuration loaded from TOML, with environment and
//! CLI overrides applied on top.
//!
//! ## Loading Order
//!
//! 1. `--config` flag / `F1_RELAY_CONFIG` environment variable (path to TOML file)
//! 2. `relay_config.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! The loaded config is passed explicitly into the relay; there is no global.
//!
//! ```ignore
//! let mut config = RelayConfig::load(args.config.as_deref())?;
//! config.apply_overrides(&overrides);
//! config.validate()?;
//! let relay = Relay::new(&config, source, publisher, stats, cancel);
//! ```

mod relay_config;
pub mod defaults;
pub mod validation;

pub use relay_config::*;
