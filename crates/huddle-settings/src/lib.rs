//! # huddle-settings
//!
//! Layered configuration for the Huddle session service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HuddleSettings::default()`]
//! 2. **Settings file**: `--config`, `HUDDLE_CONFIG`, or `~/.huddle/settings.json`
//! 3. **Environment variables**: `HUDDLE_*`, nested with `__`
//!    (`HUDDLE_STORE__ADDRESS=redis:6379`)
//!
//! The binary applies its CLI flags last and calls [`validate`] again.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;
