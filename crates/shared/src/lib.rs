// tacmap shared library
// Components common to the tactical map tools: logging bootstrap and
// INI configuration with environment overrides.

pub mod config;
pub mod log;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "Tacmap_";

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "tacmap.conf";
