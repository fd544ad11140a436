// Configuration module
// Reads INI-style configuration files with environment variable overrides.
//
// Keys are looked up case-insensitively in the `[tacmap]` section (or in the
// unnamed top section). An environment variable named `<prefix><Key>` with
// '.' replaced by '_' takes precedence over the file value.

use std::path::Path;

use configparser::ini::Ini;

/// Section consulted before the unnamed top section.
const SECTION: &str = "tacmap";
/// Name configparser gives to keys appearing before any section header.
const DEFAULT_SECTION: &str = "default";

/// Configuration file reader
pub struct Config {
    ini: Ini,
    filename: String,
    env_prefix: String,
}

impl Config {
    pub fn new() -> Self {
        Config {
            ini: Ini::new(),
            filename: String::new(),
            env_prefix: String::new(),
        }
    }

    /// Create an empty config that still honours environment overrides.
    pub fn with_env_prefix(env_prefix: &str) -> Self {
        let mut config = Self::new();
        config.env_prefix = env_prefix.to_string();
        config
    }

    /// Load configuration from a file
    /// env_prefix is used to check environment variables (e.g., "Tacmap_")
    pub fn set_source(&mut self, filename: &str, env_prefix: &str) -> bool {
        self.filename = filename.to_string();
        self.env_prefix = env_prefix.to_string();
        self.reload()
    }

    /// Reload the configuration file
    pub fn reload(&mut self) -> bool {
        self.ini = Ini::new();
        if !Path::new(&self.filename).exists() {
            return false;
        }
        match self.ini.load(&self.filename) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!("Could not parse config file {}: {}", self.filename, err);
                false
            }
        }
    }

    /// Parse configuration from an in-memory string
    pub fn read_str(&mut self, content: &str) -> bool {
        self.ini = Ini::new();
        self.ini.read(content.to_string()).is_ok()
    }

    /// Check if a key is set
    pub fn is_set(&self, key: &str) -> bool {
        self.get_env_or_config(key).is_some()
    }

    /// Get a string value with a default
    pub fn get_string_default(&self, key: &str, default: &str) -> String {
        self.get_env_or_config(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a boolean value with a default
    pub fn get_bool_default(&self, key: &str, default: bool) -> bool {
        match self.get_env_or_config(key) {
            Some(val) => {
                let lower = val.to_lowercase();
                matches!(lower.as_str(), "1" | "true" | "yes")
            }
            None => default,
        }
    }

    /// Get an integer value with a default
    pub fn get_int_default(&self, key: &str, default: i32) -> i32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Get a float value with a default
    pub fn get_float_default(&self, key: &str, default: f32) -> f32 {
        match self.get_env_or_config(key) {
            Some(val) => val.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Try environment variable first, then config file
    fn get_env_or_config(&self, key: &str) -> Option<String> {
        if !self.env_prefix.is_empty() {
            let env_key = format!("{}{}", self.env_prefix, key.replace('.', "_"));
            if let Ok(val) = std::env::var(&env_key) {
                return Some(val);
            }
        }

        self.ini
            .get(SECTION, key)
            .or_else(|| self.ini.get(DEFAULT_SECTION, key))
            .map(|value| strip_quotes(&value).to_string())
    }
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
