//! Bridge configuration.
//!
//! A [`BridgeConfig`] bundles the runtime limits, the module ABI and the
//! record kinds to bind eagerly. It can be assembled in code with the
//! builder methods or read from the environment:
//!
//! | Variable | Effect |
//! |:---------|:-------|
//! | `PHIBRIDGE_ABI` | ABI preset name (`packed`, `json_sized`, `base64_cstring`, `json_cstring`, `legacy_cstring`) |
//! | `PHIBRIDGE_FUEL` | fuel per call; `0` or `off` disables metering |
//! | `PHIBRIDGE_MAX_MEMORY_PAGES` | memory ceiling in 64 KiB pages |
//! | `PHIBRIDGE_CACHE` | `on` / `off` (also `1`/`0`, `true`/`false`) for the compiled-module cache |
//! | `PHIBRIDGE_PRELOAD` | comma-separated kinds to bind at startup, or `all` |

use crate::abi::AbiConfig;
use crate::bridge::KNOWN_KINDS;
use crate::runtime::RuntimeConfig;
use phibridge_core::error::{BridgeError, Result};
use std::env;

/// Everything needed to load and bind a codec module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Engine and store limits.
    pub runtime: RuntimeConfig,
    /// Calling convention of the module build.
    pub abi: AbiConfig,
    /// Kinds whose exports are bound when the bridge is created.
    pub preload: Vec<String>,
}

impl BridgeConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime configuration.
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set the ABI.
    pub fn with_abi(mut self, abi: AbiConfig) -> Self {
        self.abi = abi;
        self
    }

    /// Set the kinds to bind eagerly.
    pub fn with_preload<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preload = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Bind every known kind eagerly.
    pub fn preload_known_kinds(self) -> Self {
        self.with_preload(KNOWN_KINDS)
    }

    /// Read the configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(name) = lookup("PHIBRIDGE_ABI") {
            config.abi = AbiConfig::preset(name.trim())?;
        }

        if let Some(fuel) = lookup("PHIBRIDGE_FUEL") {
            let fuel = fuel.trim();
            config.runtime = if fuel.eq_ignore_ascii_case("off") {
                config.runtime.with_fuel(false, 0)
            } else {
                let amount = parse_number::<u64>("PHIBRIDGE_FUEL", fuel)?;
                config.runtime.with_fuel(amount > 0, amount)
            };
        }

        if let Some(pages) = lookup("PHIBRIDGE_MAX_MEMORY_PAGES") {
            let pages = parse_number::<u32>("PHIBRIDGE_MAX_MEMORY_PAGES", pages.trim())?;
            if pages == 0 {
                return Err(BridgeError::Config {
                    key: "PHIBRIDGE_MAX_MEMORY_PAGES".to_string(),
                    cause: "must be at least 1".to_string(),
                });
            }
            config.runtime = config.runtime.with_max_memory_pages(pages);
        }

        if let Some(cache) = lookup("PHIBRIDGE_CACHE") {
            config.runtime = config
                .runtime
                .with_cache(parse_switch("PHIBRIDGE_CACHE", cache.trim())?);
        }

        if let Some(kinds) = lookup("PHIBRIDGE_PRELOAD") {
            config = if kinds.trim().eq_ignore_ascii_case("all") {
                config.preload_known_kinds()
            } else {
                config.with_preload(
                    kinds
                        .split(',')
                        .map(str::trim)
                        .filter(|kind| !kind.is_empty()),
                )
            };
        }

        config.abi.validate()?;
        Ok(config)
    }
}

fn parse_switch(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(BridgeError::Config {
            key: key.to_string(),
            cause: format!("'{}' is not on or off", value),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| BridgeError::Config {
        key: key.to_string(),
        cause: format!("'{}': {}", value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = BridgeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.abi, AbiConfig::packed());
        assert!(config.preload.is_empty());
    }

    #[test]
    fn reads_every_variable() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("PHIBRIDGE_ABI", "json-cstring"),
            ("PHIBRIDGE_FUEL", "5000"),
            ("PHIBRIDGE_MAX_MEMORY_PAGES", "32"),
            ("PHIBRIDGE_CACHE", "off"),
            ("PHIBRIDGE_PRELOAD", "user, summary,,"),
        ]))
        .unwrap();

        assert!(!config.runtime.cache_modules);
        assert_eq!(config.abi, AbiConfig::json_cstring());
        assert!(config.runtime.fuel_enabled);
        assert_eq!(config.runtime.fuel_amount, 5000);
        assert_eq!(config.runtime.max_memory_pages, 32);
        assert_eq!(config.preload, vec!["user", "summary"]);
    }

    #[test]
    fn fuel_can_be_switched_off() {
        for value in ["off", "0"] {
            let config = BridgeConfig::from_lookup(lookup(&[("PHIBRIDGE_FUEL", value)])).unwrap();
            assert!(!config.runtime.fuel_enabled);
        }
    }

    #[test]
    fn preload_all_known_kinds() {
        let config = BridgeConfig::from_lookup(lookup(&[("PHIBRIDGE_PRELOAD", "ALL")])).unwrap();
        assert_eq!(config.preload.len(), KNOWN_KINDS.len());
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err = BridgeConfig::from_lookup(lookup(&[("PHIBRIDGE_FUEL", "lots")])).unwrap_err();
        assert!(matches!(err, BridgeError::Config { ref key, .. } if key == "PHIBRIDGE_FUEL"));

        let err =
            BridgeConfig::from_lookup(lookup(&[("PHIBRIDGE_MAX_MEMORY_PAGES", "0")])).unwrap_err();
        assert!(err.is_config_error());

        let err = BridgeConfig::from_lookup(lookup(&[("PHIBRIDGE_CACHE", "maybe")])).unwrap_err();
        assert!(matches!(err, BridgeError::Config { ref key, .. } if key == "PHIBRIDGE_CACHE"));

        let err = BridgeConfig::from_lookup(lookup(&[("PHIBRIDGE_ABI", "wasm64")])).unwrap_err();
        assert_eq!(err.code(), "B203");
    }
}
