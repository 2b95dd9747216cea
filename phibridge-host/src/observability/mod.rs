//! Structured logging setup.
//!
//! The bridge emits `tracing` events at every protocol seam: one `debug`
//! event per exchange, `trace` events for allocator traffic, `warn` for
//! ABI choices that leak memory and `error` when a module traps. Nothing is
//! printed until the embedding application installs a subscriber, either
//! its own or the one built here.
//!
//! | Variable | Effect |
//! |:---------|:-------|
//! | `PHIBRIDGE_LOG_FORMAT` | `json`, `pretty` or `compact` |
//! | `PHIBRIDGE_LOG_LEVEL` / `RUST_LOG` | filter directives |
//! | `PHIBRIDGE_LOG_LOCATION` | add file and line |
//! | `PHIBRIDGE_LOG_THREAD_IDS` | add thread ids |

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::init_tracing;

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
    fn default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert_eq!(config.log_filter(), "info");
        assert!(config.include_target());
    }

    #[test]
    fn builder_overrides() {
        let config = TracingConfig::builder()
            .log_format(LogFormat::Json)
            .log_filter("phibridge_host=trace")
            .include_location(true)
            .build();
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.log_filter(), "phibridge_host=trace");
        assert!(config.include_location());
        assert!(!config.include_thread_ids());
    }

    #[test]
    fn from_lookup_reads_variables() {
        let config = TracingConfig::from_lookup(lookup(&[
            ("PHIBRIDGE_LOG_FORMAT", "Pretty"),
            ("RUST_LOG", "debug"),
            ("PHIBRIDGE_LOG_THREAD_IDS", "1"),
        ]));
        assert_eq!(config.log_format(), LogFormat::Pretty);
        assert_eq!(config.log_filter(), "debug");
        assert!(config.include_thread_ids());
        assert!(!config.include_location());
    }

    #[test]
    fn explicit_level_wins_over_rust_log() {
        let config = TracingConfig::from_lookup(lookup(&[
            ("PHIBRIDGE_LOG_LEVEL", "warn"),
            ("RUST_LOG", "trace"),
        ]));
        assert_eq!(config.log_filter(), "warn");
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!("yaml".parse::<LogFormat>().is_err());
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
    }
}
