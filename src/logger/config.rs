/// Logger configuration shared by all log calls
///
/// Built from command-line flags at startup (`init_from_args`) and adjustable
/// afterwards through `update_logger_config`.
use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments::{get_cmd_args, has_arg};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Lines above this level are suppressed (Debug/Verbose have their own gates)
    pub min_level: LogLevel,
    /// Tags with debug output switched on
    pub debug_tags: HashSet<String>,
    /// Tags with verbose output switched on
    pub verbose_tags: HashSet<String>,
    /// Allow-list of tags; empty means every tag
    pub enabled_tags: HashSet<String>,
    /// Print to stdout
    pub console: bool,
    /// Append plain lines to this file
    pub file_path: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
            console: true,
            file_path: None,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> = Lazy::new(|| RwLock::new(LoggerConfig::default()));

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub fn update_logger_config<F: FnOnce(&mut LoggerConfig)>(update: F) {
    update(&mut LOGGER_CONFIG.write());
}

/// Build the logger configuration from command-line flags and `LOG_FILE`
pub fn init_from_args() {
    let args = get_cmd_args();
    let mut config = LoggerConfig::default();

    for arg in &args {
        if let Some(module) = arg.strip_prefix("--debug-") {
            config.debug_tags.insert(module.to_string());
        } else if let Some(module) = arg.strip_prefix("--verbose-") {
            config.verbose_tags.insert(module.to_string());
        }
    }

    if has_arg("--verbose") || has_arg("-v") {
        config.min_level = LogLevel::Verbose;
    } else if has_arg("--quiet") || has_arg("-q") {
        config.min_level = LogLevel::Warning;
    }

    if let Some(level) = std::env::var("LOG_LEVEL").ok().and_then(|l| LogLevel::parse(&l)) {
        config.min_level = level;
    }

    if let Ok(path) = std::env::var("LOG_FILE") {
        if !path.trim().is_empty() {
            config.file_path = Some(PathBuf::from(path));
        }
    }

    set_logger_config(config);
}

pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let key = tag.to_debug_key();
    LOGGER_CONFIG.read().debug_tags.contains(&key) || has_arg(&format!("--debug-{}", key))
}

pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    let key = tag.to_debug_key();
    LOGGER_CONFIG.read().verbose_tags.contains(&key) || has_arg(&format!("--verbose-{}", key))
}
