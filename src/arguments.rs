/// Centralized argument handling for the fabric server
///
/// Debug output is gated per module by `--debug-<module>` flags that can appear
/// anywhere on the command line. The flags are read through a global copy of
/// the arguments so tests and embedders can override them.
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Modules that accept a `--debug-<module>` flag
pub const DEBUG_MODULES: &[&str] = &[
    "system",
    "registry",
    "bus",
    "bridge",
    "presence",
    "database",
    "live-query",
    "webserver",
    "config",
];

/// Sets the global command-line arguments
/// Used by tests and embedders to override the default env::args() collection
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => env::args().collect(),
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value of a command-line argument that follows a flag
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1).cloned())
}

// =============================================================================
// DEBUG FLAG CHECKING FUNCTIONS
// =============================================================================

pub fn is_debug_system_enabled() -> bool {
    has_arg("--debug-system")
}

pub fn is_debug_registry_enabled() -> bool {
    has_arg("--debug-registry")
}

pub fn is_debug_bus_enabled() -> bool {
    has_arg("--debug-bus")
}

pub fn is_debug_bridge_enabled() -> bool {
    has_arg("--debug-bridge")
}

pub fn is_debug_presence_enabled() -> bool {
    has_arg("--debug-presence")
}

pub fn is_debug_database_enabled() -> bool {
    has_arg("--debug-database")
}

pub fn is_debug_live_query_enabled() -> bool {
    has_arg("--debug-live-query")
}

pub fn is_debug_webserver_enabled() -> bool {
    has_arg("--debug-webserver")
}

pub fn is_debug_config_enabled() -> bool {
    has_arg("--debug-config")
}

pub fn is_verbose_enabled() -> bool {
    has_arg("--verbose") || has_arg("-v")
}

pub fn is_quiet_enabled() -> bool {
    has_arg("--quiet") || has_arg("-q")
}

/// Lists the debug modules switched on for this process
pub fn get_enabled_debug_modes() -> Vec<&'static str> {
    let args = get_cmd_args();
    DEBUG_MODULES
        .iter()
        .copied()
        .filter(|module| {
            let flag = format!("--debug-{}", module);
            args.iter().any(|a| *a == flag)
        })
        .collect()
}

pub fn is_any_debug_enabled() -> bool {
    !get_enabled_debug_modes().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: the argument store is process-global.
    #[test]
    fn test_argument_flags() {
        set_cmd_args(vec![
            "fabric-server".to_string(),
            "--debug-bridge".to_string(),
            "--debug-live-query".to_string(),
            "--port".to_string(),
            "9000".to_string(),
        ]);

        assert!(has_arg("--debug-bridge"));
        assert!(!has_arg("--debug-bus"));
        assert_eq!(get_arg_value("--port"), Some("9000".to_string()));
        assert_eq!(get_arg_value("--host"), None);

        assert!(is_debug_bridge_enabled());
        assert!(is_debug_live_query_enabled());
        assert!(!is_debug_presence_enabled());
        assert!(is_any_debug_enabled());
        assert_eq!(get_enabled_debug_modes(), vec!["bridge", "live-query"]);

        set_cmd_args(vec!["fabric-server".to_string()]);
        assert!(!is_any_debug_enabled());
    }
}
