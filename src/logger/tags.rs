/// Log tags identify the component a line comes from.
///
/// Each tag maps to a `--debug-<key>` / `--verbose-<key>` command-line flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Registry,
    Bus,
    Bridge,
    Presence,
    Database,
    LiveQuery,
    Webserver,
    Config,
}

impl LogTag {
    /// Key used in `--debug-<key>` flags and the enabled-tags allow-list
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::System => "system",
            LogTag::Registry => "registry",
            LogTag::Bus => "bus",
            LogTag::Bridge => "bridge",
            LogTag::Presence => "presence",
            LogTag::Database => "database",
            LogTag::LiveQuery => "live-query",
            LogTag::Webserver => "webserver",
            LogTag::Config => "config",
        }
        .to_string()
    }

    /// Uppercase label used in formatted output
    pub fn to_plain_string(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Registry => "REGISTRY",
            LogTag::Bus => "BUS",
            LogTag::Bridge => "BRIDGE",
            LogTag::Presence => "PRESENCE",
            LogTag::Database => "DATABASE",
            LogTag::LiveQuery => "LIVEQUERY",
            LogTag::Webserver => "WEBSERVER",
            LogTag::Config => "CONFIG",
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_plain_string())
    }
}
