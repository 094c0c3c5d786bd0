/// Configuration macros for env-backed config sections
///
/// `config_struct!` declares a section once: field, type, default, and the
/// environment variable that overrides it.

/// Define a configuration section with embedded defaults and env bindings
///
/// Each field is `name: Type = default`, optionally followed by
/// `=> "ENV_KEY"`. The macro generates:
/// - The struct with public fields and `#[serde(default)]`
/// - The Default implementation
/// - `ENV_KEYS`, the bound variables in declaration order
/// - `apply_env`, which overrides bound fields from an `EnvSource`
///
/// # Example
/// ```
/// use realtime_fabric::config_struct;
/// use std::time::Duration;
///
/// config_struct! {
///     pub struct RetryConfig {
///         attempts: u32 = 5 => "RETRY_ATTEMPTS",
///         delay: Duration = Duration::from_millis(100) => "RETRY_DELAY",
///         label: String = "default".to_string(),
///     }
/// }
///
/// let env = |key: &str| (key == "RETRY_DELAY").then(|| "250ms".to_string());
/// let mut config = RetryConfig::default();
/// config.apply_env(&env).unwrap();
/// assert_eq!(config.delay, Duration::from_millis(250));
/// assert_eq!(config.attempts, 5);
/// assert_eq!(RetryConfig::ENV_KEYS, &["RETRY_ATTEMPTS", "RETRY_DELAY"]);
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr $(=> $env_key:literal)?
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }

        impl $name {
            /// Environment variables bound to fields of this section
            pub const ENV_KEYS: &'static [&'static str] = &[$($($env_key,)?)*];

            /// Override bound fields from `env`; unset or blank variables keep the current value
            pub fn apply_env(
                &mut self,
                env: &dyn $crate::config::EnvSource,
            ) -> Result<(), $crate::config::ConfigError> {
                let _ = env;
                $(
                    $crate::__config_env_field!(self.$field_name, env $(, $env_key)?);
                )*
                Ok(())
            }
        }
    };
}

/// One field of `config_struct!`'s `apply_env`; fields without a key are skipped
#[doc(hidden)]
#[macro_export]
macro_rules! __config_env_field {
    ($target:expr, $env:ident) => {};
    ($target:expr, $env:ident, $key:literal) => {
        $crate::config::apply_env_value($env, $key, &mut $target)?;
    };
}
