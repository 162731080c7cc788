//! Built-in logger bootstrap.
//!
//! The built-in logger implementation uses the `env_logger` crate. It is
//! enabled by the Cargo feature `builtin_env_logger`, which is enabled by
//! default. When enabled, [`try_init`] installs a logger that shows `info`
//! level and below, configurable through the standard `env_logger` filter
//! environment variable.
//!
//! Downstream users who want to integrate with their own logging framework
//! can disable the default feature and register their own `log`
//! implementation before using this crate.

/// Attempt to install the built-in `env_logger`. Does nothing if the
/// `builtin_env_logger` feature is disabled.
pub fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );

            match result {
                Ok(()) => {
                    log::debug!("keelcore initialized the built-in logger.");
                }
                Err(e) => {
                    // Only raised when a logger has already been installed.
                    log::debug!("keelcore failed to initialize the built-in logger: {e}");
                }
            }
        } else {
            log::debug!("keelcore didn't initialize a logger: \"builtin_env_logger\" is disabled.");
        }
    }
}
