//! Environment variable helpers, used for the handful of knobs the core
//! itself reads (see `log` for `PSG_LOG_LEVEL`, and the dispatcher's
//! `request_timeout` surface).

use std::str::FromStr;

/// Parse an environment variable as `T`, falling back to `default` if unset
/// or unparseable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Boolean env var. Accepts "1", "true", "yes", "on" (case-insensitive).
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_on_unset() {
        let v: u64 = env_get("__PSG_TEST_UNSET__", 7);
        assert_eq!(v, 7);
    }

    #[test]
    fn bool_variants() {
        std::env::set_var("__PSG_TEST_BOOL__", "YES");
        assert!(env_get_bool("__PSG_TEST_BOOL__", false));
        std::env::set_var("__PSG_TEST_BOOL__", "nope");
        assert!(!env_get_bool("__PSG_TEST_BOOL__", false));
        std::env::remove_var("__PSG_TEST_BOOL__");
    }
}
