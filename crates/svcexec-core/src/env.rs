//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `ExecutorConfig::from_env()`.
//!
//! ```ignore
//! use svcexec_core::env::{env_get, env_get_ms};
//!
//! let threads: usize = env_get("SVX_POOL_THREADS", 8);
//! let idle = env_get_ms("SVX_IDLE_TIMEOUT_MS", Duration::from_secs(30));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as `T`, or `default` if unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// "1", "true", "yes", "on" (any case) are true; any other value is false.
/// Unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `Some(T)` if the variable is set and parses
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Millisecond count as a `Duration`
#[inline]
pub fn env_get_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__SVX_TEST_UNSET_VAR__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__SVX_TEST_UNSET_VAR__", true));
        assert!(env_get_opt::<usize>("__SVX_TEST_UNSET_VAR__").is_none());
        assert_eq!(
            env_get_ms("__SVX_TEST_UNSET_VAR__", Duration::from_millis(5)),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__SVX_TEST_NUM__", " 123 ");
        let val: usize = env_get("__SVX_TEST_NUM__", 0);
        assert_eq!(val, 123);
        assert_eq!(
            env_get_ms("__SVX_TEST_NUM__", Duration::ZERO),
            Duration::from_millis(123)
        );
        std::env::remove_var("__SVX_TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        for (raw, expected) in [
            ("1", true),
            ("TRUE", true),
            ("yes", true),
            ("on", true),
            ("0", false),
            ("false", false),
            ("garbage", false),
        ] {
            std::env::set_var("__SVX_TEST_BOOL__", raw);
            assert_eq!(env_get_bool("__SVX_TEST_BOOL__", !expected), expected, "{}", raw);
        }
        std::env::remove_var("__SVX_TEST_BOOL__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__SVX_TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__SVX_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__SVX_TEST_INVALID__");
    }
}
