use reqwest::Url;
use std::num::ParseIntError;

/// Parse "true"/"false"/"1"/"0" from an owned String.
pub fn parse_bool_flag(s: String) -> Option<bool> {
    parse_bool_str(&s)
}

/// Parse "true"/"false"/"1"/"0" from a &str.
pub fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `Ok(None)` when the variable is unset or blank.
pub fn parse_env_u64(key: &str) -> Result<Option<u64>, ParseIntError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().parse::<u64>().map(Some),
        _ => Ok(None),
    }
}

/// Returns true for localhost, loopback IPv4/IPv6, and 0.0.0.0 URLs.
pub fn is_local_endpoint_url(url: &str) -> bool {
    let parsed = match Url::parse(url.trim()) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };

    match parsed.host_str() {
        Some(host) => {
            let normalized = host.trim().to_ascii_lowercase();
            normalized == "localhost"
                || normalized == "[::1]"
                || normalized == "::1"
                || normalized == "0.0.0.0"
                || normalized.starts_with("127.")
        }
        None => false,
    }
}

/// Joins a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_helpers() {
        assert_eq!(parse_bool_str("true"), Some(true));
        assert_eq!(parse_bool_str("0"), Some(false));
        assert_eq!(parse_bool_flag("YES".to_string()), Some(true));
        assert_eq!(parse_bool_flag("off".to_string()), Some(false));
        assert_eq!(parse_bool_str("maybe"), None);
    }

    #[test]
    fn test_is_local_endpoint_url_normalizes_case_and_space() {
        assert!(is_local_endpoint_url(" HTTP://LOCALHOST:8000/adjudicate "));
        assert!(is_local_endpoint_url("https://127.0.0.1/customers"));
        assert!(is_local_endpoint_url("https://0.0.0.0/customers"));
        assert!(is_local_endpoint_url("http://[::1]:8000/"));
        assert!(!is_local_endpoint_url("https://evil-localhost.com/customers"));
        assert!(!is_local_endpoint_url("https://sentinel.onrender.com/"));
    }

    #[test]
    fn test_join_url_handles_trailing_slash_on_base() {
        assert_eq!(
            join_url("https://sentinel.onrender.com/", "/adjudicate/42"),
            "https://sentinel.onrender.com/adjudicate/42"
        );
        assert_eq!(join_url("http://localhost:8000", "customers"), "http://localhost:8000/customers");
    }

    #[test]
    fn test_parse_env_u64_blank_is_none() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::set_var("SENTINEL_TEST_U64", "  ");
        assert_eq!(parse_env_u64("SENTINEL_TEST_U64"), Ok(None));
        std::env::set_var("SENTINEL_TEST_U64", " 12 ");
        assert_eq!(parse_env_u64("SENTINEL_TEST_U64"), Ok(Some(12)));
        std::env::remove_var("SENTINEL_TEST_U64");
    }
}
