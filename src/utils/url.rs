//! Joining the agent base URL with endpoint paths.

/// Strip trailing slashes so endpoint paths can be appended safely.
///
/// ```
/// use peupajoh_chat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:8000/"), "http://localhost:8000");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash.
///
/// ```
/// use peupajoh_chat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:8000/", "/api/v1/chat"),
///     "http://localhost:8000/api/v1/chat"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://agent.example.com"),
            "https://agent.example.com"
        );
        assert_eq!(
            normalize_base_url("https://agent.example.com///"),
            "https://agent.example.com"
        );
        assert_eq!(normalize_base_url("  http://127.0.0.1:8000/ "), "http://127.0.0.1:8000");
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn test_construct_api_url() {
        assert_eq!(
            construct_api_url("http://localhost:8000", "api/v1/chat"),
            "http://localhost:8000/api/v1/chat"
        );
        assert_eq!(
            construct_api_url("http://localhost:8000/", "///api/v1/health"),
            "http://localhost:8000/api/v1/health"
        );
        // A base that already carries a path prefix keeps it.
        assert_eq!(
            construct_api_url("https://agent.example.com/peupajoh/", "api/v1/chat"),
            "https://agent.example.com/peupajoh/api/v1/chat"
        );
    }
}
