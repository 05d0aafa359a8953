//! Browser environment classification. Pure string heuristics over the
//! user-agent and current URL; false positives and negatives are acceptable.

/// In-app browser signatures matched case-insensitively against the user-agent.
const IN_APP_UA_SIGNATURES: &[&str] = &["instagram", "facebook", "snapchat", "whatsapp"];

/// Returns true when the context looks like a short-video app webview
/// (the family of embedded browsers that partitions client storage).
pub fn is_short_video_browser(user_agent: &str, url: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    let url = url.to_ascii_lowercase();
    ua.contains("tiktok")
        || ua.contains("bytedance")
        || url.contains("tiktok.com")
        || url.contains("musical.ly")
}

/// Returns true when the context is a restrictive in-app browser whose
/// client-persisted storage cannot be trusted. Deterministic, no I/O.
pub fn is_restrictive_in_app_browser(user_agent: &str, url: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    // Android WebView advertises a `wv` token; iOS webviews present as
    // mobile Safari without the Chrome token.
    let android_webview = ua.contains("wv");
    let ios_webview = ua.contains("mobile") && ua.contains("safari") && !ua.contains("chrome");
    android_webview
        || ios_webview
        || IN_APP_UA_SIGNATURES.iter().any(|sig| ua.contains(sig))
        || is_short_video_browser(user_agent, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESKTOP_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
    const DESKTOP_FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0";

    #[test]
    fn tiktok_user_agent_any_case_is_restrictive() {
        assert!(is_restrictive_in_app_browser("Mozilla/5.0 ... TikTok 30.1.2", "https://example.com/"));
        assert!(is_restrictive_in_app_browser("mozilla/5.0 ... tiktok 30.1.2", "https://example.com/"));
        assert!(is_short_video_browser("something BYTEDANCE something", "https://example.com/"));
    }

    #[test]
    fn short_video_url_is_restrictive() {
        assert!(is_restrictive_in_app_browser(DESKTOP_CHROME, "https://www.tiktok.com/@someone/live"));
        assert!(is_short_video_browser(DESKTOP_CHROME, "https://Musical.LY/x"));
    }

    #[test]
    fn desktop_browsers_are_not_restrictive() {
        assert!(!is_restrictive_in_app_browser(DESKTOP_CHROME, "https://example.com/"));
        assert!(!is_restrictive_in_app_browser(DESKTOP_FIREFOX, "https://example.com/"));
    }

    #[test]
    fn android_webview_token_is_restrictive() {
        let ua = "Mozilla/5.0 (Linux; Android 13; Pixel 7 Build/TQ3A; wv) AppleWebKit/537.36 Chrome/126.0 Mobile Safari/537.36";
        assert!(is_restrictive_in_app_browser(ua, "https://example.com/"));
    }

    #[test]
    fn ios_webview_heuristic_mobile_safari_without_chrome() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148 Safari/604.1";
        assert!(is_restrictive_in_app_browser(ua, "https://example.com/"));
    }

    #[test]
    fn social_app_signatures_are_restrictive() {
        assert!(is_restrictive_in_app_browser("Mozilla/5.0 Instagram 300.0", "https://example.com/"));
        assert!(is_restrictive_in_app_browser("Mozilla/5.0 [FB_IAB/FB4A] facebook", "https://example.com/"));
        assert!(!is_short_video_browser("Mozilla/5.0 Instagram 300.0", "https://example.com/"));
    }
}
