//! URL validation utilities

use url::Url;

/// Check if the URL is a fetchable http(s) URL. Browser-internal schemes such as
/// `blob:` and `data:` are not.
pub fn is_http_url(url: &str) -> bool {
    if let Ok(parsed) = Url::parse(url) {
        let scheme = parsed.scheme();
        (scheme == "http" || scheme == "https") && parsed.host_str().is_some()
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url_detection() {
        assert!(is_http_url("https://cdn.example.com/a.m3u8"));
        assert!(is_http_url("http://127.0.0.1:8080/clip.mp4"));
        assert!(!is_http_url("blob:https://example.com/1234"));
        assert!(!is_http_url("data:video/mp4;base64,AAAA"));
        assert!(!is_http_url("ftp://example.com/file"));
        assert!(!is_http_url("not a url"));
    }
}
