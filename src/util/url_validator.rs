use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP to a non-loopback host would expose API keys and tokens.
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureHttp,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates the base URL of a remote service (catalog, auth, data store).
///
/// Every request to these services carries a credential, so HTTPS is
/// required. `http://localhost` and `http://127.0.0.1` are accepted so that
/// mock servers can stand in for the real services.
///
/// A missing trailing slash is added so that relative paths can be joined
/// onto the result without dropping the last path segment.
///
/// ```
/// use streamshelf::util::validate_base_url;
///
/// let url = validate_base_url("https://example.supabase.co/rest/v1").unwrap();
/// assert_eq!(url.as_str(), "https://example.supabase.co/rest/v1/");
///
/// assert!(validate_base_url("http://127.0.0.1:8080").is_ok());
/// assert!(validate_base_url("http://evil.example.com").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if !is_loopback_host(&url) {
                return Err(UrlValidationError::InsecureHttp);
            }
            tracing::warn!(base_url = %url, "Using non-HTTPS base URL (localhost only)");
        }
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Validates a rendition URL before it is handed to the system browser.
///
/// Rendition URLs come from the catalog response, so they are treated as
/// untrusted: only http(s) URLs pointing at public hosts are accepted.
///
/// ```
/// use streamshelf::util::validate_playback_url;
///
/// assert!(validate_playback_url("https://cdn.pixabay.com/video/clip.mp4").is_ok());
/// assert!(validate_playback_url("file:///etc/passwd").is_err());
/// assert!(validate_playback_url("http://192.168.1.1/clip.mp4").is_err());
/// ```
pub fn validate_playback_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }
        if let Some(ip) = host_ip(host) {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host_ip(host).is_some_and(|ip| ip.is_loopback()),
        None => false,
    }
}

fn host_ip(host: &str) -> Option<IpAddr> {
    // IPv6 hosts come back bracketed from host_str()
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
        .parse()
        .ok()
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_base_url_accepted() {
        let url = validate_base_url("https://pixabay.com/api/videos/").unwrap();
        assert_eq!(url.as_str(), "https://pixabay.com/api/videos/");
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = validate_base_url("https://abc.supabase.co").unwrap();
        assert_eq!(url.as_str(), "https://abc.supabase.co/");

        let url = validate_base_url("https://pixabay.com/api/videos").unwrap();
        assert_eq!(url.join("x").unwrap().path(), "/api/videos/x");
    }

    #[test]
    fn test_http_base_url_rejected() {
        assert!(matches!(
            validate_base_url("http://pixabay.com/api/videos/"),
            Err(UrlValidationError::InsecureHttp)
        ));
    }

    #[test]
    fn test_loopback_http_base_url_allowed() {
        assert!(validate_base_url("http://127.0.0.1:4010").is_ok());
        assert!(validate_base_url("http://localhost:54321/").is_ok());
        assert!(validate_base_url("http://[::1]:9000/").is_ok());
    }

    #[test]
    fn test_base_url_unsupported_scheme() {
        assert!(matches!(
            validate_base_url("ftp://example.com"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn test_playback_url_public_host() {
        assert!(validate_playback_url("https://cdn.pixabay.com/video/2024/01/01/a.mp4").is_ok());
        assert!(validate_playback_url("http://cdn.example.org/b.mp4").is_ok());
    }

    #[test]
    fn test_playback_url_rejects_local_targets() {
        assert!(validate_playback_url("http://localhost/a.mp4").is_err());
        assert!(validate_playback_url("http://127.0.0.1/a.mp4").is_err());
        assert!(validate_playback_url("http://[::1]/a.mp4").is_err());
        assert!(validate_playback_url("http://10.0.0.1/a.mp4").is_err());
        assert!(validate_playback_url("http://172.16.0.1/a.mp4").is_err());
        assert!(validate_playback_url("http://169.254.1.1/a.mp4").is_err());
        assert!(validate_playback_url("http://[fe80::1]/a.mp4").is_err());
        assert!(validate_playback_url("http://0.0.0.0/a.mp4").is_err());
    }

    #[test]
    fn test_playback_url_rejects_other_schemes() {
        assert!(validate_playback_url("file:///tmp/a.mp4").is_err());
        assert!(validate_playback_url("javascript:alert(1)").is_err());
    }
}
