use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a feed URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Which hosts the fetcher is allowed to contact.
///
/// The default policy rejects loopback and private ranges so a subscription cannot be
/// used to probe the local network. Tests and self-hosted setups that serve feeds from
/// the same machine enable `allow_private`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlPolicy {
    pub allow_private: bool,
}

impl UrlPolicy {
    pub fn permissive() -> Self {
        Self {
            allow_private: true,
        }
    }

    /// Parses `url_str` and checks it against the policy.
    ///
    /// # Errors
    ///
    /// - [`UrlValidationError::InvalidUrl`] if the string does not parse
    /// - [`UrlValidationError::UnsupportedScheme`] for anything but `http`/`https`
    /// - [`UrlValidationError::Localhost`] / [`UrlValidationError::PrivateIp`] when the
    ///   host is internal and `allow_private` is off
    pub fn check(&self, url_str: &str) -> Result<Url, UrlValidationError> {
        let url = Url::parse(url_str.trim())?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
        }

        if self.allow_private {
            return Ok(url);
        }

        if let Some(host) = url.host_str() {
            if host.eq_ignore_ascii_case("localhost") {
                return Err(UrlValidationError::Localhost);
            }

            let bare = host
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host);

            if let Ok(ip) = bare.parse::<IpAddr>() {
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
}

/// Validates a feed URL with the default (strict) policy.
///
/// # Examples
///
/// ```
/// use feedvault::util::validate_url;
///
/// assert!(validate_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    UrlPolicy::default().check(url_str)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
