use once_cell::sync::Lazy;
use percent_encoding::utf8_percent_encode;
use percent_encoding::AsciiSet;
use percent_encoding::CONTROLS;
use std::collections::HashSet;
use url::Url;

/// §6 "URL policy": ports allowed for topic/callback URLs outside the dev
/// environment.
static ALLOWED_PORTS: Lazy<HashSet<u16>> = Lazy::new(|| {
    let mut ports: HashSet<u16> = (8080..=8089).collect();
    ports.insert(80);
    ports.insert(443);
    ports.insert(4443);
    ports.insert(8188);
    ports.insert(8444);
    ports.insert(8990);
    ports
});

const IRI_PATH_FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

/// Scheme ∈ {http, https}, no fragment, port ∈ the allowed set (or anything,
/// in the dev environment). Returns the parsed, IRI-normalized URL.
pub fn validate_url(
    raw: &str,
    dev_env: bool,
) -> Result<Url, String> {
    let normalized = normalize_iri(raw);
    let url = Url::parse(&normalized).map_err(|e| format!("invalid URL {raw:?}: {e}"))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("unsupported scheme in {raw:?}: {}", url.scheme()));
    }
    if url.fragment().is_some() {
        return Err(format!("URL must not have a fragment: {raw:?}"));
    }
    if !dev_env {
        let port = url.port_or_known_default().unwrap_or(0);
        if !ALLOWED_PORTS.contains(&port) {
            return Err(format!("port {port} is not allowed for {raw:?}"));
        }
    }
    Ok(url)
}

/// IRI → URI: percent-encode any non-ASCII bytes in the path so the result is
/// a valid URI `url::Url` can parse. Idempotent: re-encoding an
/// already-encoded path is a no-op because `%` itself is left alone by this
/// set and an already-escaped sequence contains only ASCII.
pub fn normalize_iri(raw: &str) -> String {
    if raw.is_ascii() {
        return raw.to_string();
    }
    // Percent-encode non-ASCII runs only; leave scheme/host/existing escapes alone.
    let (prefix, rest) = match raw.find("://").map(|i| i + 3) {
        Some(i) => raw.split_at(i),
        None => ("", raw),
    };
    let (authority, path_and_rest) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    format!(
        "{prefix}{authority}{}",
        utf8_percent_encode(path_and_rest, IRI_PATH_FRAGMENT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_iri_is_idempotent() {
        let once = normalize_iri("http://x.test/café");
        let twice = normalize_iri(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn ascii_url_unchanged() {
        assert_eq!(normalize_iri("http://x.test/a"), "http://x.test/a");
    }

    #[test]
    fn rejects_fragment() {
        assert!(validate_url("http://x.test/a#frag", false).is_err());
    }

    #[test]
    fn rejects_bad_scheme() {
        assert!(validate_url("ftp://x.test/a", false).is_err());
    }

    #[test]
    fn rejects_disallowed_port() {
        assert!(validate_url("http://x.test:9999/a", false).is_err());
    }

    #[test]
    fn allows_any_port_in_dev_env() {
        assert!(validate_url("http://x.test:9999/a", true).is_ok());
    }

    #[test]
    fn allows_default_https_port() {
        assert!(validate_url("https://x.test/a", false).is_ok());
    }
}
