//! Hub form fields (`hub.url`, `hub.verify`, …) repeat the same key; plain
//! `web::Form` can't bind repeated keys to a `Vec`, so the raw body is
//! parsed by hand with the same `url` crate already used everywhere else.

pub fn parse(body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

pub fn one<'a>(
    pairs: &'a [(String, String)],
    key: &str,
) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

pub fn all<'a>(
    pairs: &'a [(String, String)],
    key: &str,
) -> Vec<&'a str> {
    pairs.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
}
