use super::url_policy::validate_url;

/// A feed URL publishers ping and subscribers subscribe to, validated and
/// IRI-normalized per §6's URL policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicUrl(String);

impl TopicUrl {
    pub fn parse(
        raw: &str,
        dev_env: bool,
    ) -> Result<Self, String> {
        Ok(Self(validate_url(raw, dev_env)?.to_string()))
    }
}

impl AsRef<str> for TopicUrl {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for TopicUrl {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TopicUrl> for String {
    fn from(value: TopicUrl) -> Self { value.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_scheme() {
        assert!(TopicUrl::parse("x.test/feed", false).is_err());
    }

    #[test]
    fn accepts_https_default_port() {
        assert!(TopicUrl::parse("https://x.test/feed", false).is_ok());
    }

    // the range of generated hosts is narrowed to ascii alnum labels, since
    // a fully random `String` would mostly fail to parse as a URL at all and
    // tell us nothing about the port/scheme/fragment policy in §6
    #[derive(Clone, Debug)]
    struct AlnumLabel(String);

    const ALPHABET: &[char] = &[
        'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v',
        'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
    ];

    impl quickcheck::Arbitrary for AlnumLabel {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let len = (usize::arbitrary(g) % 12) + 1;
            let s: String = (0..len).map(|_| *g.choose(ALPHABET).unwrap()).collect();
            Self(s)
        }
    }

    #[quickcheck_macros::quickcheck]
    fn any_https_url_on_the_default_port_parses(label: AlnumLabel) -> bool {
        TopicUrl::parse(&format!("https://{}.test/feed", label.0), false).is_ok()
    }
}
