use super::url_policy::validate_url;

/// A subscriber's callback URL: receives verification GETs and delivery
/// POSTs. Subject to the same §6 URL policy as topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackUrl(String);

impl CallbackUrl {
    pub fn parse(
        raw: &str,
        dev_env: bool,
    ) -> Result<Self, String> {
        Ok(Self(validate_url(raw, dev_env)?.to_string()))
    }
}

impl AsRef<str> for CallbackUrl {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for CallbackUrl {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CallbackUrl> for String {
    fn from(value: CallbackUrl) -> Self { value.0 }
}

#[cfg(test)]
mod tests {
    use claims::assert_err;
    use claims::assert_ok;

    use super::*;

    #[test]
    fn accepts_https_default_port() {
        assert_ok!(CallbackUrl::parse("https://subscriber.test/callback", false));
    }

    #[test]
    fn rejects_fragment() {
        assert_err!(CallbackUrl::parse("https://subscriber.test/callback#x", false));
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert_err!(CallbackUrl::parse("ws://subscriber.test/callback", false));
    }
}
