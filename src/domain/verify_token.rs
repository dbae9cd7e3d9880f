/// Opaque, subscriber-supplied token echoed back in the verification
/// handshake and stored on the `Subscription` row (§3, §4.4).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifyToken(String);

impl VerifyToken {
    pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }
}

impl AsRef<str> for VerifyToken {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for VerifyToken {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
