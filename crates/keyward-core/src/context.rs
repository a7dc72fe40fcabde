//! Request-scoped context shared between pipeline stages.
//!
//! An authenticator may learn something a later resolver needs, such as the
//! OIDC access token used to query the userinfo endpoint. Values are stored
//! by type in an [`http::Extensions`] map, so stages agree on a Rust type
//! rather than a string key, and nothing outlives the request.

use std::fmt;

use http::Extensions;
use zeroize::Zeroizing;

/// Typed values produced during authentication for later stages.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    values: Extensions,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.values.insert(value)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.values.get::<T>()
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.get::<T>().is_some()
    }
}

/// OAuth2 access token obtained by the OIDC authenticator.
#[derive(Clone)]
pub struct BearerToken(Zeroizing<String>);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_keyed_by_type() {
        let mut ctx = AuthContext::new();
        assert!(!ctx.contains::<BearerToken>());

        ctx.insert(BearerToken::new("abc"));
        ctx.insert(42u32);

        assert_eq!(ctx.get::<BearerToken>().map(BearerToken::secret), Some("abc"));
        assert_eq!(ctx.get::<u32>(), Some(&42));
        assert!(ctx.get::<String>().is_none());
    }

    #[test]
    fn test_insert_replaces_same_type() {
        let mut ctx = AuthContext::new();
        ctx.insert(BearerToken::new("old"));
        let previous = ctx.insert(BearerToken::new("new"));
        assert_eq!(previous.map(|t| t.secret().to_string()), Some("old".into()));
        assert_eq!(ctx.get::<BearerToken>().unwrap().secret(), "new");
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = BearerToken::new("super-secret");
        assert!(!format!("{token:?}").contains("super-secret"));
    }
}
