//! Upstream OAuth2 tokens.

use serde::Deserialize;
use time::{Duration, OffsetDateTime};

/// Token type assumed when the provider omits one.
pub const BEARER: &str = "Bearer";

/// A token issued by the upstream provider.
///
/// Never persisted as a whole: only the access and refresh tokens end up in
/// the session data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamToken {
    /// The access token. Empty for a token that only carries a refresh token.
    pub access_token: String,

    /// The token type (usually "Bearer").
    pub token_type: String,

    /// Optional refresh token.
    pub refresh_token: Option<String>,

    /// Expiry. `None` means the token does not expire.
    pub expiry: Option<OffsetDateTime>,
}

impl UpstreamToken {
    /// Wraps an access token as a non-expiring bearer token.
    #[must_use]
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: BEARER.to_string(),
            refresh_token: None,
            expiry: None,
        }
    }

    /// A token holding only `refresh_token` that has already expired, so the
    /// token source must redeem the refresh token before using it.
    #[must_use]
    pub fn expired_with_refresh(refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            token_type: String::new(),
            refresh_token: Some(refresh_token.into()),
            expiry: Some(OffsetDateTime::now_utc() - Duration::hours(1)),
        }
    }

    /// Returns `true` if the token has no access token or is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.access_token.is_empty()
            || self
                .expiry
                .is_some_and(|expiry| expiry <= OffsetDateTime::now_utc())
    }

    /// The refresh token, treating an empty string as absent.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Token endpoint response.
///
/// Shared by the authorization-code, refresh and SAML2 bearer grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// The token type.
    #[serde(default)]
    pub token_type: Option<String>,

    /// Optional refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Lifetime in seconds. Zero or absent means no expiry.
    #[serde(default)]
    pub expires_in: Option<i64>,

    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,

    /// The ID token, when the provider issues one.
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Converts the response into a token, computing the expiry from now.
    /// A lifetime beyond the representable date range means no expiry.
    #[must_use]
    pub fn into_token(self) -> UpstreamToken {
        let expiry = self
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(|secs| OffsetDateTime::now_utc().checked_add(Duration::seconds(secs)));

        UpstreamToken {
            access_token: self.access_token,
            token_type: self
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| BEARER.to_string()),
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expiry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_is_valid() {
        let token = UpstreamToken::bearer("abc");
        assert!(!token.is_expired());
        assert_eq!(token.token_type, "Bearer");
        assert!(token.refresh_token().is_none());
    }

    #[test]
    fn test_expired_with_refresh() {
        let token = UpstreamToken::expired_with_refresh("r1");
        assert!(token.is_expired());
        assert_eq!(token.refresh_token(), Some("r1"));

        let empty = UpstreamToken::expired_with_refresh("");
        assert!(empty.refresh_token().is_none());
    }

    #[test]
    fn test_token_response_conversion() {
        let json = r#"{"access_token":"a1","refresh_token":"r1","expires_in":0,"token_type":"Bearer"}"#;
        let token = serde_json::from_str::<TokenResponse>(json)
            .unwrap()
            .into_token();
        assert_eq!(token.access_token, "a1");
        assert_eq!(token.refresh_token(), Some("r1"));
        assert!(token.expiry.is_none());
        assert!(!token.is_expired());
    }

    #[test]
    fn test_token_response_expiry() {
        let json = r#"{"access_token":"a1","expires_in":3600}"#;
        let token = serde_json::from_str::<TokenResponse>(json)
            .unwrap()
            .into_token();
        assert_eq!(token.token_type, "Bearer");
        assert!(token.expiry.unwrap() > OffsetDateTime::now_utc());
    }

    #[test]
    fn test_token_response_huge_lifetime() {
        let json = r#"{"access_token":"a1","expires_in":9223372036854775807}"#;
        let token = serde_json::from_str::<TokenResponse>(json)
            .unwrap()
            .into_token();
        assert_eq!(token.access_token, "a1");
        assert!(token.expiry.is_none());
        assert!(!token.is_expired());
    }
}
