//! Login protocol strategies.
//!
//! The upstream offers two incompatible ways to log in. The connector picks
//! one [`LoginFlow`] when it is opened and routes every login URL and
//! callback through it:
//!
//! - [`OAuth2CodeFlow`] - standard authorization-code flow
//! - [`Saml2BearerFlow`] - SAML2 login page followed by a
//!   `urn:ietf:params:oauth:grant-type:saml2-bearer` token exchange
//!
//! Checks shared by both (redirect URI match, upstream `error` parameter)
//! are done by the connector before the flow is invoked.

mod oauth2;
mod saml;

use std::collections::HashMap;

use async_trait::async_trait;
use url::Url;

use crate::error::{ConnectorError, UpstreamError};
use crate::token::UpstreamToken;

pub use oauth2::OAuth2CodeFlow;
pub use saml::{SAML2_BEARER_GRANT, Saml2BearerFlow};

/// Scopes requested by the broker for one login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scopes {
    /// The broker wants a refresh token.
    pub offline_access: bool,
    /// The broker wants group claims. Informational only: groups are
    /// emitted according to the claim settings and the broker filters them.
    pub groups: bool,
}

impl Scopes {
    /// Scopes requesting offline access.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            offline_access: true,
            groups: false,
        }
    }
}

/// Which protocol a flow speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    /// OAuth2 authorization-code flow.
    OAuth2,
    /// SAML2 bearer-assertion flow.
    Saml2,
}

/// Query parameters of the provider's redirect back to the broker.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    params: HashMap<String, String>,
}

impl CallbackRequest {
    /// Parses a raw query string. The first occurrence of a key wins.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self { params }
    }

    /// Parses the query of a full callback URL.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self::from_query(url.query().unwrap_or_default())
    }

    /// Returns a non-empty parameter value.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Returns a required parameter or a `MissingParameter` error.
    pub(crate) fn require(&self, key: &str) -> Result<&str, UpstreamError> {
        self.param(key)
            .ok_or_else(|| UpstreamError::MissingParameter(key.to_string()))
    }
}

/// Result of a successful callback exchange.
#[derive(Debug, Clone)]
pub struct Exchanged {
    /// The token issued by the provider.
    pub token: UpstreamToken,
    /// The raw SAML2 assertion, for SAML2 logins.
    pub assertion: Option<Vec<u8>>,
}

/// A login protocol.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    /// The protocol this flow implements.
    fn mode(&self) -> ProtocolMode;

    /// Builds the URL the user is redirected to. `callback_url` has already
    /// been checked against the configured redirect URI.
    fn login_url(
        &self,
        scopes: &Scopes,
        callback_url: &str,
        state: &str,
    ) -> Result<Url, ConnectorError>;

    /// Exchanges the callback for a token.
    async fn exchange(&self, request: &CallbackRequest) -> Result<Exchanged, ConnectorError>;
}

/// Replaces every value of `key` in the URL's query with `value`.
pub(crate) fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (k, v) in &retained {
        pairs.append_pair(k, v);
    }
    pairs.append_pair(key, value);
}
