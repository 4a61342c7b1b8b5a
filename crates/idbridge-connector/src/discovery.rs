//! OpenID Connect discovery for the upstream provider.
//!
//! The connector fetches the provider metadata once, when it is opened, from
//! `{issuer}/.well-known/openid-configuration`. Besides the standard
//! endpoints the IAM service advertises its token introspection endpoint in
//! the same document.
//!
//! # References
//!
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)
//! - [RFC 8414 - OAuth 2.0 Authorization Server Metadata](https://tools.ietf.org/html/rfc8414)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Provider metadata used by the connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// URL that the OP asserts as its Issuer Identifier.
    pub issuer: String,

    /// URL of the OP's Authorization Endpoint.
    pub authorization_endpoint: String,

    /// URL of the OP's Token Endpoint.
    pub token_endpoint: String,

    /// URL of the OP's UserInfo Endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// URL of the OP's JSON Web Key Set document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Token introspection endpoint (IAM extension).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,

    /// Supported scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported grant types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,
}

impl ProviderMetadata {
    /// Returns `true` if this provider advertises the grant type.
    #[must_use]
    pub fn supports_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types_supported
            .as_ref()
            .is_some_and(|grants| grants.iter().any(|g| g == grant_type))
    }
}

/// Errors that can occur during discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A network error occurred while fetching the discovery document.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The discovery document could not be parsed as JSON.
    #[error("Failed to parse discovery document: {0}")]
    ParseError(String),

    /// The issuer URL could not be parsed or is invalid.
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// The issuer in the discovery document does not match the expected issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// The expected issuer URL.
        expected: String,
        /// The actual issuer URL from the discovery document.
        actual: String,
    },

    /// The issuer URL scheme is not allowed.
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

/// Fetches and validates provider metadata.
pub struct DiscoveryClient {
    http_client: reqwest::Client,
    allow_http: bool,
    max_response_size: usize,
}

impl DiscoveryClient {
    /// Creates a discovery client.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::NetworkError` if the HTTP client cannot be built.
    pub fn new(request_timeout: Duration, allow_http: bool) -> Result<Self, DiscoveryError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DiscoveryError::NetworkError(e.to_string()))?;

        Ok(Self::with_client(http_client, allow_http))
    }

    /// Creates a discovery client sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(http_client: reqwest::Client, allow_http: bool) -> Self {
        Self {
            http_client,
            allow_http,
            max_response_size: 1024 * 1024,
        }
    }

    /// Discovers provider metadata for `issuer`.
    ///
    /// The document's `issuer` must equal `issuer`, or `accepted_issuer`
    /// when one is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer scheme is not allowed, the document
    /// cannot be fetched or parsed, or the reported issuer does not match.
    pub async fn discover(
        &self,
        issuer: &Url,
        accepted_issuer: Option<&str>,
    ) -> Result<ProviderMetadata, DiscoveryError> {
        self.validate_issuer_scheme(issuer)?;

        let discovery_url = build_discovery_url(issuer);

        let response = self
            .http_client
            .get(discovery_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(issuer = %issuer, error = %e, "Failed to fetch OIDC discovery");
                DiscoveryError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_response_size
        {
            return Err(DiscoveryError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| DiscoveryError::ParseError(e.to_string()))?;

        validate_issuer(&metadata, issuer, accepted_issuer)?;

        tracing::debug!(
            issuer = %metadata.issuer,
            introspection = metadata.introspection_endpoint.is_some(),
            "Discovered provider metadata"
        );

        Ok(metadata)
    }

    fn validate_issuer_scheme(&self, issuer: &Url) -> Result<(), DiscoveryError> {
        match issuer.scheme() {
            "https" => Ok(()),
            "http" if self.allow_http => Ok(()),
            other => Err(DiscoveryError::InvalidScheme(other.to_string())),
        }
    }
}

/// `{issuer}/.well-known/openid-configuration`
fn build_discovery_url(issuer: &Url) -> Url {
    let mut discovery_url = issuer.clone();
    let path = issuer.path().trim_end_matches('/');
    discovery_url.set_path(&format!("{}/.well-known/openid-configuration", path));
    discovery_url
}

fn validate_issuer(
    metadata: &ProviderMetadata,
    expected: &Url,
    accepted_issuer: Option<&str>,
) -> Result<(), DiscoveryError> {
    let document_issuer = Url::parse(&metadata.issuer).map_err(|e| {
        DiscoveryError::InvalidIssuer(format!("{} - {}", metadata.issuer, e))
    })?;
    let actual = document_issuer.as_str().trim_end_matches('/');

    let expected = match accepted_issuer.filter(|i| !i.is_empty()) {
        Some(accepted) => accepted.trim_end_matches('/').to_string(),
        None => expected.as_str().trim_end_matches('/').to_string(),
    };

    if expected != actual {
        return Err(DiscoveryError::IssuerMismatch {
            expected,
            actual: actual.to_string(),
        });
    }

    Ok(())
}
