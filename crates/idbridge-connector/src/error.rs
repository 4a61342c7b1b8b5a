//! Error types for connector operations.
//!
//! [`UpstreamError`] describes why a single call to the identity provider
//! failed. [`ConnectorError`] is what the public entry points return; each
//! pipeline stage wraps the upstream failure in its own variant so the broker
//! can tell an introspection outage from a rejected refresh token.

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;

/// A failed call to the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The request could not be sent or the response could not be read.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider answered with an unexpected status code.
    #[error("HTTP {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body, verbatim.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A refresh was required but no refresh token is available.
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Introspection reported the token as inactive.
    #[error("Token is not active")]
    Inactive,

    /// The callback did not carry a required parameter.
    #[error("Callback is missing the {0:?} parameter")]
    MissingParameter(String),

    /// The endpoint needed for this call is not known.
    #[error("Endpoint not configured: {0}")]
    MissingEndpoint(String),

    /// The connector was closed while the call was in flight.
    #[error("Connector is closed")]
    Cancelled,
}

impl UpstreamError {
    /// Creates a `Status` error.
    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Returns the HTTP status if the provider answered.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors returned by the connector entry points.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The callback URL passed by the broker is not the configured one.
    #[error("Callback URL {actual:?} does not match the configured redirect URI {expected:?}")]
    ConfigMismatch {
        /// The configured redirect URI.
        expected: String,
        /// The URL supplied by the caller.
        actual: String,
    },

    /// The provider denied the login and redirected back with an error.
    #[error("{}", format_oauth_error(.error, .description))]
    UpstreamAuthError {
        /// The OAuth error code.
        error: String,
        /// Optional error description.
        description: String,
    },

    /// Exchanging the authorization code or SAML2 assertion failed.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(#[source] UpstreamError),

    /// The userinfo call failed.
    #[error("Userinfo request failed: {0}")]
    UserInfoFailed(#[source] UpstreamError),

    /// The introspection call failed.
    #[error("Introspection failed: {0}")]
    IntrospectionFailed(#[source] UpstreamError),

    /// The email scope was requested but no email could be determined.
    #[error("Missing \"email\" claim")]
    MissingEmailClaim,

    /// The `hd` claim is not on the hosted-domain allow-list.
    #[error("Unexpected hd claim {0:?}")]
    DomainNotAllowed(String),

    /// The profile lookup failed. Logged by the resolver and only returned
    /// when the connector is closed during the lookup.
    #[error("Profile lookup failed: {0}")]
    ProfileLookupFailed(#[source] UpstreamError),

    /// The session blob could not be decoded.
    #[error("Failed to decode session data: {0}")]
    SessionCorrupt(String),

    /// The session blob could not be encoded.
    #[error("Failed to encode session data: {0}")]
    SessionEncode(String),

    /// Redeeming the stored refresh token failed.
    #[error("Failed to refresh token: {0}")]
    RefreshFailed(#[source] UpstreamError),

    /// The subject token type is not on the configured allow-list.
    #[error("Unsupported subject token type: {0}")]
    UnsupportedTokenType(String),

    /// The configuration is invalid.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// Provider discovery failed while opening the connector.
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
}

fn format_oauth_error(error: &str, description: &str) -> String {
    if description.is_empty() {
        error.to_string()
    } else {
        format!("{error}: {description}")
    }
}

impl ConnectorError {
    /// Creates a `ConfigMismatch` error.
    #[must_use]
    pub fn config_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ConfigMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an `UpstreamAuthError` from callback parameters.
    #[must_use]
    pub fn upstream_auth(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::UpstreamAuthError {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns `true` if the login was rejected by policy rather than by a
    /// failure. These are shown to the user as authentication failures.
    #[must_use]
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::MissingEmailClaim
                | Self::DomainNotAllowed(_)
                | Self::UpstreamAuthError { .. }
                | Self::UnsupportedTokenType(_)
        )
    }

    /// Returns `true` if this is a network or provider-side failure.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExchangeFailed(_)
                | Self::UserInfoFailed(_)
                | Self::IntrospectionFailed(_)
                | Self::ProfileLookupFailed(_)
                | Self::RefreshFailed(_)
                | Self::Discovery(_)
        )
    }

    /// Returns the upstream failure behind this error, if any.
    #[must_use]
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::TokenExchangeFailed(e)
            | Self::UserInfoFailed(e)
            | Self::IntrospectionFailed(e)
            | Self::ProfileLookupFailed(e)
            | Self::RefreshFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Result alias for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
