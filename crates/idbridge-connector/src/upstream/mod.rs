//! Capabilities consumed from the upstream identity provider.
//!
//! The connector never talks HTTP directly outside of the SAML2 bearer
//! exchange. Everything else goes through four traits:
//!
//! - [`OAuth2Client`] - authorization URL, code exchange, refresh redemption
//! - [`UserInfoSource`] - the OIDC userinfo endpoint
//! - [`Introspector`] - token introspection, the trust anchor for identity
//! - [`ProfileDirectory`] - best-effort user profile lookup
//!
//! [`HttpUpstream`] implements all four against the IAM service. Tests and
//! embedders can substitute their own implementations through [`Upstream`].

mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::UpstreamError;
use crate::token::UpstreamToken;

pub use http::HttpUpstream;

/// Untyped userinfo claims.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Identity type reported by introspection for machine identities.
pub const SERVICE_IDENTITY: &str = "Service";

/// OAuth2 token lifecycle operations.
#[async_trait]
pub trait OAuth2Client: Send + Sync {
    /// Builds the authorization-code URL for `state` with extra query
    /// parameters appended.
    fn auth_code_url(&self, state: &str, extra_params: &[(&str, &str)]) -> Url;

    /// Exchanges an authorization code for a token.
    async fn exchange_code(&self, code: &str) -> Result<UpstreamToken, UpstreamError>;

    /// Returns a usable token: `current` if it is still valid, otherwise the
    /// result of redeeming its refresh token.
    async fn token(&self, current: UpstreamToken) -> Result<UpstreamToken, UpstreamError>;
}

/// The OIDC userinfo endpoint.
#[async_trait]
pub trait UserInfoSource: Send + Sync {
    /// Fetches the claims for the token's subject.
    async fn user_info(&self, token: &UpstreamToken) -> Result<Claims, UpstreamError>;
}

/// Token introspection.
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Introspects the token's access token.
    async fn introspect(&self, token: &UpstreamToken)
    -> Result<IntrospectResponse, UpstreamError>;
}

/// User profile lookup.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Looks up the profile of `subject` using `access_token`.
    ///
    /// Returns `Ok(None)` when no directory is configured.
    async fn user_by_uuid(
        &self,
        access_token: &str,
        subject: &str,
    ) -> Result<Option<Profile>, UpstreamError>;
}

/// The set of collaborators a connector is built from.
#[derive(Clone)]
pub struct Upstream {
    /// OAuth2 token lifecycle.
    pub oauth2: Arc<dyn OAuth2Client>,
    /// Userinfo endpoint.
    pub userinfo: Arc<dyn UserInfoSource>,
    /// Introspection endpoint.
    pub introspector: Arc<dyn Introspector>,
    /// Profile lookup.
    pub profiles: Arc<dyn ProfileDirectory>,
    /// Token endpoint, used directly by the SAML2 bearer exchange.
    pub token_url: Url,
}

impl Upstream {
    /// Uses one HTTP implementation for every capability.
    #[must_use]
    pub fn from_http(http: Arc<HttpUpstream>) -> Self {
        Self {
            token_url: http.token_url().clone(),
            oauth2: http.clone(),
            userinfo: http.clone(),
            introspector: http.clone(),
            profiles: http,
        }
    }
}

/// Token introspection response of the IAM service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntrospectResponse {
    /// Whether the token is currently active.
    pub active: bool,

    /// Space-separated scopes granted to the token.
    #[serde(default)]
    pub scope: String,

    /// Login name of the subject.
    #[serde(default)]
    pub username: String,

    /// Expiration time (Unix timestamp).
    #[serde(default)]
    pub exp: i64,

    /// Subject identifier. The connector's user id.
    #[serde(default)]
    pub sub: String,

    /// Issuer of the token.
    #[serde(default)]
    pub iss: String,

    /// Organizations the subject belongs to.
    #[serde(default)]
    pub organizations: Organizations,

    /// Client the token was issued to.
    #[serde(default)]
    pub client_id: String,

    /// Token type.
    #[serde(default)]
    pub token_type: String,

    /// `"user"` for people, `"Service"` for service identities.
    #[serde(default)]
    pub identity_type: String,
}

impl IntrospectResponse {
    /// Returns `true` for service identities.
    #[must_use]
    pub fn is_service(&self) -> bool {
        self.identity_type == SERVICE_IDENTITY
    }
}

/// Organization membership reported by introspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organizations {
    /// The subject's managing organization.
    #[serde(default)]
    pub managing_organization: String,

    /// Organizations with per-organization grants.
    #[serde(default)]
    pub organization_list: Vec<OrganizationGrants>,
}

/// Grants within one organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationGrants {
    /// Organization id.
    pub organization_id: String,

    /// Display name.
    #[serde(default)]
    pub organization_name: String,

    /// Whether the organization is disabled.
    #[serde(default)]
    pub disabled: bool,

    /// Permissions granted in the organization.
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Roles held in the organization.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Groups the subject is a member of.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// User profile from the identity management service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// User UUID.
    #[serde(default)]
    pub id: String,

    /// Login name.
    #[serde(default)]
    pub login_id: String,

    /// Primary email address.
    #[serde(default)]
    pub email_address: String,

    /// Given name.
    #[serde(default)]
    pub given_name: String,

    /// Middle name.
    #[serde(default)]
    pub middle_name: String,

    /// Family name.
    #[serde(default)]
    pub family_name: String,

    /// Display name.
    #[serde(default)]
    pub display_name: String,

    /// Preferred language tag.
    #[serde(default)]
    pub preferred_language: String,

    /// Preferred communication channel.
    #[serde(default)]
    pub preferred_communication_channel: String,

    /// Managing organization id.
    #[serde(default)]
    pub managing_organization: String,

    /// Whether the account is disabled.
    #[serde(default)]
    pub disabled: bool,
}

impl Profile {
    /// Returns `true` if nothing was filled in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_introspect_response_deserialize() {
        let json = r#"{
            "active": true,
            "scope": "auth_iam_organization auth_iam_introspect",
            "username": "jdoe",
            "exp": 1700000000,
            "sub": "7f3a-uuid",
            "iss": "https://iam.example.com/oauth2/access_token",
            "organizations": {
                "managingOrganization": "org-1",
                "organizationList": [
                    {
                        "organizationId": "org-1",
                        "organizationName": "Acme",
                        "permissions": ["USER.READ"],
                        "roles": ["ADMIN"],
                        "groups": ["admins"]
                    }
                ]
            },
            "client_id": "broker",
            "token_type": "Bearer",
            "identity_type": "user"
        }"#;

        let resp: IntrospectResponse = serde_json::from_str(json).unwrap();
        assert!(resp.active);
        assert_eq!(resp.sub, "7f3a-uuid");
        assert!(!resp.is_service());
        assert_eq!(resp.organizations.managing_organization, "org-1");
        assert_eq!(resp.organizations.organization_list[0].groups, vec!["admins"]);
    }

    #[test]
    fn test_service_identity() {
        let resp: IntrospectResponse =
            serde_json::from_str(r#"{"active":true,"sub":"svc@app.example","identity_type":"Service"}"#)
                .unwrap();
        assert!(resp.is_service());
        assert!(resp.organizations.organization_list.is_empty());
    }

    #[test]
    fn test_profile_is_empty() {
        assert!(Profile::default().is_empty());
        let profile = Profile {
            given_name: "Jane".to_string(),
            ..Profile::default()
        };
        assert!(!profile.is_empty());
    }
}
