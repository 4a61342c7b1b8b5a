//! Identity resolution.
//!
//! Every entry point that ends with an authenticated user funnels through
//! [`Resolver::resolve`]. Userinfo supplies the presented claims, but the
//! stable user id always comes from introspection: two accounts can share an
//! email, never a subject.

use std::collections::BTreeSet;
use std::future::Future;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectorConfig, TenantMap};
use crate::error::{ConnectorError, ConnectorResult, UpstreamError};
use crate::flow::ProtocolMode;
use crate::identity::Identity;
use crate::session::SessionData;
use crate::token::UpstreamToken;
use crate::upstream::{Claims, IntrospectResponse, Profile, Upstream};

/// Why an identity is being resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Initial login. SAML2 logins carry the raw assertion.
    Create {
        /// The assertion to persist in the session.
        assertion: Option<Vec<u8>>,
    },
    /// Refresh of an existing session.
    Refresh,
    /// Exchange of an externally issued access token.
    Exchange,
}

impl Invocation {
    /// Short name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Refresh => "refresh",
            Self::Exchange => "exchange",
        }
    }
}

/// Claim rules derived from the configuration.
#[derive(Debug, Clone)]
struct ClaimPolicy {
    mode: ProtocolMode,
    requires_email: bool,
    hosted_domains: Vec<String>,
    skip_email_verified: bool,
    group_claim: bool,
    role_claim: bool,
    role_as_group: bool,
    tenant_map: TenantMap,
}

impl ClaimPolicy {
    fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            mode: if config.is_saml() {
                ProtocolMode::Saml2
            } else {
                ProtocolMode::OAuth2
            },
            requires_email: config.requests_scope("email"),
            hosted_domains: config.hosted_domains.clone(),
            skip_email_verified: config.insecure_skip_email_verified,
            group_claim: config.enable_group_claim,
            role_claim: config.enable_role_claim,
            role_as_group: config.role_as_group_claim,
            tenant_map: config.tenant_map.clone(),
        }
    }

    fn email(
        &self,
        claims: &Claims,
        introspection: &IntrospectResponse,
    ) -> ConnectorResult<String> {
        let email = if introspection.is_service() {
            Some(introspection.sub.clone())
        } else {
            claims.get("email").and_then(Value::as_str).map(String::from)
        };

        match email {
            Some(email) => Ok(email),
            None if self.requires_email => Err(ConnectorError::MissingEmailClaim),
            None => Ok(String::new()),
        }
    }

    fn email_verified(&self, claims: &Claims) -> bool {
        if self.mode == ProtocolMode::Saml2 || self.skip_email_verified {
            return true;
        }
        match claims.get("email_verified") {
            Some(Value::Bool(verified)) => *verified,
            Some(Value::String(verified)) => verified == "true",
            _ => false,
        }
    }

    fn check_hosted_domain(&self, claims: &Claims) -> ConnectorResult<()> {
        if self.hosted_domains.is_empty() {
            return Ok(());
        }
        let hd = claims.get("hd").and_then(Value::as_str).unwrap_or_default();
        if self.hosted_domains.iter().any(|domain| domain == hd) {
            Ok(())
        } else {
            Err(ConnectorError::DomainNotAllowed(hd.to_string()))
        }
    }

    /// Collects `(groups, roles)` from the subject's organizations.
    fn grants(&self, introspection: &IntrospectResponse) -> (Vec<String>, Vec<String>) {
        let mut groups = BTreeSet::new();
        let mut roles = BTreeSet::new();

        for org in &introspection.organizations.organization_list {
            let tenant = self
                .tenant_map
                .get(&org.organization_id)
                .map_or(org.organization_id.as_str(), String::as_str);

            if self.group_claim {
                groups.extend(org.groups.iter().map(|g| format!("{tenant}/{g}")));
            }
            if self.role_claim {
                let target = if self.role_as_group {
                    &mut groups
                } else {
                    &mut roles
                };
                target.extend(org.roles.iter().map(|r| format!("{tenant}/{r}")));
            }
        }

        (groups.into_iter().collect(), roles.into_iter().collect())
    }
}

/// Races an upstream call against connector shutdown.
pub(crate) async fn until_shutdown<T, F>(
    shutdown: &CancellationToken,
    call: F,
) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(UpstreamError::Cancelled),
        result = call => result,
    }
}

/// Turns an upstream token into an [`Identity`].
pub struct Resolver {
    upstream: Upstream,
    policy: ClaimPolicy,
    shutdown: CancellationToken,
}

impl Resolver {
    /// Creates a resolver. Calls in flight fail once `shutdown` is cancelled.
    #[must_use]
    pub fn new(config: &ConnectorConfig, upstream: Upstream, shutdown: CancellationToken) -> Self {
        Self {
            upstream,
            policy: ClaimPolicy::from_config(config),
            shutdown,
        }
    }

    /// Resolves the identity behind `token`.
    ///
    /// Userinfo, introspection and the profile lookup run one after the
    /// other with the same token. Only the profile lookup may fail without
    /// failing the resolution.
    ///
    /// # Errors
    ///
    /// - `UserInfoFailed` / `IntrospectionFailed` if the provider call fails,
    ///   or the token is reported inactive
    /// - `MissingEmailClaim` if an email is required and none is available
    /// - `DomainNotAllowed` if the `hd` claim is not allowed
    /// - `SessionEncode` if the session cannot be serialized
    pub async fn resolve(
        &self,
        token: &UpstreamToken,
        invocation: Invocation,
    ) -> ConnectorResult<Identity> {
        let claims = until_shutdown(&self.shutdown, self.upstream.userinfo.user_info(token))
            .await
            .map_err(ConnectorError::UserInfoFailed)?;

        let introspection =
            until_shutdown(&self.shutdown, self.upstream.introspector.introspect(token))
                .await
                .map_err(ConnectorError::IntrospectionFailed)?;
        if !introspection.active {
            return Err(ConnectorError::IntrospectionFailed(UpstreamError::Inactive));
        }

        let email = self.policy.email(&claims, &introspection)?;
        let email_verified = self.policy.email_verified(&claims);
        self.policy.check_hosted_domain(&claims)?;

        let user = self.profile(token, &introspection.sub).await?;
        let (groups, roles) = self.policy.grants(&introspection);

        let assertion = match &invocation {
            Invocation::Create { assertion } => assertion.clone().unwrap_or_default(),
            Invocation::Refresh | Invocation::Exchange => Vec::new(),
        };

        let session = SessionData {
            refresh_token: token.refresh_token().unwrap_or_default().as_bytes().to_vec(),
            access_token: token.access_token.as_bytes().to_vec(),
            assertion,
            groups: groups.clone(),
            trusted_idp_org: introspection.organizations.managing_organization.clone(),
            audience_trust_map: Default::default(),
            tenant_map: self.policy.tenant_map.clone(),
            user,
            introspection,
        };

        let identity = Identity {
            user_id: session.introspection.sub.clone(),
            username: session.introspection.username.clone(),
            email,
            email_verified,
            groups,
            roles,
            connector_data: session.encode()?,
        };

        tracing::info!(
            user_id = %identity.user_id,
            invocation = invocation.as_str(),
            groups = identity.groups.len(),
            "Resolved identity"
        );

        Ok(identity)
    }

    /// Looks up the subject's profile. Failures yield an empty profile.
    async fn profile(&self, token: &UpstreamToken, subject: &str) -> ConnectorResult<Profile> {
        let lookup = self
            .upstream
            .profiles
            .user_by_uuid(&token.access_token, subject);

        match until_shutdown(&self.shutdown, lookup).await {
            Ok(profile) => Ok(profile.unwrap_or_default()),
            Err(UpstreamError::Cancelled) => Err(ConnectorError::ProfileLookupFailed(
                UpstreamError::Cancelled,
            )),
            Err(e) => {
                tracing::warn!(subject, error = %e, "Failed to get user profile");
                Ok(Profile::default())
            }
        }
    }
}
