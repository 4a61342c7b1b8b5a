//! Connector configuration.
//!
//! [`ConnectorConfig`] holds the static settings for one upstream IAM
//! provider: issuer, client credentials, redirect URI, scopes, the optional
//! SAML2 login page and the claim toggles. It is validated once when the
//! connector is opened and never mutated afterwards.
//!
//! # Example (TOML)
//!
//! ```toml
//! issuer = "https://iam.example.com/oauth2"
//! client_id = "broker"
//! client_secret = "s3cr3t"
//! redirect_uri = "https://broker.example.com/callback"
//! scopes = ["email", "profile"]
//! hosted_domains = ["acme.com"]
//! request_timeout = "10s"
//!
//! [tenant_map]
//! "0b5e3a4f-org" = "acme"
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Organization id to tenant name mapping used when naming groups.
pub type TenantMap = BTreeMap<String, String>;

/// Scope the upstream rejects; it contains a colon.
const UNSUPPORTED_SCOPE: &str = "federated:id";

/// Scope value that is always requested first.
pub const SCOPE_OPENID: &str = "openid";

/// Configuration for a single upstream IAM connector.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// The OIDC issuer URL used for discovery.
    pub issuer: String,

    /// Issuer value the discovery document is allowed to report instead of
    /// `issuer`. The upstream advertises a different issuer than the URL it
    /// is served from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_issuer: Option<String>,

    /// OAuth2 client id.
    pub client_id: String,

    /// OAuth2 client secret.
    pub client_secret: String,

    /// The only callback URL this connector accepts.
    pub redirect_uri: String,

    /// Requested scopes. `openid` is always prepended.
    /// Defaults to `profile email groups` when empty.
    pub scopes: Vec<String>,

    /// Allowed values of the userinfo `hd` claim. Empty allows everyone.
    pub hosted_domains: Vec<String>,

    /// Login page for the SAML2 bearer flow. Setting it switches the
    /// connector from the authorization-code flow to the SAML2 flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saml2_login_url: Option<String>,

    /// Base URL of the IAM service. Used to derive the introspection
    /// endpoint when neither the configuration nor discovery provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iam_url: Option<String>,

    /// Base URL of the identity management service, used for profile lookups.
    /// Profile enrichment is skipped when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idm_url: Option<String>,

    /// Overrides the introspection endpoint advertised by discovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,

    /// Organization id to tenant name mapping.
    pub tenant_map: TenantMap,

    /// Emit organization groups as identity groups.
    pub enable_group_claim: bool,

    /// Emit organization roles.
    pub enable_role_claim: bool,

    /// Emit roles as groups instead of as a separate list.
    pub role_as_group_claim: bool,

    /// Send client credentials as form parameters instead of basic auth on
    /// code and refresh grants. Not recommended by RFC 6749, section 2.3.1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth_unsupported: Option<bool>,

    /// Report `email_verified = true` for authorization-code logins without
    /// consulting the `email_verified` claim. The upstream does not emit the
    /// claim reliably. SAML2 logins are always reported as verified.
    pub insecure_skip_email_verified: bool,

    /// Value of the `prompt` parameter sent with offline access requests.
    pub prompt_type: String,

    /// Accepted subject token types for token exchange. Empty accepts any.
    pub allowed_subject_token_types: Vec<String>,

    /// Timeout applied to every upstream HTTP call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Allow plain HTTP upstream URLs. Only meant for tests.
    pub allow_http: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            insecure_issuer: None,
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            scopes: Vec::new(),
            hosted_domains: Vec::new(),
            saml2_login_url: None,
            iam_url: None,
            idm_url: None,
            introspection_endpoint: None,
            tenant_map: TenantMap::new(),
            enable_group_claim: false,
            enable_role_claim: false,
            role_as_group_claim: false,
            basic_auth_unsupported: None,
            insecure_skip_email_verified: true,
            prompt_type: default_prompt_type(),
            allowed_subject_token_types: Vec::new(),
            request_timeout: Duration::from_secs(30),
            allow_http: false,
        }
    }
}

fn default_prompt_type() -> String {
    "consent".to_string()
}

impl ConnectorConfig {
    /// Creates a configuration with the required fields set.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            ..Self::default()
        }
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the hosted-domain allow-list.
    #[must_use]
    pub fn with_hosted_domains(mut self, domains: Vec<impl Into<String>>) -> Self {
        self.hosted_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Switches the connector to the SAML2 bearer flow.
    #[must_use]
    pub fn with_saml2_login_url(mut self, url: impl Into<String>) -> Self {
        self.saml2_login_url = Some(url.into());
        self
    }

    /// Sets the identity management base URL.
    #[must_use]
    pub fn with_idm_url(mut self, url: impl Into<String>) -> Self {
        self.idm_url = Some(url.into());
        self
    }

    /// Sets the introspection endpoint override.
    #[must_use]
    pub fn with_introspection_endpoint(mut self, url: impl Into<String>) -> Self {
        self.introspection_endpoint = Some(url.into());
        self
    }

    /// Adds a tenant mapping.
    #[must_use]
    pub fn with_tenant(mut self, org_id: impl Into<String>, tenant: impl Into<String>) -> Self {
        self.tenant_map.insert(org_id.into(), tenant.into());
        self
    }

    /// Sets the group and role claim toggles.
    #[must_use]
    pub fn with_claims(mut self, groups: bool, roles: bool, roles_as_groups: bool) -> Self {
        self.enable_group_claim = groups;
        self.enable_role_claim = roles;
        self.role_as_group_claim = roles_as_groups;
        self
    }

    /// Sets whether authorization-code logins skip email verification.
    #[must_use]
    pub fn with_insecure_skip_email_verified(mut self, skip: bool) -> Self {
        self.insecure_skip_email_verified = skip;
        self
    }

    /// Sets the prompt type used for offline access.
    #[must_use]
    pub fn with_prompt_type(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_type = prompt.into();
        self
    }

    /// Restricts the subject token types accepted by token exchange.
    #[must_use]
    pub fn with_allowed_subject_token_types(mut self, types: Vec<impl Into<String>>) -> Self {
        self.allowed_subject_token_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the upstream request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows HTTP (non-HTTPS) upstream URLs.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Returns `true` when the SAML2 bearer flow is configured.
    #[must_use]
    pub fn is_saml(&self) -> bool {
        self.saml2_login_url
            .as_deref()
            .is_some_and(|url| !url.is_empty())
    }

    /// Returns `true` when client credentials must be sent in the form body.
    #[must_use]
    pub fn credentials_in_body(&self) -> bool {
        self.basic_auth_unsupported.unwrap_or(false)
    }

    /// The scopes actually requested from the upstream.
    ///
    /// `openid` comes first, followed by the configured scopes minus
    /// `federated:id`, or `profile email groups` if none are configured.
    #[must_use]
    pub fn effective_scopes(&self) -> Vec<String> {
        let mut scopes = vec![SCOPE_OPENID.to_string()];
        if self.scopes.is_empty() {
            scopes.extend(["profile", "email", "groups"].map(String::from));
        } else {
            scopes.extend(
                self.scopes
                    .iter()
                    .filter(|s| s.as_str() != UNSUPPORTED_SCOPE)
                    .cloned(),
            );
        }
        scopes
    }

    /// Returns `true` if `scope` is part of the effective scope set.
    #[must_use]
    pub fn requests_scope(&self, scope: &str) -> bool {
        self.effective_scopes().iter().any(|s| s == scope)
    }

    /// Domain hint for the authorization URL: the single hosted domain, or
    /// `*` when several are configured.
    #[must_use]
    pub fn preferred_domain(&self) -> Option<&str> {
        match self.hosted_domains.as_slice() {
            [] => None,
            [only] => Some(only.as_str()),
            _ => Some("*"),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` when a required field is empty and
    /// `ConfigError::InvalidValue` when a URL does not parse or a value is
    /// out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }
        parse_url("issuer", &self.issuer)?;

        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("client_id".to_string()));
        }

        if self.redirect_uri.is_empty() {
            return Err(ConfigError::Missing("redirect_uri".to_string()));
        }
        parse_url("redirect_uri", &self.redirect_uri)?;

        for (field, value) in [
            ("saml2_login_url", &self.saml2_login_url),
            ("iam_url", &self.iam_url),
            ("idm_url", &self.idm_url),
            ("introspection_endpoint", &self.introspection_endpoint),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                parse_url(field, value)?;
            }
        }

        if self.prompt_type.is_empty() {
            return Err(ConfigError::InvalidValue(
                "prompt_type cannot be empty".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "request_timeout must be > 0".to_string(),
            ));
        }

        if self.role_as_group_claim && !self.enable_role_claim {
            return Err(ConfigError::InvalidValue(
                "role_as_group_claim requires enable_role_claim".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value)
        .map_err(|e| ConfigError::InvalidValue(format!("{field} is not a valid URL: {e}")))
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

pub mod loader {
    //! Loads a [`ConnectorConfig`] from a TOML file and the environment.

    use std::path::PathBuf;

    use ::config::{Config, Environment, File};

    use super::{ConfigError, ConnectorConfig};

    /// Default configuration file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "idbridge.toml";

    /// Environment variable prefix, e.g. `IDBRIDGE__CLIENT_SECRET`.
    pub const ENV_PREFIX: &str = "IDBRIDGE";

    /// Builds and validates the configuration.
    ///
    /// Values from the file are overridden by `IDBRIDGE__`-prefixed
    /// environment variables. List fields take comma-separated values. A
    /// missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if the sources cannot be merged and the
    /// validation error if the merged configuration is invalid.
    pub fn load_config(path: Option<&str>) -> Result<ConnectorConfig, ConfigError> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("scopes")
                .with_list_parse_key("hosted_domains")
                .with_list_parse_key("allowed_subject_token_types"),
        );

        let merged: ConnectorConfig = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

        merged.validate()?;
        Ok(merged)
    }
}
