//! reqwest-backed implementation of the upstream capabilities.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{
    Claims, IntrospectResponse, Introspector, OAuth2Client, Profile, ProfileDirectory,
    UserInfoSource,
};
use crate::config::{ConfigError, ConnectorConfig};
use crate::discovery::ProviderMetadata;
use crate::error::UpstreamError;
use crate::token::{TokenResponse, UpstreamToken};

/// API version header expected by the introspection endpoint.
const INTROSPECT_API_VERSION: &str = "4";

/// Introspection path below the IAM base URL.
const IAM_INTROSPECT_PATH: [&str; 3] = ["authorize", "oauth2", "introspect"];

/// API version header expected by the legacy user endpoint.
const PROFILE_API_VERSION: &str = "1";

/// HTTP client for the IAM service.
pub struct HttpUpstream {
    http_client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    authorization_endpoint: Url,
    token_endpoint: Url,
    userinfo_endpoint: Option<Url>,
    introspection_endpoint: Option<Url>,
    idm_url: Option<Url>,
    credentials_in_body: bool,
}

impl HttpUpstream {
    /// Builds the client from configuration and discovered metadata.
    ///
    /// The introspection endpoint is taken from the configuration, then from
    /// discovery, then derived from `iam_url`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if an endpoint is not a valid URL.
    pub fn new(
        http_client: reqwest::Client,
        config: &ConnectorConfig,
        metadata: &ProviderMetadata,
    ) -> Result<Self, ConfigError> {
        let introspection = match config
            .introspection_endpoint
            .as_deref()
            .or(metadata.introspection_endpoint.as_deref())
            .filter(|v| !v.is_empty())
        {
            Some(endpoint) => Some(parse_endpoint("introspection_endpoint", endpoint)?),
            None => optional_endpoint("iam_url", config.iam_url.as_deref())?
                .map(|iam| iam_introspection_endpoint(&iam))
                .transpose()?,
        };

        Ok(Self {
            http_client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.effective_scopes(),
            authorization_endpoint: parse_endpoint(
                "authorization_endpoint",
                &metadata.authorization_endpoint,
            )?,
            token_endpoint: parse_endpoint("token_endpoint", &metadata.token_endpoint)?,
            userinfo_endpoint: optional_endpoint(
                "userinfo_endpoint",
                metadata.userinfo_endpoint.as_deref(),
            )?,
            introspection_endpoint: introspection,
            idm_url: optional_endpoint("idm_url", config.idm_url.as_deref())?,
            credentials_in_body: config.credentials_in_body(),
        })
    }

    /// The token endpoint.
    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_endpoint
    }

    /// Posts a grant to the token endpoint.
    async fn request_token(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, UpstreamError> {
        let mut form: Vec<(&str, &str)> = grant.to_vec();
        let mut request = self
            .http_client
            .post(self.token_endpoint.as_str())
            .header("Accept", "application/json");

        if self.credentials_in_body {
            form.push(("client_id", self.client_id.as_str()));
            form.push(("client_secret", self.client_secret.as_str()));
        } else {
            request = request.basic_auth(&self.client_id, Some(&self.client_secret));
        }

        let response = request.form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::status(status.as_u16(), body));
        }

        serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl OAuth2Client for HttpUpstream {
    fn auth_code_url(&self, state: &str, extra_params: &[(&str, &str)]) -> Url {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", &self.redirect_uri);
            params.append_pair("scope", &self.scopes.join(" "));
            params.append_pair("state", state);
            for (key, value) in extra_params {
                params.append_pair(key, value);
            }
        }
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamToken, UpstreamError> {
        tracing::debug!(endpoint = %self.token_endpoint, "Exchanging authorization code");

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        Ok(self.request_token(&form).await?.into_token())
    }

    async fn token(&self, current: UpstreamToken) -> Result<UpstreamToken, UpstreamError> {
        if !current.is_expired() {
            return Ok(current);
        }

        let refresh_token = current
            .refresh_token()
            .ok_or(UpstreamError::MissingRefreshToken)?;

        tracing::debug!(endpoint = %self.token_endpoint, "Redeeming refresh token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let mut token = self.request_token(&form).await?.into_token();

        // The provider may omit the refresh token when it does not rotate it.
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }
}

#[async_trait]
impl UserInfoSource for HttpUpstream {
    async fn user_info(&self, token: &UpstreamToken) -> Result<Claims, UpstreamError> {
        let endpoint = self
            .userinfo_endpoint
            .as_ref()
            .ok_or_else(|| UpstreamError::MissingEndpoint("userinfo_endpoint".to_string()))?;

        let response = self
            .http_client
            .get(endpoint.as_str())
            .bearer_auth(&token.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::status(status.as_u16(), body));
        }

        serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Decode(format!("failed to decode userinfo claims: {e}")))
    }
}

#[async_trait]
impl Introspector for HttpUpstream {
    async fn introspect(
        &self,
        token: &UpstreamToken,
    ) -> Result<IntrospectResponse, UpstreamError> {
        let endpoint = self.introspection_endpoint.as_ref().ok_or_else(|| {
            UpstreamError::MissingEndpoint("introspection_endpoint".to_string())
        })?;

        let response = self
            .http_client
            .post(endpoint.as_str())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json")
            .header("Api-Version", INTROSPECT_API_VERSION)
            .form(&[("token", token.access_token.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::status(status.as_u16(), body));
        }

        serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

/// Envelope of the legacy user endpoint.
#[derive(Debug, Deserialize)]
struct LegacyUserResponse {
    exchange: LegacyUserExchange,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyUserExchange {
    #[serde(default)]
    login_id: String,
    #[serde(default)]
    profile: Profile,
}

#[async_trait]
impl ProfileDirectory for HttpUpstream {
    async fn user_by_uuid(
        &self,
        access_token: &str,
        subject: &str,
    ) -> Result<Option<Profile>, UpstreamError> {
        let Some(idm_url) = &self.idm_url else {
            return Ok(None);
        };

        let mut endpoint = idm_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|()| UpstreamError::MissingEndpoint("idm_url".to_string()))?
            .pop_if_empty()
            .extend(["security", "users", subject]);

        let response = self
            .http_client
            .get(endpoint.as_str())
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .header("Api-Version", PROFILE_API_VERSION)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::status(status.as_u16(), body));
        }

        let envelope: LegacyUserResponse =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

        let mut profile = envelope.exchange.profile;
        if profile.id.is_empty() {
            profile.id = subject.to_string();
        }
        if profile.login_id.is_empty() {
            profile.login_id = envelope.exchange.login_id;
        }
        Ok(Some(profile))
    }
}

fn parse_endpoint(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue(format!("{name}: {e}")))
}

/// `{iam_url}/authorize/oauth2/introspect`
fn iam_introspection_endpoint(iam_url: &Url) -> Result<Url, ConfigError> {
    let mut endpoint = iam_url.clone();
    endpoint
        .path_segments_mut()
        .map_err(|()| ConfigError::InvalidValue("iam_url cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(IAM_INTROSPECT_PATH);
    Ok(endpoint)
}

fn optional_endpoint(name: &str, value: Option<&str>) -> Result<Option<Url>, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| parse_endpoint(name, v))
        .transpose()
}
