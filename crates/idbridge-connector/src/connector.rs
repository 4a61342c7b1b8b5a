//! The connector facade called by the identity broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{ConfigError, ConnectorConfig};
use crate::discovery::DiscoveryClient;
use crate::error::{ConnectorError, ConnectorResult, UpstreamError};
use crate::flow::{
    CallbackRequest, LoginFlow, OAuth2CodeFlow, ProtocolMode, SAML2_BEARER_GRANT, Saml2BearerFlow,
    Scopes,
};
use crate::identity::Identity;
use crate::resolver::{Invocation, Resolver, until_shutdown};
use crate::session::SessionData;
use crate::token::UpstreamToken;
use crate::upstream::{HttpUpstream, OAuth2Client, Upstream};

/// Federates logins to the IAM service.
///
/// A connector is opened once and shared between requests. Every call is
/// independent; the only shared mutable state is the closed flag.
pub struct Connector {
    redirect_uri: String,
    allowed_subject_token_types: Vec<String>,
    flow: Box<dyn LoginFlow>,
    oauth2: Arc<dyn OAuth2Client>,
    resolver: Resolver,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Connector {
    /// Validates `config`, discovers the provider and builds the connector.
    ///
    /// Cancelling `shutdown` (or calling [`Connector::close`]) aborts calls
    /// in flight.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an invalid configuration and `Discovery`
    /// if the provider metadata cannot be fetched.
    pub async fn open(
        config: ConnectorConfig,
        shutdown: CancellationToken,
    ) -> ConnectorResult<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("failed to build HTTP client: {e}")))?;

        let issuer = Url::parse(&config.issuer)
            .map_err(|e| ConfigError::InvalidValue(format!("invalid issuer URL: {e}")))?;
        let metadata = DiscoveryClient::with_client(http_client.clone(), config.allow_http)
            .discover(&issuer, config.insecure_issuer.as_deref())
            .await?;

        if config.is_saml()
            && metadata.grant_types_supported.is_some()
            && !metadata.supports_grant_type(SAML2_BEARER_GRANT)
        {
            tracing::warn!(
                issuer = %metadata.issuer,
                "Provider does not advertise the SAML2 bearer grant"
            );
        }

        let upstream = HttpUpstream::new(http_client.clone(), &config, &metadata)?;
        Self::with_upstream(
            config,
            Upstream::from_http(Arc::new(upstream)),
            http_client,
            shutdown,
        )
    }

    /// Builds the connector on top of existing upstream capabilities.
    ///
    /// `http_client` is only used by the SAML2 bearer exchange, which posts
    /// to `upstream.token_url`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an invalid configuration.
    pub fn with_upstream(
        config: ConnectorConfig,
        upstream: Upstream,
        http_client: reqwest::Client,
        shutdown: CancellationToken,
    ) -> ConnectorResult<Self> {
        config.validate()?;

        let flow: Box<dyn LoginFlow> = if config.is_saml() {
            Box::new(Saml2BearerFlow::new(
                http_client,
                &config,
                upstream.token_url.clone(),
            )?)
        } else {
            if config.insecure_skip_email_verified {
                tracing::warn!(
                    "insecure_skip_email_verified is set, every email is reported as verified"
                );
            }
            Box::new(OAuth2CodeFlow::new(upstream.oauth2.clone(), &config))
        };

        tracing::info!(
            issuer = %config.issuer,
            mode = ?flow.mode(),
            "Opened connector"
        );

        Ok(Self {
            redirect_uri: config.redirect_uri.clone(),
            allowed_subject_token_types: config.allowed_subject_token_types.clone(),
            oauth2: upstream.oauth2.clone(),
            resolver: Resolver::new(&config, upstream, shutdown.clone()),
            flow,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// The login protocol selected at open.
    #[must_use]
    pub fn mode(&self) -> ProtocolMode {
        self.flow.mode()
    }

    /// Builds the URL the user is redirected to for login.
    ///
    /// # Errors
    ///
    /// Returns `ConfigMismatch` if `callback_url` is not the configured
    /// redirect URI.
    pub fn login_url(
        &self,
        scopes: &Scopes,
        callback_url: &str,
        state: &str,
    ) -> ConnectorResult<Url> {
        if callback_url != self.redirect_uri {
            return Err(ConnectorError::config_mismatch(
                &self.redirect_uri,
                callback_url,
            ));
        }
        self.flow.login_url(scopes, callback_url, state)
    }

    /// Completes a login from the provider's redirect.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamAuthError` if the provider reported an error,
    /// `TokenExchangeFailed` if the exchange fails, or any resolver error.
    pub async fn handle_callback(
        &self,
        scopes: &Scopes,
        request: &CallbackRequest,
    ) -> ConnectorResult<Identity> {
        if let Some(error) = request.param("error") {
            return Err(ConnectorError::upstream_auth(
                error,
                request.param("error_description").unwrap_or_default(),
            ));
        }

        tracing::debug!(
            mode = ?self.flow.mode(),
            offline_access = scopes.offline_access,
            "Handling login callback"
        );

        let exchanged = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                return Err(ConnectorError::TokenExchangeFailed(UpstreamError::Cancelled));
            }
            result = self.flow.exchange(request) => result?,
        };

        self.resolver
            .resolve(
                &exchanged.token,
                Invocation::Create {
                    assertion: exchanged.assertion,
                },
            )
            .await
    }

    /// Refreshes a session previously created by this connector.
    ///
    /// The stored refresh token is always redeemed, never reused as is.
    ///
    /// # Errors
    ///
    /// Returns `SessionCorrupt` if the identity's session data does not
    /// decode, `RefreshFailed` if the refresh token is missing or rejected,
    /// or any resolver error.
    pub async fn refresh(&self, scopes: &Scopes, identity: &Identity) -> ConnectorResult<Identity> {
        let session = SessionData::decode(&identity.connector_data)?;

        tracing::debug!(
            user_id = %identity.user_id,
            offline_access = scopes.offline_access,
            "Refreshing session"
        );

        let stale = UpstreamToken::expired_with_refresh(session.refresh_token());
        let token = until_shutdown(&self.shutdown, self.oauth2.token(stale))
            .await
            .map_err(ConnectorError::RefreshFailed)?;

        self.resolver.resolve(&token, Invocation::Refresh).await
    }

    /// Resolves an access token issued to another client.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedTokenType` if the subject token type is not on
    /// the configured allow-list, or any resolver error.
    pub async fn token_identity(
        &self,
        subject_token_type: &str,
        subject_token: &str,
    ) -> ConnectorResult<Identity> {
        if !self.allowed_subject_token_types.is_empty()
            && !self
                .allowed_subject_token_types
                .iter()
                .any(|t| t == subject_token_type)
        {
            return Err(ConnectorError::UnsupportedTokenType(
                subject_token_type.to_string(),
            ));
        }

        self.resolver
            .resolve(&UpstreamToken::bearer(subject_token), Invocation::Exchange)
            .await
    }

    /// Cancels all calls in flight. Safe to call more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.cancel();
            tracing::info!("Closed connector");
        }
    }

    /// Returns `true` once [`Connector::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
