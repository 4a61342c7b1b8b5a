//! Authorization-code flow.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::{CallbackRequest, Exchanged, LoginFlow, ProtocolMode, Scopes};
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::upstream::OAuth2Client;

/// Standard OAuth2 authorization-code login.
pub struct OAuth2CodeFlow {
    client: Arc<dyn OAuth2Client>,
    preferred_domain: Option<String>,
    prompt_type: String,
}

impl OAuth2CodeFlow {
    /// Creates the flow on top of an OAuth2 client.
    #[must_use]
    pub fn new(client: Arc<dyn OAuth2Client>, config: &ConnectorConfig) -> Self {
        Self {
            client,
            preferred_domain: config.preferred_domain().map(String::from),
            prompt_type: config.prompt_type.clone(),
        }
    }
}

#[async_trait]
impl LoginFlow for OAuth2CodeFlow {
    fn mode(&self) -> ProtocolMode {
        ProtocolMode::OAuth2
    }

    fn login_url(
        &self,
        scopes: &Scopes,
        _callback_url: &str,
        state: &str,
    ) -> Result<Url, ConnectorError> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(domain) = &self.preferred_domain {
            params.push(("hd", domain.as_str()));
        }
        if scopes.offline_access {
            params.push(("access_type", "offline"));
            params.push(("prompt", self.prompt_type.as_str()));
        }
        Ok(self.client.auth_code_url(state, &params))
    }

    async fn exchange(&self, request: &CallbackRequest) -> Result<Exchanged, ConnectorError> {
        let code = request
            .require("code")
            .map_err(ConnectorError::TokenExchangeFailed)?;

        let token = self
            .client
            .exchange_code(code)
            .await
            .map_err(ConnectorError::TokenExchangeFailed)?;

        Ok(Exchanged {
            token,
            assertion: None,
        })
    }
}
