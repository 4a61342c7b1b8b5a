//! SAML2 bearer-assertion flow.
//!
//! The user is sent to the IAM SAML2 login page, which posts back to the
//! broker's callback with an `assertion` parameter. The assertion is then
//! exchanged for an OAuth2 token using the SAML2 bearer grant
//! ([RFC 7522](https://tools.ietf.org/html/rfc7522)).

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use super::{CallbackRequest, Exchanged, LoginFlow, ProtocolMode, Scopes, set_query_param};
use crate::config::{ConfigError, ConnectorConfig};
use crate::error::{ConnectorError, UpstreamError};
use crate::token::TokenResponse;

/// Grant type of the assertion exchange.
pub const SAML2_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:saml2-bearer";

/// API version the token endpoint expects for the assertion exchange.
const TOKEN_API_VERSION: &str = "2";

/// SAML2 login followed by a bearer-assertion token exchange.
pub struct Saml2BearerFlow {
    http_client: reqwest::Client,
    login_page: Url,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl Saml2BearerFlow {
    /// Creates the flow.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if no SAML2 login URL is configured or it does
    /// not parse.
    pub fn new(
        http_client: reqwest::Client,
        config: &ConnectorConfig,
        token_url: Url,
    ) -> Result<Self, ConfigError> {
        let login_page = config
            .saml2_login_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::Missing("saml2_login_url".to_string()))?;
        let login_page = Url::parse(login_page).map_err(|e| {
            ConfigError::InvalidValue(format!("invalid SAML2 login URL: {e}"))
        })?;

        Ok(Self {
            http_client,
            login_page,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }
}

#[async_trait]
impl LoginFlow for Saml2BearerFlow {
    fn mode(&self) -> ProtocolMode {
        ProtocolMode::Saml2
    }

    fn login_url(
        &self,
        _scopes: &Scopes,
        callback_url: &str,
        state: &str,
    ) -> Result<Url, ConnectorError> {
        let mut callback = Url::parse(callback_url).map_err(|e| {
            ConfigError::InvalidValue(format!("invalid callback URL {callback_url:?}: {e}"))
        })?;
        set_query_param(&mut callback, "state", state);

        let mut url = self.login_page.clone();
        set_query_param(&mut url, "redirect_uri", callback.as_str());
        Ok(url)
    }

    async fn exchange(&self, request: &CallbackRequest) -> Result<Exchanged, ConnectorError> {
        let assertion = request
            .require("assertion")
            .map_err(ConnectorError::TokenExchangeFailed)?;

        tracing::debug!(endpoint = %self.token_url, "Exchanging SAML2 assertion");

        let response = self
            .http_client
            .post(self.token_url.as_str())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json")
            .header("Api-Version", TOKEN_API_VERSION)
            .form(&[("grant_type", SAML2_BEARER_GRANT), ("assertion", assertion)])
            .send()
            .await
            .map_err(|e| ConnectorError::TokenExchangeFailed(e.into()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectorError::TokenExchangeFailed(e.into()))?;
        if status != StatusCode::OK {
            return Err(ConnectorError::TokenExchangeFailed(UpstreamError::status(
                status.as_u16(),
                body,
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ConnectorError::TokenExchangeFailed(UpstreamError::Decode(format!(
                "failed to decode token response: {e}"
            )))
        })?;

        Ok(Exchanged {
            token: token.into_token(),
            assertion: Some(assertion.as_bytes().to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CALLBACK: &str = "https://broker.example.com/callback";

    fn flow(token_url: &str) -> Saml2BearerFlow {
        let config = ConnectorConfig::new("https://iam.example.com", "client", "secret", CALLBACK)
            .with_saml2_login_url("https://login.example.com/saml2/login?idp=corp");
        Saml2BearerFlow::new(
            reqwest::Client::new(),
            &config,
            Url::parse(token_url).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_requires_login_url() {
        let config = ConnectorConfig::new("https://iam.example.com", "client", "secret", CALLBACK);
        let result = Saml2BearerFlow::new(
            reqwest::Client::new(),
            &config,
            Url::parse("https://iam.example.com/token").unwrap(),
        );
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_login_url_embeds_state_in_callback() {
        let url = flow("https://iam.example.com/token")
            .login_url(&Scopes::offline(), CALLBACK, "st-42")
            .unwrap();

        assert_eq!(url.host_str(), Some("login.example.com"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("idp".into(), "corp".into())));

        let redirect = pairs
            .iter()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| Url::parse(v).unwrap())
            .unwrap();
        assert_eq!(redirect.path(), "/callback");
        assert_eq!(
            redirect.query_pairs().find(|(k, _)| k == "state").map(|(_, v)| v.into_owned()),
            Some("st-42".to_string())
        );
    }

    #[tokio::test]
    async fn test_exchange_posts_bearer_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("api-version", "2"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(header_exists("authorization"))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Asaml2-bearer",
            ))
            .and(body_string_contains("assertion=XYZ"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a1",
                "refresh_token": "r1",
                "expires_in": 0,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchanged = flow(&format!("{}/token", server.uri()))
            .exchange(&CallbackRequest::from_query("assertion=XYZ&state=s"))
            .await
            .unwrap();

        assert_eq!(exchanged.token.access_token, "a1");
        assert_eq!(exchanged.token.refresh_token(), Some("r1"));
        assert_eq!(exchanged.assertion.as_deref(), Some(b"XYZ".as_slice()));
    }

    #[tokio::test]
    async fn test_exchange_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad client"))
            .mount(&server)
            .await;

        let err = flow(&format!("{}/token", server.uri()))
            .exchange(&CallbackRequest::from_query("assertion=XYZ"))
            .await
            .unwrap_err();
        assert_eq!(err.upstream().and_then(UpstreamError::http_status), Some(401));
        assert!(err.to_string().contains("bad client"));
    }

    #[tokio::test]
    async fn test_exchange_malformed_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = flow(&format!("{}/token", server.uri()))
            .exchange(&CallbackRequest::from_query("assertion=XYZ"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::TokenExchangeFailed(UpstreamError::Decode(_))
        ));
    }
}
