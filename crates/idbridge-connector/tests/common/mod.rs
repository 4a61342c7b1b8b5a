//! In-memory upstream used by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use idbridge_connector::{
    Claims, Connector, ConnectorConfig, IntrospectResponse, Introspector, OAuth2Client, Profile,
    ProfileDirectory, Upstream, UpstreamError, UpstreamToken, UserInfoSource,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

pub const CALLBACK: &str = "https://broker.example.com/callback";
pub const ISSUER: &str = "https://iam.example.com";

pub fn config() -> ConnectorConfig {
    ConnectorConfig::new(ISSUER, "client", "secret", CALLBACK)
}

/// Records every call and answers from canned data.
pub struct MockUpstream {
    pub claims: Mutex<Value>,
    pub introspection: Mutex<IntrospectResponse>,
    pub profile: Mutex<Option<Profile>>,
    pub issued: Mutex<UpstreamToken>,
    pub refreshed: Mutex<UpstreamToken>,

    pub fail_exchange: AtomicBool,
    pub fail_userinfo: AtomicBool,
    pub fail_profile: AtomicBool,
    pub hang_introspection: AtomicBool,
    pub hang_profile: AtomicBool,

    pub auth_url_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub userinfo_calls: AtomicUsize,
    pub introspect_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,

    pub presented_refresh_tokens: Mutex<Vec<String>>,
    pub introspected_tokens: Mutex<Vec<String>>,
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self {
            claims: Mutex::new(json!({
                "sub": "userinfo-sub",
                "email": "jane@acme.com",
                "email_verified": true,
                "hd": "acme.com"
            })),
            introspection: Mutex::new(IntrospectResponse {
                active: true,
                sub: "uuid-1".to_string(),
                username: "jane".to_string(),
                ..IntrospectResponse::default()
            }),
            profile: Mutex::new(Some(Profile {
                id: "uuid-1".to_string(),
                login_id: "jane".to_string(),
                given_name: "Jane".to_string(),
                ..Profile::default()
            })),
            issued: Mutex::new(token("a1", "r1")),
            refreshed: Mutex::new(token("a2", "r2")),
            fail_exchange: AtomicBool::new(false),
            fail_userinfo: AtomicBool::new(false),
            fail_profile: AtomicBool::new(false),
            hang_introspection: AtomicBool::new(false),
            hang_profile: AtomicBool::new(false),
            auth_url_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            userinfo_calls: AtomicUsize::new(0),
            introspect_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            presented_refresh_tokens: Mutex::new(Vec::new()),
            introspected_tokens: Mutex::new(Vec::new()),
        }
    }
}

pub fn token(access: &str, refresh: &str) -> UpstreamToken {
    UpstreamToken {
        refresh_token: Some(refresh.to_string()),
        ..UpstreamToken::bearer(access)
    }
}

impl MockUpstream {
    pub fn set_claims(&self, claims: Value) {
        *self.claims.lock().unwrap() = claims;
    }

    pub fn update_introspection(&self, update: impl FnOnce(&mut IntrospectResponse)) {
        update(&mut self.introspection.lock().unwrap());
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuth2Client for MockUpstream {
    fn auth_code_url(&self, state: &str, extra_params: &[(&str, &str)]) -> Url {
        self.auth_url_calls.fetch_add(1, Ordering::SeqCst);
        let mut url = Url::parse("https://iam.example.com/authorize").unwrap();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("state", state);
            for (key, value) in extra_params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<UpstreamToken, UpstreamError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(UpstreamError::status(400, format!("invalid code {code}")));
        }
        Ok(self.issued.lock().unwrap().clone())
    }

    async fn token(&self, current: UpstreamToken) -> Result<UpstreamToken, UpstreamError> {
        if !current.is_expired() {
            return Ok(current);
        }
        let refresh_token = current
            .refresh_token()
            .ok_or(UpstreamError::MissingRefreshToken)?;

        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.presented_refresh_tokens
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        Ok(self.refreshed.lock().unwrap().clone())
    }
}

#[async_trait]
impl UserInfoSource for MockUpstream {
    async fn user_info(&self, _token: &UpstreamToken) -> Result<Claims, UpstreamError> {
        self.userinfo_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_userinfo.load(Ordering::SeqCst) {
            return Err(UpstreamError::status(401, "invalid token"));
        }
        let claims = self.claims.lock().unwrap().clone();
        match claims {
            Value::Object(claims) => Ok(claims),
            other => Err(UpstreamError::Decode(format!("not an object: {other}"))),
        }
    }
}

#[async_trait]
impl Introspector for MockUpstream {
    async fn introspect(
        &self,
        token: &UpstreamToken,
    ) -> Result<IntrospectResponse, UpstreamError> {
        self.introspect_calls.fetch_add(1, Ordering::SeqCst);
        self.introspected_tokens
            .lock()
            .unwrap()
            .push(token.access_token.clone());
        if self.hang_introspection.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.introspection.lock().unwrap().clone())
    }
}

#[async_trait]
impl ProfileDirectory for MockUpstream {
    async fn user_by_uuid(
        &self,
        _access_token: &str,
        _subject: &str,
    ) -> Result<Option<Profile>, UpstreamError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_profile.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_profile.load(Ordering::SeqCst) {
            return Err(UpstreamError::status(503, "directory unavailable"));
        }
        Ok(self.profile.lock().unwrap().clone())
    }
}

/// Routes connector logs to the test output.
pub fn init_logging() {
    #[cfg(feature = "tracing-init")]
    idbridge_connector::observability::init_tracing_with_level("debug");
}

pub fn upstream(mock: &Arc<MockUpstream>, token_url: &str) -> Upstream {
    Upstream {
        oauth2: mock.clone(),
        userinfo: mock.clone(),
        introspector: mock.clone(),
        profiles: mock.clone(),
        token_url: Url::parse(token_url).unwrap(),
    }
}

pub fn connector(config: ConnectorConfig, mock: &Arc<MockUpstream>) -> Connector {
    connector_with_token_url(config, mock, "https://iam.example.com/token")
}

pub fn connector_with_token_url(
    config: ConnectorConfig,
    mock: &Arc<MockUpstream>,
    token_url: &str,
) -> Connector {
    init_logging();
    Connector::with_upstream(
        config,
        upstream(mock, token_url),
        reqwest::Client::new(),
        CancellationToken::new(),
    )
    .unwrap()
}
