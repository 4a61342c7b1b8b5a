//! # idbridge-connector
//!
//! Identity connector that federates logins to an upstream IAM provider for
//! an identity broker.
//!
//! This crate provides:
//! - OAuth2 / OpenID Connect authorization-code login
//! - SAML2 login with a bearer-assertion token exchange
//! - Identity resolution from userinfo, token introspection and the user
//!   directory
//! - Session refresh and token exchange
//!
//! ## Overview
//!
//! The broker opens one [`Connector`] and calls it for every login. Each
//! successful call returns an [`Identity`] whose `connector_data` carries a
//! serialized [`SessionData`]; the broker stores it and hands it back on
//! refresh.
//!
//! ```ignore
//! use idbridge_connector::prelude::*;
//!
//! let config = load_config(Some("idbridge.toml"))?;
//! let connector = Connector::open(config, CancellationToken::new()).await?;
//! let url = connector.login_url(&Scopes::offline(), &redirect_uri, &state)?;
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Connector configuration and loading
//! - [`connector`] - The public entry points
//! - [`discovery`] - OpenID Connect provider discovery
//! - [`flow`] - OAuth2 and SAML2 login strategies
//! - `observability` - Subscriber setup, behind the default `tracing-init`
//!   feature
//! - [`resolver`] - Token to identity resolution
//! - [`session`] - Session data persisted by the broker
//! - [`upstream`] - Upstream provider capabilities and their HTTP client

pub mod config;
pub mod connector;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod identity;
#[cfg(feature = "tracing-init")]
pub mod observability;
pub mod resolver;
pub mod session;
pub mod token;
pub mod upstream;

pub use crate::config::{ConfigError, ConnectorConfig, TenantMap, loader::load_config};
pub use crate::connector::Connector;
pub use crate::discovery::{DiscoveryClient, DiscoveryError, ProviderMetadata};
pub use crate::error::{ConnectorError, ConnectorResult, UpstreamError};
pub use crate::flow::{CallbackRequest, LoginFlow, ProtocolMode, Scopes};
pub use crate::identity::Identity;
pub use crate::resolver::{Invocation, Resolver};
pub use crate::session::SessionData;
pub use crate::token::UpstreamToken;
pub use crate::upstream::{
    Claims, HttpUpstream, IntrospectResponse, Introspector, OAuth2Client, Profile,
    ProfileDirectory, Upstream, UserInfoSource,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use idbridge_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigError, ConnectorConfig, loader::load_config};
    pub use crate::connector::Connector;
    pub use crate::error::{ConnectorError, ConnectorResult, UpstreamError};
    pub use crate::flow::{CallbackRequest, ProtocolMode, Scopes};
    pub use crate::identity::Identity;
    pub use crate::session::SessionData;
    pub use tokio_util::sync::CancellationToken;
}
