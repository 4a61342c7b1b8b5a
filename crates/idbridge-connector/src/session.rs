//! Session data handed back to the broker.
//!
//! After every successful resolution the connector serializes a
//! [`SessionData`] into the identity's `connector_data`. The broker stores it
//! verbatim and hands it back on refresh; the connector is the only party
//! that interprets it. Byte fields are base64 encoded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::TenantMap;
use crate::error::ConnectorError;
use crate::upstream::{IntrospectResponse, Profile};

/// Audience to trusted organization mapping.
pub type AudienceTrustMap = BTreeMap<String, String>;

/// State persisted between calls for one authenticated session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Refresh token. Empty for sessions created by token exchange.
    #[serde(default, with = "base64_bytes")]
    pub refresh_token: Vec<u8>,

    /// Access token the session was resolved with.
    #[serde(default, with = "base64_bytes")]
    pub access_token: Vec<u8>,

    /// Raw SAML2 assertion of the initial login, when there was one.
    #[serde(default, with = "base64_bytes")]
    pub assertion: Vec<u8>,

    /// Groups emitted for the identity.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Managing organization of the subject.
    #[serde(default, rename = "trustedIdpOrg")]
    pub trusted_idp_org: String,

    /// Audience to organization trust mapping.
    #[serde(default)]
    pub audience_trust_map: AudienceTrustMap,

    /// Tenant map in effect when the session was created.
    #[serde(default)]
    pub tenant_map: TenantMap,

    /// Introspection result the identity was built from.
    #[serde(default)]
    pub introspection: IntrospectResponse,

    /// Profile of the subject, empty when the lookup failed.
    #[serde(default)]
    pub user: Profile,
}

impl SessionData {
    /// The refresh token as a string, empty if none was stored.
    #[must_use]
    pub fn refresh_token(&self) -> String {
        String::from_utf8_lossy(&self.refresh_token).into_owned()
    }

    /// Serializes the session for the broker.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::SessionEncode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, ConnectorError> {
        serde_json::to_vec(self).map_err(|e| ConnectorError::SessionEncode(e.to_string()))
    }

    /// Parses a session previously produced by [`SessionData::encode`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::SessionCorrupt` if the bytes do not decode.
    pub fn decode(bytes: &[u8]) -> Result<Self, ConnectorError> {
        serde_json::from_slice(bytes).map_err(|e| ConnectorError::SessionCorrupt(e.to_string()))
    }
}

/// Serializes `Vec<u8>` as a standard base64 string.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
