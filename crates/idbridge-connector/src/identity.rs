//! The canonical identity returned to the broker.

use crate::error::ConnectorError;
use crate::session::SessionData;

/// A user authenticated by the upstream provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id: the introspection subject.
    pub user_id: String,

    /// Login name from introspection.
    pub username: String,

    /// Email address. For service identities this is the subject.
    pub email: String,

    /// Whether the email address is considered verified.
    pub email_verified: bool,

    /// Group claims, `<tenant>/<group>`.
    pub groups: Vec<String>,

    /// Role claims, `<tenant>/<role>`, unless roles are emitted as groups.
    pub roles: Vec<String>,

    /// Serialized [`SessionData`]. Opaque to the broker.
    pub connector_data: Vec<u8>,
}

impl Identity {
    /// Decodes the attached session data.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::SessionCorrupt` if the data does not decode.
    pub fn session(&self) -> Result<SessionData, ConnectorError> {
        SessionData::decode(&self.connector_data)
    }
}
