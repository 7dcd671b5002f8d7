//! Wire shapes of the authentication endpoints.

use serde::Deserialize;
use serde_json::Value;

use crate::models::{Company, User};

/// `{ status, data, meta }` as returned by every auth endpoint, on success
/// and on 401 alike.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthEnvelope {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub data: Option<AuthData>,
    #[serde(default)]
    pub meta: Option<AuthMeta>,
}

impl AuthEnvelope {
    /// Parse an envelope out of an arbitrary JSON body. Bodies that are not
    /// envelopes yield an empty one.
    pub fn from_value(body: &Value) -> Self {
        serde_json::from_value(body.clone()).unwrap_or_default()
    }

    pub fn user(&self) -> Option<&User> {
        self.data.as_ref().and_then(|d| d.user.as_ref())
    }

    pub fn company(&self) -> Option<&Company> {
        self.data.as_ref().and_then(|d| d.company.as_ref())
    }

    pub fn redirect(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.redirect.as_deref())
    }

    /// Ids of flows still pending (e.g. `verify_email`).
    pub fn pending_flows(&self) -> Vec<String> {
        self.data
            .as_ref()
            .map(|d| {
                d.flows
                    .iter()
                    .filter(|f| f.is_pending)
                    .map(|f| f.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn session_token(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.session_token.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthData {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub company: Option<Company>,
    /// Post-login navigation hint: a pseudo-slug or a company slug.
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub flows: Vec<Flow>,
    /// Provider authorization URL, set by the provider redirect endpoint.
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Flow {
    pub id: String,
    #[serde(default)]
    pub is_pending: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthMeta {
    #[serde(default)]
    pub is_authenticated: Option<bool>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Response of the token refresh endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RefreshEnvelope {
    pub data: RefreshedTokens,
}
