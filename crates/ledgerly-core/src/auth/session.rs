use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use super::repository::SessionRepository;
use crate::models::{Company, PermissionMap, User};

/// Token set of the current login.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub session_token: Option<String>,
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Authenticated means both an access token and a session token are
    /// present; unauthenticated flows (signup, verification) carry a
    /// session token alone.
    pub fn is_authenticated(&self) -> bool {
        fn present(v: &Option<String>) -> bool {
            v.as_deref().is_some_and(|s| !s.is_empty())
        }
        present(&self.access_token) && present(&self.session_token)
    }
}

/// Names of the persisted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKey {
    User,
    Org,
    AccessToken,
    RefreshToken,
    SessionToken,
    AuthenticatedAt,
    Roles,
    Permissions,
}

impl StoreKey {
    pub const ALL: [StoreKey; 8] = [
        StoreKey::User,
        StoreKey::Org,
        StoreKey::AccessToken,
        StoreKey::RefreshToken,
        StoreKey::SessionToken,
        StoreKey::AuthenticatedAt,
        StoreKey::Roles,
        StoreKey::Permissions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::User => "user",
            StoreKey::Org => "org",
            StoreKey::AccessToken => "access_token",
            StoreKey::RefreshToken => "refresh_token",
            StoreKey::SessionToken => "session_token",
            StoreKey::AuthenticatedAt => "authenticated_at",
            StoreKey::Roles => "roles",
            StoreKey::Permissions => "permissions",
        }
    }
}

/// Typed view over a [`SessionRepository`].
///
/// Structured values are stored as JSON strings. A value that no longer
/// parses is reported and treated as absent.
pub struct SessionStore<R> {
    repo: R,
    namespace: Option<String>,
}

impl<R: SessionRepository> SessionStore<R> {
    pub fn new(repo: R, namespace: Option<String>) -> Self {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        Self { repo, namespace }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn name(&self, key: StoreKey) -> String {
        match &self.namespace {
            Some(ns) => format!("{}_{}", ns, key.as_str()),
            None => key.as_str().to_string(),
        }
    }

    fn read(&self, key: StoreKey) -> Option<String> {
        self.repo.get(&self.name(key)).filter(|v| !v.is_empty())
    }

    fn write(&mut self, key: StoreKey, value: Option<String>) {
        let name = self.name(key);
        match value {
            Some(v) => self.repo.set(&name, v),
            None => self.repo.remove(&name),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, key: StoreKey) -> Option<T> {
        let raw = self.read(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Ignoring unreadable stored value");
                None
            }
        }
    }

    fn write_json<T: Serialize>(&mut self, key: StoreKey, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.write(key, Some(raw)),
            Err(e) => warn!(key = key.as_str(), error = %e, "Failed to serialize value for storage"),
        }
    }

    // ===== Session =====

    pub fn session(&self) -> Session {
        let authenticated_at = self.read(StoreKey::AuthenticatedAt).and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| warn!(error = %e, "Ignoring unreadable authenticated_at"))
                .ok()
        });
        Session {
            access_token: self.read(StoreKey::AccessToken),
            refresh_token: self.read(StoreKey::RefreshToken),
            session_token: self.read(StoreKey::SessionToken),
            authenticated_at,
        }
    }

    pub fn set_session(&mut self, session: &Session) {
        self.write(StoreKey::AccessToken, session.access_token.clone());
        self.write(StoreKey::RefreshToken, session.refresh_token.clone());
        self.write(StoreKey::SessionToken, session.session_token.clone());
        self.write(
            StoreKey::AuthenticatedAt,
            session.authenticated_at.map(|at| at.to_rfc3339()),
        );
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated()
    }

    pub fn session_token(&self) -> Option<String> {
        self.read(StoreKey::SessionToken)
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(StoreKey::AccessToken)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(StoreKey::RefreshToken)
    }

    pub fn rotate_session_token(&mut self, token: &str) {
        self.write(StoreKey::SessionToken, Some(token.to_string()));
    }

    // ===== User =====

    pub fn user(&self) -> Option<User> {
        self.read_json(StoreKey::User)
    }

    /// Replace the stored user, mirroring its roles and permissions into
    /// their own keys.
    pub fn set_user(&mut self, user: &User) {
        self.write_json(StoreKey::User, user);
        self.write_json(StoreKey::Roles, &user.roles);
        self.write_json(StoreKey::Permissions, &user.permissions);
    }

    pub fn roles(&self) -> BTreeSet<String> {
        self.read_json(StoreKey::Roles).unwrap_or_default()
    }

    pub fn permissions(&self) -> PermissionMap {
        self.read_json(StoreKey::Permissions).unwrap_or_default()
    }

    // ===== Company =====

    pub fn company(&self) -> Option<Company> {
        self.read_json(StoreKey::Org)
    }

    pub fn company_slug(&self) -> Option<String> {
        self.company().map(|c| c.slug)
    }

    pub fn set_company(&mut self, company: &Company) {
        self.write_json(StoreKey::Org, company);
    }

    /// Remove every stored value.
    pub fn clear(&mut self) {
        for key in StoreKey::ALL {
            self.write(key, None);
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.repo.flush()
    }
}
