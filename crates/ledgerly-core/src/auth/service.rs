//! Authentication flows and company context.
//!
//! `AuthService` is the context object handed to guards and commands. It
//! owns the configuration and the session client; nothing is global.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::repository::SessionRepository;
use super::session::{Session, SessionStore};
use crate::api::{ApiError, ApiReply, AuthEnvelope, SessionClient, Transport};
use crate::config::AuthConfig;
use crate::middleware::AuthState;
use crate::models::{Company, PermissionMap, User};
use crate::permissions::{PermissionEvaluator, PermissionKey};
use crate::redirect::{self, Navigation, RedirectPlan, RedirectTarget};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Invitation key when signing up from an invitation link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation: Option<String>,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(Navigation),
    /// The server accepted the step but needs more (e.g. `verify_email`).
    Pending(Vec<String>),
}

pub struct AuthService<T, R> {
    config: AuthConfig,
    client: SessionClient<T, R>,
}

impl<T: Transport, R: SessionRepository> AuthService<T, R> {
    pub fn new(config: AuthConfig, transport: T, repository: R) -> Self {
        let store = SessionStore::new(repository, config.namespace.clone());
        Self {
            config,
            client: SessionClient::new(transport, store),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore<R> {
        self.client.store()
    }

    pub fn client_mut(&mut self) -> &mut SessionClient<T, R> {
        &mut self.client
    }

    // ===== State =====

    pub fn is_authenticated(&self) -> bool {
        self.store().is_authenticated()
    }

    pub fn session(&self) -> Session {
        self.store().session()
    }

    pub fn current_user(&self) -> Option<User> {
        self.store().user()
    }

    pub fn current_company(&self) -> Option<Company> {
        self.store().company()
    }

    pub fn current_company_slug(&self) -> Option<String> {
        self.store().company_slug()
    }

    pub fn is_onboarded(&self) -> bool {
        self.current_user().is_some_and(|u| u.onboarded)
    }

    /// Snapshot of everything the authorization middleware needs.
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            authenticated: self.is_authenticated(),
            onboarded: self.is_onboarded(),
            roles: self.store().roles(),
            permissions: self.store().permissions(),
            full_access_roles: self.config.full_access_roles.clone(),
        }
    }

    // ===== Permissions =====

    fn grants(&self) -> (BTreeSet<String>, PermissionMap) {
        (self.store().roles(), self.store().permissions())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.store().roles().contains(role)
    }

    pub fn has_permission(&self, key: &PermissionKey) -> bool {
        let (roles, permissions) = self.grants();
        PermissionEvaluator::new(&roles, &permissions, &self.config.full_access_roles)
            .has_permission(key)
    }

    pub fn has_any_permission(&self, keys: &[PermissionKey]) -> bool {
        let (roles, permissions) = self.grants();
        PermissionEvaluator::new(&roles, &permissions, &self.config.full_access_roles)
            .has_any_permission(keys)
    }

    pub fn has_all_permissions(&self, keys: &[PermissionKey]) -> bool {
        let (roles, permissions) = self.grants();
        PermissionEvaluator::new(&roles, &permissions, &self.config.full_access_roles)
            .has_all_permissions(keys)
    }

    // ===== Authentication flows =====

    pub async fn login(&mut self, request: &LoginRequest, target: RedirectTarget) -> Result<AuthOutcome> {
        info!(email = %request.email, "Logging in");
        let reply = self
            .client
            .login(&request.email, &request.password)
            .await
            .context("Failed to send login request")?;
        self.finish_auth(reply, target).await
    }

    pub async fn signup(&mut self, request: &SignupRequest, target: RedirectTarget) -> Result<AuthOutcome> {
        info!(email = %request.email, "Signing up");
        let body = serde_json::to_value(request)?;
        let reply = self
            .client
            .signup(body)
            .await
            .context("Failed to send signup request")?;
        self.finish_auth(reply, target).await
    }

    pub async fn request_password_reset(&mut self, email: &str) -> Result<()> {
        self.client
            .request_password_reset(email)
            .await
            .context("Failed to request password reset")?;
        self.persist()
    }

    pub async fn reset_password(&mut self, key: &str, password: &str, target: RedirectTarget) -> Result<AuthOutcome> {
        let reply = self
            .client
            .reset_password(key, password)
            .await
            .context("Failed to reset password")?;
        self.finish_auth(reply, target).await
    }

    pub async fn verify_email(&mut self, key: &str, target: RedirectTarget) -> Result<AuthOutcome> {
        let reply = self
            .client
            .verify_email(key)
            .await
            .context("Failed to verify email")?;
        self.finish_auth(reply, target).await
    }

    /// Ask the backend where to send the user to authorize with `provider`.
    pub async fn provider_redirect_url(&mut self, provider: &str, callback_url: &str) -> Result<String> {
        let envelope = self
            .client
            .provider_redirect(provider, callback_url, "login")
            .await
            .context("Failed to start provider login")?;
        self.persist()?;
        envelope
            .data
            .and_then(|d| d.location)
            .ok_or_else(|| anyhow::anyhow!("Provider redirect response has no location"))
    }

    /// Complete a provider login with the token obtained from the provider.
    pub async fn provider_callback(
        &mut self,
        provider: &str,
        client_id: &str,
        id_token: &str,
        target: RedirectTarget,
    ) -> Result<AuthOutcome> {
        let body = json!({
            "provider": provider,
            "process": "login",
            "token": { "client_id": client_id, "id_token": id_token },
        });
        let reply = self
            .client
            .provider_token(body)
            .await
            .context("Failed to complete provider login")?;
        self.finish_auth(reply, target).await
    }

    /// Finish a provider signup that needed extra details (e.g. an email).
    pub async fn provider_signup(&mut self, email: &str, target: RedirectTarget) -> Result<AuthOutcome> {
        let reply = self
            .client
            .provider_signup(json!({ "email": email }))
            .await
            .context("Failed to complete provider signup")?;
        self.finish_auth(reply, target).await
    }

    /// Re-read the session from the server. Returns whether it is still
    /// authenticated.
    pub async fn fetch_session(&mut self) -> Result<bool> {
        let reply = self
            .client
            .fetch_session()
            .await
            .context("Failed to fetch session")?;
        let authenticated = match reply.status {
            200 => {
                self.apply_envelope(&AuthEnvelope::from_value(&reply.body), false);
                true
            }
            401 => {
                debug!("Session is not authenticated");
                self.drop_credentials();
                false
            }
            410 => {
                debug!("Session expired");
                self.client.store_mut().clear();
                false
            }
            status => return Err(ApiError::from_status(status, &reply.body.to_string()).into()),
        };
        self.persist()?;
        Ok(authenticated)
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&mut self) -> Result<()> {
        let refresh_token = self
            .store()
            .refresh_token()
            .ok_or_else(|| anyhow::anyhow!("No refresh token stored"))?;
        let tokens = self
            .client
            .refresh_tokens(&refresh_token)
            .await
            .context("Failed to refresh access token")?;

        let mut session = self.session();
        session.access_token = Some(tokens.access_token);
        if tokens.refresh_token.is_some() {
            session.refresh_token = tokens.refresh_token;
        }
        self.client.store_mut().set_session(&session);
        self.persist()
    }

    /// Log out. A 401 or 410 means the server already considers the
    /// session gone; local state is cleared either way.
    pub async fn logout(&mut self) -> Result<()> {
        info!("Logging out");
        let result = self
            .client
            .delete_session()
            .await
            .and_then(|reply| match reply.status {
                200..=299 | 401 | 410 => Ok(()),
                status => Err(ApiError::from_status(status, &reply.body.to_string())),
            });
        result.context("Failed to log out")?;

        self.client.store_mut().clear();
        self.persist()
    }

    // ===== Company context =====

    /// Load the user's grants in `slug` and store them on the user.
    pub async fn fetch_company_permissions(&mut self, slug: &str) -> Result<()> {
        let grants = self
            .client
            .company_permissions(slug)
            .await
            .with_context(|| format!("Failed to fetch permissions for company {}", slug))?;
        let user = self.current_user().unwrap_or_default().with_grants(grants);
        self.client.store_mut().set_user(&user);
        self.persist()
    }

    pub async fn fetch_company(&mut self, slug: &str) -> Result<Company> {
        let company = self
            .client
            .company_detail(slug)
            .await
            .with_context(|| format!("Failed to fetch company {}", slug))?;
        self.client.store_mut().set_company(&company);
        self.persist()?;
        Ok(company)
    }

    /// Make `slug` the active company: tell the server, then load its
    /// profile and the user's grants in it.
    pub async fn switch_company(&mut self, slug: &str) -> Result<Company> {
        info!(company = slug, "Switching company");
        self.client
            .switch_company(slug)
            .await
            .with_context(|| format!("Failed to switch to company {}", slug))?;
        self.enter_company(slug).await
    }

    async fn enter_company(&mut self, slug: &str) -> Result<Company> {
        self.fetch_company_permissions(slug).await?;
        self.fetch_company(slug).await
    }

    /// Resolve the server hint (or the caller's target) into a navigation.
    pub async fn resolve_redirect(&mut self, hint: Option<&str>, target: RedirectTarget) -> Result<Navigation> {
        match redirect::plan(hint, &target, &self.config)? {
            RedirectPlan::Navigate(navigation) => Ok(navigation),
            RedirectPlan::EnterCompany(slug) => {
                self.enter_company(&slug).await?;
                Ok(Navigation::Reload(redirect::dashboard_path(&slug)))
            }
        }
    }

    // ===== Internals =====

    async fn finish_auth(&mut self, reply: ApiReply, target: RedirectTarget) -> Result<AuthOutcome> {
        let envelope = AuthEnvelope::from_value(&reply.body);
        match reply.status {
            200 => {
                self.apply_envelope(&envelope, true);
                self.persist()?;
                if !self.is_authenticated() {
                    let flows = envelope.pending_flows();
                    if !flows.is_empty() {
                        debug!(?flows, "Authentication pending");
                        return Ok(AuthOutcome::Pending(flows));
                    }
                    warn!("Auth reply left the session without an access token");
                    return Err(ApiError::InvalidResponse(
                        "authentication succeeded without an access token".to_string(),
                    )
                    .into());
                }
                let navigation = self.resolve_redirect(envelope.redirect(), target).await?;
                Ok(AuthOutcome::Authenticated(navigation))
            }
            401 => {
                self.persist()?;
                let flows = envelope.pending_flows();
                if flows.is_empty() {
                    Err(ApiError::from_status(401, &reply.body.to_string()).into())
                } else {
                    debug!(?flows, "Authentication pending");
                    Ok(AuthOutcome::Pending(flows))
                }
            }
            status => Err(ApiError::from_status(status, &reply.body.to_string()).into()),
        }
    }

    /// Store what an auth-success envelope carries. The user is replaced as
    /// a whole; tokens are only replaced when the envelope carries them.
    fn apply_envelope(&mut self, envelope: &AuthEnvelope, fresh_login: bool) {
        let mut session = self.session();
        if let Some(meta) = &envelope.meta {
            if meta.access_token.is_some() {
                session.access_token.clone_from(&meta.access_token);
            }
            if meta.refresh_token.is_some() {
                session.refresh_token.clone_from(&meta.refresh_token);
            }
            if meta.session_token.is_some() {
                session.session_token.clone_from(&meta.session_token);
            }
        }
        if fresh_login {
            session.authenticated_at = Some(Utc::now());
        }

        let store = self.client.store_mut();
        store.set_session(&session);
        match envelope.user() {
            Some(user) => store.set_user(user),
            None => warn!("Auth response carried no user"),
        }
        if let Some(company) = envelope.company() {
            store.set_company(company);
        }
    }

    /// Forget the login but keep the (possibly just rolled) session token.
    fn drop_credentials(&mut self) {
        let session_token = self.store().session_token();
        let store = self.client.store_mut();
        store.clear();
        store.set_session(&Session {
            session_token,
            ..Default::default()
        });
    }

    fn persist(&mut self) -> Result<()> {
        self.client
            .store_mut()
            .flush()
            .context("Failed to persist session state")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::{endpoints, Method};
    use crate::auth::MemoryRepository;
    use crate::routing::Location;
    use crate::testing::ScriptedTransport;

    fn service(transport: &ScriptedTransport) -> AuthService<ScriptedTransport, MemoryRepository> {
        AuthService::new(AuthConfig::default(), transport.clone(), MemoryRepository::new())
    }

    fn login_success(redirect: Option<&str>) -> serde_json::Value {
        json!({
            "status": 200,
            "data": {
                "user": {
                    "email": "ana@example.com",
                    "display_name": "Ana",
                    "roles": ["accountant"],
                    "permissions": {"invoice": {"view": true}},
                    "onboarded": true
                },
                "redirect": redirect
            },
            "meta": {"is_authenticated": true, "session_token": "s1", "access_token": "a1", "refresh_token": "r1"}
        })
    }

    fn credentials() -> LoginRequest {
        LoginRequest {
            email: "ana@example.com".to_string(),
            password: "secret".to_string(),
        }
    }

    fn script_company(transport: &ScriptedTransport, slug: &str) {
        transport.reply(
            Method::Get,
            &endpoints::company_permissions(slug),
            200,
            json!({"access_level": "admin", "roles": ["admin"], "permissions": {"voucher": {"view": true}}}),
        );
        transport.reply(
            Method::Get,
            &endpoints::company_detail(slug),
            200,
            json!({"slug": slug, "name": slug.to_uppercase()}),
        );
    }

    #[tokio::test]
    async fn test_login_stores_session_and_user() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::LOGIN, 200, login_success(None));
        let mut auth = service(&transport);

        let outcome = auth.login(&credentials(), RedirectTarget::Hint).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Authenticated(Navigation::Stay));
        assert!(auth.is_authenticated());
        assert!(auth.session().authenticated_at.is_some());
        assert_eq!(auth.current_user().unwrap().display_name, "Ana");
        assert!(auth.has_permission(&PermissionKey::action("invoice", "view")));
        assert!(auth.has_role("accountant"));
    }

    #[tokio::test]
    async fn test_login_with_company_hint_reloads_into_dashboard() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::LOGIN, 200, login_success(Some("acme")));
        script_company(&transport, "acme");
        let mut auth = service(&transport);

        let outcome = auth.login(&credentials(), RedirectTarget::Hint).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Authenticated(Navigation::Reload("/acme/dashboard".to_string()))
        );
        assert_eq!(auth.current_company_slug().as_deref(), Some("acme"));
        // Grants were replaced by the company's
        assert!(auth.has_role("admin"));
        assert!(!auth.has_role("accountant"));
        assert_eq!(auth.current_user().unwrap().email, "ana@example.com");
    }

    #[tokio::test]
    async fn test_explicit_target_skips_company_fetch() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::LOGIN, 200, login_success(Some("acme")));
        let mut auth = service(&transport);

        let target = RedirectTarget::To(Location::parse("/acme/sales/invoices"));
        let outcome = auth.login(&credentials(), target).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Authenticated(Navigation::Push(Location::parse("/acme/sales/invoices")))
        );
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_login_without_access_token_is_not_authenticated() {
        let transport = ScriptedTransport::new();
        transport.reply(
            Method::Post,
            endpoints::LOGIN,
            200,
            json!({
                "status": 200,
                "data": {"user": {"email": "ana@example.com"}},
                "meta": {"is_authenticated": true, "session_token": "s1"}
            }),
        );
        let mut auth = service(&transport);

        let err = auth.login(&credentials(), RedirectTarget::Hint).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::InvalidResponse(_))));
        assert!(!auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_pending_verification() {
        let transport = ScriptedTransport::new();
        transport.reply(
            Method::Post,
            endpoints::LOGIN,
            401,
            json!({
                "status": 401,
                "data": {"flows": [{"id": "verify_email", "is_pending": true}]},
                "meta": {"is_authenticated": false, "session_token": "pending"}
            }),
        );
        let mut auth = service(&transport);

        let outcome = auth.login(&credentials(), RedirectTarget::Hint).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Pending(vec!["verify_email".to_string()]));
        // Session token alone does not authenticate
        assert_eq!(auth.store().session_token().as_deref(), Some("pending"));
        assert!(!auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::LOGIN, 400, json!({"errors": [{"param": "password", "message": "Incorrect."}]}));
        let mut auth = service(&transport);

        let err = auth.login(&credentials(), RedirectTarget::Hint).await.unwrap_err();
        assert_eq!(crate::api::status_of(&err), Some(400));
    }

    #[tokio::test]
    async fn test_logout_treats_401_and_410_as_logged_out() {
        for status in [200, 401, 410] {
            let transport = ScriptedTransport::new();
            transport.reply(Method::Post, endpoints::LOGIN, 200, login_success(None));
            transport.reply(Method::Delete, endpoints::SESSION, status, json!({"status": status}));
            let mut auth = service(&transport);
            auth.login(&credentials(), RedirectTarget::Hint).await.unwrap();

            auth.logout().await.unwrap();
            assert!(!auth.is_authenticated(), "status {}", status);
            assert!(auth.current_user().is_none());
        }
    }

    #[tokio::test]
    async fn test_logout_propagates_other_errors() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::LOGIN, 200, login_success(None));
        transport.reply(Method::Delete, endpoints::SESSION, 500, json!({"detail": "boom"}));
        let mut auth = service(&transport);
        auth.login(&credentials(), RedirectTarget::Hint).await.unwrap();

        let err = auth.logout().await.unwrap_err();
        assert_eq!(crate::api::status_of(&err), Some(500));
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_fetch_session_unauthorized_keeps_rolled_token() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::LOGIN, 200, login_success(None));
        transport.reply(
            Method::Get,
            endpoints::SESSION,
            401,
            json!({"status": 401, "meta": {"is_authenticated": false, "session_token": "s2"}}),
        );
        let mut auth = service(&transport);
        auth.login(&credentials(), RedirectTarget::Hint).await.unwrap();

        assert!(!auth.fetch_session().await.unwrap());
        assert!(!auth.is_authenticated());
        assert_eq!(auth.store().session_token().as_deref(), Some("s2"));
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn test_fetch_session_replaces_user() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::LOGIN, 200, login_success(None));
        transport.reply(
            Method::Get,
            endpoints::SESSION,
            200,
            json!({"status": 200, "data": {"user": {"email": "ana@example.com", "onboarded": false}}, "meta": {"is_authenticated": true}}),
        );
        let mut auth = service(&transport);
        auth.login(&credentials(), RedirectTarget::Hint).await.unwrap();

        assert!(auth.fetch_session().await.unwrap());
        let user = auth.current_user().unwrap();
        assert!(!user.onboarded);
        assert!(user.roles.is_empty());
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_replaces_access_token() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::LOGIN, 200, login_success(None));
        transport.reply(
            Method::Post,
            endpoints::TOKEN_REFRESH,
            200,
            json!({"status": 200, "data": {"access_token": "a2"}}),
        );
        let mut auth = service(&transport);
        auth.login(&credentials(), RedirectTarget::Hint).await.unwrap();

        auth.refresh().await.unwrap();
        let session = auth.session();
        assert_eq!(session.access_token.as_deref(), Some("a2"));
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_refresh_without_token_fails() {
        let transport = ScriptedTransport::new();
        let mut auth = service(&transport);
        assert!(auth.refresh().await.is_err());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_switch_company() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::SWITCH_COMPANY, 200, json!({}));
        script_company(&transport, "globex");
        let mut auth = service(&transport);

        let company = auth.switch_company("globex").await.unwrap();
        assert_eq!(company.name, "GLOBEX");
        assert_eq!(auth.current_company_slug().as_deref(), Some("globex"));
        assert_eq!(
            transport.requests()[0].body,
            Some(json!({"company": "globex"}))
        );
    }

    #[tokio::test]
    async fn test_provider_flows() {
        let transport = ScriptedTransport::new();
        transport.reply(
            Method::Post,
            endpoints::PROVIDER_REDIRECT,
            200,
            json!({"status": 200, "data": {"location": "https://accounts.example.com/o/auth"}}),
        );
        transport.reply(Method::Post, endpoints::PROVIDER_TOKEN, 200, login_success(Some("invitations")));
        let mut auth = service(&transport);

        let url = auth
            .provider_redirect_url("google", "https://books.example.com/auth/callback")
            .await
            .unwrap();
        assert_eq!(url, "https://accounts.example.com/o/auth");

        let outcome = auth
            .provider_callback("google", "client", "id-token", RedirectTarget::Hint)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Authenticated(Navigation::Push(Location::parse("/invitations")))
        );
    }

    #[tokio::test]
    async fn test_signup_pending_then_verify() {
        let transport = ScriptedTransport::new();
        transport.reply(
            Method::Post,
            endpoints::SIGNUP,
            401,
            json!({"status": 401, "data": {"flows": [{"id": "verify_email", "is_pending": true}]}, "meta": {"session_token": "s0"}}),
        );
        transport.reply(Method::Post, endpoints::EMAIL_VERIFY, 200, login_success(Some("onboarding")));
        let mut auth = service(&transport);

        let request = SignupRequest {
            email: "ana@example.com".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        };
        let outcome = auth.signup(&request, RedirectTarget::Hint).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Pending(vec!["verify_email".to_string()]));

        let outcome = auth.verify_email("key", RedirectTarget::Hint).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Authenticated(Navigation::Push(Location::parse("/onboarding")))
        );
        let verify = &transport.requests()[1];
        assert!(verify
            .headers
            .contains(&("X-Session-Token".to_string(), "s0".to_string())));
    }
}
