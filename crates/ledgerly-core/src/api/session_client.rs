//! Session-aware request layer.
//!
//! Every request carries the stored session token and access token, and
//! every reply may roll the session token forward.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::payloads::{AuthEnvelope, RefreshEnvelope, RefreshedTokens};
use super::transport::{ApiReply, ApiRequest, Transport};
use super::ApiError;
use crate::auth::repository::SessionRepository;
use crate::auth::session::SessionStore;
use crate::models::{Company, CompanyGrants};

pub const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

/// Fixed endpoint paths, relative to the API base URL.
pub mod endpoints {
    pub const LOGIN: &str = "/_allauth/app/v1/auth/login";
    pub const SESSION: &str = "/_allauth/app/v1/auth/session";
    pub const SIGNUP: &str = "/_allauth/app/v1/auth/signup";
    pub const PASSWORD_REQUEST: &str = "/_allauth/app/v1/auth/password/request";
    pub const PASSWORD_RESET: &str = "/_allauth/app/v1/auth/password/reset";
    pub const EMAIL_VERIFY: &str = "/_allauth/app/v1/auth/email/verify";
    pub const TOKEN_REFRESH: &str = "/_allauth/app/v1/tokens/refresh";
    pub const PROVIDER_REDIRECT: &str = "/_allauth/app/v1/auth/provider/redirect";
    pub const PROVIDER_TOKEN: &str = "/_allauth/app/v1/auth/provider/token";
    pub const PROVIDER_SIGNUP: &str = "/_allauth/app/v1/auth/provider/signup";
    pub const SWITCH_COMPANY: &str = "/api/user/me/switch-company/";

    pub fn company_permissions(slug: &str) -> String {
        format!("/api/company/{}/permissions/mine/", slug)
    }

    pub fn company_detail(slug: &str) -> String {
        format!("/api/company/{}/", slug)
    }
}

/// Session token carried by a reply, if the reply is allowed to roll it.
/// Successful and unauthorized replies both may.
pub fn rolled_session_token(reply: &ApiReply) -> Option<&str> {
    if reply.status != 200 && reply.status != 401 {
        return None;
    }
    reply
        .body
        .get("meta")
        .and_then(|meta| meta.get("session_token"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
}

pub struct SessionClient<T, R> {
    transport: T,
    store: SessionStore<R>,
}

impl<T: Transport, R: SessionRepository> SessionClient<T, R> {
    pub fn new(transport: T, store: SessionStore<R>) -> Self {
        Self { transport, store }
    }

    pub fn store(&self) -> &SessionStore<R> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SessionStore<R> {
        &mut self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a request with session headers attached and return the reply
    /// whatever its status. No retries.
    pub async fn send(&mut self, mut request: ApiRequest) -> Result<ApiReply, ApiError> {
        if let Some(token) = self.store.session_token() {
            request = request.header(SESSION_TOKEN_HEADER, &token);
        }
        if let Some(token) = self.store.access_token() {
            request = request.header("Authorization", &format!("Bearer {}", token));
        }

        let method = request.method;
        let path = request.path.clone();
        let reply = self.transport.send(request).await?;
        debug!(method = method.as_str(), path = %path, status = reply.status, "API reply");

        if let Some(token) = rolled_session_token(&reply) {
            debug!("Rolling session token");
            self.store.rotate_session_token(token);
        }
        Ok(reply)
    }

    /// Send a request and fail on any non-2xx status.
    pub async fn request(&mut self, request: ApiRequest) -> Result<Value, ApiError> {
        let reply = self.send(request).await?;
        if reply.is_success() {
            Ok(reply.body)
        } else {
            Err(ApiError::from_status(reply.status, &body_text(&reply.body)))
        }
    }

    pub async fn request_json<D: DeserializeOwned>(&mut self, request: ApiRequest) -> Result<D, ApiError> {
        let path = request.path.clone();
        let body = self.request(request).await?;
        serde_json::from_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))
    }

    // ===== Auth endpoints =====
    //
    // These return the raw reply: 200 and 401 both carry an envelope the
    // caller inspects.

    pub async fn login(&mut self, email: &str, password: &str) -> Result<ApiReply, ApiError> {
        self.send(ApiRequest::post(
            endpoints::LOGIN,
            json!({ "email": email, "password": password }),
        ))
        .await
    }

    pub async fn fetch_session(&mut self) -> Result<ApiReply, ApiError> {
        self.send(ApiRequest::get(endpoints::SESSION)).await
    }

    pub async fn delete_session(&mut self) -> Result<ApiReply, ApiError> {
        self.send(ApiRequest::delete(endpoints::SESSION)).await
    }

    pub async fn signup(&mut self, body: Value) -> Result<ApiReply, ApiError> {
        self.send(ApiRequest::post(endpoints::SIGNUP, body)).await
    }

    pub async fn request_password_reset(&mut self, email: &str) -> Result<(), ApiError> {
        self.request(ApiRequest::post(
            endpoints::PASSWORD_REQUEST,
            json!({ "email": email }),
        ))
        .await
        .map(|_| ())
    }

    pub async fn reset_password(&mut self, key: &str, password: &str) -> Result<ApiReply, ApiError> {
        self.send(ApiRequest::post(
            endpoints::PASSWORD_RESET,
            json!({ "key": key, "password": password }),
        ))
        .await
    }

    pub async fn verify_email(&mut self, key: &str) -> Result<ApiReply, ApiError> {
        self.send(ApiRequest::post(endpoints::EMAIL_VERIFY, json!({ "key": key })))
            .await
    }

    pub async fn refresh_tokens(&mut self, refresh_token: &str) -> Result<RefreshedTokens, ApiError> {
        let envelope: RefreshEnvelope = self
            .request_json(ApiRequest::post(
                endpoints::TOKEN_REFRESH,
                json!({ "refresh_token": refresh_token }),
            ))
            .await?;
        Ok(envelope.data)
    }

    pub async fn provider_redirect(
        &mut self,
        provider: &str,
        callback_url: &str,
        process: &str,
    ) -> Result<AuthEnvelope, ApiError> {
        let body = self
            .request(ApiRequest::post(
                endpoints::PROVIDER_REDIRECT,
                json!({ "provider": provider, "callback_url": callback_url, "process": process }),
            ))
            .await?;
        Ok(AuthEnvelope::from_value(&body))
    }

    pub async fn provider_token(&mut self, body: Value) -> Result<ApiReply, ApiError> {
        self.send(ApiRequest::post(endpoints::PROVIDER_TOKEN, body)).await
    }

    pub async fn provider_signup(&mut self, body: Value) -> Result<ApiReply, ApiError> {
        self.send(ApiRequest::post(endpoints::PROVIDER_SIGNUP, body)).await
    }

    // ===== Company endpoints =====

    pub async fn company_permissions(&mut self, slug: &str) -> Result<CompanyGrants, ApiError> {
        self.request_json(ApiRequest::get(endpoints::company_permissions(slug)))
            .await
    }

    pub async fn company_detail(&mut self, slug: &str) -> Result<Company, ApiError> {
        self.request_json(ApiRequest::get(endpoints::company_detail(slug)))
            .await
    }

    pub async fn switch_company(&mut self, slug: &str) -> Result<(), ApiError> {
        self.request(ApiRequest::post(
            endpoints::SWITCH_COMPANY,
            json!({ "company": slug }),
        ))
        .await
        .map(|_| ())
    }
}

fn body_text(body: &Value) -> String {
    match body {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::transport::Method;
    use crate::auth::{MemoryRepository, Session};
    use crate::testing::ScriptedTransport;

    fn client(transport: ScriptedTransport) -> SessionClient<ScriptedTransport, MemoryRepository> {
        SessionClient::new(transport, SessionStore::new(MemoryRepository::new(), None))
    }

    #[test]
    fn test_rolled_token_only_on_200_and_401() {
        let body = json!({"meta": {"session_token": "next"}});
        assert_eq!(rolled_session_token(&ApiReply::new(200, body.clone())), Some("next"));
        assert_eq!(rolled_session_token(&ApiReply::new(401, body.clone())), Some("next"));
        assert_eq!(rolled_session_token(&ApiReply::new(410, body.clone())), None);
        assert_eq!(rolled_session_token(&ApiReply::new(500, body)), None);
        assert_eq!(rolled_session_token(&ApiReply::new(200, json!({"meta": {}}))), None);
    }

    #[tokio::test]
    async fn test_headers_attached_and_token_rolled_on_unauthorized() {
        let transport = ScriptedTransport::new();
        transport.reply(
            Method::Get,
            endpoints::SESSION,
            401,
            json!({"status": 401, "meta": {"session_token": "rolled"}}),
        );
        let mut client = client(transport.clone());
        client.store_mut().set_session(&Session {
            access_token: Some("access".to_string()),
            session_token: Some("first".to_string()),
            ..Default::default()
        });

        let reply = client.fetch_session().await.unwrap();
        assert_eq!(reply.status, 401);
        assert_eq!(client.store().session_token().as_deref(), Some("rolled"));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .headers
            .contains(&(SESSION_TOKEN_HEADER.to_string(), "first".to_string())));
        assert!(sent[0]
            .headers
            .contains(&("Authorization".to_string(), "Bearer access".to_string())));
    }

    #[tokio::test]
    async fn test_no_headers_without_tokens() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Post, endpoints::PASSWORD_REQUEST, 200, json!({"status": 200}));
        let mut client = client(transport.clone());

        client.request_password_reset("ana@example.com").await.unwrap();
        assert!(transport.requests()[0].headers.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_raised_with_status() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Get, &endpoints::company_detail("ghost"), 404, json!({"detail": "Not found."}));
        let mut client = client(transport);

        let err = client.company_detail("ghost").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.body().unwrap().contains("Not found."));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_invalid_response() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::Get, &endpoints::company_detail("acme"), 200, json!({"unexpected": true}));
        let mut client = client(transport);

        let err = client.company_detail("acme").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh_tokens() {
        let transport = ScriptedTransport::new();
        transport.reply(
            Method::Post,
            endpoints::TOKEN_REFRESH,
            200,
            json!({"status": 200, "data": {"access_token": "a2", "refresh_token": "r2"}}),
        );
        let mut client = client(transport.clone());

        let tokens = client.refresh_tokens("r1").await.unwrap();
        assert_eq!(tokens.access_token, "a2");
        assert_eq!(transport.requests()[0].body, Some(json!({"refresh_token": "r1"})));
    }
}
