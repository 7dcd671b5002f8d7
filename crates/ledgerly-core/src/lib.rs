//! Ledgerly core - session, permission and navigation layer for the
//! Ledgerly accounting backend.
//!
//! The pieces fit together like this: an [`auth::AuthService`] owns the
//! configuration and a [`api::SessionClient`]; before every navigation the
//! [`guard::CompanySwitchGuard`] keeps the active company in step with the
//! URL, then the [`middleware::AuthorizationMiddleware`] decides whether the
//! navigation is allowed.

pub mod api;
pub mod auth;
pub mod config;
pub mod forms;
pub mod guard;
pub mod middleware;
pub mod models;
pub mod permissions;
pub mod redirect;
pub mod routing;

#[cfg(test)]
mod testing;

pub use api::{status_of, ApiClient, ApiError};
pub use auth::{AuthOutcome, AuthService, FileRepository, MemoryRepository, SessionRepository};
pub use config::{AuthConfig, ConfigError};
pub use forms::{submit_with_override, FormFeedback};
pub use guard::{CompanySwitchGuard, GuardOutcome};
pub use middleware::{AuthState, AuthorizationMiddleware, Decision};
pub use permissions::{PermissionEvaluator, PermissionKey};
pub use redirect::{Navigation, RedirectTarget};
pub use routing::Location;
