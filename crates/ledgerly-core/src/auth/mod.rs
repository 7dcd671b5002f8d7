//! Session state and authentication flows.
//!
//! This module provides:
//! - `SessionRepository`: key/value persistence (`MemoryRepository`, `FileRepository`)
//! - `SessionStore`: typed access to tokens, user, company and grants
//! - `AuthService`: login/logout/signup/provider flows and company switching
//! - `CredentialStore`: remembered passwords in the OS keychain

pub mod credentials;
pub mod repository;
pub mod service;
pub mod session;

pub use credentials::CredentialStore;
pub use repository::{FileRepository, MemoryRepository, SessionRepository};
pub use service::{AuthOutcome, AuthService, LoginRequest, SignupRequest};
pub use session::{Session, SessionStore, StoreKey};
