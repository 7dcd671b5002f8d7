//! Data models exchanged with the accounting backend.
//!
//! - `User`, `AccessLevel`: the signed-in user and their company-scoped grants
//! - `Company`: the active tenant

pub mod company;
pub mod user;

pub use company::Company;
pub use user::{AccessLevel, CompanyGrants, PermissionMap, User};
