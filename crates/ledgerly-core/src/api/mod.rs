//! REST API access for the accounting backend.
//!
//! - `Transport`: the seam between session logic and HTTP
//! - `ApiClient`: reqwest transport with latest-wins cancellation
//! - `SessionClient`: attaches session headers and rolls the session token
//!
//! The backend authenticates with an access token plus a rotating session
//! token sent in the `X-Session-Token` header.

pub mod cancel;
pub mod client;
pub mod error;
pub mod payloads;
pub mod session_client;
pub mod transport;

pub use client::ApiClient;
pub use error::{status_of, ApiError};
pub use payloads::AuthEnvelope;
pub use session_client::{endpoints, SessionClient};
pub use transport::{ApiReply, ApiRequest, Method, Transport};
