//! Primary Session Authentication
//!
//! Validates the bearer JWT issued by the account service. Issuing tokens for
//! real-time connections happens in [`crate::transport::token`].

mod error;
pub mod jwt;
mod middleware;

pub use error::{AuthError, AuthResult};
pub use middleware::{require_auth, AuthUser};
