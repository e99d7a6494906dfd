//! Authentication module for Barterly
//!
//! Stands in for the hosted auth provider:
//! - Email/password accounts with bcrypt hashes
//! - JWT token generation and validation
//! - Session management with rotating refresh tokens

mod jwt;
mod password;
mod service;

pub use jwt::{generate_access_token, generate_refresh_token, verify_token, Claims, JwtError};
pub use password::{hash_password, hash_token, verify_password};
pub use service::{AuthError, AuthService};
