//! Authentication for AutoScape
//!
//! Provides:
//! - JWT token validation for principals minted by the identity provider
//! - The Principal type (authenticated user or anonymous sentinel)
//!
//! Login, registration, and password handling live in the external identity
//! provider; this module only reads tokens.

pub mod jwt;
pub mod principal;

pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenValidationResult};
pub use principal::{Principal, ANONYMOUS_OWNER};
