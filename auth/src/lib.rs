//! # Dentalbook Authentication & Authorization
//!
//! Shared by all three services:
//!
//! - **Roles and principals**: [`Role`], [`AuthenticatedUser`]
//! - **Tokens**: HS256 bearer tokens with issuer/audience checks ([`JwtService`])
//! - **Passwords**: bcrypt hashing ([`PasswordHasher`])
//! - **Validation seam**: [`TokenValidator`], implemented by identity over its
//!   accounts and by [`RemoteTokenValidator`] everywhere else
//!
//! ## Example
//!
//! ```rust
//! use dentalbook_auth::{AuthConfig, AuthenticatedUser, JwtService, Role};
//!
//! let jwt = JwtService::new(&AuthConfig::for_tests());
//! let user = AuthenticatedUser {
//!     id: 1,
//!     email: "admin@example.com".to_string(),
//!     role: Role::Admin,
//!     name: "Admin".to_string(),
//!     surname: "Clinic".to_string(),
//! };
//! let token = jwt.issue(&user, chrono::Utc::now()).unwrap();
//! assert_eq!(jwt.verify(&token).unwrap().role, Role::Admin);
//! ```

pub mod config;
pub mod error;
pub mod jwt;
pub mod password;
pub mod principal;
pub mod validator;

pub use config::{AuthConfig, INTERNAL_SERVICE_HEADER};
pub use error::{AuthError, Result};
pub use jwt::{Claims, JwtService, bearer_token};
pub use password::PasswordHasher;
pub use principal::{AuthenticatedUser, Role, TokenValidation, UnknownRole};
pub use validator::{RemoteTokenValidator, TokenValidator};
