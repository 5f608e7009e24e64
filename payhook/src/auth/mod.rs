//! Administrator authentication.
//!
//! Administrators are provisioned outside this service; it only verifies the session JWTs they
//! present. A token is accepted from either place:
//!
//! - `Authorization: Bearer <jwt>` header
//! - The session cookie named by `auth.cookie_name`
//!
//! Tokens are HS256 JWTs signed with `secret_key`, carrying `sub`, `email`, `role`, `exp` and
//! `iat`. Only the `admin` role may use the admin endpoints; any other valid role gets `403`.
//!
//! # Modules
//!
//! - [`current_user`]: Extractor for the authenticated administrator in handlers
//! - [`session`]: JWT creation and verification
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use payhook::api::models::users::CurrentUser;
//!
//! async fn protected_handler(current_user: CurrentUser) -> Result<String, Error> {
//!     let admin = current_user.require_admin()?;
//!     Ok(format!("Hello, {}!", admin.email))
//! }
//! ```

pub mod current_user;
pub mod session;
