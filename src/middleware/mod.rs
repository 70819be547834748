pub mod auth;
pub mod rate_limit;
pub mod sanitize;
pub mod validate;

pub use auth::AuthContext;
pub use rate_limit::RateLimiter;
pub use validate::{Field, Schema, ValidatedBody, ValidatedQuery};
