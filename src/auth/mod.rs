//! User authentication: private cookie handling, the login/logout
//! endpoints, and the middleware that guards protected routes.

mod cookie;
mod log_in;
mod middleware;

pub(crate) use cookie::{DEFAULT_COOKIE_DURATION, invalidate_auth_cookie, set_auth_cookie};
pub(crate) use log_in::{get_log_out, post_log_in};
pub(crate) use middleware::{auth_guard, require_admin};

pub use middleware::AuthContext;
