//! Authentication middleware that validates cookies and makes the
//! caller's identity available to route handlers.

use axum::{
    Extension,
    extract::{FromRequestParts, Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::PrivateCookieJar;

use crate::{
    AppState, Error,
    auth::cookie::get_user_id_from_cookies,
    user::{Role, UserID, get_user_by_id},
};

/// The identity of the authenticated caller, inserted into the request
/// by [auth_guard].
///
/// Core operations receive this explicitly rather than reading ambient
/// session state, so ownership checks are always against a known caller.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The caller's user ID.
    pub user_id: UserID,
    /// The caller's login name.
    pub username: String,
    /// The caller's display name.
    pub name: String,
    /// The caller's role.
    pub role: Role,
}

/// Middleware function that checks for a valid authorization cookie.
///
/// If the cookie is valid and the account is active, an [AuthContext]
/// is placed into the request extensions and the request proceeds.
/// Handlers receive it with `Extension(auth): Extension<AuthContext>`.
///
/// The auth cookie's expiry is refreshed on every authenticated request.
pub(crate) async fn auth_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let jar = match PrivateCookieJar::from_request_parts(&mut parts, &state).await {
        Ok(jar) => jar,
        Err(error) => {
            tracing::error!("Error getting cookie jar: {error:?}");
            return Error::InvalidCredentials.into_response();
        }
    };

    let user_id = match get_user_id_from_cookies(&jar) {
        Ok(user_id) => user_id,
        Err(error) => return error.into_response(),
    };

    let auth_context = {
        let connection = state.db_connection.lock().unwrap();
        match get_user_by_id(user_id, &connection) {
            Ok(user) if user.active => AuthContext {
                user_id: user.id,
                username: user.username.clone(),
                name: user.display_name().to_owned(),
                role: user.role,
            },
            Ok(_) => return Error::AccountDisabled.into_response(),
            Err(_) => return Error::InvalidCredentials.into_response(),
        }
    };

    parts.extensions.insert(auth_context);
    let request = Request::from_parts(parts, body);
    let response = next.run(request).await;

    // Refresh the cookie expiry so active sessions stay logged in.
    let jar = match super::set_auth_cookie(jar, user_id, state.cookie_duration) {
        Ok(updated_jar) => updated_jar,
        Err(error) => {
            tracing::error!("Error refreshing auth cookie: {error}");
            return response;
        }
    };

    let (mut parts, body) = response.into_parts();
    for (key, value) in jar.into_response().headers() {
        if key == SET_COOKIE {
            parts.headers.append(key, value.to_owned());
        }
    }

    Response::from_parts(parts, body)
}

/// Middleware that rejects non-admin callers.
///
/// Must be layered inside [auth_guard] so the [AuthContext] extension is
/// already present.
pub(crate) async fn require_admin(
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Response {
    if auth.role != Role::Admin {
        return Error::Forbidden.into_response();
    }

    next.run(request).await
}
