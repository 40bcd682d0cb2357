//! The login and logout endpoints.

use axum::{Json, extract::State, response::{IntoResponse, Response}};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState, Error,
    auth::{invalidate_auth_cookie, set_auth_cookie},
    user::get_user_by_username,
};

/// The request body for logging in.
#[derive(Debug, Deserialize)]
pub(crate) struct LogInForm {
    username: String,
    password: String,
}

/// Verify a username and password and set the auth cookies.
///
/// The response reports whether the account still has the default
/// password from a workbook import and must change it.
pub(crate) async fn post_log_in(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(form): Json<LogInForm>,
) -> Result<Response, Error> {
    let user = {
        let connection = state.db_connection.lock().unwrap();
        get_user_by_username(form.username.trim(), &connection)
            .map_err(|_| Error::InvalidCredentials)?
    };

    if !user.password_hash.verify(&form.password)? {
        return Err(Error::InvalidCredentials);
    }

    if !user.active {
        return Err(Error::AccountDisabled);
    }

    let jar = set_auth_cookie(jar, user.id, state.cookie_duration).map_err(|error| {
        tracing::error!("Could not format auth cookie expiry: {error}");
        Error::Validation("could not create session".to_owned())
    })?;

    tracing::info!("User {} logged in", user.username);

    let display_name = user.display_name().to_owned();

    Ok((
        jar,
        Json(json!({
            "success": true,
            "user": {
                "username": user.username,
                "name": display_name,
                "role": user.role,
            },
            "must_change_password": user.must_change_password,
        })),
    )
        .into_response())
}

/// Clear the auth cookies.
pub(crate) async fn get_log_out(jar: PrivateCookieJar) -> Response {
    let jar = invalidate_auth_cookie(jar);

    (jar, Json(json!({ "success": true }))).into_response()
}
