//! Fundbook is a web app for tracking shared household income, expenses
//! and savings funds.
//!
//! This library provides a JSON REST API over a SQLite database. Users
//! record dated `Thu` (income) and `Chi` (expense) transactions against
//! categories, optionally tagged with a fund purpose. Fund balances are
//! pooled across the members of fund groups, and the whole database can
//! be exported to and restored from a portable workbook file.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod app_state;
mod auth;
pub mod backup;
pub mod category;
pub mod db;
pub mod endpoints;
pub mod fund;
pub mod fund_group;
mod password;
pub mod report;
mod routing;
pub mod transaction;
pub mod user;
pub mod workbook;

pub use app_state::AppState;
pub use auth::AuthContext;
pub use db::initialize as initialize_db;
pub use password::PasswordHash;
pub use routing::build_router;
pub use user::{Role, User, UserID};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The user provided an invalid username and password combination,
    /// or no valid auth cookie was present on a protected route.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account exists but has been deactivated by an admin.
    #[error("this account has been deactivated")]
    AccountDisabled,

    /// The caller is authenticated but lacks the role required for the
    /// operation.
    #[error("you do not have permission to perform this action")]
    Forbidden,

    /// A required field was missing or malformed.
    ///
    /// The string is a message that is safe to show to the client.
    #[error("{0}")]
    Validation(String),

    /// The requested resource was not found, or is not owned by the
    /// caller.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// A uniqueness constraint was violated, e.g. a duplicate username
    /// or category name.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the
    /// server, not shown to the client.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// The uploaded workbook file could not be parsed.
    #[error("could not parse the workbook file: {0}")]
    InvalidWorkbook(String),

    /// The multipart form could not be read as an uploaded file.
    #[error("could not parse multipart form: {0}")]
    MultipartError(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 =>
            {
                let field = desc
                    .rsplit_once(':')
                    .map(|(_, columns)| columns.trim())
                    .unwrap_or("record")
                    .to_owned();
                Error::AlreadyExists(field)
            }
            // Code 787 occurs when a FOREIGN KEY constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(_)) if sql_error.extended_code == 787 => {
                Error::Validation("a referenced record does not exist".to_owned())
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status_code, message) = match &self {
            Error::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            Error::AccountDisabled | Error::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            Error::Validation(_) | Error::InvalidWorkbook(_) | Error::MultipartError(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Error::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            Error::AlreadyExists(_) => (StatusCode::CONFLICT, self.to_string()),
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "an unexpected error occurred, check the server logs for more details"
                        .to_owned(),
                )
            }
        };

        (status_code, Json(json!({ "error": message }))).into_response()
    }
}
