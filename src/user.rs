//! User accounts: the model, database queries, admin user management
//! endpoints and the change-password endpoint.

use std::fmt::Display;

use axum::{Extension, Json, extract::{Path, State}, http::StatusCode, response::{IntoResponse, Response}};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{AppState, AuthContext, Error, PasswordHash};

/// A newtype wrapper for integer user IDs.
///
/// This helps disambiguate user IDs from other types of IDs, leading to better compile time
/// errors, and more flexible generics that can have distinct implementations for multiple ID types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
pub struct UserID(i64);

impl UserID {
    /// Create a new user ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Cast the user ID to a 64 bit integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for UserID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The role of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A regular user who can only manage their own transactions.
    User,
    /// An admin who can additionally manage users, fund groups and backups.
    Admin,
}

impl Role {
    /// The string stored in the `role` column for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Parse a role string from the database, defaulting to [Role::User]
    /// for unrecognised values.
    pub fn from_db(value: &str) -> Self {
        match value {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// A user of the application.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// The user's ID in the application database.
    pub id: UserID,
    /// The unique login name.
    pub username: String,
    /// The user's password hash.
    pub password_hash: PasswordHash,
    /// The display name shown in fund summaries and exports.
    pub name: String,
    /// Whether the user may manage other users and backups.
    pub role: Role,
    /// Deactivated accounts cannot log in.
    pub active: bool,
    /// Set on accounts fabricated with the default password during a
    /// workbook import.
    pub must_change_password: bool,
}

impl User {
    /// The display name, falling back to the username when no display
    /// name was set.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.username
        } else {
            &self.name
        }
    }
}

pub(crate) fn map_user_row(row: &Row) -> Result<User, rusqlite::Error> {
    let raw_password: String = row.get(2)?;
    let name: Option<String> = row.get(3)?;
    let role: String = row.get(4)?;

    Ok(User {
        id: UserID::new(row.get(0)?),
        username: row.get(1)?,
        password_hash: PasswordHash::new_unchecked(&raw_password),
        name: name.unwrap_or_default(),
        role: Role::from_db(&role),
        active: row.get(5)?,
        must_change_password: row.get(6)?,
    })
}

const USER_COLUMNS: &str = "id, username, password, name, role, active, must_change_password";

/// Get the user from the database with an ID equal to `user_id`.
///
/// # Errors
/// Returns [Error::NotFound] if `user_id` does not belong to a
/// registered user.
pub fn get_user_by_id(user_id: UserID, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?
        .query_row((user_id.as_i64(),), map_user_row)
        .map_err(|error| error.into())
}

/// Get the user with the login name `username`.
///
/// # Errors
/// Returns [Error::NotFound] if no user has that username.
pub fn get_user_by_username(username: &str, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"))?
        .query_row((username,), map_user_row)
        .map_err(|error| error.into())
}

/// Fields for inserting a new user row.
pub struct NewUser<'a> {
    /// The unique login name.
    pub username: &'a str,
    /// The bcrypt hash of the initial password.
    pub password_hash: &'a PasswordHash,
    /// The display name.
    pub name: &'a str,
    /// The account role.
    pub role: Role,
    /// Whether the account can log in.
    pub active: bool,
    /// Whether the account must change its password on first login.
    pub must_change_password: bool,
}

/// Insert a new user and return its ID.
///
/// # Errors
/// Returns [Error::AlreadyExists] if the username is taken.
pub fn insert_user(new_user: &NewUser, connection: &Connection) -> Result<UserID, Error> {
    connection.execute(
        "INSERT INTO users (username, password, name, role, active, must_change_password)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (
            new_user.username,
            new_user.password_hash.as_ref(),
            new_user.name,
            new_user.role.as_str(),
            new_user.active,
            new_user.must_change_password,
        ),
    )?;

    Ok(UserID::new(connection.last_insert_rowid()))
}

/// Replace a user's password hash and clear any forced-change flag.
pub fn update_password_hash(
    user_id: UserID,
    password_hash: &PasswordHash,
    connection: &Connection,
) -> Result<(), Error> {
    let changed = connection.execute(
        "UPDATE users SET password = ?1, must_change_password = 0 WHERE id = ?2",
        (password_hash.as_ref(), user_id.as_i64()),
    )?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

// ============================================================================
// ENDPOINTS
// ============================================================================

#[derive(Serialize)]
struct UserSummary {
    id: i64,
    username: String,
    name: String,
    role: Role,
    active: bool,
}

/// List all users (admin only).
pub async fn get_users(State(state): State<AppState>) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let users = connection
        .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?
        .query_map([], map_user_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let users: Vec<UserSummary> = users
        .into_iter()
        .map(|user| UserSummary {
            id: user.id.as_i64(),
            username: user.username.clone(),
            name: user.display_name().to_owned(),
            role: user.role,
            active: user.active,
        })
        .collect();

    Ok(Json(json!({ "users": users })).into_response())
}

/// The request body for creating or updating a user.
#[derive(Debug, Deserialize)]
pub struct UserForm {
    /// The login name.
    pub username: String,
    /// The raw password. Optional on update; required on create.
    #[serde(default)]
    pub password: String,
    /// The display name, defaulting to the username.
    #[serde(default)]
    pub name: String,
    /// The role, defaulting to `user`.
    #[serde(default)]
    pub role: Option<Role>,
    /// Whether the account is active, defaulting to true.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Create a new user (admin only).
pub async fn create_user(
    State(state): State<AppState>,
    Json(form): Json<UserForm>,
) -> Result<Response, Error> {
    let username = form.username.trim();
    let password = form.password.trim();

    if username.is_empty() || password.is_empty() {
        return Err(Error::Validation(
            "username and password must not be empty".to_owned(),
        ));
    }

    let connection = state.db_connection.lock().unwrap();

    if get_user_by_username(username, &connection).is_ok() {
        return Err(Error::AlreadyExists(format!("the username \"{username}\"")));
    }

    let password_hash = PasswordHash::from_raw_password(password, PasswordHash::DEFAULT_COST)?;
    let name = if form.name.trim().is_empty() {
        username
    } else {
        form.name.trim()
    };

    insert_user(
        &NewUser {
            username,
            password_hash: &password_hash,
            name,
            role: form.role.unwrap_or(Role::User),
            active: form.active,
            must_change_password: false,
        },
        &connection,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": format!("created account \"{username}\"") })),
    )
        .into_response())
}

/// Update a user by username (admin only).
///
/// An empty password leaves the stored hash unchanged.
pub async fn update_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(form): Json<UserForm>,
) -> Result<Response, Error> {
    let new_username = form.username.trim();

    if new_username.is_empty() {
        return Err(Error::Validation("username must not be empty".to_owned()));
    }

    let connection = state.db_connection.lock().unwrap();
    let user = get_user_by_username(&username, &connection)?;

    if new_username != username && get_user_by_username(new_username, &connection).is_ok() {
        return Err(Error::AlreadyExists(format!(
            "the username \"{new_username}\""
        )));
    }

    let name = if form.name.trim().is_empty() {
        new_username
    } else {
        form.name.trim()
    };
    let role = form.role.unwrap_or(user.role);

    if form.password.trim().is_empty() {
        connection.execute(
            "UPDATE users SET username = ?1, name = ?2, role = ?3, active = ?4 WHERE id = ?5",
            (new_username, name, role.as_str(), form.active, user.id.as_i64()),
        )?;
    } else {
        let password_hash =
            PasswordHash::from_raw_password(form.password.trim(), PasswordHash::DEFAULT_COST)?;
        connection.execute(
            "UPDATE users SET username = ?1, password = ?2, name = ?3, role = ?4, active = ?5,
            must_change_password = 0 WHERE id = ?6",
            (
                new_username,
                password_hash.as_ref(),
                name,
                role.as_str(),
                form.active,
                user.id.as_i64(),
            ),
        )?;
    }

    Ok(Json(json!({ "success": true, "message": "account updated" })).into_response())
}

/// Delete a user by username (admin only).
///
/// The user's transactions and group memberships are removed by the
/// schema's cascade rules. Admins cannot delete their own account.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<Response, Error> {
    if auth.username == username {
        return Err(Error::Validation(
            "you cannot delete your own account".to_owned(),
        ));
    }

    let connection = state.db_connection.lock().unwrap();
    let user = get_user_by_username(&username, &connection)?;

    connection.execute("DELETE FROM users WHERE id = ?1", (user.id.as_i64(),))?;

    Ok(Json(json!({ "success": true, "message": "account deleted" })).into_response())
}

/// The request body for changing the calling user's password.
#[derive(Debug, Deserialize)]
pub struct ChangePasswordForm {
    /// The user's current password.
    pub current_password: String,
    /// The desired new password.
    pub new_password: String,
    /// Confirmation of the desired new password.
    pub confirm_password: String,
}

/// Change the calling user's password after verifying the current one.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(form): Json<ChangePasswordForm>,
) -> Result<Response, Error> {
    if form.current_password.is_empty() || form.new_password.is_empty() {
        return Err(Error::Validation(
            "current and new password must not be empty".to_owned(),
        ));
    }

    if form.new_password != form.confirm_password {
        return Err(Error::Validation(
            "new password and confirmation do not match".to_owned(),
        ));
    }

    let connection = state.db_connection.lock().unwrap();
    let user = get_user_by_id(auth.user_id, &connection)?;

    if !user.password_hash.verify(&form.current_password)? {
        return Err(Error::Validation("current password is incorrect".to_owned()));
    }

    let password_hash =
        PasswordHash::from_raw_password(&form.new_password, PasswordHash::DEFAULT_COST)?;
    update_password_hash(user.id, &password_hash, &connection)?;

    Ok(Json(json!({ "success": true, "message": "password changed" })).into_response())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use rusqlite::Connection;

    use crate::PasswordHash;

    use super::{NewUser, Role, UserID, insert_user};

    /// Insert a user with a pre-hashed password to keep tests fast.
    pub(crate) fn insert_test_user(username: &str, name: &str, connection: &Connection) -> UserID {
        let password_hash = PasswordHash::new_unchecked("$2b$04$test");

        insert_user(
            &NewUser {
                username,
                password_hash: &password_hash,
                name,
                role: Role::User,
                active: true,
                must_change_password: false,
            },
            connection,
        )
        .unwrap()
    }
}
