//! Fund groups: named sets of users whose fund balances are pooled.
//!
//! Membership determines a user's *linked users*, the set of people
//! whose fund transactions are visible together in summaries and
//! dashboards.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState, Error,
    auth::AuthContext,
    db::DatabaseID,
    user::{UserID, get_user_by_username},
};

/// The users linked to `user_id` through shared fund group membership.
///
/// This is the reflexive union of co-members across every group the user
/// belongs to. It is deliberately not transitive: if A shares a group
/// with B, and B shares a different group with C, then A and C are not
/// linked. A user with no memberships is linked only to themselves.
pub fn get_linked_users(
    user_id: UserID,
    connection: &Connection,
) -> Result<Vec<UserID>, Error> {
    let mut linked: Vec<UserID> = connection
        .prepare(
            "SELECT DISTINCT other.user_id FROM fund_group_members AS own
            INNER JOIN fund_group_members AS other ON own.group_id = other.group_id
            WHERE own.user_id = ?1",
        )?
        .query_map((user_id.as_i64(),), |row| row.get(0).map(UserID::new))?
        .collect::<Result<_, _>>()?;

    if !linked.contains(&user_id) {
        linked.push(user_id);
    }

    linked.sort();
    Ok(linked)
}

fn group_to_json(
    group_id: DatabaseID,
    name: &str,
    created_by: Option<UserID>,
    created_by_username: &str,
    viewer: Option<UserID>,
    connection: &Connection,
) -> Result<serde_json::Value, Error> {
    let members = connection
        .prepare(
            "SELECT u.id, u.username, u.name FROM fund_group_members AS m
            INNER JOIN users AS u ON u.id = m.user_id
            WHERE m.group_id = ?1 ORDER BY u.id",
        )?
        .query_map((group_id,), |row| {
            let id: i64 = row.get(0)?;
            let username: String = row.get(1)?;
            let name: Option<String> = row.get(2)?;
            Ok(json!({
                "user_id": id,
                "username": username,
                "name": name.filter(|name| !name.is_empty()).unwrap_or_else(|| username.clone()),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "id": group_id,
        "name": name,
        "created_by": created_by_username,
        "is_owner": viewer.is_some() && viewer == created_by,
        "member_count": members.len(),
        "members": members,
    }))
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// The request body for creating or renaming a fund group.
#[derive(Debug, Deserialize)]
pub struct FundGroupForm {
    /// The group name.
    pub name: String,
    /// Usernames to add as members alongside the creator.
    #[serde(default)]
    pub member_usernames: Vec<String>,
}

/// List the fund groups the caller belongs to, with their members.
pub async fn get_fund_groups(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();

    let groups = connection
        .prepare(
            "SELECT g.id, g.name, g.created_by, COALESCE(u.username, '') FROM fund_groups AS g
            LEFT JOIN users AS u ON u.id = g.created_by
            INNER JOIN fund_group_members AS m ON m.group_id = g.id
            WHERE m.user_id = ?1 ORDER BY g.id DESC",
        )?
        .query_map((auth.user_id.as_i64(),), |row| {
            Ok((
                row.get::<_, DatabaseID>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let groups = groups
        .into_iter()
        .map(|(id, name, created_by, creator)| {
            group_to_json(
                id,
                &name,
                created_by.map(UserID::new),
                &creator,
                Some(auth.user_id),
                &connection,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(json!({ "groups": groups })).into_response())
}

/// List every fund group. Admin only.
pub async fn get_all_fund_groups(State(state): State<AppState>) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();

    let groups = connection
        .prepare(
            "SELECT g.id, g.name, g.created_by, COALESCE(u.username, '') FROM fund_groups AS g
            LEFT JOIN users AS u ON u.id = g.created_by
            ORDER BY g.id DESC",
        )?
        .query_map([], |row| {
            Ok((
                row.get::<_, DatabaseID>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let groups = groups
        .into_iter()
        .map(|(id, name, created_by, creator)| {
            group_to_json(id, &name, created_by.map(UserID::new), &creator, None, &connection)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(json!({ "groups": groups })).into_response())
}

/// Create a fund group with the caller as creator and first member.
/// Admin only.
pub async fn create_fund_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(form): Json<FundGroupForm>,
) -> Result<Response, Error> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(Error::Validation("group name must not be empty".to_owned()));
    }

    let connection = state.db_connection.lock().unwrap();

    connection.execute(
        "INSERT INTO fund_groups (name, created_by, created_at) VALUES (?1, ?2, datetime('now'))",
        (name, auth.user_id.as_i64()),
    )?;
    let group_id = connection.last_insert_rowid();

    connection.execute(
        "INSERT INTO fund_group_members (group_id, user_id, joined_at)
            VALUES (?1, ?2, datetime('now'))",
        (group_id, auth.user_id.as_i64()),
    )?;

    for username in &form.member_usernames {
        // Unknown usernames are skipped rather than failing a creation
        // that has already inserted the group row.
        let member = match get_user_by_username(username.trim(), &connection) {
            Ok(member) => member,
            Err(Error::NotFound) => continue,
            Err(error) => return Err(error),
        };

        let result = connection.execute(
            "INSERT INTO fund_group_members (group_id, user_id, joined_at)
            VALUES (?1, ?2, datetime('now'))",
            (group_id, member.id.as_i64()),
        );

        // The creator may appear in the member list as well.
        match result.map_err(Error::from) {
            Ok(_) | Err(Error::AlreadyExists(_)) => {}
            Err(error) => return Err(error),
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "group_id": group_id })),
    )
        .into_response())
}

/// Rename a fund group. Admin only.
pub async fn update_fund_group(
    State(state): State<AppState>,
    Path(group_id): Path<DatabaseID>,
    Json(form): Json<FundGroupForm>,
) -> Result<Response, Error> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(Error::Validation("group name must not be empty".to_owned()));
    }

    let connection = state.db_connection.lock().unwrap();

    let changed = connection.execute(
        "UPDATE fund_groups SET name = ?1 WHERE id = ?2",
        (name, group_id),
    )?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(Json(json!({ "success": true, "message": "group renamed" })).into_response())
}

/// Delete a fund group and its memberships. Admin only.
pub async fn delete_fund_group(
    State(state): State<AppState>,
    Path(group_id): Path<DatabaseID>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();

    // Memberships go with the group via ON DELETE CASCADE.
    let changed = connection.execute("DELETE FROM fund_groups WHERE id = ?1", (group_id,))?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(Json(json!({ "success": true, "message": "group deleted" })).into_response())
}

/// The request body for adding a group member.
#[derive(Debug, Deserialize)]
pub struct AddMemberForm {
    /// The username of the user to add.
    pub username: String,
}

/// Add a user to a fund group. Admin only.
pub async fn add_fund_group_member(
    State(state): State<AppState>,
    Path(group_id): Path<DatabaseID>,
    Json(form): Json<AddMemberForm>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();

    let group_exists: bool = connection
        .prepare("SELECT EXISTS (SELECT 1 FROM fund_groups WHERE id = ?1)")?
        .query_row((group_id,), |row| row.get(0))?;
    if !group_exists {
        return Err(Error::NotFound);
    }

    let member = get_user_by_username(form.username.trim(), &connection)?;

    connection
        .execute(
            "INSERT INTO fund_group_members (group_id, user_id, joined_at)
            VALUES (?1, ?2, datetime('now'))",
            (group_id, member.id.as_i64()),
        )
        .map_err(|error| match Error::from(error) {
            Error::AlreadyExists(_) => {
                Error::AlreadyExists(format!("\"{}\" in this group", member.username))
            }
            error => error,
        })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "member added" })),
    )
        .into_response())
}

/// Remove a user from a fund group. Admin only.
pub async fn remove_fund_group_member(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(DatabaseID, i64)>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();

    let changed = connection.execute(
        "DELETE FROM fund_group_members WHERE group_id = ?1 AND user_id = ?2",
        (group_id, user_id),
    )?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(Json(json!({ "success": true, "message": "member removed" })).into_response())
}

#[cfg(test)]
mod linked_users_tests {
    use rusqlite::Connection;

    use crate::{db::initialize, user::test_utils::insert_test_user};

    use super::get_linked_users;

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    fn create_group(connection: &Connection, name: &str, creator: i64, members: &[i64]) {
        connection
            .execute(
                "INSERT INTO fund_groups (name, created_by) VALUES (?1, ?2)",
                (name, creator),
            )
            .unwrap();
        let group_id = connection.last_insert_rowid();

        for member in members {
            connection
                .execute(
                    "INSERT INTO fund_group_members (group_id, user_id, joined_at)
            VALUES (?1, ?2, datetime('now'))",
                    (group_id, member),
                )
                .unwrap();
        }
    }

    #[test]
    fn linked_users_is_reflexive_union_of_co_members() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        let bob = insert_test_user("bob", "Bob", &connection);
        let carol = insert_test_user("carol", "Carol", &connection);

        create_group(&connection, "Nhà", alice.as_i64(), &[alice.as_i64(), bob.as_i64()]);
        create_group(&connection, "Du lịch", bob.as_i64(), &[bob.as_i64(), carol.as_i64()]);

        let linked = get_linked_users(alice, &connection).unwrap();

        assert_eq!(linked, vec![alice, bob]);
    }

    #[test]
    fn linked_users_is_not_transitive() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        let bob = insert_test_user("bob", "Bob", &connection);
        let carol = insert_test_user("carol", "Carol", &connection);

        create_group(&connection, "Nhà", alice.as_i64(), &[alice.as_i64(), bob.as_i64()]);
        create_group(&connection, "Du lịch", bob.as_i64(), &[bob.as_i64(), carol.as_i64()]);

        let linked = get_linked_users(bob, &connection).unwrap();

        // Bob sees both groups' members, but Alice never sees Carol.
        assert_eq!(linked, vec![alice, bob, carol]);
        assert!(!get_linked_users(alice, &connection).unwrap().contains(&carol));
    }

    #[test]
    fn user_with_no_groups_is_linked_to_themselves_only() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        let linked = get_linked_users(alice, &connection).unwrap();

        assert_eq!(linked, vec![alice]);
    }

    #[test]
    fn membership_in_multiple_groups_is_deduplicated() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        let bob = insert_test_user("bob", "Bob", &connection);

        create_group(&connection, "Nhà", alice.as_i64(), &[alice.as_i64(), bob.as_i64()]);
        create_group(&connection, "Chợ", alice.as_i64(), &[alice.as_i64(), bob.as_i64()]);

        let linked = get_linked_users(alice, &connection).unwrap();

        assert_eq!(linked, vec![alice, bob]);
    }
}
