//! Fund balance aggregation across linked users.

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::State,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::{
    AppState, Error,
    auth::AuthContext,
    category::{FUND_ICON, get_fund_purposes},
    fund_group::get_linked_users,
    user::UserID,
};

/// The synthetic purpose shown when no fund purposes exist yet.
const DEFAULT_PURPOSE: &str = "Tiết kiệm";

/// One user's net balance for one fund purpose.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserBalance {
    /// The balance owner.
    pub user_id: UserID,
    /// Net contribution: income into the fund minus spending out of it.
    pub balance: f64,
}

/// One fund purpose's balances across a set of linked users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundSummaryRow {
    /// The fund purpose name.
    pub purpose: String,
    /// The purpose's display glyph.
    pub icon: String,
    /// Per-user net balances, ordered by user ID.
    pub balances: Vec<UserBalance>,
    /// The sum of the per-user balances.
    pub total: f64,
}

/// Summarise fund balances for `user_id` and everyone linked to them.
///
/// For each fund purpose and each linked user, the balance is the sum of
/// that user's `Thu` amounts tagged with the purpose minus their `Chi`
/// amounts tagged with it. A purpose is included only when its total is
/// positive or at least one user's balance is positive, so settled and
/// overdrawn purposes drop out. With no fund purposes defined at all, a
/// single default savings row with zero balances stands in.
pub fn fund_summary(user_id: UserID, connection: &Connection) -> Result<Vec<FundSummaryRow>, Error> {
    let linked_users = get_linked_users(user_id, connection)?;

    let mut purposes = get_fund_purposes(connection)?;
    let synthetic_default = purposes.is_empty();
    if synthetic_default {
        purposes.push((DEFAULT_PURPOSE.to_owned(), FUND_ICON.to_owned()));
    }

    // One grouped query covers every (purpose, user) cell.
    let placeholders = vec!["?"; linked_users.len()].join(", ");
    let query = format!(
        "SELECT fund_purpose, user_id,
            SUM(CASE WHEN type = 'Thu' THEN amount ELSE -amount END)
        FROM transactions
        WHERE fund_purpose IS NOT NULL AND fund_purpose != '' AND user_id IN ({placeholders})
        GROUP BY fund_purpose, user_id"
    );

    let mut statement = connection.prepare(&query)?;
    let balances: HashMap<(String, UserID), f64> = statement
        .query_map(
            rusqlite::params_from_iter(linked_users.iter().map(|user| user.as_i64())),
            |row| {
                let purpose: String = row.get(0)?;
                let user_id: i64 = row.get(1)?;
                let balance: f64 = row.get(2)?;
                Ok(((purpose, UserID::new(user_id)), balance))
            },
        )?
        .collect::<Result<_, _>>()?;

    let mut rows = Vec::with_capacity(purposes.len());

    for (purpose, icon) in purposes {
        let per_user: Vec<UserBalance> = linked_users
            .iter()
            .map(|&user_id| UserBalance {
                user_id,
                balance: balances
                    .get(&(purpose.clone(), user_id))
                    .copied()
                    .unwrap_or(0.0),
            })
            .collect();

        let total: f64 = per_user.iter().map(|entry| entry.balance).sum();

        if synthetic_default || total > 0.0 || per_user.iter().any(|entry| entry.balance > 0.0) {
            rows.push(FundSummaryRow {
                purpose,
                icon,
                balances: per_user,
                total,
            });
        }
    }

    Ok(rows)
}

/// The fund summary endpoint: balances per purpose for the caller's
/// linked users, with display names attached.
pub async fn get_fund_summary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();

    let linked_users = get_linked_users(auth.user_id, &connection)?;
    let rows = fund_summary(auth.user_id, &connection)?;

    let names: HashMap<UserID, (String, String)> = {
        let placeholders = vec!["?"; linked_users.len()].join(", ");
        let query = format!(
            "SELECT id, username, COALESCE(NULLIF(name, ''), username) FROM users
            WHERE id IN ({placeholders})"
        );
        connection
            .prepare(&query)?
            .query_map(
                rusqlite::params_from_iter(linked_users.iter().map(|user| user.as_i64())),
                |row| {
                    let id: i64 = row.get(0)?;
                    Ok((UserID::new(id), (row.get(1)?, row.get(2)?)))
                },
            )?
            .collect::<Result<_, _>>()?
    };

    let users: Vec<serde_json::Value> = linked_users
        .iter()
        .filter_map(|user_id| names.get(user_id).map(|(username, name)| (user_id, username, name)))
        .map(|(user_id, username, name)| {
            json!({ "user_id": user_id, "username": username, "name": name })
        })
        .collect();

    let summary: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            let balances: Vec<serde_json::Value> = row
                .balances
                .iter()
                .map(|entry| {
                    let (username, name) = names
                        .get(&entry.user_id)
                        .cloned()
                        .unwrap_or_else(|| (entry.user_id.to_string(), entry.user_id.to_string()));
                    json!({
                        "user_id": entry.user_id,
                        "username": username,
                        "name": name,
                        "balance": entry.balance,
                    })
                })
                .collect();

            json!({
                "purpose": row.purpose,
                "icon": row.icon,
                "balances": balances,
                "total": row.total,
            })
        })
        .collect();

    Ok(Json(json!({ "users": users, "summary": summary })).into_response())
}

#[cfg(test)]
mod fund_summary_tests {
    use rusqlite::Connection;

    use crate::{
        category::create_fund_purpose, db::initialize, user::UserID,
        user::test_utils::insert_test_user,
    };

    use super::{DEFAULT_PURPOSE, fund_summary};

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    fn insert_fund_transaction(
        connection: &Connection,
        user_id: UserID,
        transaction_type: &str,
        amount: f64,
        purpose: &str,
    ) {
        connection
            .execute(
                "INSERT INTO transactions (user_id, date, type, amount, note, fund_purpose)
                VALUES (?1, '2024-03-15', ?2, ?3, '', ?4)",
                (user_id.as_i64(), transaction_type, amount, purpose),
            )
            .unwrap();
    }

    #[test]
    fn balance_is_income_minus_spending() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        create_fund_purpose("Du lịch", "✈️", &connection).unwrap();

        insert_fund_transaction(&connection, alice, "Thu", 100.0, "Du lịch");
        insert_fund_transaction(&connection, alice, "Chi", 40.0, "Du lịch");

        let rows = fund_summary(alice, &connection).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].purpose, "Du lịch");
        assert_eq!(rows[0].balances.len(), 1);
        assert_eq!(rows[0].balances[0].balance, 60.0);
        assert_eq!(rows[0].total, 60.0);
    }

    #[test]
    fn settled_purposes_are_filtered_out() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        create_fund_purpose("Du lịch", "✈️", &connection).unwrap();
        create_fund_purpose("Nhà", "🏠", &connection).unwrap();

        insert_fund_transaction(&connection, alice, "Thu", 100.0, "Du lịch");
        insert_fund_transaction(&connection, alice, "Chi", 100.0, "Du lịch");
        insert_fund_transaction(&connection, alice, "Thu", 10.0, "Nhà");

        let rows = fund_summary(alice, &connection).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].purpose, "Nhà");
    }

    #[test]
    fn purpose_with_one_positive_user_is_included_despite_negative_total() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        let bob = insert_test_user("bob", "Bob", &connection);
        create_fund_purpose("Du lịch", "✈️", &connection).unwrap();

        connection
            .execute(
                "INSERT INTO fund_groups (name, created_by) VALUES ('Nhà', ?1)",
                (alice.as_i64(),),
            )
            .unwrap();
        let group_id = connection.last_insert_rowid();
        for member in [alice, bob] {
            connection
                .execute(
                    "INSERT INTO fund_group_members (group_id, user_id) VALUES (?1, ?2)",
                    (group_id, member.as_i64()),
                )
                .unwrap();
        }

        insert_fund_transaction(&connection, alice, "Thu", 20.0, "Du lịch");
        insert_fund_transaction(&connection, bob, "Chi", 50.0, "Du lịch");

        let rows = fund_summary(alice, &connection).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total, -30.0);
        assert_eq!(rows[0].balances.len(), 2);
    }

    #[test]
    fn no_purposes_yields_default_savings_row() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        let rows = fund_summary(alice, &connection).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].purpose, DEFAULT_PURPOSE);
        assert_eq!(rows[0].total, 0.0);
        assert_eq!(rows[0].balances[0].balance, 0.0);
    }
}
