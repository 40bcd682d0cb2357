//! The reporting engine: fixed-bucket yearly/monthly/daily reports,
//! the category breakdown, and the dashboard summary.

use axum::{
    Extension, Json,
    extract::State,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use time::{Date, OffsetDateTime};

use crate::{
    AppState, Error,
    auth::AuthContext,
    category::{FUND_CONTRIBUTION_CATEGORY, FUND_WITHDRAWAL_CATEGORY},
    fund_group::get_linked_users,
    user::UserID,
};

/// One fixed report bucket: a year, a month, or a day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportBucket {
    /// The bucket label: `"2024"`, `"3"`, or `"15"`.
    pub label: String,
    /// Total income in the bucket.
    pub thu: f64,
    /// Total expense in the bucket.
    pub chi: f64,
    /// Total fund-tagged amount in the bucket, regardless of type.
    pub fund: f64,
}

/// The current-month dashboard summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    /// Personal income this month, excluding fund contributions.
    pub total_income: f64,
    /// Personal expense this month, including fund contributions and
    /// excluding fund withdrawals.
    pub total_expense: f64,
    /// Income minus expense.
    pub balance: f64,
    /// All-time pooled fund balance across the caller's linked users.
    pub total_fund: f64,
}

fn bucket_totals(
    user_id: UserID,
    bucket_expression: &str,
    date_filter: &str,
    date_filter_value: &str,
    connection: &Connection,
) -> Result<Vec<(String, f64, f64, f64)>, Error> {
    let query = format!(
        "SELECT {bucket_expression},
            SUM(CASE WHEN type = 'Thu' THEN amount ELSE 0 END),
            SUM(CASE WHEN type = 'Chi' THEN amount ELSE 0 END),
            SUM(CASE WHEN fund_purpose IS NOT NULL AND fund_purpose != '' THEN amount ELSE 0 END)
        FROM transactions
        WHERE user_id = ?1 AND {date_filter}
        GROUP BY {bucket_expression}"
    );

    connection
        .prepare(&query)?
        .query_map((user_id.as_i64(), date_filter_value), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .map(|row| row.map_err(|error| error.into()))
        .collect()
}

fn zero_fill(
    labels: impl Iterator<Item = String>,
    totals: Vec<(String, f64, f64, f64)>,
) -> Vec<ReportBucket> {
    labels
        .map(|label| {
            let found = totals.iter().find(|(bucket, ..)| *bucket == label);
            match found {
                Some((_, thu, chi, fund)) => ReportBucket {
                    label,
                    thu: *thu,
                    chi: *chi,
                    fund: *fund,
                },
                None => ReportBucket {
                    label,
                    thu: 0.0,
                    chi: 0.0,
                    fund: 0.0,
                },
            }
        })
        .collect()
}

/// The number of year buckets in the yearly report.
const YEARLY_REPORT_SPAN: i32 = 5;

/// One bucket per year for the last five years, ending at `today`'s.
pub fn yearly_report(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<Vec<ReportBucket>, Error> {
    let first_year = today.year() - (YEARLY_REPORT_SPAN - 1);

    let totals = bucket_totals(
        user_id,
        "CAST(strftime('%Y', date) AS TEXT)",
        "strftime('%Y', date) >= ?2",
        &format!("{first_year:04}"),
        connection,
    )?;

    Ok(zero_fill(
        (first_year..=today.year()).map(|year| format!("{year:04}")),
        totals,
    ))
}

/// One bucket per month, 1 through 12, of `today`'s year.
pub fn monthly_report(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<Vec<ReportBucket>, Error> {
    let totals = bucket_totals(
        user_id,
        "CAST(CAST(strftime('%m', date) AS INTEGER) AS TEXT)",
        "strftime('%Y', date) = ?2",
        &format!("{:04}", today.year()),
        connection,
    )?;

    Ok(zero_fill((1..=12).map(|month| month.to_string()), totals))
}

/// One bucket per day of `today`'s month.
pub fn daily_report(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<Vec<ReportBucket>, Error> {
    let totals = bucket_totals(
        user_id,
        "CAST(CAST(strftime('%d', date) AS INTEGER) AS TEXT)",
        "strftime('%Y-%m', date) = ?2",
        &format!("{:04}-{:02}", today.year(), u8::from(today.month())),
        connection,
    )?;

    let day_count = time::util::days_in_month(today.month(), today.year());

    Ok(zero_fill((1..=day_count).map(|day| day.to_string()), totals))
}

/// Current-month expenses grouped by category, largest first.
pub fn category_breakdown(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<Vec<(String, String, f64)>, Error> {
    let month_prefix = format!("{:04}-{:02}", today.year(), u8::from(today.month()));

    connection
        .prepare(
            "SELECT COALESCE(c.name, ''), COALESCE(c.icon, ''), SUM(t.amount) AS total
            FROM transactions AS t
            LEFT JOIN categories AS c ON c.id = t.category_id
            WHERE t.user_id = ?1 AND t.type = 'Chi' AND strftime('%Y-%m', t.date) = ?2
            GROUP BY c.name, c.icon
            ORDER BY total DESC",
        )?
        .query_map((user_id.as_i64(), &month_prefix), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .map(|row| row.map_err(|error| error.into()))
        .collect()
}

/// The dashboard summary for `today`'s month.
///
/// Fund contributions (`Thu` in the fund contribution category) count
/// as personal expense, and fund withdrawals (`Chi` in the fund
/// withdrawal category) count toward neither side, matching the
/// calendar view. The pooled fund total spans all time and every user
/// linked to the caller.
pub fn dashboard_summary(
    user_id: UserID,
    today: Date,
    connection: &Connection,
) -> Result<DashboardSummary, Error> {
    let month_prefix = format!("{:04}-{:02}", today.year(), u8::from(today.month()));

    let (total_income, total_expense): (f64, f64) = connection
        .prepare(
            "SELECT
                COALESCE(SUM(CASE
                    WHEN t.type = 'Thu' AND COALESCE(c.name, '') != ?3 THEN t.amount
                    ELSE 0 END), 0),
                COALESCE(SUM(CASE
                    WHEN t.type = 'Chi' AND COALESCE(c.name, '') != ?4 THEN t.amount
                    WHEN t.type = 'Thu' AND COALESCE(c.name, '') = ?3 THEN t.amount
                    ELSE 0 END), 0)
            FROM transactions AS t
            LEFT JOIN categories AS c ON c.id = t.category_id
            WHERE t.user_id = ?1 AND strftime('%Y-%m', t.date) = ?2",
        )?
        .query_row(
            (
                user_id.as_i64(),
                &month_prefix,
                FUND_CONTRIBUTION_CATEGORY,
                FUND_WITHDRAWAL_CATEGORY,
            ),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

    let linked_users = get_linked_users(user_id, connection)?;
    let placeholders = vec!["?"; linked_users.len()].join(", ");
    let query = format!(
        "SELECT COALESCE(SUM(CASE WHEN type = 'Thu' THEN amount ELSE -amount END), 0)
        FROM transactions
        WHERE fund_purpose IS NOT NULL AND fund_purpose != '' AND user_id IN ({placeholders})"
    );

    let total_fund: f64 = connection.prepare(&query)?.query_row(
        rusqlite::params_from_iter(linked_users.iter().map(|user| user.as_i64())),
        |row| row.get(0),
    )?;

    Ok(DashboardSummary {
        total_income,
        total_expense,
        balance: total_income - total_expense,
        total_fund,
    })
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// The yearly report endpoint.
pub async fn get_yearly_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let buckets = yearly_report(auth.user_id, OffsetDateTime::now_utc().date(), &connection)?;

    Ok(Json(json!({ "buckets": buckets })).into_response())
}

/// The monthly report endpoint.
pub async fn get_monthly_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let buckets = monthly_report(auth.user_id, OffsetDateTime::now_utc().date(), &connection)?;

    Ok(Json(json!({ "buckets": buckets })).into_response())
}

/// The daily report endpoint.
pub async fn get_daily_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let buckets = daily_report(auth.user_id, OffsetDateTime::now_utc().date(), &connection)?;

    Ok(Json(json!({ "buckets": buckets })).into_response())
}

/// The category breakdown endpoint.
pub async fn get_category_breakdown(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let breakdown =
        category_breakdown(auth.user_id, OffsetDateTime::now_utc().date(), &connection)?;

    let breakdown: Vec<serde_json::Value> = breakdown
        .into_iter()
        .map(|(name, icon, total)| {
            json!({
                "category": crate::category::format_display(&icon, &name),
                "total": total,
            })
        })
        .collect();

    Ok(Json(json!({ "breakdown": breakdown })).into_response())
}

/// The dashboard summary endpoint.
pub async fn get_dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let summary = dashboard_summary(auth.user_id, OffsetDateTime::now_utc().date(), &connection)?;

    Ok(Json(json!({
        "user": { "username": auth.username, "name": auth.name, "role": auth.role },
        "summary": summary,
    }))
    .into_response())
}

#[cfg(test)]
mod report_tests {
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        category::{CategoryType, resolve_or_create},
        db::initialize,
        user::{UserID, test_utils::insert_test_user},
    };

    use super::{daily_report, dashboard_summary, monthly_report, yearly_report};

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    fn insert_transaction(
        connection: &Connection,
        user_id: UserID,
        date: &str,
        transaction_type: &str,
        category: Option<&str>,
        amount: f64,
        fund_purpose: &str,
    ) {
        let category_id = category.map(|name| {
            resolve_or_create(
                name,
                CategoryType::parse(transaction_type).unwrap(),
                "",
                connection,
            )
            .unwrap()
        });

        connection
            .execute(
                "INSERT INTO transactions (user_id, date, type, category_id, amount, note, fund_purpose)
                VALUES (?1, ?2, ?3, ?4, ?5, '', ?6)",
                (
                    user_id.as_i64(),
                    date,
                    transaction_type,
                    category_id,
                    amount,
                    fund_purpose,
                ),
            )
            .unwrap();
    }

    #[test]
    fn monthly_report_zero_fills_empty_months() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        insert_transaction(&connection, alice, "2024-03-15", "Chi", None, 50_000.0, "");

        let buckets = monthly_report(alice, date!(2024 - 06 - 01), &connection).unwrap();

        assert_eq!(buckets.len(), 12);
        assert_eq!(buckets[2].label, "3");
        assert_eq!(buckets[2].chi, 50_000.0);
        assert_eq!(buckets[0].chi, 0.0);
        assert_eq!(buckets[11].chi, 0.0);
    }

    #[test]
    fn daily_report_has_one_bucket_per_day_of_month() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        insert_transaction(&connection, alice, "2024-02-10", "Thu", None, 100.0, "");

        let buckets = daily_report(alice, date!(2024 - 02 - 20), &connection).unwrap();

        // 2024 is a leap year.
        assert_eq!(buckets.len(), 29);
        assert_eq!(buckets[9].label, "10");
        assert_eq!(buckets[9].thu, 100.0);
    }

    #[test]
    fn yearly_report_covers_the_last_five_years() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        insert_transaction(&connection, alice, "2022-06-01", "Thu", None, 10.0, "");
        // Outside the window.
        insert_transaction(&connection, alice, "2019-06-01", "Thu", None, 99.0, "");

        let buckets = yearly_report(alice, date!(2024 - 03 - 15), &connection).unwrap();

        let labels: Vec<&str> = buckets.iter().map(|bucket| bucket.label.as_str()).collect();
        assert_eq!(labels, vec!["2020", "2021", "2022", "2023", "2024"]);
        assert_eq!(buckets[2].thu, 10.0);
        assert_eq!(buckets[0].thu, 0.0);
    }

    #[test]
    fn fund_column_counts_tagged_entries_of_both_types() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        insert_transaction(&connection, alice, "2024-03-01", "Thu", None, 100.0, "Du lịch");
        insert_transaction(&connection, alice, "2024-03-02", "Chi", None, 30.0, "Du lịch");

        let buckets = monthly_report(alice, date!(2024 - 03 - 15), &connection).unwrap();

        assert_eq!(buckets[2].fund, 130.0);
    }

    #[test]
    fn fund_contribution_counts_as_expense_not_income() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        insert_transaction(&connection, alice, "2024-03-10", "Thu", Some("Lương"), 200.0, "");
        insert_transaction(
            &connection,
            alice,
            "2024-03-11",
            "Thu",
            Some("Thu quỹ"),
            50.0,
            "Du lịch",
        );

        let summary = dashboard_summary(alice, date!(2024 - 03 - 15), &connection).unwrap();

        assert_eq!(summary.total_income, 200.0);
        assert_eq!(summary.total_expense, 50.0);
        assert_eq!(summary.balance, 150.0);
    }

    #[test]
    fn fund_withdrawal_is_excluded_from_personal_totals() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        insert_transaction(&connection, alice, "2024-03-10", "Chi", Some("Ăn uống"), 40.0, "");
        insert_transaction(
            &connection,
            alice,
            "2024-03-11",
            "Chi",
            Some("Chi quỹ"),
            25.0,
            "Du lịch",
        );

        let summary = dashboard_summary(alice, date!(2024 - 03 - 15), &connection).unwrap();

        assert_eq!(summary.total_expense, 40.0);
    }

    #[test]
    fn total_fund_pools_linked_users_across_all_time() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        let bob = insert_test_user("bob", "Bob", &connection);

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

        insert_transaction(&connection, alice, "2023-01-01", "Thu", None, 100.0, "Du lịch");
        insert_transaction(&connection, bob, "2024-03-01", "Thu", None, 80.0, "Du lịch");
        insert_transaction(&connection, bob, "2024-03-02", "Chi", None, 30.0, "Du lịch");

        let summary = dashboard_summary(alice, date!(2024 - 03 - 15), &connection).unwrap();

        assert_eq!(summary.total_fund, 150.0);
    }
}
