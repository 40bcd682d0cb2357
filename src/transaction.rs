//! The transaction ledger: entry validation, ownership-checked
//! mutations, and the calendar view.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

use crate::{
    AppState, Error,
    auth::AuthContext,
    category::{
        CategoryType, DEFAULT_ICON, FUND_CONTRIBUTION_CATEGORY, FUND_WITHDRAWAL_CATEGORY,
        format_display, resolve_or_create, split_display,
    },
    db::DatabaseID,
    user::UserID,
};

/// The storage form for dates: `YYYY-MM-DD`.
pub(crate) const STORAGE_DATE_FORMAT: &[BorrowedFormatItem] =
    format_description!("[year]-[month]-[day]");

/// The entry and display form for dates: `DD/MM/YYYY`.
pub(crate) const ENTRY_DATE_FORMAT: &[BorrowedFormatItem] =
    format_description!("[day]/[month]/[year]");

/// Day-of-week labels, Sunday first.
const DAY_NAMES: [&str; 7] = ["CN", "T2", "T3", "T4", "T5", "T6", "T7"];

/// Parse an entry-form date (`DD/MM/YYYY`).
///
/// # Errors
/// Returns [Error::Validation] if the string does not parse.
pub(crate) fn parse_entry_date(value: &str) -> Result<Date, Error> {
    Date::parse(value.trim(), ENTRY_DATE_FORMAT)
        .map_err(|_| Error::Validation(format!("\"{value}\" is not a valid DD/MM/YYYY date")))
}

/// A validated ledger entry, ready to insert or apply as an update.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEntry {
    /// The entry date.
    pub date: Date,
    /// Income or expense.
    pub transaction_type: CategoryType,
    /// The resolved category.
    pub category_id: DatabaseID,
    /// The entry amount, strictly positive.
    pub amount: f64,
    /// Free-text note.
    pub note: String,
    /// The fund purpose tag, empty when the entry is not fund-related.
    pub fund_purpose: String,
}

/// The request body for creating or updating a ledger entry.
#[derive(Debug, Deserialize)]
pub struct EntryForm {
    /// The entry date in `DD/MM/YYYY` form.
    pub date: String,
    /// `Thu` or `Chi`.
    #[serde(rename = "type")]
    pub transaction_type: String,
    /// The category display string, e.g. `"🍔 Ăn uống"`.
    pub category: String,
    /// The entry amount.
    pub amount: f64,
    /// Free-text note.
    #[serde(default)]
    pub note: String,
    /// The fund purpose tag.
    #[serde(default)]
    pub fund_purpose: String,
}

/// Validate an entry form and resolve its category, creating the
/// category on first use.
///
/// # Errors
/// Returns [Error::Validation] for a missing category, unparsable date,
/// or non-positive amount.
pub fn validate_entry(form: &EntryForm, connection: &Connection) -> Result<ValidatedEntry, Error> {
    let category_display = form.category.trim();
    if category_display.is_empty() {
        return Err(Error::Validation("category must not be empty".to_owned()));
    }

    let date = parse_entry_date(&form.date)?;
    let transaction_type = CategoryType::parse(&form.transaction_type)?;

    if form.amount <= 0.0 {
        return Err(Error::Validation("amount must be greater than zero".to_owned()));
    }

    let (icon, name) = split_display(category_display);
    let icon_hint = if icon.is_empty() { DEFAULT_ICON } else { &icon };
    let category_id = resolve_or_create(&name, transaction_type, icon_hint, connection)?;

    Ok(ValidatedEntry {
        date,
        transaction_type,
        category_id,
        amount: form.amount,
        note: form.note.trim().to_owned(),
        fund_purpose: form.fund_purpose.trim().to_owned(),
    })
}

/// Insert a validated entry for `user_id`, returning the new row's ID.
pub fn insert_entry(
    user_id: UserID,
    entry: &ValidatedEntry,
    connection: &Connection,
) -> Result<DatabaseID, Error> {
    let date_string = entry
        .date
        .format(STORAGE_DATE_FORMAT)
        .map_err(|error| Error::Validation(error.to_string()))?;

    connection.execute(
        "INSERT INTO transactions (user_id, date, type, category_id, amount, note, fund_purpose)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        (
            user_id.as_i64(),
            date_string,
            entry.transaction_type.as_str(),
            entry.category_id,
            entry.amount,
            &entry.note,
            &entry.fund_purpose,
        ),
    )?;

    Ok(connection.last_insert_rowid())
}

/// Apply a validated entry over an existing row.
///
/// The update is scoped to `user_id`, so a row owned by someone else
/// reports [Error::NotFound] rather than leaking its existence.
pub fn update_entry(
    user_id: UserID,
    transaction_id: DatabaseID,
    entry: &ValidatedEntry,
    connection: &Connection,
) -> Result<(), Error> {
    let date_string = entry
        .date
        .format(STORAGE_DATE_FORMAT)
        .map_err(|error| Error::Validation(error.to_string()))?;

    let changed = connection.execute(
        "UPDATE transactions
        SET date = ?1, type = ?2, category_id = ?3, amount = ?4, note = ?5, fund_purpose = ?6
        WHERE id = ?7 AND user_id = ?8",
        (
            date_string,
            entry.transaction_type.as_str(),
            entry.category_id,
            entry.amount,
            &entry.note,
            &entry.fund_purpose,
            transaction_id,
            user_id.as_i64(),
        ),
    )?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Delete a row owned by `user_id`.
///
/// # Errors
/// Returns [Error::NotFound] if the row does not exist or belongs to
/// another user.
pub fn delete_entry(
    user_id: UserID,
    transaction_id: DatabaseID,
    connection: &Connection,
) -> Result<(), Error> {
    let changed = connection.execute(
        "DELETE FROM transactions WHERE id = ?1 AND user_id = ?2",
        (transaction_id, user_id.as_i64()),
    )?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// Add a ledger entry for the caller.
pub async fn create_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(form): Json<EntryForm>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let entry = validate_entry(&form, &connection)?;
    let transaction_id = insert_entry(auth.user_id, &entry, &connection)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "transaction_id": transaction_id })),
    )
        .into_response())
}

/// Update one of the caller's ledger entries.
pub async fn update_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<DatabaseID>,
    Json(form): Json<EntryForm>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let entry = validate_entry(&form, &connection)?;
    update_entry(auth.user_id, transaction_id, &entry, &connection)?;

    Ok(Json(json!({ "success": true, "message": "transaction updated" })).into_response())
}

/// Delete one of the caller's ledger entries.
pub async fn delete_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<DatabaseID>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    delete_entry(auth.user_id, transaction_id, &connection)?;

    Ok(Json(json!({ "success": true, "message": "transaction deleted" })).into_response())
}

// ============================================================================
// CALENDAR VIEW
// ============================================================================

/// Query parameters selecting a calendar month, defaulting to the
/// current one.
#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    /// The month, 1 through 12.
    #[serde(default)]
    pub month: Option<u8>,
    /// The calendar year.
    #[serde(default)]
    pub year: Option<i32>,
}

/// One ledger entry decorated for calendar display.
#[derive(Debug)]
struct CalendarEntry {
    id: DatabaseID,
    date: Date,
    transaction_type: CategoryType,
    category_name: String,
    category_display: String,
    amount: f64,
    note: String,
    fund_purpose_display: String,
}

/// How a calendar entry counts toward the personal totals.
///
/// A `Thu` entry in the fund contribution category is money leaving the
/// personal pool, so it counts as expense. A `Chi` entry in the fund
/// withdrawal category is fund-internal and counts toward neither side.
fn personal_contribution(
    transaction_type: CategoryType,
    category_name: &str,
    amount: f64,
) -> (f64, f64) {
    match transaction_type {
        CategoryType::Thu if category_name == FUND_CONTRIBUTION_CATEGORY => (0.0, amount),
        CategoryType::Thu => (amount, 0.0),
        CategoryType::Chi if category_name == FUND_WITHDRAWAL_CATEGORY => (0.0, 0.0),
        CategoryType::Chi => (0.0, amount),
    }
}

/// The calendar view: the caller's entries for one month grouped by
/// day, with per-day and monthly totals.
pub async fn get_calendar(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<MonthQuery>,
) -> Result<Response, Error> {
    let today = time::OffsetDateTime::now_utc().date();
    let month = query.month.unwrap_or_else(|| u8::from(today.month()));
    let year = query.year.unwrap_or_else(|| today.year());

    if !(1..=12).contains(&month) {
        return Err(Error::Validation(format!("{month} is not a valid month")));
    }

    let month_prefix = format!("{year:04}-{month:02}");

    let connection = state.db_connection.lock().unwrap();

    let fund_icons: std::collections::HashMap<String, String> =
        crate::category::get_fund_purposes(&connection)?
            .into_iter()
            .collect();

    let entries = connection
        .prepare(
            "SELECT t.id, t.date, t.type, COALESCE(c.name, ''), COALESCE(c.icon, ''),
                t.amount, COALESCE(t.note, ''), COALESCE(t.fund_purpose, '')
            FROM transactions AS t
            LEFT JOIN categories AS c ON c.id = t.category_id
            WHERE t.user_id = ?1 AND strftime('%Y-%m', t.date) = ?2
            ORDER BY t.date DESC, t.id",
        )?
        .query_map((auth.user_id.as_i64(), &month_prefix), |row| {
            let date: Date = row.get(1)?;
            let type_string: String = row.get(2)?;
            let category_name: String = row.get(3)?;
            let category_icon: String = row.get(4)?;
            let fund_purpose: String = row.get(7)?;

            Ok((
                row.get::<_, DatabaseID>(0)?,
                date,
                type_string,
                category_name,
                category_icon,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
                fund_purpose,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let entries: Vec<CalendarEntry> = entries
        .into_iter()
        .map(
            |(id, date, type_string, category_name, category_icon, amount, note, fund_purpose)| {
                let fund_purpose_display = if fund_purpose.is_empty() {
                    String::new()
                } else {
                    let icon = fund_icons.get(&fund_purpose).map(String::as_str).unwrap_or("");
                    format_display(icon, &fund_purpose)
                };

                CalendarEntry {
                    id,
                    date,
                    transaction_type: CategoryType::from_str_or_default(&type_string),
                    category_display: format_display(&category_icon, &category_name),
                    category_name,
                    amount,
                    note,
                    fund_purpose_display,
                }
            },
        )
        .collect();

    // Group by day; entries arrive newest date first.
    let mut days: Vec<serde_json::Value> = Vec::new();
    let mut current_date: Option<Date> = None;
    let mut day_entries: Vec<serde_json::Value> = Vec::new();
    let mut day_thu = 0.0;
    let mut day_chi = 0.0;
    let mut month_thu = 0.0;
    let mut month_chi = 0.0;

    let mut flush_day =
        |date: Date, entries: &mut Vec<serde_json::Value>, thu: &mut f64, chi: &mut f64| {
            let date_string = date
                .format(ENTRY_DATE_FORMAT)
                .unwrap_or_else(|_| date.to_string());
            let day_name = DAY_NAMES[date.weekday().number_days_from_sunday() as usize];

            days.push(json!({
                "ngay": date_string,
                "thu_trong_tuan": day_name,
                "entries": std::mem::take(entries),
                "tong_thu": *thu,
                "tong_chi": *chi,
            }));
            *thu = 0.0;
            *chi = 0.0;
        };

    for entry in &entries {
        if current_date != Some(entry.date) {
            if let Some(date) = current_date {
                flush_day(date, &mut day_entries, &mut day_thu, &mut day_chi);
            }
            current_date = Some(entry.date);
        }

        let (thu, chi) =
            personal_contribution(entry.transaction_type, &entry.category_name, entry.amount);
        day_thu += thu;
        day_chi += chi;
        month_thu += thu;
        month_chi += chi;

        day_entries.push(json!({
            "id": entry.id,
            "loai": entry.transaction_type.as_str(),
            "danh_muc": entry.category_display,
            "so_tien": entry.amount,
            "ghi_chu": entry.note,
            "muc_dich_quy": entry.fund_purpose_display,
        }));
    }

    if let Some(date) = current_date {
        flush_day(date, &mut day_entries, &mut day_thu, &mut day_chi);
    }

    Ok(Json(json!({
        "days": days,
        "summary": {
            "tong_thu": month_thu,
            "tong_chi": month_chi,
            "tong": month_thu - month_chi,
        },
    }))
    .into_response())
}

#[cfg(test)]
mod entry_tests {
    use rusqlite::Connection;

    use crate::{Error, db::initialize, user::test_utils::insert_test_user};

    use super::{
        EntryForm, delete_entry, insert_entry, parse_entry_date, update_entry, validate_entry,
    };

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    fn entry_form(date: &str, amount: f64) -> EntryForm {
        EntryForm {
            date: date.to_owned(),
            transaction_type: "Chi".to_owned(),
            category: "🍔 Ăn uống".to_owned(),
            amount,
            note: "lunch".to_owned(),
            fund_purpose: String::new(),
        }
    }

    #[test]
    fn parse_entry_date_accepts_day_month_year() {
        let date = parse_entry_date("15/03/2024").unwrap();

        assert_eq!(date.to_string(), "2024-03-15");
    }

    #[test]
    fn parse_entry_date_rejects_storage_form() {
        assert!(matches!(parse_entry_date("2024-03-15"), Err(Error::Validation(_))));
    }

    #[test]
    fn validate_entry_rejects_non_positive_amount() {
        let connection = get_test_connection();

        let result = validate_entry(&entry_form("15/03/2024", 0.0), &connection);

        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn validate_entry_creates_category_on_first_use() {
        let connection = get_test_connection();

        let entry = validate_entry(&entry_form("15/03/2024", 50_000.0), &connection).unwrap();

        let (name, icon): (String, String) = connection
            .prepare("SELECT name, icon FROM categories WHERE id = ?1")
            .unwrap()
            .query_row((entry.category_id,), |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!(name, "Ăn uống");
        assert_eq!(icon, "🍔");
    }

    #[test]
    fn update_entry_rejects_other_users_rows() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        let bob = insert_test_user("bob", "Bob", &connection);

        let entry = validate_entry(&entry_form("15/03/2024", 50_000.0), &connection).unwrap();
        let transaction_id = insert_entry(bob, &entry, &connection).unwrap();

        let updated = validate_entry(&entry_form("16/03/2024", 70_000.0), &connection).unwrap();
        let result = update_entry(alice, transaction_id, &updated, &connection);

        assert!(matches!(result, Err(Error::NotFound)));

        // Bob's row is untouched.
        let (date, amount): (String, f64) = connection
            .prepare("SELECT date, amount FROM transactions WHERE id = ?1")
            .unwrap()
            .query_row((transaction_id,), |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!(date, "2024-03-15");
        assert_eq!(amount, 50_000.0);
    }

    #[test]
    fn delete_entry_rejects_other_users_rows() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        let bob = insert_test_user("bob", "Bob", &connection);

        let entry = validate_entry(&entry_form("15/03/2024", 50_000.0), &connection).unwrap();
        let transaction_id = insert_entry(bob, &entry, &connection).unwrap();

        assert!(matches!(
            delete_entry(alice, transaction_id, &connection),
            Err(Error::NotFound)
        ));

        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM transactions")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn delete_entry_removes_own_row() {
        let connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        let entry = validate_entry(&entry_form("15/03/2024", 50_000.0), &connection).unwrap();
        let transaction_id = insert_entry(alice, &entry, &connection).unwrap();

        delete_entry(alice, transaction_id, &connection).unwrap();

        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM transactions")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}

#[cfg(test)]
mod contribution_tests {
    use crate::category::CategoryType;

    use super::personal_contribution;

    #[test]
    fn ordinary_income_counts_as_income() {
        assert_eq!(personal_contribution(CategoryType::Thu, "Lương", 100.0), (100.0, 0.0));
    }

    #[test]
    fn ordinary_expense_counts_as_expense() {
        assert_eq!(personal_contribution(CategoryType::Chi, "Ăn uống", 40.0), (0.0, 40.0));
    }

    #[test]
    fn fund_contribution_counts_as_expense() {
        assert_eq!(personal_contribution(CategoryType::Thu, "Thu quỹ", 50.0), (0.0, 50.0));
    }

    #[test]
    fn fund_withdrawal_counts_as_neither() {
        assert_eq!(personal_contribution(CategoryType::Chi, "Chi quỹ", 30.0), (0.0, 0.0));
    }
}
