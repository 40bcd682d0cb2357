//! Full-database export and import.
//!
//! Export writes one sheet per entity with human-readable joined names
//! instead of raw IDs. Import is the inverse: it re-resolves every
//! reference by natural key (username, display name, category name,
//! group name), fabricating missing entities where it can, inside one
//! all-or-nothing database transaction.

use std::collections::{HashMap, HashSet};

use axum::{
    Json,
    extract::{Multipart, State},
    http::header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use rusqlite::{OptionalExtension, Transaction};
use serde::Serialize;
use serde_json::json;
use time::{Date, OffsetDateTime};

use crate::{
    AppState, Error, PasswordHash,
    category::{CategoryType, DEFAULT_ICON, FUND_ICON},
    db::DatabaseID,
    password::DEFAULT_IMPORT_PASSWORD,
    transaction::{ENTRY_DATE_FORMAT, STORAGE_DATE_FORMAT},
    user::Role,
    workbook::{Sheet, Workbook},
};

const TRANSACTIONS_SHEET: &str = "Transactions";
const CATEGORIES_SHEET: &str = "Categories";
const USERS_SHEET: &str = "Users";
const FUND_GROUPS_SHEET: &str = "FundGroups";
const GROUP_MEMBERS_SHEET: &str = "GroupMembers";

/// What an import run changed, plus the rows it could not restore.
#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    /// Users created from the Users sheet or fabricated for orphaned
    /// transactions.
    pub users_created: usize,
    /// Categories updated in place from the Categories sheet.
    pub categories_updated: usize,
    /// Categories created from the Categories sheet or during
    /// transaction restore.
    pub categories_created: usize,
    /// Fund groups created.
    pub groups_created: usize,
    /// Group memberships created.
    pub members_created: usize,
    /// Transactions inserted.
    pub transactions_imported: usize,
    /// Per-row failures that were skipped rather than aborting the run.
    pub errors: Vec<String>,
}

// ============================================================================
// EXPORT
// ============================================================================

/// Build the full-database workbook.
pub fn export_workbook(connection: &rusqlite::Connection) -> Result<Workbook, Error> {
    let mut transactions = Sheet::new(
        TRANSACTIONS_SHEET,
        &[
            "Ngày",
            "Username",
            "Người dùng",
            "Danh mục",
            "Loại",
            "Số tiền",
            "Ghi chú",
            "Mục đích quỹ",
        ],
    );

    transactions.rows = connection
        .prepare(
            "SELECT t.date, u.username, COALESCE(NULLIF(u.name, ''), u.username),
                COALESCE(c.name, ''), t.type, t.amount,
                COALESCE(t.note, ''), COALESCE(t.fund_purpose, '')
            FROM transactions AS t
            INNER JOIN users AS u ON u.id = t.user_id
            LEFT JOIN categories AS c ON c.id = t.category_id
            ORDER BY t.date, t.id",
        )?
        .query_map([], |row| {
            let date: Date = row.get(0)?;
            let amount: f64 = row.get(5)?;

            Ok(vec![
                date.format(ENTRY_DATE_FORMAT).unwrap_or_else(|_| date.to_string()),
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                format_amount(amount),
                row.get(6)?,
                row.get(7)?,
            ])
        })?
        .collect::<Result<_, _>>()?;

    let mut categories = Sheet::new(CATEGORIES_SHEET, &["name", "type", "subtype", "icon"]);
    categories.rows = connection
        .prepare(
            "SELECT name, type, subtype, COALESCE(icon, '') FROM categories ORDER BY id",
        )?
        .query_map([], |row| {
            Ok(vec![row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?])
        })?
        .collect::<Result<_, _>>()?;

    let mut users = Sheet::new(USERS_SHEET, &["username", "name", "role", "active"]);
    users.rows = connection
        .prepare("SELECT username, COALESCE(name, ''), role, active FROM users ORDER BY id")?
        .query_map([], |row| {
            let active: bool = row.get(3)?;
            Ok(vec![
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                if active { "1".to_owned() } else { "0".to_owned() },
            ])
        })?
        .collect::<Result<_, _>>()?;

    let mut fund_groups = Sheet::new(FUND_GROUPS_SHEET, &["name", "created_by"]);
    fund_groups.rows = connection
        .prepare(
            "SELECT g.name, COALESCE(u.username, '') FROM fund_groups AS g
            LEFT JOIN users AS u ON u.id = g.created_by
            ORDER BY g.id",
        )?
        .query_map([], |row| Ok(vec![row.get(0)?, row.get(1)?]))?
        .collect::<Result<_, _>>()?;

    let mut group_members = Sheet::new(GROUP_MEMBERS_SHEET, &["group_name", "username"]);
    group_members.rows = connection
        .prepare(
            "SELECT g.name, u.username FROM fund_group_members AS m
            INNER JOIN fund_groups AS g ON g.id = m.group_id
            INNER JOIN users AS u ON u.id = m.user_id
            ORDER BY m.id",
        )?
        .query_map([], |row| Ok(vec![row.get(0)?, row.get(1)?]))?
        .collect::<Result<_, _>>()?;

    Ok(Workbook {
        sheets: vec![transactions, categories, users, fund_groups, group_members],
    })
}

/// Format an amount without a trailing `.0` for whole numbers.
fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 && amount.abs() < 1e15 {
        format!("{}", amount as i64)
    } else {
        amount.to_string()
    }
}

// ============================================================================
// IMPORT
// ============================================================================

/// Natural-key lookup caches built once per import run.
struct ImportCaches {
    users_by_username: HashMap<String, DatabaseID>,
    users_by_name: HashMap<String, DatabaseID>,
    categories_by_name: HashMap<String, DatabaseID>,
    groups_by_name: HashMap<String, DatabaseID>,
    /// One bcrypt hash shared by every account this run creates.
    default_password_hash: Option<PasswordHash>,
}

impl ImportCaches {
    fn load(transaction: &Transaction) -> Result<Self, Error> {
        let mut users_by_username = HashMap::new();
        let mut users_by_name = HashMap::new();

        let users: Vec<(DatabaseID, String, String)> = transaction
            .prepare("SELECT id, username, COALESCE(name, '') FROM users")?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<_, _>>()?;

        for (id, username, name) in users {
            users_by_username.insert(username, id);
            if !name.is_empty() {
                users_by_name.entry(name).or_insert(id);
            }
        }

        let categories_by_name = transaction
            .prepare("SELECT name, MIN(id) FROM categories GROUP BY name")?
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let groups_by_name = transaction
            .prepare("SELECT name, id FROM fund_groups")?
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        Ok(Self {
            users_by_username,
            users_by_name,
            categories_by_name,
            groups_by_name,
            default_password_hash: None,
        })
    }

    /// The shared default-password hash, computed on first use so an
    /// import that fabricates no accounts never pays for bcrypt.
    fn default_password_hash(&mut self) -> Result<&PasswordHash, Error> {
        if self.default_password_hash.is_none() {
            self.default_password_hash = Some(PasswordHash::from_raw_password(
                DEFAULT_IMPORT_PASSWORD,
                bcrypt::DEFAULT_COST,
            )?);
        }

        // Just populated above.
        Ok(self.default_password_hash.as_ref().unwrap())
    }
}

/// Replace the database contents with a workbook's.
///
/// All five sheets are optional; a missing sheet restores nothing for
/// that entity. Existing transactions are always deleted first, so a
/// workbook with an empty Transactions sheet empties the ledger. The
/// whole run happens inside one database transaction: an unexpected
/// failure rolls everything back, while per-row problems are recorded
/// in the summary and skipped.
pub fn import_workbook(
    workbook: &Workbook,
    connection: &mut rusqlite::Connection,
) -> Result<ImportSummary, Error> {
    let transaction = connection.transaction()?;
    let mut summary = ImportSummary::default();

    // Step 1: full-replace semantics.
    transaction.execute("DELETE FROM transactions", [])?;

    let mut caches = ImportCaches::load(&transaction)?;

    restore_users(workbook, &transaction, &mut caches, &mut summary)?;
    restore_categories(workbook, &transaction, &mut caches, &mut summary)?;
    restore_fund_groups(workbook, &transaction, &mut caches, &mut summary)?;
    restore_group_members(workbook, &transaction, &mut caches, &mut summary)?;
    restore_transactions(workbook, &transaction, &mut caches, &mut summary)?;

    transaction.commit()?;

    Ok(summary)
}

fn restore_users(
    workbook: &Workbook,
    transaction: &Transaction,
    caches: &mut ImportCaches,
    summary: &mut ImportSummary,
) -> Result<(), Error> {
    let Some(sheet) = workbook.sheet(USERS_SHEET) else {
        return Ok(());
    };

    for (row_number, row) in sheet.rows.iter().enumerate() {
        let username = sheet.cell(row, "username").trim();
        if username.is_empty() {
            summary
                .errors
                .push(format!("Users row {}: empty username", row_number + 2));
            continue;
        }

        if caches.users_by_username.contains_key(username) {
            continue;
        }

        let name = sheet.cell(row, "name").trim();
        let role = match sheet.cell(row, "role").trim() {
            "admin" => Role::Admin,
            _ => Role::User,
        };
        let active = !matches!(sheet.cell(row, "active").trim(), "0" | "false");

        let password_hash = caches.default_password_hash()?.as_ref().to_owned();
        transaction.execute(
            "INSERT INTO users (username, password, name, role, active, must_change_password)
            VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            (username, password_hash, name, role.as_str(), active),
        )?;
        let id = transaction.last_insert_rowid();

        caches.users_by_username.insert(username.to_owned(), id);
        if !name.is_empty() {
            caches.users_by_name.entry(name.to_owned()).or_insert(id);
        }
        summary.users_created += 1;
    }

    Ok(())
}

fn restore_categories(
    workbook: &Workbook,
    transaction: &Transaction,
    caches: &mut ImportCaches,
    summary: &mut ImportSummary,
) -> Result<(), Error> {
    let Some(sheet) = workbook.sheet(CATEGORIES_SHEET) else {
        return Ok(());
    };

    let mut find_exact = transaction
        .prepare("SELECT id FROM categories WHERE name = ?1 AND type = ?2 AND subtype = ?3")?;

    // Rows this run has already matched or created. A later sheet row
    // with the same name must not retype one of these, or a
    // fund-purpose pair (same name, Thu + Chi) would fold into one row.
    let mut claimed: HashSet<DatabaseID> = HashSet::new();

    for (row_number, row) in sheet.rows.iter().enumerate() {
        let name = sheet.cell(row, "name").trim();
        if name.is_empty() {
            summary
                .errors
                .push(format!("Categories row {}: empty name", row_number + 2));
            continue;
        }

        let category_type = CategoryType::from_str_or_default(sheet.cell(row, "type"));
        let subtype = match sheet.cell(row, "subtype").trim() {
            "fund" => "fund",
            _ => "normal",
        };
        let icon = sheet.cell(row, "icon").trim();

        let existing: Option<DatabaseID> = find_exact
            .query_row((name, category_type.as_str(), subtype), |row| row.get(0))
            .optional()?;

        if let Some(id) = existing {
            transaction.execute("UPDATE categories SET icon = ?1 WHERE id = ?2", (icon, id))?;
            summary.categories_updated += 1;
            claimed.insert(id);
            caches.categories_by_name.entry(name.to_owned()).or_insert(id);
            continue;
        }

        match caches.categories_by_name.get(name) {
            // Same name under a new type or subtype: retype the
            // existing row in place. The exact-tuple lookup above
            // guarantees the target tuple is free.
            Some(&id) if !claimed.contains(&id) => {
                transaction.execute(
                    "UPDATE categories SET type = ?1, subtype = ?2, icon = ?3 WHERE id = ?4",
                    (category_type.as_str(), subtype, icon, id),
                )?;
                summary.categories_updated += 1;
                claimed.insert(id);
            }
            _ => {
                transaction.execute(
                    "INSERT INTO categories (name, type, subtype, icon) VALUES (?1, ?2, ?3, ?4)",
                    (name, category_type.as_str(), subtype, icon),
                )?;
                let id = transaction.last_insert_rowid();
                summary.categories_created += 1;
                claimed.insert(id);
                caches.categories_by_name.entry(name.to_owned()).or_insert(id);
            }
        }
    }

    Ok(())
}

fn restore_fund_groups(
    workbook: &Workbook,
    transaction: &Transaction,
    caches: &mut ImportCaches,
    summary: &mut ImportSummary,
) -> Result<(), Error> {
    let Some(sheet) = workbook.sheet(FUND_GROUPS_SHEET) else {
        return Ok(());
    };

    for (row_number, row) in sheet.rows.iter().enumerate() {
        let name = sheet.cell(row, "group_name");
        let name = if name.is_empty() { sheet.cell(row, "name") } else { name };
        let name = name.trim();
        if name.is_empty() {
            summary
                .errors
                .push(format!("FundGroups row {}: empty name", row_number + 2));
            continue;
        }

        if caches.groups_by_name.contains_key(name) {
            continue;
        }

        let creator_username = sheet.cell(row, "created_by").trim();
        let created_by = match caches.users_by_username.get(creator_username) {
            Some(&id) => Some(id),
            None => first_user_id(transaction)?,
        };

        transaction.execute(
            "INSERT INTO fund_groups (name, created_by, created_at)
            VALUES (?1, ?2, datetime('now'))",
            (name, created_by),
        )?;

        caches
            .groups_by_name
            .insert(name.to_owned(), transaction.last_insert_rowid());
        summary.groups_created += 1;
    }

    Ok(())
}

fn first_user_id(transaction: &Transaction) -> Result<Option<DatabaseID>, Error> {
    transaction
        .prepare("SELECT MIN(id) FROM users")?
        .query_row([], |row| row.get(0))
        .map_err(|error| error.into())
}

fn restore_group_members(
    workbook: &Workbook,
    transaction: &Transaction,
    caches: &mut ImportCaches,
    summary: &mut ImportSummary,
) -> Result<(), Error> {
    let Some(sheet) = workbook.sheet(GROUP_MEMBERS_SHEET) else {
        return Ok(());
    };

    for row in &sheet.rows {
        let group_name = sheet.cell(row, "group_name").trim();
        let username = sheet.cell(row, "username").trim();

        // Unresolvable pairs are skipped without an error entry; they
        // usually reference rows the other sheets also failed on.
        let (Some(&group_id), Some(&user_id)) = (
            caches.groups_by_name.get(group_name),
            caches.users_by_username.get(username),
        ) else {
            continue;
        };

        let result = transaction.execute(
            "INSERT INTO fund_group_members (group_id, user_id, joined_at)
            VALUES (?1, ?2, datetime('now'))",
            (group_id, user_id),
        );

        match result.map_err(Error::from) {
            Ok(_) => summary.members_created += 1,
            Err(Error::AlreadyExists(_)) => {}
            Err(error) => return Err(error),
        }
    }

    Ok(())
}

fn restore_transactions(
    workbook: &Workbook,
    transaction: &Transaction,
    caches: &mut ImportCaches,
    summary: &mut ImportSummary,
) -> Result<(), Error> {
    let Some(sheet) = workbook.sheet(TRANSACTIONS_SHEET) else {
        return Ok(());
    };

    let mut insert = transaction.prepare(
        "INSERT INTO transactions (user_id, date, type, category_id, amount, note, fund_purpose)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for (row_number, row) in sheet.rows.iter().enumerate() {
        let row_label = row_number + 2;

        let date = match parse_workbook_date(sheet.cell(row, "Ngày")) {
            Ok(date) => date,
            Err(_) => {
                summary.errors.push(format!(
                    "Transactions row {row_label}: unparsable date \"{}\"",
                    sheet.cell(row, "Ngày")
                ));
                continue;
            }
        };

        let transaction_type = match CategoryType::parse(sheet.cell(row, "Loại")) {
            Ok(transaction_type) => transaction_type,
            Err(_) => {
                summary.errors.push(format!(
                    "Transactions row {row_label}: unknown type \"{}\"",
                    sheet.cell(row, "Loại")
                ));
                continue;
            }
        };

        let amount: f64 = match sheet.cell(row, "Số tiền").trim().replace(',', "").parse() {
            Ok(amount) => amount,
            Err(_) => {
                summary.errors.push(format!(
                    "Transactions row {row_label}: unparsable amount \"{}\"",
                    sheet.cell(row, "Số tiền")
                ));
                continue;
            }
        };

        let user_id = match resolve_transaction_user(
            sheet.cell(row, "Username").trim(),
            sheet.cell(row, "Người dùng").trim(),
            transaction,
            caches,
            summary,
        )? {
            Some(user_id) => user_id,
            None => {
                summary.errors.push(format!(
                    "Transactions row {row_label}: could not resolve a user from username \"{}\" and name \"{}\"",
                    sheet.cell(row, "Username").trim(),
                    sheet.cell(row, "Người dùng").trim(),
                ));
                continue;
            }
        };

        let category_name = sheet.cell(row, "Danh mục").trim();
        let category_id = if category_name.is_empty() {
            None
        } else {
            Some(resolve_transaction_category(
                category_name,
                transaction_type,
                transaction,
                caches,
                summary,
            )?)
        };

        let fund_purpose = sheet.cell(row, "Mục đích quỹ").trim();
        if !fund_purpose.is_empty() {
            ensure_fund_purpose(fund_purpose, transaction)?;
        }

        let date_string = date
            .format(STORAGE_DATE_FORMAT)
            .map_err(|error| Error::Validation(error.to_string()))?;

        insert.execute((
            user_id,
            date_string,
            transaction_type.as_str(),
            category_id,
            amount,
            sheet.cell(row, "Ghi chú").trim(),
            fund_purpose,
        ))?;

        summary.transactions_imported += 1;
    }

    Ok(())
}

/// The date formats accepted in the `Ngày` column.
fn parse_workbook_date(value: &str) -> Result<Date, Error> {
    let value = value.trim();

    // Timestamps from spreadsheet tools carry a time-of-day suffix.
    let value = value.split_whitespace().next().unwrap_or(value);

    Date::parse(value, ENTRY_DATE_FORMAT)
        .or_else(|_| Date::parse(value, STORAGE_DATE_FORMAT))
        .or_else(|_| {
            Date::parse(
                value,
                time::macros::format_description!("[day]-[month]-[year]"),
            )
        })
        .map_err(|_| Error::Validation(format!("\"{value}\" is not a recognised date")))
}

/// Resolve a transaction's owner: by username, then by display name,
/// then by fabricating an account from the display name so the row is
/// not lost. A row with no resolvable user is skipped by the caller.
fn resolve_transaction_user(
    username: &str,
    display_name: &str,
    transaction: &Transaction,
    caches: &mut ImportCaches,
    summary: &mut ImportSummary,
) -> Result<Option<DatabaseID>, Error> {
    if !username.is_empty() {
        if let Some(&id) = caches.users_by_username.get(username) {
            return Ok(Some(id));
        }
    }

    if !display_name.is_empty() {
        if let Some(&id) = caches.users_by_name.get(display_name) {
            return Ok(Some(id));
        }
    }

    // Only a display name backs a fabricated account; a bare unknown
    // username is skipped so a typo does not mint an account.
    if display_name.is_empty() {
        return Ok(None);
    }

    // Fabricate an account. The derived username embeds a timestamp to
    // dodge collisions; later lookups find the account by display name.
    let base = display_name;
    let derived_username = format!(
        "{}_{}",
        base.to_lowercase().replace(char::is_whitespace, ""),
        OffsetDateTime::now_utc().unix_timestamp()
    );

    let password_hash = caches.default_password_hash()?.as_ref().to_owned();
    transaction.execute(
        "INSERT INTO users (username, password, name, role, active, must_change_password)
        VALUES (?1, ?2, ?3, 'user', 1, 1)",
        (&derived_username, password_hash, base),
    )?;
    let id = transaction.last_insert_rowid();

    caches.users_by_username.insert(derived_username.clone(), id);
    caches.users_by_name.entry(base.to_owned()).or_insert(id);
    summary.users_created += 1;
    summary.errors.push(format!(
        "created account \"{derived_username}\" for unknown user \"{base}\""
    ));

    Ok(Some(id))
}

fn resolve_transaction_category(
    name: &str,
    transaction_type: CategoryType,
    transaction: &Transaction,
    caches: &mut ImportCaches,
    summary: &mut ImportSummary,
) -> Result<DatabaseID, Error> {
    if let Some(&id) = caches.categories_by_name.get(name) {
        return Ok(id);
    }

    transaction.execute(
        "INSERT INTO categories (name, type, subtype, icon) VALUES (?1, ?2, 'normal', ?3)",
        (name, transaction_type.as_str(), DEFAULT_ICON),
    )?;
    let id = transaction.last_insert_rowid();

    caches.categories_by_name.insert(name.to_owned(), id);
    summary.categories_created += 1;

    Ok(id)
}

/// Make sure a fund purpose referenced by an imported transaction has
/// its Thu+Chi pair of category rows.
fn ensure_fund_purpose(name: &str, transaction: &Transaction) -> Result<(), Error> {
    for category_type in [CategoryType::Thu, CategoryType::Chi] {
        let result = transaction.execute(
            "INSERT INTO categories (name, type, subtype, icon) VALUES (?1, ?2, 'fund', ?3)",
            (name, category_type.as_str(), FUND_ICON),
        );

        match result.map_err(Error::from) {
            Ok(_) | Err(Error::AlreadyExists(_)) => {}
            Err(error) => return Err(error),
        }
    }

    Ok(())
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// Download the full database as a workbook file.
pub async fn get_export(State(state): State<AppState>) -> Result<Response, Error> {
    let bytes = {
        let connection = state.db_connection.lock().unwrap();
        export_workbook(&connection)?.to_bytes()?
    };

    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                CONTENT_DISPOSITION,
                "attachment; filename=\"fundbook-export.csv\"",
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Replace the database contents with an uploaded workbook file.
pub async fn post_import(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, Error> {
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| Error::MultipartError(error.to_string()))?
    {
        if field.file_name().is_some() || field.name() == Some("file") {
            data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|error| Error::MultipartError(error.to_string()))?,
            );
            break;
        }
    }

    let data = data.ok_or_else(|| Error::Validation("no file uploaded".to_owned()))?;
    let workbook = Workbook::from_bytes(&data)?;

    let summary = {
        let mut connection = state.db_connection.lock().unwrap();
        import_workbook(&workbook, &mut connection)?
    };

    tracing::info!(
        "Workbook import: {} transactions, {} users created, {} errors",
        summary.transactions_imported,
        summary.users_created,
        summary.errors.len()
    );

    Ok(Json(json!({ "success": true, "summary": summary })).into_response())
}

#[cfg(test)]
mod import_tests {
    use rusqlite::Connection;

    use crate::{
        db::initialize,
        user::test_utils::insert_test_user,
        workbook::{Sheet, Workbook},
    };

    use super::{export_workbook, import_workbook, parse_workbook_date};

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    fn transactions_sheet(rows: Vec<Vec<&str>>) -> Sheet {
        let mut sheet = Sheet::new(
            "Transactions",
            &[
                "Ngày",
                "Username",
                "Người dùng",
                "Danh mục",
                "Loại",
                "Số tiền",
                "Ghi chú",
                "Mục đích quỹ",
            ],
        );
        sheet.rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(str::to_owned).collect())
            .collect();
        sheet
    }

    #[test]
    fn parse_workbook_date_accepts_common_forms() {
        for value in ["15/03/2024", "2024-03-15", "15-03-2024", "2024-03-15 00:00:00"] {
            let date = parse_workbook_date(value).unwrap();
            assert_eq!(date.to_string(), "2024-03-15", "input {value}");
        }
    }

    #[test]
    fn empty_transactions_sheet_clears_the_ledger() {
        let mut connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);
        connection
            .execute(
                "INSERT INTO transactions (user_id, date, type, amount) VALUES (?1, '2024-03-15', 'Chi', 10)",
                (alice.as_i64(),),
            )
            .unwrap();

        let workbook = Workbook {
            sheets: vec![transactions_sheet(vec![])],
        };
        let summary = import_workbook(&workbook, &mut connection).unwrap();

        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM transactions")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(summary.transactions_imported, 0);

        // Users are untouched.
        let users: i64 = connection
            .prepare("SELECT COUNT(*) FROM users")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(users, 1);
    }

    #[test]
    fn missing_users_are_created_with_forced_password_change() {
        let mut connection = get_test_connection();

        let mut users = Sheet::new("Users", &["username", "name", "role", "active"]);
        users.rows = vec![vec![
            "alice".to_owned(),
            "Alice".to_owned(),
            "admin".to_owned(),
            "1".to_owned(),
        ]];

        let workbook = Workbook { sheets: vec![users] };
        let summary = import_workbook(&workbook, &mut connection).unwrap();

        assert_eq!(summary.users_created, 1);

        let (role, must_change): (String, bool) = connection
            .prepare("SELECT role, must_change_password FROM users WHERE username = 'alice'")
            .unwrap()
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!(role, "admin");
        assert!(must_change);
    }

    #[test]
    fn unknown_username_with_display_name_fabricates_one_user() {
        let mut connection = get_test_connection();

        let workbook = Workbook {
            sheets: vec![transactions_sheet(vec![vec![
                "15/03/2024",
                "ghost",
                "Ghost Writer",
                "Ăn uống",
                "Chi",
                "50000",
                "lunch",
                "",
            ]])],
        };

        let summary = import_workbook(&workbook, &mut connection).unwrap();
        assert_eq!(summary.users_created, 1);
        assert_eq!(summary.transactions_imported, 1);

        // A second run resolves the same display name to the account
        // created by the first run instead of fabricating another.
        let summary = import_workbook(&workbook, &mut connection).unwrap();
        assert_eq!(summary.users_created, 0);
        assert_eq!(summary.transactions_imported, 1);

        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM users WHERE name = 'Ghost Writer'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_username_without_display_name_is_skipped() {
        let mut connection = get_test_connection();

        let workbook = Workbook {
            sheets: vec![transactions_sheet(vec![vec![
                "15/03/2024",
                "ghost",
                "",
                "Ăn uống",
                "Chi",
                "10",
                "",
                "",
            ]])],
        };

        let summary = import_workbook(&workbook, &mut connection).unwrap();

        assert_eq!(summary.users_created, 0);
        assert_eq!(summary.transactions_imported, 0);
        assert_eq!(summary.errors.len(), 1);

        let users: i64 = connection
            .prepare("SELECT COUNT(*) FROM users")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(users, 0);
    }

    #[test]
    fn categories_sheet_restores_a_fund_purpose_pair() {
        let mut connection = get_test_connection();

        let mut categories = Sheet::new("Categories", &["name", "type", "subtype", "icon"]);
        categories.rows = vec![
            vec!["Du lịch".to_owned(), "Thu".to_owned(), "fund".to_owned(), "💰".to_owned()],
            vec!["Du lịch".to_owned(), "Chi".to_owned(), "fund".to_owned(), "💰".to_owned()],
        ];

        let workbook = Workbook { sheets: vec![categories] };
        let summary = import_workbook(&workbook, &mut connection).unwrap();

        assert_eq!(summary.categories_created, 2);
        assert!(summary.errors.is_empty());

        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM categories WHERE name = 'Du lịch' AND subtype = 'fund'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn bad_rows_are_collected_without_aborting_the_run() {
        let mut connection = get_test_connection();
        insert_test_user("alice", "Alice", &connection);

        let workbook = Workbook {
            sheets: vec![transactions_sheet(vec![
                vec!["not a date", "alice", "Alice", "Ăn uống", "Chi", "10", "", ""],
                vec!["15/03/2024", "alice", "Alice", "Ăn uống", "Chi", "abc", "", ""],
                vec!["15/03/2024", "alice", "Alice", "Ăn uống", "Chi", "50000", "ok", ""],
            ])],
        };

        let summary = import_workbook(&workbook, &mut connection).unwrap();

        assert_eq!(summary.transactions_imported, 1);
        assert_eq!(summary.errors.len(), 2);
    }

    #[test]
    fn fund_purpose_reference_creates_the_category_pair() {
        let mut connection = get_test_connection();
        insert_test_user("alice", "Alice", &connection);

        let workbook = Workbook {
            sheets: vec![transactions_sheet(vec![vec![
                "15/03/2024",
                "alice",
                "Alice",
                "Thu quỹ",
                "Thu",
                "100000",
                "",
                "Du lịch",
            ]])],
        };

        import_workbook(&workbook, &mut connection).unwrap();

        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM categories WHERE name = 'Du lịch' AND subtype = 'fund'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn export_round_trips_through_import() {
        let mut connection = get_test_connection();
        let alice = insert_test_user("alice", "Alice", &connection);

        connection
            .execute(
                "INSERT INTO categories (name, type, subtype, icon) VALUES ('Ăn uống', 'Chi', 'normal', '🍔')",
                [],
            )
            .unwrap();
        let category_id = connection.last_insert_rowid();
        crate::category::create_fund_purpose("Du lịch", "💰", &connection).unwrap();
        connection
            .execute(
                "INSERT INTO transactions (user_id, date, type, category_id, amount, note, fund_purpose)
                VALUES (?1, '2024-03-15', 'Chi', ?2, 50000, 'lunch, with \"friends\"', '')",
                (alice.as_i64(), category_id),
            )
            .unwrap();

        let workbook = export_workbook(&connection).unwrap();
        let bytes = workbook.to_bytes().unwrap();
        let reparsed = crate::workbook::Workbook::from_bytes(&bytes).unwrap();

        let summary = import_workbook(&reparsed, &mut connection).unwrap();

        assert_eq!(summary.transactions_imported, 1);
        assert!(summary.errors.is_empty());

        // The fund-purpose pair shares a name; both rows must survive.
        let pair: i64 = connection
            .prepare("SELECT COUNT(*) FROM categories WHERE name = 'Du lịch' AND subtype = 'fund'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(pair, 2);

        let (date, amount, note): (String, f64, String) = connection
            .prepare("SELECT date, amount, note FROM transactions")
            .unwrap()
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap();
        assert_eq!(date, "2024-03-15");
        assert_eq!(amount, 50000.0);
        assert_eq!(note, "lunch, with \"friends\"");
    }
}
