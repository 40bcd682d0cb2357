//! The category registry: category types and subtypes, the icon display
//! convention, resolve-or-create lookups, and the category management
//! endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{AppState, Error, db::DatabaseID};

/// The icon given to categories created implicitly during entry or
/// import when no icon hint is available.
pub const DEFAULT_ICON: &str = "📝";

/// The icon given to fund-purpose categories created implicitly.
pub const FUND_ICON: &str = "💰";

/// The category name marking a transfer from personal money into a fund.
///
/// Entries of type `Thu` in this category count toward personal expense
/// in reports, since the money leaves the personal pool.
pub const FUND_CONTRIBUTION_CATEGORY: &str = "Thu quỹ";

/// The category name marking spending out of a fund.
///
/// Entries of type `Chi` in this category are excluded from personal
/// totals; they are already accounted for in the fund balance.
pub const FUND_WITHDRAWAL_CATEGORY: &str = "Chi quỹ";

/// Whether a category (or transaction) records income or expense.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryType {
    /// Income.
    Thu,
    /// Expense.
    Chi,
}

impl CategoryType {
    /// The string stored in the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::Thu => "Thu",
            CategoryType::Chi => "Chi",
        }
    }

    /// Parse a type string case-insensitively, defaulting to [CategoryType::Chi].
    pub fn from_str_or_default(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("thu") {
            CategoryType::Thu
        } else {
            CategoryType::Chi
        }
    }

    /// Parse a type string case-insensitively, rejecting unknown values.
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value.trim() {
            value if value.eq_ignore_ascii_case("thu") => Ok(CategoryType::Thu),
            value if value.eq_ignore_ascii_case("chi") => Ok(CategoryType::Chi),
            value => Err(Error::Validation(format!(
                "\"{value}\" is not a valid transaction type, expected \"Thu\" or \"Chi\""
            ))),
        }
    }
}

/// Whether a category is an ordinary income/expense bucket or a fund
/// purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySubtype {
    /// An ordinary income/expense category.
    Normal,
    /// A fund purpose. Fund purposes exist as a Thu+Chi pair of rows
    /// sharing one name.
    Fund,
}

impl CategorySubtype {
    /// The string stored in the `subtype` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategorySubtype::Normal => "normal",
            CategorySubtype::Fund => "fund",
        }
    }

    /// Parse a subtype string, defaulting to [CategorySubtype::Normal].
    pub fn from_db(value: &str) -> Self {
        if value == "fund" {
            CategorySubtype::Fund
        } else {
            CategorySubtype::Normal
        }
    }
}

/// A category for income and expenses, e.g. 'Ăn uống', 'Lương'.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    /// The category's ID in the application database.
    pub id: DatabaseID,
    /// The category name, without the icon.
    pub name: String,
    /// Income or expense.
    pub category_type: CategoryType,
    /// Ordinary category or fund purpose.
    pub subtype: CategorySubtype,
    /// The display glyph, possibly empty.
    pub icon: String,
}

impl Category {
    /// The display string for this category: `"{icon} {name}"` when an
    /// icon is set, otherwise just the name.
    pub fn display(&self) -> String {
        format_display(&self.icon, &self.name)
    }
}

pub(crate) fn map_category_row(row: &Row) -> Result<Category, rusqlite::Error> {
    let category_type: String = row.get(2)?;
    let subtype: String = row.get(3)?;
    let icon: Option<String> = row.get(4)?;

    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        category_type: CategoryType::from_str_or_default(&category_type),
        subtype: CategorySubtype::from_db(&subtype),
        icon: icon.unwrap_or_default(),
    })
}

/// Format an icon and name into the display convention `"{icon} {name}"`.
pub fn format_display(icon: &str, name: &str) -> String {
    if icon.is_empty() {
        name.to_owned()
    } else {
        format!("{icon} {name}")
    }
}

/// Split a display string back into `(icon, name)`.
///
/// The boundary is the first Unicode letter: everything before it is the
/// icon, the rest (trimmed) is the name. A string with no letters is all
/// name and no icon.
pub fn split_display(display: &str) -> (String, String) {
    match display.char_indices().find(|(_, c)| c.is_alphabetic()) {
        Some((index, _)) => (
            display[..index].trim().to_owned(),
            display[index..].trim().to_owned(),
        ),
        None => (String::new(), display.trim().to_owned()),
    }
}

/// Look up a category by `(name, type)`, creating a `normal` subtype row
/// with `icon_hint` if no match exists.
///
/// The lookup deliberately ignores the subtype: a fund category with the
/// same name and type satisfies the lookup, and the first match by ID
/// wins. Creation, by contrast, is unique on `(name, type, subtype)`.
///
/// # Errors
/// Returns an error if the insert or lookup fails for SQL reasons.
pub fn resolve_or_create(
    name: &str,
    category_type: CategoryType,
    icon_hint: &str,
    connection: &Connection,
) -> Result<DatabaseID, Error> {
    let existing: Option<DatabaseID> = connection
        .prepare("SELECT id FROM categories WHERE name = ?1 AND type = ?2 ORDER BY id LIMIT 1")?
        .query_row((name, category_type.as_str()), |row| row.get(0))
        .map(Some)
        .or_else(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            error => Err(error),
        })?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let insert_result = connection.execute(
        "INSERT INTO categories (name, type, subtype, icon) VALUES (?1, ?2, 'normal', ?3)",
        (name, category_type.as_str(), icon_hint),
    );

    match insert_result.map_err(Error::from) {
        Ok(_) => Ok(connection.last_insert_rowid()),
        // A concurrent insert beat us to it. Re-fetch and use that row.
        Err(Error::AlreadyExists(_)) => connection
            .prepare("SELECT id FROM categories WHERE name = ?1 AND type = ?2 ORDER BY id LIMIT 1")?
            .query_row((name, category_type.as_str()), |row| row.get(0))
            .map_err(|error| error.into()),
        Err(error) => Err(error),
    }
}

/// Create the Thu+Chi pair of fund-subtype category rows for a fund
/// purpose.
///
/// Each insert is best-effort: a row that already exists is left alone.
///
/// # Errors
/// Returns an error only for unexpected SQL failures, not duplicates.
pub fn create_fund_purpose(name: &str, icon: &str, connection: &Connection) -> Result<(), Error> {
    for category_type in [CategoryType::Thu, CategoryType::Chi] {
        let result = connection.execute(
            "INSERT INTO categories (name, type, subtype, icon) VALUES (?1, ?2, 'fund', ?3)",
            (name, category_type.as_str(), icon),
        );

        match result.map_err(Error::from) {
            Ok(_) | Err(Error::AlreadyExists(_)) => {}
            Err(error) => return Err(error),
        }
    }

    Ok(())
}

/// The distinct fund purposes: `(name, icon)` pairs from fund-subtype
/// category rows.
pub fn get_fund_purposes(connection: &Connection) -> Result<Vec<(String, String)>, Error> {
    connection
        .prepare(
            "SELECT DISTINCT name, COALESCE(icon, '') FROM categories WHERE subtype = 'fund'",
        )?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .map(|row| row.map_err(|error| error.into()))
        .collect()
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// Query parameters selecting a category type.
#[derive(Debug, Deserialize)]
pub struct CategoryTypeQuery {
    /// `Thu` or `Chi`, defaulting to `Chi`.
    #[serde(rename = "type", default)]
    pub category_type: Option<String>,
}

/// List normal categories of one type as display strings.
pub async fn get_categories(
    State(state): State<AppState>,
    Query(query): Query<CategoryTypeQuery>,
) -> Result<Response, Error> {
    let category_type =
        CategoryType::from_str_or_default(query.category_type.as_deref().unwrap_or("Chi"));

    let connection = state.db_connection.lock().unwrap();
    let categories = connection
        .prepare(
            "SELECT id, name, type, subtype, icon FROM categories
            WHERE type = ?1 AND subtype = 'normal' ORDER BY id",
        )?
        .query_map((category_type.as_str(),), map_category_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let categories: Vec<serde_json::Value> = categories
        .iter()
        .map(|category| json!({ "id": category.id, "value": category.display() }))
        .collect();

    Ok(Json(json!({ "categories": categories })).into_response())
}

/// The request body for creating or updating a category.
#[derive(Debug, Deserialize)]
pub struct CategoryForm {
    /// The category name, without the icon.
    pub name: String,
    /// `Thu` or `Chi`. Ignored on update.
    #[serde(rename = "type", default)]
    pub category_type: Option<String>,
    /// The display glyph.
    #[serde(default)]
    pub icon: String,
}

/// Create a category.
///
/// The `type` field accepts `Thu`, `Chi`, or `quy`; the latter creates
/// a fund purpose (the Thu+Chi pair of fund rows) instead of a normal
/// category.
pub async fn create_category(
    State(state): State<AppState>,
    Json(form): Json<CategoryForm>,
) -> Result<Response, Error> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(Error::Validation("category name must not be empty".to_owned()));
    }

    let kind = form.category_type.as_deref().unwrap_or("Chi");
    let icon = form.icon.trim();

    if kind.trim().eq_ignore_ascii_case("quy") {
        let connection = state.db_connection.lock().unwrap();
        create_fund_purpose(name, icon, &connection)?;

        return Ok((
            StatusCode::CREATED,
            Json(json!({ "success": true, "message": format!("created fund purpose \"{name}\"") })),
        )
            .into_response());
    }

    let category_type = CategoryType::parse(kind)?;

    let connection = state.db_connection.lock().unwrap();

    let exists: bool = connection
        .prepare(
            "SELECT EXISTS(SELECT 1 FROM categories
            WHERE name = ?1 AND type = ?2 AND subtype = 'normal')",
        )?
        .query_row((name, category_type.as_str()), |row| row.get(0))?;

    if exists {
        return Err(Error::AlreadyExists(format!("the category \"{name}\"")));
    }

    connection.execute(
        "INSERT INTO categories (name, type, subtype, icon) VALUES (?1, ?2, 'normal', ?3)",
        (name, category_type.as_str(), icon),
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": format!("created category \"{name}\"") })),
    )
        .into_response())
}

/// Rename or re-icon a normal category by ID.
pub async fn update_category(
    State(state): State<AppState>,
    Path(category_id): Path<DatabaseID>,
    Json(form): Json<CategoryForm>,
) -> Result<Response, Error> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(Error::Validation("category name must not be empty".to_owned()));
    }

    let connection = state.db_connection.lock().unwrap();
    let changed = connection.execute(
        "UPDATE categories SET name = ?1, icon = ?2 WHERE id = ?3",
        (name, form.icon.trim(), category_id),
    )?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(Json(json!({ "success": true, "message": "category updated" })).into_response())
}

/// Delete a normal category by ID.
pub async fn delete_category(
    State(state): State<AppState>,
    Path(category_id): Path<DatabaseID>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let changed = connection.execute("DELETE FROM categories WHERE id = ?1", (category_id,))?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(Json(json!({ "success": true, "message": "category deleted" })).into_response())
}

/// List the distinct fund purposes, optionally filtered by type.
pub async fn get_fund_purposes_endpoint(
    State(state): State<AppState>,
    Query(query): Query<CategoryTypeQuery>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();

    let purposes: Vec<(String, String)> = match query.category_type.as_deref() {
        Some(value) => {
            let category_type = CategoryType::parse(value)?;
            connection
                .prepare(
                    "SELECT name, COALESCE(icon, '') FROM categories
                    WHERE subtype = 'fund' AND type = ?1",
                )?
                .query_map((category_type.as_str(),), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?
        }
        None => get_fund_purposes(&connection)?,
    };

    let purposes: Vec<serde_json::Value> = purposes
        .into_iter()
        .map(|(name, icon)| json!({ "name": name, "icon": icon }))
        .collect();

    Ok(Json(json!({ "purposes": purposes })).into_response())
}

/// Create a fund purpose: a Thu+Chi pair of fund category rows.
pub async fn create_fund_purpose_endpoint(
    State(state): State<AppState>,
    Json(form): Json<CategoryForm>,
) -> Result<Response, Error> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(Error::Validation("fund purpose name must not be empty".to_owned()));
    }

    let connection = state.db_connection.lock().unwrap();
    create_fund_purpose(name, form.icon.trim(), &connection)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": format!("created fund purpose \"{name}\"") })),
    )
        .into_response())
}

/// Rename or re-icon a fund purpose across both of its category rows.
pub async fn update_fund_purpose(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(form): Json<CategoryForm>,
) -> Result<Response, Error> {
    let new_name = form.name.trim();
    if new_name.is_empty() {
        return Err(Error::Validation("fund purpose name must not be empty".to_owned()));
    }

    let connection = state.db_connection.lock().unwrap();
    let changed = connection.execute(
        "UPDATE categories SET name = ?1, icon = ?2 WHERE subtype = 'fund' AND name = ?3",
        (new_name, form.icon.trim(), name.as_str()),
    )?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(Json(json!({ "success": true, "message": "fund purpose updated" })).into_response())
}

/// Delete a fund purpose: both of its category rows.
pub async fn delete_fund_purpose(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let changed = connection.execute(
        "DELETE FROM categories WHERE subtype = 'fund' AND name = ?1",
        (name.as_str(),),
    )?;

    if changed == 0 {
        return Err(Error::NotFound);
    }

    Ok(Json(json!({ "success": true, "message": "fund purpose deleted" })).into_response())
}

/// List the distinct icons in use across all categories.
pub async fn get_icons(State(state): State<AppState>) -> Result<Response, Error> {
    let connection = state.db_connection.lock().unwrap();
    let icons = connection
        .prepare(
            "SELECT DISTINCT icon FROM categories WHERE icon IS NOT NULL AND icon != ''",
        )?
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(json!({ "icons": icons })).into_response())
}

#[cfg(test)]
mod display_tests {
    use super::{format_display, split_display};

    #[test]
    fn split_display_separates_icon_and_name() {
        let (icon, name) = split_display("🍔 Ăn uống");

        assert_eq!(icon, "🍔");
        assert_eq!(name, "Ăn uống");
    }

    #[test]
    fn split_display_handles_accented_first_letter() {
        let (icon, name) = split_display("💰 Ăn vặt");

        assert_eq!(icon, "💰");
        assert_eq!(name, "Ăn vặt");
    }

    #[test]
    fn split_display_without_icon_returns_name_only() {
        let (icon, name) = split_display("Lương");

        assert_eq!(icon, "");
        assert_eq!(name, "Lương");
    }

    #[test]
    fn split_display_without_letters_is_all_name() {
        let (icon, name) = split_display("🍔🍟");

        assert_eq!(icon, "");
        assert_eq!(name, "🍔🍟");
    }

    #[test]
    fn format_display_round_trips() {
        let display = format_display("🍔", "Ăn uống");

        assert_eq!(display, "🍔 Ăn uống");
        assert_eq!(split_display(&display), ("🍔".to_owned(), "Ăn uống".to_owned()));
    }

    #[test]
    fn format_display_with_empty_icon_is_bare_name() {
        assert_eq!(format_display("", "Lương"), "Lương");
    }
}

#[cfg(test)]
mod registry_tests {
    use rusqlite::Connection;

    use crate::db::initialize;

    use super::{CategoryType, create_fund_purpose, get_fund_purposes, resolve_or_create};

    fn get_test_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    #[test]
    fn resolve_or_create_is_idempotent() {
        let connection = get_test_connection();

        let first = resolve_or_create("Ăn uống", CategoryType::Chi, "🍔", &connection).unwrap();
        let second = resolve_or_create("Ăn uống", CategoryType::Chi, "🍔", &connection).unwrap();

        assert_eq!(first, second);

        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM categories WHERE name = 'Ăn uống'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn resolve_or_create_distinguishes_types() {
        let connection = get_test_connection();

        let chi = resolve_or_create("Quà", CategoryType::Chi, "", &connection).unwrap();
        let thu = resolve_or_create("Quà", CategoryType::Thu, "", &connection).unwrap();

        assert_ne!(chi, thu);
    }

    #[test]
    fn resolve_or_create_matches_fund_rows_by_name_and_type() {
        let connection = get_test_connection();
        create_fund_purpose("Du lịch", "✈️", &connection).unwrap();

        let resolved = resolve_or_create("Du lịch", CategoryType::Chi, "", &connection).unwrap();

        // The existing fund row wins; no normal row is created.
        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM categories WHERE name = 'Du lịch' AND type = 'Chi'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert!(resolved > 0);
    }

    #[test]
    fn create_fund_purpose_creates_thu_and_chi_rows() {
        let connection = get_test_connection();

        create_fund_purpose("Du lịch", "✈️", &connection).unwrap();

        let count: i64 = connection
            .prepare("SELECT COUNT(*) FROM categories WHERE name = 'Du lịch' AND subtype = 'fund'")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn create_fund_purpose_ignores_duplicates() {
        let connection = get_test_connection();

        create_fund_purpose("Du lịch", "✈️", &connection).unwrap();
        create_fund_purpose("Du lịch", "✈️", &connection).unwrap();

        let purposes = get_fund_purposes(&connection).unwrap();
        assert_eq!(purposes, vec![("Du lịch".to_owned(), "✈️".to_owned())]);
    }
}
