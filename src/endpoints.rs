//! The API endpoint URIs.

/// Log in with a username and password.
pub const LOG_IN: &str = "/api/login";
/// Clear the auth cookies.
pub const LOG_OUT: &str = "/api/logout";
/// Change the calling user's password.
pub const CHANGE_PASSWORD: &str = "/api/change-password";

/// The dashboard summary for the calling user.
pub const DASHBOARD: &str = "/api/dashboard";
/// The calendar view of the calling user's transactions.
pub const CALENDAR: &str = "/api/calendar";

/// Create a transaction.
pub const TRANSACTIONS: &str = "/api/transactions";
/// Update or delete a single transaction.
pub const TRANSACTION: &str = "/api/transactions/{transaction_id}";

/// List (by type) or create categories.
pub const CATEGORIES: &str = "/api/categories";
/// Update or delete a single normal category.
pub const CATEGORY: &str = "/api/categories/{category_id}";
/// The distinct icons in use across all categories.
pub const ICONS: &str = "/api/icons";

/// List or create fund purposes (paired Thu+Chi fund categories).
pub const FUND_PURPOSES: &str = "/api/fund-purposes";
/// Rename or delete a fund purpose across both of its category rows.
pub const FUND_PURPOSE: &str = "/api/fund-purposes/{name}";
/// The pooled fund balances for the calling user's linked users.
pub const FUND_SUMMARY: &str = "/api/fund-summary";

/// List the calling user's fund groups, or create one.
pub const FUND_GROUPS: &str = "/api/fund-groups";
/// All fund groups with their members (admin only).
pub const ALL_FUND_GROUPS: &str = "/api/fund-groups/all";
/// Rename or delete a single fund group.
pub const FUND_GROUP: &str = "/api/fund-groups/{group_id}";
/// Add a member to a fund group.
pub const FUND_GROUP_MEMBERS: &str = "/api/fund-groups/{group_id}/members";
/// Remove a member from a fund group.
pub const FUND_GROUP_MEMBER: &str = "/api/fund-groups/{group_id}/members/{user_id}";

/// The per-year report.
pub const YEARLY_REPORT: &str = "/api/reports/yearly";
/// The per-month report for the current year.
pub const MONTHLY_REPORT: &str = "/api/reports/monthly";
/// The per-day report for the current month.
pub const DAILY_REPORT: &str = "/api/reports/daily";
/// The expense-by-category breakdown for the current month.
pub const CATEGORY_BREAKDOWN: &str = "/api/reports/categories";

/// List or create users (admin only).
pub const USERS: &str = "/api/users";
/// Update or delete a single user by username (admin only).
pub const USER: &str = "/api/users/{username}";

/// Download the full-database workbook export (admin only).
pub const EXPORT: &str = "/api/export";
/// Restore the database from an uploaded workbook (admin only).
pub const IMPORT: &str = "/api/import";
