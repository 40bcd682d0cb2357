//! Assembles the API router.

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use crate::{
    AppState, auth, backup, category, endpoints, fund, fund_group, report, transaction, user,
};

/// Build the application router.
///
/// Three tiers: the login endpoints are public, everything else
/// requires a valid auth cookie, and the management endpoints
/// additionally require the admin role.
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            endpoints::USERS,
            get(user::get_users).post(user::create_user),
        )
        .route(
            endpoints::USER,
            put(user::update_user).delete(user::delete_user),
        )
        .route(endpoints::ALL_FUND_GROUPS, get(fund_group::get_all_fund_groups))
        .route(endpoints::CATEGORIES, post(category::create_category))
        .route(
            endpoints::CATEGORY,
            put(category::update_category).delete(category::delete_category),
        )
        .route(
            endpoints::FUND_PURPOSES,
            post(category::create_fund_purpose_endpoint),
        )
        .route(
            endpoints::FUND_PURPOSE,
            put(category::update_fund_purpose).delete(category::delete_fund_purpose),
        )
        .route(endpoints::EXPORT, get(backup::get_export))
        .route(endpoints::IMPORT, post(backup::post_import))
        .route(endpoints::FUND_GROUPS, post(fund_group::create_fund_group))
        .route(
            endpoints::FUND_GROUP,
            put(fund_group::update_fund_group).delete(fund_group::delete_fund_group),
        )
        .route(
            endpoints::FUND_GROUP_MEMBERS,
            post(fund_group::add_fund_group_member),
        )
        .route(
            endpoints::FUND_GROUP_MEMBER,
            delete(fund_group::remove_fund_group_member),
        )
        .route_layer(middleware::from_fn(auth::require_admin));

    let protected_routes = Router::new()
        .route(endpoints::CHANGE_PASSWORD, post(user::change_password))
        .route(endpoints::DASHBOARD, get(report::get_dashboard))
        .route(endpoints::CALENDAR, get(transaction::get_calendar))
        .route(endpoints::TRANSACTIONS, post(transaction::create_transaction))
        .route(
            endpoints::TRANSACTION,
            put(transaction::update_transaction).delete(transaction::delete_transaction),
        )
        .route(endpoints::CATEGORIES, get(category::get_categories))
        .route(endpoints::ICONS, get(category::get_icons))
        .route(
            endpoints::FUND_PURPOSES,
            get(category::get_fund_purposes_endpoint),
        )
        .route(endpoints::FUND_SUMMARY, get(fund::get_fund_summary))
        .route(endpoints::FUND_GROUPS, get(fund_group::get_fund_groups))
        .route(endpoints::YEARLY_REPORT, get(report::get_yearly_report))
        .route(endpoints::MONTHLY_REPORT, get(report::get_monthly_report))
        .route(endpoints::DAILY_REPORT, get(report::get_daily_report))
        .route(
            endpoints::CATEGORY_BREAKDOWN,
            get(report::get_category_breakdown),
        )
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::auth_guard));

    Router::new()
        .route(endpoints::LOG_IN, post(auth::post_log_in))
        .route(endpoints::LOG_OUT, get(auth::get_log_out))
        .merge(protected_routes)
        .with_state(state)
}
