use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::handlers::{self, AppState};
use crate::{
    appointment_handler, customer_handler, dashboard_handler, package_handler, staff_handler,
    storefront_handler,
};

fn back_office_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Platform
        .route(
            "/api/v1/plans",
            get(handlers::list_plans).post(handlers::create_plan),
        )
        .route("/api/v1/plans/:plan_id", put(handlers::update_plan))
        .route(
            "/api/v1/establishments",
            get(handlers::list_establishments).post(handlers::create_establishment),
        )
        .route(
            "/api/v1/establishments/:eid",
            get(handlers::get_establishment).put(handlers::update_establishment),
        )
        .route(
            "/api/v1/establishments/:eid/tokens",
            get(handlers::list_tokens).post(handlers::issue_token),
        )
        .route(
            "/api/v1/establishments/:eid/tokens/:token_id",
            delete(handlers::revoke_token),
        )
        .route(
            "/api/v1/establishments/:eid/subscription",
            get(handlers::get_subscription).put(handlers::put_subscription),
        )
        .route(
            "/api/v1/establishments/:eid/subscription/cancel",
            post(handlers::cancel_subscription),
        )
        // Catalog
        .route(
            "/api/v1/establishments/:eid/categories",
            get(handlers::list_categories).post(handlers::create_category),
        )
        .route(
            "/api/v1/establishments/:eid/categories/:category_id",
            put(handlers::update_category).delete(handlers::delete_category),
        )
        .route(
            "/api/v1/establishments/:eid/services",
            get(handlers::list_services).post(handlers::create_service),
        )
        .route(
            "/api/v1/establishments/:eid/services/:service_id",
            get(handlers::get_service)
                .put(handlers::update_service)
                .delete(handlers::delete_service),
        )
        // Staff
        .route(
            "/api/v1/establishments/:eid/employees",
            get(staff_handler::list_employees).post(staff_handler::create_employee),
        )
        .route(
            "/api/v1/establishments/:eid/employees/:employee_id",
            get(staff_handler::get_employee)
                .put(staff_handler::update_employee)
                .delete(staff_handler::delete_employee),
        )
        .route(
            "/api/v1/establishments/:eid/employees/:employee_id/services",
            put(staff_handler::set_employee_services),
        )
        .route(
            "/api/v1/establishments/:eid/employees/:employee_id/working-hours",
            get(staff_handler::get_working_hours).put(staff_handler::replace_working_hours),
        )
        .route(
            "/api/v1/establishments/:eid/blocks",
            get(staff_handler::list_blocks).post(staff_handler::create_block),
        )
        .route(
            "/api/v1/establishments/:eid/blocks/:block_id",
            delete(staff_handler::delete_block),
        )
        // Customers
        .route(
            "/api/v1/establishments/:eid/customers",
            get(customer_handler::list_customers).post(customer_handler::create_customer),
        )
        .route(
            "/api/v1/establishments/:eid/customers/:customer_id",
            get(customer_handler::get_customer)
                .put(customer_handler::update_customer)
                .delete(customer_handler::delete_customer),
        )
        .route(
            "/api/v1/establishments/:eid/customers/:customer_id/loyalty",
            get(customer_handler::get_customer_loyalty),
        )
        .route(
            "/api/v1/establishments/:eid/customers/:customer_id/packages",
            get(customer_handler::list_customer_packages).post(customer_handler::sell_package),
        )
        // Appointments
        .route(
            "/api/v1/establishments/:eid/availability",
            get(appointment_handler::get_availability),
        )
        .route(
            "/api/v1/establishments/:eid/appointments",
            get(appointment_handler::list_appointments)
                .post(appointment_handler::create_appointment),
        )
        .route(
            "/api/v1/establishments/:eid/appointments/:appointment_id",
            get(appointment_handler::get_appointment),
        )
        .route(
            "/api/v1/establishments/:eid/appointments/:appointment_id/reschedule",
            post(appointment_handler::reschedule_appointment),
        )
        .route(
            "/api/v1/establishments/:eid/appointments/:appointment_id/checkin",
            post(appointment_handler::checkin_appointment),
        )
        .route(
            "/api/v1/establishments/:eid/appointments/:appointment_id/cancel",
            post(appointment_handler::cancel_appointment),
        )
        // Packages & loyalty
        .route(
            "/api/v1/establishments/:eid/packages",
            get(package_handler::list_packages).post(package_handler::create_package),
        )
        .route(
            "/api/v1/establishments/:eid/packages/:package_id",
            get(package_handler::get_package)
                .put(package_handler::update_package)
                .delete(package_handler::delete_package),
        )
        .route(
            "/api/v1/establishments/:eid/loyalty",
            get(package_handler::get_loyalty_program).put(package_handler::put_loyalty_program),
        )
        .route(
            "/api/v1/establishments/:eid/loyalty/rules",
            get(package_handler::list_loyalty_rules).put(package_handler::put_loyalty_rule),
        )
        .route(
            "/api/v1/establishments/:eid/loyalty/rules/:service_id",
            delete(package_handler::delete_loyalty_rule),
        )
        // Dashboard
        .route(
            "/api/v1/establishments/:eid/dashboard/summary",
            get(dashboard_handler::summary),
        )
        .route(
            "/api/v1/establishments/:eid/dashboard/average-ticket",
            get(dashboard_handler::average_ticket),
        )
        .route(
            "/api/v1/establishments/:eid/dashboard/top-services",
            get(dashboard_handler::top_services),
        )
        .route(
            "/api/v1/establishments/:eid/dashboard/revenue-by-day",
            get(dashboard_handler::revenue_by_day),
        )
        .route(
            "/api/v1/establishments/:eid/dashboard/employee-performance",
            get(dashboard_handler::employee_performance),
        )
}

fn storefront_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/public/:slug", get(storefront_handler::get_profile))
        .route(
            "/api/v1/public/:slug/services",
            get(storefront_handler::list_services),
        )
        .route(
            "/api/v1/public/:slug/employees",
            get(storefront_handler::list_employees),
        )
        .route(
            "/api/v1/public/:slug/availability",
            get(storefront_handler::get_availability),
        )
        .route(
            "/api/v1/public/:slug/appointments",
            post(storefront_handler::book),
        )
        .route(
            "/api/v1/public/:slug/appointments/:appointment_id/cancel",
            post(storefront_handler::cancel),
        )
        .route(
            "/api/v1/public/:slug/customer",
            get(storefront_handler::customer_overview),
        )
}

/// Nanoseconds between token refills for a sustained `rate` requests per second.
fn replenish_interval_nanos(rate: u64) -> u64 {
    (1_000_000_000 / rate.max(1)).max(1)
}

/// Builds the application router.
///
/// `/health` and the API docs sit outside the per-IP rate limit. The limit
/// keys on the client IP, so serving needs
/// `into_make_service_with_connect_info::<SocketAddr>()` when
/// `rate_limited` is set.
pub fn build_router(state: Arc<AppState>, rate_limited: bool) -> anyhow::Result<Router> {
    let max_body_bytes = state.config.max_body_bytes;

    let mut api = back_office_routes()
        .merge(storefront_routes())
        .layer(RequestBodyLimitLayer::new(max_body_bytes));

    if rate_limited {
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_nanosecond(replenish_interval_nanos(state.config.rate_limit_per_second))
                .burst_size(state.config.rate_limit_burst)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?,
        );
        api = api.layer(ServiceBuilder::new().layer(GovernorLayer {
            config: governor_conf,
        }));
        tracing::info!(
            "Rate limiting enabled: {}/s per IP, burst {}",
            state.config.rate_limit_per_second,
            state.config.rate_limit_burst
        );
    }

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_interval_follows_the_configured_rate() {
        assert_eq!(replenish_interval_nanos(1), 1_000_000_000);
        assert_eq!(replenish_interval_nanos(10), 100_000_000);
        assert_eq!(replenish_interval_nanos(0), 1_000_000_000);
        assert_eq!(replenish_interval_nanos(u64::MAX), 1);
    }
}
