//! Dashboard metrics over an inclusive `start_date..=end_date` range.
//!
//! Revenue counts money actually received: completed appointments settled
//! with a monetary method. Package and loyalty settlements contribute zero
//! and are excluded from the average ticket.

use crate::api_models::*;
use crate::auth::AuthContext;
use crate::errors::AppError;
use crate::handlers::{load_establishment, AppState};
use crate::money::Money;
use crate::validation;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_TOP_LIMIT: i64 = 5;
const MAX_TOP_LIMIT: i64 = 50;

const MONETARY: &str = "a.payment_method NOT IN ('package', 'loyalty')";

/// Mean ticket in cents, rounded half up. Zero when nothing was completed.
pub fn average_ticket_cents(revenue_cents: i64, completed: i64) -> i64 {
    if completed <= 0 {
        return 0;
    }
    (revenue_cents + completed / 2) / completed
}

fn top_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_TOP_LIMIT).clamp(1, MAX_TOP_LIMIT)
}

async fn scoped_range(
    state: &AppState,
    auth: &AuthContext,
    eid: Uuid,
    params: &DateRangeQuery,
) -> Result<(i32, NaiveDate, NaiveDate), AppError> {
    let establishment = load_establishment(state, auth, eid).await?;
    let (start, end) = validation::parse_date_range(&params.start_date, &params.end_date)?;
    Ok((establishment.utc_offset_minutes, start, end))
}

/// Revenue and number of monetary completed appointments in range.
async fn revenue_in_range(
    db: &PgPool,
    eid: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(i64, i64), AppError> {
    let sql = format!(
        r#"
        SELECT COALESCE(SUM(a.paid_amount_cents), 0)::BIGINT, COUNT(*)
        FROM appointments a
        WHERE a.establishment_id = $1
          AND a.date BETWEEN $2 AND $3
          AND a.status = 'completed'
          AND {}
        "#,
        MONETARY
    );
    let row = sqlx::query_as::<_, (i64, i64)>(&sql)
        .bind(eid)
        .bind(start)
        .bind(end)
        .fetch_one(db)
        .await?;
    Ok(row)
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    status: String,
    count: i64,
}

/// GET /api/v1/establishments/:eid/dashboard/summary
pub async fn summary(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<DateRangeQuery>,
) -> Result<Json<DashboardSummary>, AppError> {
    tracing::info!("GET /establishments/{}/dashboard/summary - {:?}", eid, params);
    let (offset, start, end) = scoped_range(&state, &auth, eid, &params).await?;

    let (revenue, paid_completed) = revenue_in_range(&state.db, eid, start, end).await?;

    let mut appointments = StatusCounts {
        scheduled: 0,
        completed: 0,
        canceled: 0,
    };
    let rows = sqlx::query_as::<_, StatusRow>(
        r#"
        SELECT status, COUNT(*) AS count FROM appointments
        WHERE establishment_id = $1 AND date BETWEEN $2 AND $3
        GROUP BY status
        "#,
    )
    .bind(eid)
    .bind(start)
    .bind(end)
    .fetch_all(&state.db)
    .await?;
    for row in rows {
        match row.status.as_str() {
            "scheduled" => appointments.scheduled = row.count,
            "completed" => appointments.completed = row.count,
            "canceled" => appointments.canceled = row.count,
            other => tracing::warn!("Unexpected appointment status '{}'", other),
        }
    }

    let (package_sales,) = sqlx::query_as::<_, (i64,)>(
        r#"
        SELECT COALESCE(SUM(paid_amount_cents), 0)::BIGINT FROM customer_service_packages
        WHERE establishment_id = $1
          AND (purchased_at AT TIME ZONE 'UTC' + make_interval(mins => $4))::date BETWEEN $2 AND $3
        "#,
    )
    .bind(eid)
    .bind(start)
    .bind(end)
    .bind(offset)
    .fetch_one(&state.db)
    .await?;

    let (new_customers,) = sqlx::query_as::<_, (i64,)>(
        r#"
        SELECT COUNT(*) FROM customers
        WHERE establishment_id = $1
          AND (created_at AT TIME ZONE 'UTC' + make_interval(mins => $4))::date BETWEEN $2 AND $3
        "#,
    )
    .bind(eid)
    .bind(start)
    .bind(end)
    .bind(offset)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(DashboardSummary {
        start_date: start,
        end_date: end,
        revenue: Money(revenue),
        package_sales: Money(package_sales),
        appointments,
        average_ticket: Money(average_ticket_cents(revenue, paid_completed)),
        new_customers,
    }))
}

/// GET /api/v1/establishments/:eid/dashboard/average-ticket
///
/// Returns `"0.00"` when no paid appointment was completed in range.
pub async fn average_ticket(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<DateRangeQuery>,
) -> Result<Json<AverageTicketResponse>, AppError> {
    tracing::info!("GET /establishments/{}/dashboard/average-ticket - {:?}", eid, params);
    let (_, start, end) = scoped_range(&state, &auth, eid, &params).await?;

    let (revenue, completed) = revenue_in_range(&state.db, eid, start, end).await?;

    Ok(Json(AverageTicketResponse {
        average_ticket: Money(average_ticket_cents(revenue, completed)),
        completed,
        revenue: Money(revenue),
    }))
}

#[derive(sqlx::FromRow)]
struct TopServiceRow {
    service_id: Uuid,
    service_name: String,
    completed: i64,
    revenue: i64,
}

/// GET /api/v1/establishments/:eid/dashboard/top-services
///
/// Services ranked by completed appointments, then revenue.
pub async fn top_services(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<DateRangeQuery>,
) -> Result<Json<Vec<TopService>>, AppError> {
    tracing::info!("GET /establishments/{}/dashboard/top-services - {:?}", eid, params);
    let (_, start, end) = scoped_range(&state, &auth, eid, &params).await?;

    let rows = sqlx::query_as::<_, TopServiceRow>(
        r#"
        SELECT s.id AS service_id,
               s.name AS service_name,
               COUNT(*) AS completed,
               COALESCE(SUM(a.paid_amount_cents), 0)::BIGINT AS revenue
        FROM appointments a
        JOIN services s ON s.id = a.service_id
        WHERE a.establishment_id = $1
          AND a.date BETWEEN $2 AND $3
          AND a.status = 'completed'
        GROUP BY s.id, s.name
        ORDER BY completed DESC, revenue DESC, s.name
        LIMIT $4
        "#,
    )
    .bind(eid)
    .bind(start)
    .bind(end)
    .bind(top_limit(params.limit))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|r| TopService {
                service_id: r.service_id,
                service_name: r.service_name,
                completed: r.completed,
                revenue: Money(r.revenue),
            })
            .collect(),
    ))
}

#[derive(sqlx::FromRow)]
struct DailyRow {
    date: NaiveDate,
    completed: i64,
    revenue: i64,
}

/// GET /api/v1/establishments/:eid/dashboard/revenue-by-day
///
/// One entry per day in range, zero-filled.
pub async fn revenue_by_day(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<DateRangeQuery>,
) -> Result<Json<Vec<DailyRevenue>>, AppError> {
    tracing::info!("GET /establishments/{}/dashboard/revenue-by-day - {:?}", eid, params);
    let (_, start, end) = scoped_range(&state, &auth, eid, &params).await?;

    let sql = format!(
        r#"
        SELECT d::date AS date,
               COUNT(a.id) AS completed,
               COALESCE(SUM(a.paid_amount_cents), 0)::BIGINT AS revenue
        FROM generate_series($2::timestamp, $3::timestamp, INTERVAL '1 day') AS d
        LEFT JOIN appointments a
               ON a.date = d::date
              AND a.establishment_id = $1
              AND a.status = 'completed'
              AND {}
        GROUP BY d
        ORDER BY d
        "#,
        MONETARY
    );

    let rows = sqlx::query_as::<_, DailyRow>(&sql)
        .bind(eid)
        .bind(start)
        .bind(end)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(
        rows.into_iter()
            .map(|r| DailyRevenue {
                date: r.date,
                completed: r.completed,
                revenue: Money(r.revenue),
            })
            .collect(),
    ))
}

#[derive(sqlx::FromRow)]
struct PerformanceRow {
    employee_id: Uuid,
    employee_name: String,
    completed: i64,
    canceled: i64,
    revenue: i64,
}

/// GET /api/v1/establishments/:eid/dashboard/employee-performance
pub async fn employee_performance(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<DateRangeQuery>,
) -> Result<Json<Vec<EmployeePerformance>>, AppError> {
    tracing::info!(
        "GET /establishments/{}/dashboard/employee-performance - {:?}",
        eid,
        params
    );
    let (_, start, end) = scoped_range(&state, &auth, eid, &params).await?;

    let rows = sqlx::query_as::<_, PerformanceRow>(
        r#"
        SELECT e.id AS employee_id,
               e.name AS employee_name,
               COUNT(a.id) FILTER (WHERE a.status = 'completed') AS completed,
               COUNT(a.id) FILTER (WHERE a.status = 'canceled') AS canceled,
               COALESCE(SUM(a.paid_amount_cents) FILTER (WHERE a.status = 'completed'), 0)::BIGINT AS revenue
        FROM employees e
        LEFT JOIN appointments a
               ON a.employee_id = e.id AND a.date BETWEEN $2 AND $3
        WHERE e.establishment_id = $1
        GROUP BY e.id, e.name
        ORDER BY revenue DESC, completed DESC, e.name
        "#,
    )
    .bind(eid)
    .bind(start)
    .bind(end)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|r| EmployeePerformance {
                employee_id: r.employee_id,
                employee_name: r.employee_name,
                completed: r.completed,
                canceled: r.canceled,
                revenue: Money(r.revenue),
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_ticket_is_zero_without_completions() {
        assert_eq!(average_ticket_cents(0, 0), 0);
        assert_eq!(average_ticket_cents(5000, 0), 0);
    }

    #[test]
    fn average_ticket_rounds_half_up() {
        assert_eq!(average_ticket_cents(10000, 2), 5000);
        assert_eq!(average_ticket_cents(10001, 2), 5001);
        assert_eq!(average_ticket_cents(10000, 3), 3333);
        assert_eq!(average_ticket_cents(20000, 3), 6667);
    }

    #[test]
    fn top_limit_is_clamped() {
        assert_eq!(top_limit(None), 5);
        assert_eq!(top_limit(Some(0)), 1);
        assert_eq!(top_limit(Some(500)), 50);
    }
}
