//! Public storefront under `/api/v1/public/:slug`.
//!
//! No authentication. Customers identify themselves by phone number, which
//! is normalized before any lookup.

use crate::api_models::*;
use crate::appointment_handler::{availability_for, load_details, APPOINTMENT_DETAILS_SELECT};
use crate::customer_handler::{loyalty_balance_of, package_balances, upsert_customer_by_phone};
use crate::db_storage::{AppointmentStorage, NewBooking};
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::lifecycle::CancelActor;
use crate::models::*;
use crate::scheduling::{self, SlotPolicy};
use crate::validation;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// Resolves a storefront slug, going through the establishment cache.
pub async fn establishment_by_slug(state: &AppState, slug: &str) -> Result<Establishment, AppError> {
    if let Some(cached) = state.establishment_cache.get(slug).await {
        return Ok(cached);
    }

    let establishment =
        sqlx::query_as::<_, Establishment>("SELECT * FROM establishments WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Establishment '{}' not found", slug)))?;

    state
        .establishment_cache
        .insert(slug.to_string(), establishment.clone())
        .await;

    Ok(establishment)
}

/// GET /api/v1/public/:slug
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<PublicEstablishment>, AppError> {
    tracing::info!("GET /public/{}", slug);
    let establishment = establishment_by_slug(&state, &slug).await?;
    Ok(Json(PublicEstablishment::from(&establishment)))
}

/// GET /api/v1/public/:slug/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Service>>, AppError> {
    tracing::info!("GET /public/{}/services", slug);
    let establishment = establishment_by_slug(&state, &slug).await?;

    let services = sqlx::query_as::<_, Service>(
        "SELECT * FROM services WHERE establishment_id = $1 AND active ORDER BY name",
    )
    .bind(establishment.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(services))
}

/// GET /api/v1/public/:slug/employees
pub async fn list_employees(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(params): Query<PublicEmployeeQuery>,
) -> Result<Json<Vec<PublicEmployee>>, AppError> {
    tracing::info!("GET /public/{}/employees - {:?}", slug, params);
    let establishment = establishment_by_slug(&state, &slug).await?;

    let employees = sqlx::query_as::<_, (Uuid, String)>(
        r#"
        SELECT e.id, e.name FROM employees e
        WHERE e.establishment_id = $1 AND e.active
          AND ($2::uuid IS NULL OR EXISTS (
              SELECT 1 FROM employee_services es
              WHERE es.employee_id = e.id AND es.service_id = $2
          ))
        ORDER BY e.name
        "#,
    )
    .bind(establishment.id)
    .bind(params.service_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        employees
            .into_iter()
            .map(|(id, name)| PublicEmployee { id, name })
            .collect(),
    ))
}

/// GET /api/v1/public/:slug/availability
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    tracing::info!(
        "GET /public/{}/availability - service {} on {}",
        slug,
        query.service_id,
        query.date
    );
    let establishment = establishment_by_slug(&state, &slug).await?;
    Ok(Json(availability_for(&state.db, &establishment, &query).await?))
}

/// POST /api/v1/public/:slug/appointments
///
/// Books on behalf of a customer identified by phone. Without an
/// `employee_id`, the first employee by name who is free at that time is
/// assigned.
pub async fn book(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(req): Json<PublicBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    tracing::info!(
        "POST /public/{}/appointments - service {} at {} {}",
        slug,
        req.service_id,
        req.date,
        req.time
    );
    let establishment = establishment_by_slug(&state, &slug).await?;

    let date = validation::parse_date(&req.date)?;
    let start = validation::parse_time(&req.time)?;
    let name = validation::require_name("customer.name", &req.customer.name)?;
    let phone = validation::normalize_phone(&req.customer.phone)?;
    let email = validation::normalize_email(req.customer.email.as_deref())?;
    let now = establishment.local_now();

    let candidates = match req.employee_id {
        Some(id) => vec![id],
        None => {
            let mut conn = state.db.acquire().await?;
            let service =
                scheduling::load_service(&mut conn, establishment.id, req.service_id).await?;
            let slots = scheduling::compute_availability(
                &mut conn,
                &establishment,
                &service,
                date,
                None,
                now,
            )
            .await?;
            slots
                .into_iter()
                .find(|s| s.start == start)
                .map(|s| s.employee_ids)
                .unwrap_or_default()
        }
    };
    if candidates.is_empty() {
        tracing::warn!(
            "No employee free for service {} at {} {}",
            req.service_id,
            date,
            req.time
        );
        return Err(AppError::Conflict(
            "The selected time is not available".to_string(),
        ));
    }

    let customer =
        upsert_customer_by_phone(&state.db, establishment.id, &name, &phone, email).await?;

    let booking = NewBooking {
        customer_id: customer.id,
        employee_id: candidates[0],
        service_id: req.service_id,
        date,
        start,
        price_cents: None,
        customer_service_package_id: req.customer_service_package_id,
        notes: req.notes,
        policy: SlotPolicy::Storefront,
    };

    let storage = AppointmentStorage::new(state.db.clone());
    let appointment = storage
        .book_first_available(&establishment, &candidates, booking, now)
        .await
        .map_err(|e| {
            tracing::warn!("Storefront booking on '{}' rejected: {}", slug, e);
            e
        })?;

    let details = load_details(&state.db, establishment.id, appointment.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingResponse {
            employee_name: details.employee_name,
            service_name: details.service_name,
            appointment: details.appointment,
        }),
    ))
}

/// POST /api/v1/public/:slug/appointments/:appointment_id/cancel
///
/// The phone must match the appointment's customer, and the appointment
/// must not have started yet.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path((slug, appointment_id)): Path<(String, Uuid)>,
    Json(req): Json<PublicCancelRequest>,
) -> Result<Json<Appointment>, AppError> {
    tracing::info!("POST /public/{}/appointments/{}/cancel", slug, appointment_id);
    let establishment = establishment_by_slug(&state, &slug).await?;
    let phone = validation::normalize_phone(&req.phone)?;

    let storage = AppointmentStorage::new(state.db.clone());
    let appointment = storage
        .cancel(
            &establishment,
            appointment_id,
            CancelActor::Customer { phone },
            establishment.local_now(),
        )
        .await?;

    Ok(Json(appointment))
}

/// GET /api/v1/public/:slug/customer?phone=
///
/// Upcoming appointments, loyalty balance and usable packages.
pub async fn customer_overview(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(params): Query<PhoneQuery>,
) -> Result<Json<CustomerOverview>, AppError> {
    tracing::info!("GET /public/{}/customer", slug);
    let establishment = establishment_by_slug(&state, &slug).await?;
    let phone = validation::normalize_phone(&params.phone)?;

    let customer = sqlx::query_as::<_, Customer>(
        "SELECT * FROM customers WHERE establishment_id = $1 AND phone = $2",
    )
    .bind(establishment.id)
    .bind(&phone)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Customer not found".to_string()))?;

    let now = establishment.local_now();
    let sql = format!(
        r#"{}
        WHERE a.establishment_id = $1
          AND a.customer_id = $2
          AND a.status = 'scheduled'
          AND (a.date > $3 OR (a.date = $3 AND a.start_time > $4))
        ORDER BY a.date, a.start_time
        "#,
        APPOINTMENT_DETAILS_SELECT
    );
    let upcoming = sqlx::query_as::<_, AppointmentDetails>(&sql)
        .bind(establishment.id)
        .bind(customer.id)
        .bind(now.date())
        .bind(now.time())
        .fetch_all(&state.db)
        .await?;

    let loyalty = loyalty_balance_of(&state.db, establishment.id, customer.id).await?;
    let packages =
        package_balances(&state.db, establishment.id, customer.id, now.date(), true).await?;

    Ok(Json(CustomerOverview {
        name: customer.name,
        upcoming,
        loyalty,
        packages,
    }))
}
