use crate::api_models::*;
use crate::auth::AuthContext;
use crate::db_storage::{AppointmentStorage, NewBooking};
use crate::errors::AppError;
use crate::handlers::{load_establishment, AppState};
use crate::lifecycle::CancelActor;
use crate::models::*;
use crate::scheduling::{self, SlotPolicy};
use crate::validation;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Appointment columns joined with the display names used in listings.
pub const APPOINTMENT_DETAILS_SELECT: &str = r#"
    SELECT a.*,
           c.name AS customer_name,
           c.phone AS customer_phone,
           e.name AS employee_name,
           s.name AS service_name
    FROM appointments a
    JOIN customers c ON c.id = a.customer_id
    JOIN employees e ON e.id = a.employee_id
    JOIN services s ON s.id = a.service_id
"#;

pub async fn load_details(
    db: &PgPool,
    establishment_id: Uuid,
    appointment_id: Uuid,
) -> Result<AppointmentDetails, AppError> {
    let sql = format!(
        "{} WHERE a.id = $1 AND a.establishment_id = $2",
        APPOINTMENT_DETAILS_SELECT
    );
    sqlx::query_as::<_, AppointmentDetails>(&sql)
        .bind(appointment_id)
        .bind(establishment_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Appointment not found".to_string()))
}

/// Free slots for a service on a date, shared by back-office and storefront.
pub async fn availability_for(
    db: &PgPool,
    establishment: &Establishment,
    query: &AvailabilityQuery,
) -> Result<AvailabilityResponse, AppError> {
    let date = validation::parse_date(&query.date)?;
    let now = establishment.local_now();

    let mut conn = db.acquire().await?;
    let service = scheduling::load_service(&mut conn, establishment.id, query.service_id).await?;
    let slots = scheduling::compute_availability(
        &mut conn,
        establishment,
        &service,
        date,
        query.employee_id,
        now,
    )
    .await?;

    Ok(AvailabilityResponse {
        date,
        service_id: service.id,
        duration_minutes: service.duration_minutes,
        slots,
    })
}

/// GET /api/v1/establishments/:eid/availability
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    tracing::info!(
        "GET /establishments/{}/availability - service {} on {}",
        eid,
        query.service_id,
        query.date
    );
    let establishment = load_establishment(&state, &auth, eid).await?;
    Ok(Json(availability_for(&state.db, &establishment, &query).await?))
}

/// GET /api/v1/establishments/:eid/appointments
///
/// Lists appointments between `start_date` and `end_date` inclusive.
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<AppointmentListQuery>,
) -> Result<Json<Vec<AppointmentDetails>>, AppError> {
    tracing::info!("GET /establishments/{}/appointments - {:?}", eid, params);
    auth.require_establishment(eid)?;

    let (start, end) = validation::parse_date_range(&params.start_date, &params.end_date)?;
    let status = params
        .status
        .as_deref()
        .map(str::parse::<AppointmentStatus>)
        .transpose()?;

    let sql = format!(
        r#"{}
        WHERE a.establishment_id = $1
          AND a.date BETWEEN $2 AND $3
          AND ($4::text IS NULL OR a.status = $4)
          AND ($5::uuid IS NULL OR a.employee_id = $5)
          AND ($6::uuid IS NULL OR a.customer_id = $6)
        ORDER BY a.date, a.start_time, e.name
        "#,
        APPOINTMENT_DETAILS_SELECT
    );

    let appointments = sqlx::query_as::<_, AppointmentDetails>(&sql)
        .bind(eid)
        .bind(start)
        .bind(end)
        .bind(status.map(|s| s.as_str()))
        .bind(params.employee_id)
        .bind(params.customer_id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(appointments))
}

/// POST /api/v1/establishments/:eid/appointments
///
/// Back-office booking. Any free start time is accepted, including past
/// dates for record keeping.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentDetails>), AppError> {
    tracing::info!(
        "POST /establishments/{}/appointments - employee {} service {} at {} {}",
        eid,
        req.employee_id,
        req.service_id,
        req.date,
        req.time
    );
    let establishment = load_establishment(&state, &auth, eid).await?;

    let booking = NewBooking {
        customer_id: req.customer_id,
        employee_id: req.employee_id,
        service_id: req.service_id,
        date: validation::parse_date(&req.date)?,
        start: validation::parse_time(&req.time)?,
        price_cents: req.price.map(|p| p.cents()),
        customer_service_package_id: req.customer_service_package_id,
        notes: req.notes,
        policy: SlotPolicy::BackOffice,
    };

    let storage = AppointmentStorage::new(state.db.clone());
    let appointment = storage
        .book(&establishment, booking, establishment.local_now())
        .await
        .map_err(|e| {
            tracing::warn!("Back-office booking rejected: {}", e);
            e
        })?;

    Ok((
        StatusCode::CREATED,
        Json(load_details(&state.db, eid, appointment.id).await?),
    ))
}

/// GET /api/v1/establishments/:eid/appointments/:appointment_id
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, appointment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AppointmentDetails>, AppError> {
    tracing::info!("GET /establishments/{}/appointments/{}", eid, appointment_id);
    auth.require_establishment(eid)?;
    Ok(Json(load_details(&state.db, eid, appointment_id).await?))
}

/// POST /api/v1/establishments/:eid/appointments/:appointment_id/reschedule
pub async fn reschedule_appointment(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, appointment_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<AppointmentDetails>, AppError> {
    tracing::info!(
        "POST /establishments/{}/appointments/{}/reschedule - {} {}",
        eid,
        appointment_id,
        req.date,
        req.time
    );
    let establishment = load_establishment(&state, &auth, eid).await?;

    let date = validation::parse_date(&req.date)?;
    let start = validation::parse_time(&req.time)?;

    let storage = AppointmentStorage::new(state.db.clone());
    let appointment = storage
        .reschedule(
            &establishment,
            appointment_id,
            req.employee_id,
            date,
            start,
            establishment.local_now(),
        )
        .await?;

    Ok(Json(load_details(&state.db, eid, appointment.id).await?))
}

/// POST /api/v1/establishments/:eid/appointments/:appointment_id/checkin
///
/// Completes the appointment and settles payment, packages and loyalty.
pub async fn checkin_appointment(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, appointment_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CheckinRequest>,
) -> Result<Json<CheckinResponse>, AppError> {
    tracing::info!(
        "POST /establishments/{}/appointments/{}/checkin - {:?}",
        eid,
        appointment_id,
        req
    );
    let establishment = load_establishment(&state, &auth, eid).await?;

    let storage = AppointmentStorage::new(state.db.clone());
    let response = storage
        .checkin(
            &establishment,
            appointment_id,
            &req,
            establishment.local_now().date(),
        )
        .await
        .map_err(|e| {
            tracing::warn!("Checkin of {} rejected: {}", appointment_id, e);
            e
        })?;

    Ok(Json(response))
}

/// POST /api/v1/establishments/:eid/appointments/:appointment_id/cancel
///
/// Staff may cancel at any time, including after the start (no-shows).
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, appointment_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Appointment>, AppError> {
    tracing::info!("POST /establishments/{}/appointments/{}/cancel", eid, appointment_id);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let reason = body
        .and_then(|Json(b)| b.reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let storage = AppointmentStorage::new(state.db.clone());
    let appointment = storage
        .cancel(
            &establishment,
            appointment_id,
            CancelActor::Staff { reason },
            establishment.local_now(),
        )
        .await?;

    Ok(Json(appointment))
}
